//! Tests for `src/tools/media.rs`: atomic download writes.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};

use whatsapp_mcp::tools::media::MediaStore;

/// Yields some bytes, then never finishes.
struct Stalled {
    sent_prefix: bool,
}

impl AsyncRead for Stalled {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.sent_prefix {
            return Poll::Pending;
        }
        self.sent_prefix = true;
        buf.put_slice(b"first half of the file");
        Poll::Ready(Ok(()))
    }
}

/// Yields some bytes, then fails as if the connection dropped.
struct Interrupted {
    sent_prefix: bool,
}

impl AsyncRead for Interrupted {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.sent_prefix {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "stream cut off",
            )));
        }
        self.sent_prefix = true;
        buf.put_slice(b"first half of the file");
        Poll::Ready(Ok(()))
    }
}

fn entries(dir: &std::path::Path) -> Vec<String> {
    match std::fs::read_dir(dir) {
        Ok(rd) => rd
            .filter_map(Result::ok)
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect(),
        Err(_) => Vec::new(),
    }
}

#[tokio::test]
async fn persist_writes_the_whole_stream() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = MediaStore::new(dir.path().join("media"));

    let written = store
        .persist("abc.jpg", &b"complete contents"[..])
        .await
        .expect("persist");

    assert_eq!(written.path, dir.path().join("media").join("abc.jpg"));
    assert_eq!(written.size_bytes, 17);
    assert_eq!(
        std::fs::read(&written.path).expect("read back"),
        b"complete contents"
    );
    assert_eq!(entries(store.dir()), vec!["abc.jpg"]);
}

#[tokio::test]
async fn interrupted_write_leaves_nothing_behind() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = MediaStore::new(dir.path());

    let err = store
        .persist("abc.jpg", Interrupted { sent_prefix: false })
        .await
        .expect_err("stream fails midway");

    assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    assert!(!dir.path().join("abc.jpg").exists());
    assert!(entries(dir.path()).is_empty(), "{:?}", entries(dir.path()));
}

#[tokio::test]
async fn persist_replaces_an_existing_file_atomically() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = MediaStore::new(dir.path());
    std::fs::write(dir.path().join("abc.jpg"), b"old").expect("seed");

    store
        .persist("abc.jpg", &b"new"[..])
        .await
        .expect("persist");

    assert_eq!(std::fs::read(dir.path().join("abc.jpg")).expect("read"), b"new");
}

#[tokio::test]
async fn failed_write_keeps_the_previous_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = MediaStore::new(dir.path());
    std::fs::write(dir.path().join("abc.jpg"), b"old").expect("seed");

    let _ = store
        .persist("abc.jpg", Interrupted { sent_prefix: false })
        .await;

    assert_eq!(std::fs::read(dir.path().join("abc.jpg")).expect("read"), b"old");
    assert_eq!(entries(dir.path()), vec!["abc.jpg"]);
}

#[tokio::test]
async fn cancelled_write_leaves_nothing_behind() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = MediaStore::new(dir.path());

    let outcome = tokio::time::timeout(
        std::time::Duration::from_millis(100),
        store.persist("abc.jpg", Stalled { sent_prefix: false }),
    )
    .await;

    assert!(outcome.is_err(), "stalled stream must not complete");
    assert!(entries(dir.path()).is_empty(), "{:?}", entries(dir.path()));
}
