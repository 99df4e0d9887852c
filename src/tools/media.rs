//! Local media files: MIME/extension mapping and atomic download writes.
//!
//! Downloads are streamed into a hidden `.part` file next to the target and
//! renamed into place once complete, so a reader never sees a partial file at
//! the returned path. Files are caller-owned after a successful write; this
//! module never deletes them.

use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempPath;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::{debug, warn};

const MIME_EXTENSIONS: &[(&str, &str)] = &[
    ("image/jpeg", "jpg"),
    ("image/png", "png"),
    ("image/webp", "webp"),
    ("image/gif", "gif"),
    ("video/mp4", "mp4"),
    ("video/3gpp", "3gp"),
    ("video/quicktime", "mov"),
    ("audio/ogg", "ogg"),
    ("audio/mpeg", "mp3"),
    ("audio/mp4", "m4a"),
    ("audio/aac", "aac"),
    ("audio/wav", "wav"),
    ("audio/flac", "flac"),
    ("application/pdf", "pdf"),
    ("application/zip", "zip"),
    ("text/plain", "txt"),
    ("text/csv", "csv"),
];

/// File extension for a MIME type, ignoring parameters such as `codecs=`.
pub fn extension_for_mime(mime_type: &str) -> &'static str {
    let essence = mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    MIME_EXTENSIONS
        .iter()
        .find(|(mime, _)| *mime == essence)
        .map_or("bin", |(_, ext)| ext)
}

/// MIME type implied by a file extension, if it is a known one.
pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let ext = match ext.as_str() {
        "jpeg" => "jpg",
        "opus" | "oga" => "ogg",
        other => other,
    };
    MIME_EXTENSIONS
        .iter()
        .find(|(_, known)| *known == ext)
        .map(|(mime, _)| *mime)
}

/// Make a name safe to use as a single path component.
///
/// Path separators and control characters become underscores and leading
/// dots are stripped so the file stays visible inside the target directory.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c == '/' || c == '\\' || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect::<String>()
        .trim_start_matches('.')
        .trim()
        .to_owned()
}

/// A file written by [`MediaStore::persist`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedFile {
    /// Final location.
    pub path: PathBuf,
    /// Bytes written.
    pub size_bytes: u64,
}

/// Directory that receives downloaded media.
#[derive(Debug, Clone)]
pub struct MediaStore {
    dir: PathBuf,
}

impl MediaStore {
    /// Store files under `dir`, creating it on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Target directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File name for the attachment of `message_id`.
    ///
    /// Prefers the sender's original name; falls back to the message id plus
    /// an extension derived from the MIME type.
    pub fn file_name_for(message_id: &str, original: Option<&str>, mime_type: &str) -> String {
        let id = sanitize_filename(message_id);
        let id = if id.is_empty() { "media".to_owned() } else { id };
        match original.map(sanitize_filename).filter(|n| !n.is_empty()) {
            Some(name) => format!("{id}_{name}"),
            None => format!("{id}.{}", extension_for_mime(mime_type)),
        }
    }

    /// Write everything `reader` yields to `file_name` inside the store.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if the directory cannot be created,
    /// the stream fails, or the final rename fails. In every error case the
    /// temporary file is removed and nothing exists at the target path. The
    /// same holds if the returned future is dropped before it completes.
    pub async fn persist<R>(&self, file_name: &str, mut reader: R) -> io::Result<PersistedFile>
    where
        R: AsyncRead + Unpin,
    {
        tokio::fs::create_dir_all(&self.dir).await?;

        let target = self.dir.join(file_name);
        // Removed on drop unless the rename below succeeds.
        let temp = TempPath::from_path(
            self.dir
                .join(format!(".{file_name}.{}.part", uuid::Uuid::new_v4().simple())),
        );

        let written = match write_temp(&temp, &mut reader).await {
            Ok(n) => n,
            Err(e) => {
                discard(temp);
                return Err(e);
            }
        };

        if let Err(e) = tokio::fs::rename(&temp, &target).await {
            discard(temp);
            return Err(e);
        }
        // The rename consumed the file; disarm the guard.
        let _ = temp.keep();

        debug!(path = %target.display(), bytes = written, "media persisted");
        Ok(PersistedFile {
            path: target,
            size_bytes: written,
        })
    }
}

async fn write_temp<R>(temp: &Path, reader: &mut R) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
{
    let mut file = tokio::fs::File::create(temp).await?;
    let written = tokio::io::copy(reader, &mut file).await?;
    file.flush().await?;
    file.sync_all().await?;
    Ok(written)
}

fn discard(temp: TempPath) {
    let path = temp.to_path_buf();
    if let Err(e) = temp.close() {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to remove partial download");
        }
    }
}
