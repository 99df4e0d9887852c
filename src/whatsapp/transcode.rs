//! Audio transcoding for voice notes.
//!
//! WhatsApp voice notes must be Opus in an OGG container. Conversion is
//! delegated to an external `ffmpeg` binary. A missing binary is reported as
//! [`TranscodeError::Unavailable`] so callers can tell it apart from a file
//! ffmpeg could not decode. Dropping a conversion in flight kills ffmpeg.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tempfile::TempPath;
use tracing::{debug, warn};

/// Errors from a [`Transcoder`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TranscodeError {
    /// No transcoder is installed or it cannot be executed.
    #[error("audio transcoder unavailable: {0}")]
    Unavailable(String),

    /// The transcoder ran but could not convert the input.
    #[error("audio conversion failed: {0}")]
    Failed(String),
}

/// A converted voice note in a temporary file.
///
/// The file is deleted when this value is dropped.
#[derive(Debug)]
pub struct TranscodedAudio {
    path: TempPath,
}

impl TranscodedAudio {
    /// Wrap a temporary path holding Opus/OGG audio.
    pub fn new(path: TempPath) -> Self {
        Self { path }
    }

    /// Location of the converted file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Converts arbitrary audio into a voice-note compatible file.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Convert `input` to Opus/OGG.
    async fn to_voice_note(&self, input: &Path) -> Result<TranscodedAudio, TranscodeError>;
}

/// [`Transcoder`] backed by the `ffmpeg` command-line tool.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    binary: PathBuf,
}

impl FfmpegTranscoder {
    /// Use the given ffmpeg binary (a bare name is resolved through `PATH`).
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Arguments for a mono 24 kHz Opus voice note.
    fn arguments(input: &Path, output: &Path) -> Vec<std::ffi::OsString> {
        let mut args: Vec<std::ffi::OsString> = [
            "-y",
            "-hide_banner",
            "-loglevel",
            "error",
            "-i",
        ]
        .iter()
        .map(Into::into)
        .collect();
        args.push(input.into());
        args.extend(
            [
                "-vn",
                "-c:a",
                "libopus",
                "-b:a",
                "32k",
                "-ar",
                "24000",
                "-ac",
                "1",
                "-application",
                "voip",
            ]
            .iter()
            .map(Into::into),
        );
        args.push(output.into());
        args
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn to_voice_note(&self, input: &Path) -> Result<TranscodedAudio, TranscodeError> {
        let output = tempfile::Builder::new()
            .prefix("wa-voice-")
            .suffix(".ogg")
            .tempfile()
            .map_err(|e| TranscodeError::Failed(format!("cannot create temporary file: {e}")))?
            .into_temp_path();

        debug!(input = %input.display(), output = %output.display(), "running ffmpeg");

        let result = tokio::process::Command::new(&self.binary)
            .args(Self::arguments(input, &output))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await;

        let out = match result {
            Ok(out) => out,
            Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::PermissionDenied) => {
                warn!(binary = %self.binary.display(), error = %e, "ffmpeg not runnable");
                return Err(TranscodeError::Unavailable(format!(
                    "cannot run {}: {e}",
                    self.binary.display()
                )));
            }
            Err(e) => return Err(TranscodeError::Failed(e.to_string())),
        };

        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            return Err(TranscodeError::Failed(format!(
                "ffmpeg exited with {}: {}",
                out.status,
                stderr.trim()
            )));
        }

        Ok(TranscodedAudio::new(output))
    }
}

/// [`Transcoder`] used when transcoding is switched off in configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledTranscoder;

#[async_trait]
impl Transcoder for DisabledTranscoder {
    async fn to_voice_note(&self, _input: &Path) -> Result<TranscodedAudio, TranscodeError> {
        Err(TranscodeError::Unavailable(
            "audio transcoding is disabled in configuration".to_owned(),
        ))
    }
}
