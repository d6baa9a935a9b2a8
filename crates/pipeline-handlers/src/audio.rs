//! `ffmpeg`-backed audio extraction, normalization, and chunking for the
//! transcription handler.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::warn;

use crate::error::HandlerError;

/// Video container extensions that require an audio-extraction pass before
/// transcription.
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "avi", "mkv", "webm"];

/// Files larger than this are split into chunks before being sent to the
/// speech adapter.
pub const CHUNK_THRESHOLD_BYTES: u64 = 4 * 1024 * 1024;

/// Chunk length used when splitting an optimized recording.
pub const CHUNK_SECONDS: u64 = 300;

/// Whether `path`'s extension marks it as a video container needing audio
/// extraction first.
#[must_use]
pub fn is_video(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| VIDEO_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

async fn run_ffmpeg(operation: &'static str, args: &[&str]) -> Result<(), HandlerError> {
    let output = Command::new("ffmpeg")
        .args(["-hide_banner", "-loglevel", "error", "-y"])
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|source| HandlerError::Io {
            operation,
            path: PathBuf::new(),
            source,
        })?;

    if output.status.success() {
        Ok(())
    } else {
        Err(HandlerError::Ffmpeg {
            operation,
            status: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Extract MP3 audio from a video container. Returns the extracted file's
/// path alongside the input.
pub async fn extract_audio(input: &Path, work_dir: &Path) -> Result<PathBuf, HandlerError> {
    let output = work_dir.join("extracted.mp3");
    run_ffmpeg(
        "handler.extract_audio",
        &[
            "-i",
            &input.to_string_lossy(),
            "-vn",
            "-acodec",
            "libmp3lame",
            &output.to_string_lossy(),
        ],
    )
    .await?;
    Ok(output)
}

/// Normalize an audio file to 16 kHz mono PCM WAV, the format the speech
/// adapter expects. On failure the caller should fall back to the
/// unoptimized input and log a warning rather than abort the handler.
pub async fn normalize_to_wav(input: &Path, work_dir: &Path) -> Result<PathBuf, HandlerError> {
    let output = work_dir.join("normalized.wav");
    run_ffmpeg(
        "handler.normalize_audio",
        &[
            "-i",
            &input.to_string_lossy(),
            "-ar",
            "16000",
            "-ac",
            "1",
            "-acodec",
            "pcm_s16le",
            &output.to_string_lossy(),
        ],
    )
    .await?;
    Ok(output)
}

/// Best-effort optimization pipeline: extract audio if `input` is a video
/// container, then normalize. Any failure at either step falls back to the
/// best input available so far and logs a warning, per the handler's
/// "continue unoptimized" contract.
pub async fn optimize(input: &Path, work_dir: &Path) -> PathBuf {
    let audio_source = if is_video(input) {
        match extract_audio(input, work_dir).await {
            Ok(extracted) => extracted,
            Err(err) => {
                warn!(error = %err, "audio extraction failed, continuing with original file");
                return input.to_path_buf();
            }
        }
    } else {
        input.to_path_buf()
    };

    match normalize_to_wav(&audio_source, work_dir).await {
        Ok(normalized) => normalized,
        Err(err) => {
            warn!(error = %err, "audio normalization failed, continuing unoptimized");
            audio_source
        }
    }
}

/// Probe a media file's duration in seconds via `ffprobe`.
pub async fn probe_duration_seconds(path: &Path) -> Result<f64, HandlerError> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|source| HandlerError::Io {
            operation: "handler.probe_duration",
            path: path.to_path_buf(),
            source,
        })?;

    if !output.status.success() {
        return Err(HandlerError::Ffmpeg {
            operation: "handler.probe_duration",
            status: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }

    String::from_utf8_lossy(&output.stdout)
        .trim()
        .parse()
        .map_err(|_| HandlerError::Ffmpeg {
            operation: "handler.probe_duration",
            status: output.status.code(),
            stderr: "ffprobe returned a non-numeric duration".to_string(),
        })
}

/// Split `input` into `CHUNK_SECONDS`-long pieces via stream-copy ffmpeg
/// segmentation, writing `chunk-000.wav`, `chunk-001.wav`, ... into
/// `work_dir`. Returns the chunk paths in order.
pub async fn split_into_chunks(input: &Path, work_dir: &Path) -> Result<Vec<PathBuf>, HandlerError> {
    let pattern = work_dir.join("chunk-%03d.wav");
    run_ffmpeg(
        "handler.split_chunks",
        &[
            "-i",
            &input.to_string_lossy(),
            "-f",
            "segment",
            "-segment_time",
            &CHUNK_SECONDS.to_string(),
            "-c",
            "copy",
            &pattern.to_string_lossy(),
        ],
    )
    .await?;

    let mut entries = tokio::fs::read_dir(work_dir)
        .await
        .map_err(|source| HandlerError::Io {
            operation: "handler.split_chunks",
            path: work_dir.to_path_buf(),
            source,
        })?;
    let mut chunks = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(|source| HandlerError::Io {
        operation: "handler.split_chunks",
        path: work_dir.to_path_buf(),
        source,
    })? {
        let path = entry.path();
        if path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with("chunk-"))
        {
            chunks.push(path);
        }
    }
    chunks.sort();
    Ok(chunks)
}

/// Decide single-shot vs chunked transcription based on file size, per the
/// 4 MiB threshold.
pub async fn chunk_paths_for(
    optimized: &Path,
    work_dir: &Path,
) -> Result<Vec<PathBuf>, HandlerError> {
    let metadata = tokio::fs::metadata(optimized)
        .await
        .map_err(|source| HandlerError::Io {
            operation: "handler.stat_optimized",
            path: optimized.to_path_buf(),
            source,
        })?;

    if metadata.len() > CHUNK_THRESHOLD_BYTES {
        split_into_chunks(optimized, work_dir).await
    } else {
        Ok(vec![optimized.to_path_buf()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_video_extensions_case_insensitively() {
        assert!(is_video(Path::new("clip.MP4")));
        assert!(is_video(Path::new("clip.mkv")));
        assert!(!is_video(Path::new("clip.wav")));
        assert!(!is_video(Path::new("clip.mp3")));
    }
}
