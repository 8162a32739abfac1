//! One-shot, path-based entry points.
//!
//! ## Why these as well as the orchestrator?
//!
//! [`crate::Orchestrator`] with a [`crate::PipelineRun`] is the full API:
//! explicit state, swappable engines, a run that can be inspected after it
//! ends. Most callers just want "this file in, that artifact out". The
//! functions here load the file, run one tool with a fresh run, and hand
//! back the result; [`write_artifact`] puts it on disk without ever leaving
//! a half-written file behind.

use crate::config::PipelineConfig;
use crate::error::DocToolsError;
use crate::orchestrator::{Orchestrator, PipelineRun};
use crate::output::{CompressionOutput, DocumentInfo, EncodedArtifact, ExtractionResult};
use crate::pipeline::encode::{CompressionTarget, OutputFormat};
use crate::progress::ProgressSink;
use crate::source::SourceDocument;
use std::path::{Path, PathBuf};
use tracing::info;

/// Convert an image file to `format`.
pub async fn convert_file(
    input: impl AsRef<Path>,
    format: OutputFormat,
    config: &PipelineConfig,
    sink: &dyn ProgressSink,
) -> Result<EncodedArtifact, DocToolsError> {
    let mut run = PipelineRun::new();
    run.load_path(input).await?;
    Orchestrator::new(config.clone())
        .convert(&mut run, format, sink)
        .await
}

/// Compress an image or PDF file. See [`Orchestrator::compress`].
pub async fn compress_file(
    input: impl AsRef<Path>,
    target: Option<CompressionTarget>,
    config: &PipelineConfig,
    sink: &dyn ProgressSink,
) -> Result<CompressionOutput, DocToolsError> {
    let mut run = PipelineRun::new();
    run.load_path(input).await?;
    Orchestrator::new(config.clone())
        .compress(&mut run, target, sink)
        .await
}

/// OCR an image or PDF file.
pub async fn extract_file(
    input: impl AsRef<Path>,
    config: &PipelineConfig,
    sink: &dyn ProgressSink,
) -> Result<ExtractionResult, DocToolsError> {
    let mut run = PipelineRun::new();
    run.load_path(input).await?;
    Orchestrator::new(config.clone()).extract(&mut run, sink).await
}

/// Describe a file without processing it.
pub async fn inspect_file(
    input: impl AsRef<Path>,
    config: &PipelineConfig,
) -> Result<DocumentInfo, DocToolsError> {
    let source = SourceDocument::from_path(input).await?;
    Orchestrator::new(config.clone()).inspect(&source).await
}

/// Synchronous wrapper around [`compress_file`].
///
/// Creates a temporary tokio runtime internally.
pub fn compress_file_sync(
    input: impl AsRef<Path>,
    target: Option<CompressionTarget>,
    config: &PipelineConfig,
    sink: &dyn ProgressSink,
) -> Result<CompressionOutput, DocToolsError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| DocToolsError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(compress_file(input, target, config, sink))
}

/// Where an artifact lands by default: its inferred filename, next to the input.
pub fn default_output_path(input: &Path, artifact_filename: &str) -> PathBuf {
    match input.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.join(artifact_filename),
        _ => PathBuf::from(artifact_filename),
    }
}

/// Write an artifact to `path`.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn write_artifact(
    artifact: &EncodedArtifact,
    path: impl AsRef<Path>,
) -> Result<PathBuf, DocToolsError> {
    let path = path.as_ref();
    let write_failed = |e: std::io::Error| DocToolsError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_failed)?;
    }

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    tokio::fs::write(&tmp_path, &artifact.bytes)
        .await
        .map_err(write_failed)?;
    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(write_failed(e));
    }

    info!("Wrote {} ({} bytes)", path.display(), artifact.size());
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::BudgetOutcome;
    use crate::progress::NoopProgress;
    use image::{DynamicImage, ImageFormat};
    use std::io::Cursor;

    fn artifact(bytes: &[u8]) -> EncodedArtifact {
        EncodedArtifact {
            bytes: bytes.to_vec(),
            format: OutputFormat::Png,
            filename: "x-converted.png".into(),
            width: 1,
            height: 1,
            quality: None,
            budget: BudgetOutcome::NotRequested,
        }
    }

    #[tokio::test]
    async fn write_artifact_creates_parents_and_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested/out/x-converted.png");

        let written = write_artifact(&artifact(b"abc"), &target).await.unwrap();
        assert_eq!(written, target);
        assert_eq!(std::fs::read(&target).unwrap(), b"abc");

        let leftovers: Vec<_> = std::fs::read_dir(target.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn write_artifact_overwrites_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a.bin");
        std::fs::write(&target, b"old contents").unwrap();
        write_artifact(&artifact(b"new"), &target).await.unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"new");
    }

    #[test]
    fn default_output_sits_next_to_input() {
        assert_eq!(
            default_output_path(Path::new("/data/photo.png"), "min-photo.jpg"),
            PathBuf::from("/data/min-photo.jpg")
        );
        assert_eq!(
            default_output_path(Path::new("photo.png"), "min-photo.jpg"),
            PathBuf::from("min-photo.jpg")
        );
    }

    #[tokio::test]
    async fn missing_input_is_file_not_found() {
        let err = convert_file(
            "/definitely/not/here.png",
            OutputFormat::Jpeg,
            &PipelineConfig::default(),
            &NoopProgress,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, DocToolsError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn convert_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("logo.png");
        let mut png = Vec::new();
        DynamicImage::new_rgba8(10, 10)
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .unwrap();
        std::fs::write(&input, png).unwrap();

        let config = PipelineConfig::default();
        let out = convert_file(&input, OutputFormat::Jpeg, &config, &NoopProgress)
            .await
            .unwrap();
        assert_eq!(out.filename, "logo-converted.jpg");
        assert!(out.bytes.starts_with(&[0xFF, 0xD8]));

        let path = write_artifact(&out, default_output_path(&input, &out.filename))
            .await
            .unwrap();
        assert!(path.exists());
    }

    #[test]
    fn sync_wrapper_runs_outside_a_runtime() {
        let err = compress_file_sync(
            "/definitely/not/here.pdf",
            None,
            &PipelineConfig::default(),
            &NoopProgress,
        )
        .unwrap_err();
        assert!(matches!(err, DocToolsError::FileNotFound { .. }));
    }
}
