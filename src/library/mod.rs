//! Recordings library
//!
//! Lists the recordings directory and manages the sidecar metadata record
//! kept next to each media file (`<file>.meta.json`).

pub mod probe;

use crate::convert::{ConversionCoordinator, ConversionStatus};
use crate::convert::ffmpeg::TARGET_EXTENSION;
use crate::recorder::naming::RECORDING_EXTENSION;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use probe::{probe, TechnicalMetadata};

const SIDECAR_SUFFIX: &str = ".meta.json";

/// Library-related errors
#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("Recording not found: {0}")]
    NotFound(String),

    #[error("Invalid recording name: {0}")]
    InvalidName(String),

    #[error("Recording {0} is still being written")]
    RecordingActive(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LibraryError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            LibraryError::NotFound(_) => "RECORDING_NOT_FOUND",
            LibraryError::InvalidName(_) => "INVALID_NAME",
            LibraryError::RecordingActive(_) => "RECORDING_ACTIVE",
            LibraryError::Io(_) => "IO_ERROR",
            LibraryError::Json(_) => "SERIALIZATION_ERROR",
        }
    }
}

pub type LibraryResult<T> = Result<T, LibraryError>;

/// Sidecar metadata path of a media file
pub fn sidecar_path(media: &Path) -> PathBuf {
    let mut name = media.file_name().unwrap_or_default().to_os_string();
    name.push(SIDECAR_SUFFIX);
    media.with_file_name(name)
}

/// One media file in the recordings directory
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingEntry {
    pub name: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
    pub url: String,
    pub converted_url: Option<String>,
    pub is_active: bool,
    /// Technical metadata overlaid by the sidecar record
    pub metadata: Value,
    pub conversion: Option<ConversionStatus>,
}

pub struct RecordingsLibrary {
    dir: PathBuf,
    ffprobe: String,
}

impl RecordingsLibrary {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            ffprobe: "ffprobe".to_string(),
        }
    }

    /// Use a different ffprobe binary
    pub fn with_ffprobe(mut self, program: impl Into<String>) -> Self {
        self.ffprobe = program.into();
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of recording `name`, which must be a plain media file name
    pub fn path_of(&self, name: &str) -> LibraryResult<PathBuf> {
        let plain = !name.is_empty()
            && !name.starts_with('.')
            && !name.contains(['/', '\\', '\0'])
            && Path::new(name).file_name().and_then(|n| n.to_str()) == Some(name);
        if !plain || !is_media_file(Path::new(name)) {
            return Err(LibraryError::InvalidName(name.to_string()));
        }
        Ok(self.dir.join(name))
    }

    /// Like [`path_of`](Self::path_of), but the file must exist
    pub async fn resolve(&self, name: &str) -> LibraryResult<PathBuf> {
        let path = self.path_of(name)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(path),
            Ok(_) => Err(LibraryError::NotFound(name.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(LibraryError::NotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Every recording, newest first.
    ///
    /// `active` are output paths of live sessions.
    pub async fn list(
        &self,
        active: &[PathBuf],
        conversions: Option<&ConversionCoordinator>,
    ) -> LibraryResult<Vec<RecordingEntry>> {
        let mut entries = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
            Err(e) => return Err(e.into()),
        };

        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if !is_media_file(&path) {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                continue;
            };
            let meta = match item.metadata().await {
                Ok(meta) if meta.is_file() => meta,
                Ok(_) => continue,
                Err(e) => {
                    // deleted or converted while listing
                    tracing::debug!("Skipping {:?}: {}", path, e);
                    continue;
                }
            };

            let created_at = meta
                .created()
                .or_else(|_| meta.modified())
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());

            let converted = path.with_extension(TARGET_EXTENSION);
            let converted_url = if has_extension(&path, RECORDING_EXTENSION)
                && tokio::fs::try_exists(&converted).await.unwrap_or(false)
            {
                converted
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(recording_url)
            } else {
                None
            };

            let is_active = active.iter().any(|p| p.file_name() == path.file_name());
            let technical = if is_active {
                None
            } else {
                probe::probe(&self.ffprobe, &path).await
            };
            let metadata = merge_metadata(technical.as_ref(), load_sidecar(&path).await, None);

            let conversion = match conversions {
                Some(conversions) => conversions.status(&path).await,
                None => None,
            };

            entries.push(RecordingEntry {
                url: recording_url(&name),
                name,
                size: meta.len(),
                created_at,
                converted_url,
                is_active,
                metadata: Value::Object(metadata),
                conversion,
            });
        }

        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(entries)
    }

    /// Merge `fields` into the recording's sidecar record and return the
    /// stored result
    pub async fn update_metadata(&self, name: &str, fields: Map<String, Value>) -> LibraryResult<Value> {
        let path = self.resolve(name).await?;
        let technical = probe::probe(&self.ffprobe, &path).await;
        let existing = load_sidecar(&path).await;

        let mut merged = merge_metadata(technical.as_ref(), existing, Some(fields));
        merged.insert("updatedAt".to_string(), Value::String(Utc::now().to_rfc3339()));
        let merged = Value::Object(merged);

        tokio::fs::write(sidecar_path(&path), serde_json::to_string_pretty(&merged)?).await?;
        tracing::info!("Updated metadata of {}", name);
        Ok(merged)
    }

    /// Delete a recording and its sidecar record
    pub async fn delete(&self, name: &str, active: &[PathBuf]) -> LibraryResult<()> {
        let path = self.resolve(name).await?;
        if active.iter().any(|p| p.file_name() == path.file_name()) {
            return Err(LibraryError::RecordingActive(name.to_string()));
        }

        tokio::fs::remove_file(&path).await?;
        let sidecar = sidecar_path(&path);
        if let Err(e) = tokio::fs::remove_file(&sidecar).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to remove metadata {:?}: {}", sidecar, e);
            }
        }

        tracing::info!("Deleted recording {}", name);
        Ok(())
    }
}

/// Technical fields, then the stored record, then caller fields; later wins
fn merge_metadata(
    technical: Option<&TechnicalMetadata>,
    stored: Option<Map<String, Value>>,
    fields: Option<Map<String, Value>>,
) -> Map<String, Value> {
    let mut merged = match technical.map(serde_json::to_value) {
        Some(Ok(Value::Object(map))) => map,
        _ => Map::new(),
    };
    for layer in [stored, fields].into_iter().flatten() {
        merged.extend(layer);
    }
    merged
}

/// Sidecar record of `media`, `None` if absent or unreadable
async fn load_sidecar(media: &Path) -> Option<Map<String, Value>> {
    let content = tokio::fs::read_to_string(sidecar_path(media)).await.ok()?;
    match serde_json::from_str::<Value>(&content) {
        Ok(Value::Object(map)) => Some(map),
        Ok(_) => None,
        Err(e) => {
            tracing::warn!("Ignoring malformed metadata for {:?}: {}", media, e);
            None
        }
    }
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}

fn is_media_file(path: &Path) -> bool {
    has_extension(path, RECORDING_EXTENSION) || has_extension(path, TARGET_EXTENSION)
}

/// URL a recording is served under
pub fn recording_url(name: &str) -> String {
    format!("/recordings/{}", urlencoding::encode(name))
}
