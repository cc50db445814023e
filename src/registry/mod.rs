//! Stream registry
//!
//! Durable set of streams and service settings, backed by one JSON file.
//! Every mutation rewrites the whole file before returning.

pub mod schema;

use schema::{
    ConfigFile, LastRecording, RecordingStateRecord, Settings, StreamDescriptor, StreamUpdate,
};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;

/// Registry-related errors
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Stream not found: {0}")]
    StreamNotFound(String),

    #[error("Invalid stream: {0}")]
    InvalidStream(String),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

pub struct StreamRegistry {
    path: PathBuf,
    config: Mutex<ConfigFile>,
}

impl StreamRegistry {
    /// Load the registry from `path`, creating it with defaults if missing
    pub async fn open(path: &Path) -> RegistryResult<Self> {
        let config = match tokio::fs::read_to_string(path).await {
            Ok(content) => {
                let config: ConfigFile = serde_json::from_str(&content)?;
                tracing::debug!("Loaded {} streams from {:?}", config.streams.len(), path);
                config
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No registry at {:?}, creating one with defaults", path);
                let config = ConfigFile::default();
                write_config(path, &config).await?;
                config
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path: path.to_path_buf(),
            config: Mutex::new(config),
        })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Full copy of the current registry contents
    pub async fn snapshot(&self) -> ConfigFile {
        self.config.lock().await.clone()
    }

    pub async fn settings(&self) -> Settings {
        self.config.lock().await.settings.clone()
    }

    /// Directory recordings are written to
    pub async fn recordings_dir(&self) -> PathBuf {
        let recordings_path = self.config.lock().await.settings.recordings_path.clone();
        if recordings_path.is_absolute() {
            return recordings_path;
        }
        self.path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(recordings_path)
    }

    pub async fn list(&self) -> Vec<StreamDescriptor> {
        self.config.lock().await.streams.clone()
    }

    pub async fn get(&self, stream_id: &str) -> RegistryResult<StreamDescriptor> {
        self.config
            .lock()
            .await
            .streams
            .iter()
            .find(|s| s.id == stream_id)
            .cloned()
            .ok_or_else(|| RegistryError::StreamNotFound(stream_id.to_string()))
    }

    /// Register a new stream
    pub async fn add(&self, url: String, name: Option<String>) -> RegistryResult<StreamDescriptor> {
        if url.trim().is_empty() {
            return Err(RegistryError::InvalidStream("url is required".to_string()));
        }
        self.insert(StreamDescriptor::new(url, name)).await
    }

    /// Insert a fully formed descriptor. Ids must be unique.
    pub async fn insert(&self, stream: StreamDescriptor) -> RegistryResult<StreamDescriptor> {
        let mut config = self.config.lock().await;
        if config.streams.iter().any(|s| s.id == stream.id) {
            return Err(RegistryError::InvalidStream(format!(
                "duplicate stream id {}",
                stream.id
            )));
        }
        let mut next = config.clone();
        next.streams.push(stream.clone());
        write_config(&self.path, &next).await?;
        *config = next;

        tracing::info!("Added stream '{}' ({})", stream.display_name, stream.id);
        Ok(stream)
    }

    /// Rename a stream or rebind it to another url
    pub async fn update(&self, stream_id: &str, update: StreamUpdate) -> RegistryResult<StreamDescriptor> {
        let mut config = self.config.lock().await;
        let mut next = config.clone();
        let stream = next
            .streams
            .iter_mut()
            .find(|s| s.id == stream_id)
            .ok_or_else(|| RegistryError::StreamNotFound(stream_id.to_string()))?;

        if let Some(url) = update.url {
            if url.trim().is_empty() {
                return Err(RegistryError::InvalidStream("url must not be empty".to_string()));
            }
            stream.source_url = url;
        }
        if let Some(name) = update.name.filter(|n| !n.trim().is_empty()) {
            stream.display_name = name;
        }
        let updated = stream.clone();
        write_config(&self.path, &next).await?;
        *config = next;

        tracing::info!("Updated stream {}", stream_id);
        Ok(updated)
    }

    pub async fn remove(&self, stream_id: &str) -> RegistryResult<()> {
        let mut config = self.config.lock().await;
        let mut next = config.clone();
        next.streams.retain(|s| s.id != stream_id);
        if next.streams.len() == config.streams.len() {
            return Err(RegistryError::StreamNotFound(stream_id.to_string()));
        }
        write_config(&self.path, &next).await?;
        *config = next;

        tracing::info!("Removed stream {}", stream_id);
        Ok(())
    }

    /// Set or clear the active-session pointer of a stream
    pub async fn set_recording_state(
        &self,
        stream_id: &str,
        state: Option<RecordingStateRecord>,
    ) -> RegistryResult<()> {
        self.mutate_stream(stream_id, |stream| {
            stream.recording_state = state;
            true
        })
        .await
        .map(|_| ())
    }

    /// Clear the active-session pointer only if it still names `session_id`.
    ///
    /// Returns whether anything was cleared.
    pub async fn clear_recording_state_if(
        &self,
        stream_id: &str,
        session_id: &str,
    ) -> RegistryResult<bool> {
        self.mutate_stream(stream_id, |stream| {
            let matches = stream
                .recording_state
                .as_ref()
                .is_some_and(|r| r.session_id == session_id);
            if matches {
                stream.recording_state = None;
            }
            matches
        })
        .await
    }

    /// Store the terminal record of a session and drop its active pointer
    pub async fn finish_recording(&self, stream_id: &str, last: LastRecording) -> RegistryResult<()> {
        self.mutate_stream(stream_id, |stream| {
            if stream
                .recording_state
                .as_ref()
                .is_some_and(|r| r.session_id == last.session_id)
            {
                stream.recording_state = None;
            }
            stream.last_recording = Some(last);
            true
        })
        .await
        .map(|_| ())
    }

    /// Apply `f` to a copy of one stream and persist if it reports a
    /// change. Memory only takes the change once the file has it.
    async fn mutate_stream<F>(&self, stream_id: &str, f: F) -> RegistryResult<bool>
    where
        F: FnOnce(&mut StreamDescriptor) -> bool,
    {
        let mut config = self.config.lock().await;
        let mut next = config.clone();
        let stream = next
            .streams
            .iter_mut()
            .find(|s| s.id == stream_id)
            .ok_or_else(|| RegistryError::StreamNotFound(stream_id.to_string()))?;

        let changed = f(stream);
        if changed {
            write_config(&self.path, &next).await?;
            *config = next;
        }
        Ok(changed)
    }
}

/// Write the whole file via a temporary sibling and rename
async fn write_config(path: &Path, config: &ConfigFile) -> RegistryResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let content = serde_json::to_string_pretty(config)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, content).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use schema::RecordingOutcome;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_creates_default_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");

        let registry = StreamRegistry::open(&path).await.unwrap();
        assert!(path.exists());
        assert!(registry.list().await.is_empty());
        assert_eq!(registry.recordings_dir().await, dir.path().join("recordings"));
    }

    #[tokio::test]
    async fn test_mutations_are_persisted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");

        let registry = StreamRegistry::open(&path).await.unwrap();
        let stream = registry
            .add("https://example.test/live".to_string(), Some("Live".to_string()))
            .await
            .unwrap();
        registry
            .update(
                &stream.id,
                StreamUpdate {
                    url: Some("https://example.test/other".to_string()),
                    name: None,
                },
            )
            .await
            .unwrap();

        let reloaded = StreamRegistry::open(&path).await.unwrap();
        let loaded = reloaded.get(&stream.id).await.unwrap();
        assert_eq!(loaded.display_name, "Live");
        assert_eq!(loaded.source_url, "https://example.test/other");

        reloaded.remove(&stream.id).await.unwrap();
        assert!(matches!(
            reloaded.get(&stream.id).await,
            Err(RegistryError::StreamNotFound(_))
        ));
        assert!(StreamRegistry::open(&path).await.unwrap().list().await.is_empty());
    }

    #[tokio::test]
    async fn test_clear_recording_state_only_for_matching_session() {
        let dir = tempdir().unwrap();
        let registry = StreamRegistry::open(&dir.path().join("config.json")).await.unwrap();
        let stream = registry
            .add("https://example.test/live".to_string(), None)
            .await
            .unwrap();

        let record = RecordingStateRecord {
            session_id: "abc".to_string(),
            started_at: Utc::now(),
            output_path: dir.path().join("a.webm"),
        };
        registry
            .set_recording_state(&stream.id, Some(record))
            .await
            .unwrap();

        assert!(!registry.clear_recording_state_if(&stream.id, "other").await.unwrap());
        assert!(registry.get(&stream.id).await.unwrap().recording_state.is_some());
        assert!(registry.clear_recording_state_if(&stream.id, "abc").await.unwrap());
        assert!(registry.get(&stream.id).await.unwrap().recording_state.is_none());
    }

    #[tokio::test]
    async fn test_finish_recording_replaces_last_record() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        let registry = StreamRegistry::open(&path).await.unwrap();
        let stream = registry
            .add("https://example.test/live".to_string(), None)
            .await
            .unwrap();

        let now = Utc::now();
        registry
            .set_recording_state(
                &stream.id,
                Some(RecordingStateRecord {
                    session_id: "s1".to_string(),
                    started_at: now,
                    output_path: dir.path().join("a.webm"),
                }),
            )
            .await
            .unwrap();
        registry
            .finish_recording(
                &stream.id,
                LastRecording {
                    session_id: "s1".to_string(),
                    output_path: dir.path().join("a.webm"),
                    started_at: now,
                    stopped_at: now,
                    duration_ms: 0,
                    size_bytes: 3,
                    outcome: RecordingOutcome::Completed,
                    error: None,
                },
            )
            .await
            .unwrap();

        let loaded = StreamRegistry::open(&path).await.unwrap().get(&stream.id).await.unwrap();
        assert!(loaded.recording_state.is_none());
        assert_eq!(loaded.last_recording.unwrap().size_bytes, 3);
    }

    #[tokio::test]
    async fn test_failed_write_leaves_memory_unchanged() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        let registry = StreamRegistry::open(&path).await.unwrap();
        let stream = registry
            .add("https://example.test/live".to_string(), Some("Live".to_string()))
            .await
            .unwrap();

        // a directory in the way of the temporary file makes every write fail
        let tmp = dir.path().join("config.json.tmp");
        std::fs::create_dir(&tmp).unwrap();

        assert!(registry.remove(&stream.id).await.is_err());
        assert!(registry.get(&stream.id).await.is_ok());

        let renamed = StreamUpdate {
            url: None,
            name: Some("Renamed".to_string()),
        };
        assert!(registry.update(&stream.id, renamed).await.is_err());
        assert_eq!(registry.get(&stream.id).await.unwrap().display_name, "Live");

        let record = RecordingStateRecord {
            session_id: "s1".to_string(),
            started_at: Utc::now(),
            output_path: dir.path().join("a.webm"),
        };
        assert!(registry
            .set_recording_state(&stream.id, Some(record))
            .await
            .is_err());
        assert!(registry.get(&stream.id).await.unwrap().recording_state.is_none());

        assert!(registry
            .add("https://example.test/other".to_string(), None)
            .await
            .is_err());
        assert_eq!(registry.list().await.len(), 1);

        // memory and disk agree, and writes work again once the path is clear
        let on_disk = StreamRegistry::open(&path).await.unwrap();
        assert_eq!(on_disk.list().await.len(), 1);
        std::fs::remove_dir(&tmp).unwrap();
        registry.remove(&stream.id).await.unwrap();
        assert!(StreamRegistry::open(&path).await.unwrap().list().await.is_empty());
    }

    #[tokio::test]
    async fn test_rejects_empty_url() {
        let dir = tempdir().unwrap();
        let registry = StreamRegistry::open(&dir.path().join("config.json")).await.unwrap();
        assert!(matches!(
            registry.add("  ".to_string(), None).await,
            Err(RegistryError::InvalidStream(_))
        ));
    }
}
