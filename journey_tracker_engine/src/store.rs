//! Durable tracking state: the single "current journey" slot plus the
//! append-only traveled-path log. Both live under the configured data
//! directory and are owned exclusively by the tracking engine.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use journey_tracker_lib::journey_route::JourneyRoute;
use journey_tracker_lib::position_fix::PositionFix;
use serde::{Deserialize, Serialize};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::{PATH_FILE_SUFFIX, Result, SLOT_FILE_NAME, TrackerError};

/// The durable record of the one journey this device is tracking. The route
/// rides along because resume happens without the dispatch backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSlot {
    pub journey_id: i64,
    pub route: JourneyRoute,
    pub started_at: DateTime<Utc>,
    pub last_propagated_at: Option<DateTime<Utc>>,
}

/// Single-slot store. Writes are last-writer-wins; only one session is ever
/// Active, so there are no concurrent writers.
#[derive(Debug, Clone)]
pub struct SessionStore {
    data_dir: PathBuf,
}

impl SessionStore {
    pub async fn open(data_dir: &Path) -> Result<Self> {
        if !data_dir.exists() {
            fs::create_dir_all(data_dir).await.map_err(|err| {
                TrackerError::Storage(format!("failed to create data directory {:?}: {}", data_dir, err))
            })?;
        }

        Ok(Self {
            data_dir: data_dir.to_path_buf(),
        })
    }

    fn slot_path(&self) -> PathBuf {
        self.data_dir.join(SLOT_FILE_NAME)
    }

    pub async fn load(&self) -> Result<Option<SessionSlot>> {
        let path = self.slot_path();
        if !path.exists() {
            return Ok(None);
        }

        let bytes = fs::read(&path)
            .await
            .map_err(|err| TrackerError::Storage(format!("failed to read session slot: {}", err)))?;
        let slot = serde_json::from_slice(&bytes)
            .map_err(|err| TrackerError::Storage(format!("corrupt session slot: {}", err)))?;

        Ok(Some(slot))
    }

    pub async fn save(&self, slot: &SessionSlot) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(slot)
            .map_err(|err| TrackerError::Storage(format!("failed to serialize session slot: {}", err)))?;

        fs::write(self.slot_path(), bytes)
            .await
            .map_err(|err| TrackerError::Storage(format!("failed to write session slot: {}", err)))
    }

    /// No-op when no slot exists; a propagation may land after completion.
    pub async fn set_last_propagated(&self, at: DateTime<Utc>) -> Result<()> {
        let Some(mut slot) = self.load().await? else {
            return Ok(());
        };
        slot.last_propagated_at = Some(at);
        self.save(&slot).await
    }

    pub async fn clear(&self) -> Result<()> {
        let path = self.slot_path();
        if path.exists() {
            fs::remove_file(&path)
                .await
                .map_err(|err| TrackerError::Storage(format!("failed to clear session slot: {}", err)))?;
        }
        Ok(())
    }
}

/// Append-only log of displacement-gated fixes for one journey. Read back
/// for display polylines and replayed on resume; deleted when the session
/// completes.
pub struct PathBuffer {
    file: File,
    fixes: Vec<PositionFix>,
    path: PathBuf,
}

impl PathBuffer {
    pub async fn open(data_dir: &Path, journey_id: i64) -> Result<Self> {
        let path = data_dir.join(format!("journey_{}{}", journey_id, PATH_FILE_SUFFIX));

        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)
            .await
            .map_err(|err| TrackerError::Storage(format!("failed to open path log {:?}: {}", path, err)))?;

        // Replay whatever a previous run left behind.
        let bytes = fs::read(&path)
            .await
            .map_err(|err| TrackerError::Storage(format!("failed to read path log {:?}: {}", path, err)))?;

        let mut fixes = Vec::new();
        let mut cursor = std::io::Cursor::new(bytes);
        while cursor.position() < cursor.get_ref().len() as u64 {
            match bincode::deserialize_from::<_, PositionFix>(&mut cursor) {
                Ok(fix) => fixes.push(fix),
                Err(_) => {
                    // A torn tail write from a crash; keep what decoded.
                    tracing::warn!("Path log {:?} has a truncated tail, dropping it", path);
                    break;
                }
            }
        }

        Ok(Self { file, fixes, path })
    }

    pub async fn append(&mut self, fix: &PositionFix) -> Result<()> {
        let bytes = bincode::serialize(fix)
            .map_err(|_| TrackerError::Storage("failed to serialize position fix".to_string()))?;

        self.file
            .write_all(&bytes)
            .await
            .map_err(|err| TrackerError::Storage(format!("failed to append to path log: {}", err)))?;

        self.fixes.push(fix.clone());
        Ok(())
    }

    pub fn fixes(&self) -> &[PositionFix] {
        &self.fixes
    }

    pub fn last(&self) -> Option<&PositionFix> {
        self.fixes.last()
    }

    pub fn len(&self) -> usize {
        self.fixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fixes.is_empty()
    }

    /// Deletes the on-disk log and hands back the accumulated polyline.
    pub async fn finish(self) -> Result<Vec<PositionFix>> {
        drop(self.file);
        fs::remove_file(&self.path)
            .await
            .map_err(|err| TrackerError::Storage(format!("failed to remove path log {:?}: {}", self.path, err)))?;
        Ok(self.fixes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use geo_types::Point;

    fn sample_slot() -> SessionSlot {
        SessionSlot {
            journey_id: 9,
            route: JourneyRoute::new(9, Point::new(-74.0060, 40.7128), Point::new(-71.0589, 42.3601)),
            started_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            last_propagated_at: None,
        }
    }

    #[tokio::test]
    async fn slot_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path()).await.unwrap();

        assert!(store.load().await.unwrap().is_none());

        let slot = sample_slot();
        store.save(&slot).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(slot.clone()));

        let at = Utc.timestamp_opt(1_700_000_060, 0).unwrap();
        store.set_last_propagated(at).await.unwrap();
        assert_eq!(store.load().await.unwrap().unwrap().last_propagated_at, Some(at));

        store.clear().await.unwrap();
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupt_slot_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path()).await.unwrap();
        fs::write(dir.path().join(SLOT_FILE_NAME), b"not json").await.unwrap();

        assert!(store.load().await.is_err());
    }

    #[tokio::test]
    async fn path_buffer_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let fix_a = PositionFix::new(Point::new(10.0, 56.0), 5.0, Utc.timestamp_opt(1_700_000_000, 0).unwrap());
        let fix_b = PositionFix::new(Point::new(10.1, 56.1), 5.0, Utc.timestamp_opt(1_700_000_030, 0).unwrap());

        {
            let mut buffer = PathBuffer::open(dir.path(), 9).await.unwrap();
            assert!(buffer.is_empty());
            buffer.append(&fix_a).await.unwrap();
            buffer.append(&fix_b).await.unwrap();
        }

        let buffer = PathBuffer::open(dir.path(), 9).await.unwrap();
        assert_eq!(buffer.fixes().to_vec(), vec![fix_a, fix_b.clone()]);
        assert_eq!(buffer.last(), Some(&fix_b));
    }

    #[tokio::test]
    async fn finish_removes_the_log() {
        let dir = tempfile::tempdir().unwrap();
        let fix = PositionFix::new(Point::new(10.0, 56.0), 5.0, Utc.timestamp_opt(1_700_000_000, 0).unwrap());

        let mut buffer = PathBuffer::open(dir.path(), 3).await.unwrap();
        buffer.append(&fix).await.unwrap();

        let fixes = buffer.finish().await.unwrap();
        assert_eq!(fixes.len(), 1);
        assert!(!dir.path().join(format!("journey_3{}", PATH_FILE_SUFFIX)).exists());
    }
}
