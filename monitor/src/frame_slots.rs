//! Camera registry and the latest processed frame of every camera
//!
//! The pipeline thread writes a slot once per tick; readers copy out of it.
//! Slot locks are only held for the copy.

use crate::camera::{CameraSource, SourceKind};
use crate::error::{MonitorError, Result};
use crate::types::{CameraId, Frame, PersonId, TrackedIdentity};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Output of one pipeline tick for one camera
#[derive(Debug, Clone)]
pub struct ProcessedFrame {
    pub camera_id: CameraId,
    /// Frame after privacy filtering, with identity boxes drawn on it
    pub frame: Frame,
    pub identities: Vec<TrackedIdentity>,
    /// Identities with an ongoing fall episode
    pub fallen: Vec<PersonId>,
}

/// Public description of a registered camera
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CameraInfo {
    pub id: CameraId,
    pub name: String,
    pub uri: String,
    pub kind: SourceKind,
    pub connected: bool,
}

#[derive(Debug)]
pub struct FrameSlot {
    id: CameraId,
    name: String,
    source: CameraSource,
    connected: AtomicBool,
    latest: Mutex<Option<ProcessedFrame>>,
}

impl FrameSlot {
    fn new(id: CameraId, name: String, source: CameraSource) -> Self {
        Self {
            id,
            name,
            source,
            connected: AtomicBool::new(false),
            latest: Mutex::new(None),
        }
    }

    pub fn id(&self) -> CameraId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &CameraSource {
        &self.source
    }

    pub fn store(&self, processed: ProcessedFrame) {
        *lock(&self.latest) = Some(processed);
    }

    pub fn latest(&self) -> Option<ProcessedFrame> {
        lock(&self.latest).clone()
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn info(&self) -> CameraInfo {
        CameraInfo {
            id: self.id,
            name: self.name.clone(),
            uri: self.source.uri.clone(),
            kind: self.source.kind,
            connected: self.is_connected(),
        }
    }
}

/// Registered cameras keyed by id
#[derive(Debug, Default)]
pub struct FrameSlots {
    slots: Mutex<BTreeMap<CameraId, Arc<FrameSlot>>>,
}

impl FrameSlots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a camera under a fresh id
    ///
    /// Fails with [`MonitorError::CameraLimit`] once `max_cameras` are registered.
    pub fn register(
        &self,
        source: CameraSource,
        name: Option<String>,
        max_cameras: usize,
    ) -> Result<Arc<FrameSlot>> {
        let mut slots = lock(&self.slots);
        if slots.len() >= max_cameras {
            log::warn!("Maximum number of cameras reached ({})", max_cameras);
            return Err(MonitorError::CameraLimit { max: max_cameras });
        }

        let id = uuid::Uuid::new_v4();
        let name = name.unwrap_or_else(|| format!("Camera {}", slots.len() + 1));
        let slot = Arc::new(FrameSlot::new(id, name, source));
        slots.insert(id, slot.clone());
        log::info!(
            "Camera registered: {} ({}, {})",
            slot.name,
            slot.source.uri,
            slot.source.kind
        );
        Ok(slot)
    }

    pub fn unregister(&self, id: CameraId) -> Result<Arc<FrameSlot>> {
        let slot = lock(&self.slots)
            .remove(&id)
            .ok_or_else(|| MonitorError::UnknownCamera(id.to_string()))?;
        log::info!("Camera removed: {}", slot.name);
        Ok(slot)
    }

    pub fn get(&self, id: CameraId) -> Option<Arc<FrameSlot>> {
        lock(&self.slots).get(&id).cloned()
    }

    pub fn contains(&self, id: CameraId) -> bool {
        lock(&self.slots).contains_key(&id)
    }

    pub fn latest(&self, id: CameraId) -> Option<ProcessedFrame> {
        self.get(id).and_then(|slot| slot.latest())
    }

    pub fn infos(&self) -> Vec<CameraInfo> {
        lock(&self.slots).values().map(|slot| slot.info()).collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.slots).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.slots).is_empty()
    }
}
