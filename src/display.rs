//! Transient display handles
//!
//! A `DisplayHandle` is the native stand-in for an object URL: a revocable
//! reference through which a preview layer can resolve segment bytes. The
//! registry only hands out bytes for handles that are still alive, and a
//! handle revokes its entry when dropped.

use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

const HANDLE_SCHEME: &str = "blob:screenshot-splitter/";

#[derive(Debug, Clone, Default)]
pub struct DisplayRegistry {
    entries: Arc<DashMap<Uuid, Arc<[u8]>>>,
}

impl DisplayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only the segment store registers handles.
    pub(crate) fn register(&self, data: Arc<[u8]>) -> DisplayHandle {
        let id = Uuid::new_v4();
        self.entries.insert(id, data);

        DisplayHandle {
            id,
            registry: self.clone(),
        }
    }

    pub fn resolve(&self, url: &str) -> Option<Arc<[u8]>> {
        let id = parse_handle_url(url)?;
        self.entries.get(&id).map(|entry| entry.value().clone())
    }

    pub fn is_live(&self, url: &str) -> bool {
        parse_handle_url(url).is_some_and(|id| self.entries.contains_key(&id))
    }

    pub fn live_count(&self) -> usize {
        self.entries.len()
    }

    fn revoke(&self, id: &Uuid) {
        if self.entries.remove(id).is_some() {
            debug!("Revoked display handle {}", id);
        }
    }
}

/// Revocable reference to one segment's bytes. Not clonable; revoked on drop.
#[derive(Debug)]
pub struct DisplayHandle {
    id: Uuid,
    registry: DisplayRegistry,
}

impl DisplayHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn url(&self) -> String {
        format!("{HANDLE_SCHEME}{}", self.id)
    }
}

impl Drop for DisplayHandle {
    fn drop(&mut self) {
        self.registry.revoke(&self.id);
    }
}

fn parse_handle_url(url: &str) -> Option<Uuid> {
    url.strip_prefix(HANDLE_SCHEME)
        .and_then(|id| Uuid::parse_str(id).ok())
}
