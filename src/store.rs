//! Segment store
//!
//! Holds the ordered segments of the current session together with the
//! user's selection, and owns every display handle issued for them.

use crate::{DisplayHandle, DisplayRegistry, EncodedTile, OutputFormat, SplitError};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug)]
pub struct Segment {
    pub index: usize,
    pub width: u32,
    pub height: u32,
    pub format: OutputFormat,
    pub data: Arc<[u8]>,
    display: DisplayHandle,
}

impl Segment {
    pub fn display_url(&self) -> String {
        self.display.url()
    }

    pub fn display_handle(&self) -> &DisplayHandle {
        &self.display
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }
}

#[derive(Debug, Default)]
pub struct SegmentStore {
    segments: Vec<Segment>,
    selection: BTreeSet<usize>,
    registry: DisplayRegistry,
}

impl SegmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_registry(registry: DisplayRegistry) -> Self {
        Self {
            segments: Vec::new(),
            selection: BTreeSet::new(),
            registry,
        }
    }

    /// Appends the next segment and selects it. Chunks must arrive in dense
    /// index order; anything else is rejected rather than reordered.
    pub fn add(&mut self, tile: EncodedTile) -> Result<usize, SplitError> {
        let expected = self.segments.len();
        if tile.index != expected {
            return Err(SplitError::SegmentOrder {
                expected,
                got: tile.index,
            });
        }

        let data: Arc<[u8]> = Arc::from(tile.data);
        let handle = self.registry.register(data.clone());
        debug!(
            "Stored segment {} ({}x{}, {} bytes) as {}",
            tile.index,
            tile.width,
            tile.height,
            data.len(),
            handle.url()
        );

        self.segments.push(Segment {
            index: tile.index,
            width: tile.width,
            height: tile.height,
            format: tile.format,
            data,
            display: handle,
        });
        self.selection.insert(tile.index);

        Ok(tile.index)
    }

    pub fn toggle(&mut self, index: usize) {
        if index >= self.segments.len() {
            return;
        }

        if !self.selection.remove(&index) {
            self.selection.insert(index);
        }
    }

    pub fn select(&mut self, index: usize) {
        if index < self.segments.len() {
            self.selection.insert(index);
        }
    }

    pub fn select_all(&mut self) {
        self.selection = (0..self.segments.len()).collect();
    }

    pub fn select_none(&mut self) {
        self.selection.clear();
    }

    /// Drops every segment and revokes its display handle.
    pub fn reset(&mut self) {
        if self.segments.is_empty() && self.selection.is_empty() {
            return;
        }

        let released = self.segments.len();
        self.selection.clear();
        // Dropping the segments drops their handles, which revokes them.
        self.segments.clear();
        info!("Segment store reset, released {} display handles", released);
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn get(&self, index: usize) -> Option<&Segment> {
        self.segments.get(index)
    }

    pub fn is_selected(&self, index: usize) -> bool {
        self.selection.contains(&index)
    }

    pub fn selection(&self) -> &BTreeSet<usize> {
        &self.selection
    }

    pub fn selected_indices(&self) -> Vec<usize> {
        self.selection.iter().copied().collect()
    }

    pub fn selected_segments(&self) -> impl Iterator<Item = &Segment> + '_ {
        self.selection
            .iter()
            .filter_map(move |&index| self.segments.get(index))
    }

    pub fn total_height(&self) -> u64 {
        self.segments.iter().map(|s| s.height as u64).sum()
    }

    pub fn registry(&self) -> &DisplayRegistry {
        &self.registry
    }
}
