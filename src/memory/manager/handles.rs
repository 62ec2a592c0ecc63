/*!
 * Update Handles
 * Callbacks fired when an allocator switches to a new or grown store
 */

use crate::memory::segment::Segment;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Callback receiving the current store
///
/// Runs while the heap lock is held and must not call back into the allocator.
pub type UpdateHandle<M = Segment> = Arc<dyn Fn(&Arc<M>) + Send + Sync>;

/// Registration token returned by `add_update_handle`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HandleId(u64);

impl HandleId {
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handle-{}", self.0)
    }
}

/// Ordered set of update handles
pub struct UpdateRegistry<M = Segment> {
    handles: Vec<(HandleId, UpdateHandle<M>)>,
    next_id: u64,
}

impl<M> Default for UpdateRegistry<M> {
    fn default() -> Self {
        Self {
            handles: Vec::new(),
            next_id: 0,
        }
    }
}

impl<M> UpdateRegistry<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handle`; registering the same handle twice returns its existing id
    pub fn add(&mut self, handle: UpdateHandle<M>) -> HandleId {
        if let Some((id, _)) = self.handles.iter().find(|(_, h)| Arc::ptr_eq(h, &handle)) {
            return *id;
        }
        let id = HandleId(self.next_id);
        self.next_id += 1;
        self.handles.push((id, handle));
        id
    }

    /// Unregister; returns whether the id was known
    pub fn remove(&mut self, id: HandleId) -> bool {
        let before = self.handles.len();
        self.handles.retain(|(known, _)| *known != id);
        self.handles.len() != before
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Invoke every handle in registration order
    pub fn notify(&self, segment: &Arc<M>) {
        if self.handles.is_empty() {
            return;
        }
        debug!(handles = self.handles.len(), "Notifying update handles");
        for (_, handle) in &self.handles {
            handle(segment);
        }
    }
}

impl<M> fmt::Debug for UpdateRegistry<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateRegistry")
            .field("handles", &self.handles.iter().map(|(id, _)| *id).collect::<Vec<_>>())
            .finish()
    }
}
