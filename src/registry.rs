//! Role-keyed ownership of transient image bytes.
//!
//! The registry is the only owner of image bytes. Everything else refers to
//! an image by [`ImageRole`] (or by the [`HandleRef`] snapshot handed to the
//! UI), so releasing a handle here is the one place bytes go away.

use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

use crate::metrics::ControllerMetrics;
use crate::model::{ImageOrigin, ImageRole};

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(u64);

impl HandleId {
    fn next() -> Self {
        Self(NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "img-{}", self.0)
    }
}

/// Owned image bytes plus where they came from. Every handle is revocable
/// and is released exactly once.
pub struct ImageHandle {
    id: HandleId,
    origin: ImageOrigin,
    bytes: Bytes,
}

impl ImageHandle {
    pub fn memory(bytes: Bytes, origin: ImageOrigin) -> Self {
        Self {
            id: HandleId::next(),
            origin,
            bytes,
        }
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn origin(&self) -> ImageOrigin {
        self.origin
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }
}

impl fmt::Debug for ImageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageHandle")
            .field("id", &self.id)
            .field("origin", &self.origin)
            .field("size_bytes", &self.bytes.len())
            .finish()
    }
}

/// What a view holds: identity and metadata, never the bytes themselves.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandleRef {
    pub id: HandleId,
    pub role: ImageRole,
    pub origin: ImageOrigin,
    pub size_bytes: usize,
}

impl HandleRef {
    fn of(role: ImageRole, handle: &ImageHandle) -> Self {
        Self {
            id: handle.id,
            role,
            origin: handle.origin,
            size_bytes: handle.bytes.len(),
        }
    }
}

/// Invoked exactly once per handle when it is released. A shell
/// that mirrors handles as platform object URLs revokes them here.
/// Implementations must not call back into the registry.
pub trait ReleaseHook: Send + Sync {
    fn on_release(&self, id: HandleId, origin: ImageOrigin);
}

#[derive(Debug, Default)]
pub struct NoopReleaseHook;

impl ReleaseHook for NoopReleaseHook {
    fn on_release(&self, _id: HandleId, _origin: ImageOrigin) {}
}

pub struct ImageHandleRegistry {
    live: HashMap<ImageRole, ImageHandle>,
    // Superseded handles waiting for `flush`.
    retired: Vec<ImageHandle>,
    hook: Arc<dyn ReleaseHook>,
    metrics: Arc<ControllerMetrics>,
}

impl ImageHandleRegistry {
    pub fn new(hook: Arc<dyn ReleaseHook>, metrics: Arc<ControllerMetrics>) -> Self {
        Self {
            live: HashMap::new(),
            retired: Vec::new(),
            hook,
            metrics,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(Arc::new(NoopReleaseHook), Arc::new(ControllerMetrics::new()))
    }

    /// Binds `handle` to `role`. The previous handle, if revocable, is
    /// scheduled for release and goes away on the next [`flush`](Self::flush).
    pub fn set(&mut self, role: ImageRole, handle: ImageHandle) -> HandleRef {
        let handle_ref = HandleRef::of(role, &handle);
        ControllerMetrics::incr(&self.metrics.handles_registered);
        debug!(role = %role, handle = %handle.id, origin = ?handle.origin, "image handle bound");
        if let Some(previous) = self.live.insert(role, handle) {
            self.retire(previous);
        }
        handle_ref
    }

    pub fn get(&self, role: ImageRole) -> Option<&ImageHandle> {
        self.live.get(&role)
    }

    pub fn handle_ref(&self, role: ImageRole) -> Option<HandleRef> {
        self.live.get(&role).map(|h| HandleRef::of(role, h))
    }

    pub fn bytes(&self, role: ImageRole) -> Option<Bytes> {
        self.live.get(&role).map(|h| h.bytes.clone())
    }

    /// Unbinds `role`, scheduling its handle for release.
    pub fn clear(&mut self, role: ImageRole) -> bool {
        match self.live.remove(&role) {
            Some(previous) => {
                self.retire(previous);
                true
            }
            None => false,
        }
    }

    /// Unbinds `role` and releases its handle immediately.
    pub fn release_role(&mut self, role: ImageRole) -> bool {
        match self.live.remove(&role) {
            Some(handle) => {
                let id = handle.id;
                self.revoke(handle);
                debug!(role = %role, handle = %id, "image handle released with its role");
                true
            }
            None => false,
        }
    }

    /// Releases a handle that has been scheduled for release. Returns false
    /// (and does nothing) for handles already released, still live, or
    /// unknown.
    pub fn release(&mut self, id: HandleId) -> bool {
        match self.retired.iter().position(|h| h.id == id) {
            Some(index) => {
                let handle = self.retired.swap_remove(index);
                self.revoke(handle);
                true
            }
            None => false,
        }
    }

    /// Releases every scheduled handle.
    pub fn flush(&mut self) -> usize {
        let retired = std::mem::take(&mut self.retired);
        let count = retired.len();
        for handle in retired {
            self.revoke(handle);
        }
        count
    }

    /// Releases every tracked handle, live or scheduled, and clears the
    /// registry.
    pub fn release_all(&mut self) -> usize {
        let mut count = self.flush();
        let live: Vec<ImageHandle> = self.live.drain().map(|(_, h)| h).collect();
        for handle in live {
            count += 1;
            self.revoke(handle);
        }
        count
    }

    /// Whether `id` is still owned here, live or scheduled. A handle leaves
    /// both collections in the same step that releases it, so an id issued
    /// by this registry and no longer tracked has been released.
    pub fn tracks(&self, id: HandleId) -> bool {
        self.live.values().any(|h| h.id == id) || self.retired.iter().any(|h| h.id == id)
    }

    pub fn tracked_count(&self) -> usize {
        self.live.len() + self.retired.len()
    }

    pub fn pending_release_count(&self) -> usize {
        self.retired.len()
    }

    pub fn contains(&self, role: ImageRole) -> bool {
        self.live.contains_key(&role)
    }

    fn retire(&mut self, handle: ImageHandle) {
        debug!(handle = %handle.id, "image handle scheduled for release");
        self.retired.push(handle);
    }

    // Takes the handle by value; once it has been moved out of `live` or
    // `retired` nothing else can reach it, so the hook fires once per id.
    fn revoke(&mut self, handle: ImageHandle) {
        self.hook.on_release(handle.id, handle.origin);
        ControllerMetrics::incr(&self.metrics.handles_released);
        // Dropping the handle drops the last registry-owned reference to the bytes.
        drop(handle);
    }
}

impl Drop for ImageHandleRegistry {
    fn drop(&mut self) {
        self.release_all();
    }
}

impl fmt::Debug for ImageHandleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageHandleRegistry")
            .field("live", &self.live)
            .field("retired", &self.retired.len())
            .finish()
    }
}

/// Cloneable handle to one registry shared by the components of a page.
#[derive(Clone, Debug)]
pub struct SharedRegistry(Arc<Mutex<ImageHandleRegistry>>);

impl SharedRegistry {
    pub fn new(registry: ImageHandleRegistry) -> Self {
        Self(Arc::new(Mutex::new(registry)))
    }

    /// A panic while holding the lock leaves the maps consistent (every
    /// mutation is a single insert/remove), so poisoning is recovered.
    pub fn lock(&self) -> MutexGuard<'_, ImageHandleRegistry> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn handle_ref(&self, role: ImageRole) -> Option<HandleRef> {
        self.lock().handle_ref(role)
    }

    pub fn bytes(&self, role: ImageRole) -> Option<Bytes> {
        self.lock().bytes(role)
    }

    pub fn release_all(&self) -> usize {
        self.lock().release_all()
    }
}
