// Named hook slots shared between the map widget and the dashboard
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::domain::geometry::ZoomRequest;

pub const ZOOM_TO_HOOK: &str = "ZOOM_TO_HOOK";

pub type Hook<A> = Arc<dyn Fn(&A) + Send + Sync>;

/// Lets one component install a callback that others invoke by name.
///
/// One registry is created per dashboard session and handed to both the
/// installer and the callers. A name holds at most one hook; registering
/// again replaces it.
pub struct HookRegistry<A> {
    slots: RwLock<HashMap<String, Hook<A>>>,
}

pub type ZoomHooks = HookRegistry<ZoomRequest>;

impl<A> Default for HookRegistry<A> {
    fn default() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
        }
    }
}

impl<A> HookRegistry<A> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: impl Into<String>, hook: impl Fn(&A) + Send + Sync + 'static) {
        let name = name.into();
        tracing::debug!("Registering hook {}", name);
        self.slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, Arc::new(hook));
    }

    pub fn resolve(&self, name: &str) -> Option<Hook<A>> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Calls the hook under `name`; a missing hook is a no-op. Returns
    /// whether a hook ran.
    pub fn invoke(&self, name: &str, argument: &A) -> bool {
        // Resolve first so the hook runs without the lock held.
        match self.resolve(name) {
            Some(hook) => {
                hook(argument);
                true
            }
            None => false,
        }
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .is_some()
    }
}
