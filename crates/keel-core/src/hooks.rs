//! Hook extension points.
//!
//! The core fires named events around graph loading, each node's binary
//! realization, and export-pkg completion. What a hook does is entirely
//! up to the embedder; the core only guarantees the invocation points.

use keel_schema::{PackageReference, RecipeReference};

/// A named extension point with its payload.
#[derive(Debug)]
pub enum HookEvent<'a> {
    /// Fired before graph expansion starts.
    PreGraphLoad {
        /// Display form of the root input.
        root: &'a str,
    },
    /// Fired after the graph is fully resolved.
    PostGraphLoad {
        /// Number of resolved nodes, root excluded.
        nodes: usize,
    },
    /// Fired before one node's binary is realized.
    PreNodeInstall {
        /// The node being realized.
        reference: &'a RecipeReference,
    },
    /// Fired after one node's binary is realized.
    PostNodeInstall {
        /// The finalized package reference.
        reference: &'a PackageReference,
    },
    /// Fired after export-pkg registers an artifact.
    PostExportPkg {
        /// The registered package reference.
        reference: &'a PackageReference,
    },
}

type HookFn = Box<dyn Fn(&HookEvent<'_>) + Send + Sync>;

/// Registry of hook callbacks.
#[derive(Default)]
pub struct Hooks {
    hooks: Vec<HookFn>,
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks").field("count", &self.hooks.len()).finish()
    }
}

impl Hooks {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback invoked for every event.
    pub fn register(&mut self, hook: impl Fn(&HookEvent<'_>) + Send + Sync + 'static) {
        self.hooks.push(Box::new(hook));
    }

    /// Fire an event to all registered callbacks, in registration order.
    pub fn notify(&self, event: &HookEvent<'_>) {
        for hook in &self.hooks {
            hook(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn all_registered_hooks_fire() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut hooks = Hooks::new();
        for _ in 0..3 {
            let counter = counter.clone();
            hooks.register(move |_| {
                counter.fetch_add(1, Ordering::Relaxed);
            });
        }
        hooks.notify(&HookEvent::PostGraphLoad { nodes: 2 });
        assert_eq!(counter.load(Ordering::Relaxed), 3);
    }
}
