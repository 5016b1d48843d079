use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Single-fire bridge from callback-style completion to a blocking wait.
///
/// Exactly one resolution is delivered per pair. A second resolution
/// attempt is a defect in the resolver's caller; it is turned into a
/// logged no-op rather than a second delivery.
pub fn completion<T: Send>() -> (CompletionResolver<T>, CompletionWaiter<T>) {
    let (tx, rx) = crossbeam_channel::bounded(1);
    let resolved = Arc::new(AtomicBool::new(false));
    (
        CompletionResolver {
            tx,
            resolved: resolved.clone(),
        },
        CompletionWaiter { rx, resolved },
    )
}

pub struct CompletionResolver<T> {
    tx: crossbeam_channel::Sender<T>,
    resolved: Arc<AtomicBool>,
}

pub struct CompletionWaiter<T> {
    rx: crossbeam_channel::Receiver<T>,
    resolved: Arc<AtomicBool>,
}

impl<T: Send> CompletionResolver<T> {
    /// Delivers the result. Returns `false` (and drops `value`) if the
    /// completion was already resolved.
    pub fn resolve(&self, value: T) -> bool {
        if self.resolved.swap(true, Ordering::AcqRel) {
            log::warn!("completion resolved more than once; extra result dropped");
            return false;
        }
        // Capacity 1 and the flag guarantee this send never blocks.
        let _ = self.tx.try_send(value);
        true
    }
}

impl<T: Send> CompletionWaiter<T> {
    /// Blocks until the resolver fires. `None` means the resolver was
    /// dropped without resolving.
    pub fn wait(self) -> Option<T> {
        self.rx.recv().ok()
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.load(Ordering::Acquire)
    }

    /// Non-blocking check for a delivered result.
    pub fn try_wait(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}
