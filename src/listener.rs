//! Session-scoped handle for a forwarding task.

use tokio::task::JoinHandle;

/// Owns a task that forwards backend notifications onto the screen loop.
///
/// Dropping the guard aborts the task; the task's backend receiver is
/// dropped with it, which unregisters the listener on the backend side.
/// Events the task already queued carry `id` so the screen can discard them.
#[derive(Debug)]
pub struct ListenerGuard {
    id: u64,
    task: JoinHandle<()>,
}

impl ListenerGuard {
    #[must_use]
    pub fn new(id: u64, task: JoinHandle<()>) -> Self {
        Self { id, task }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.task.abort();
    }
}
