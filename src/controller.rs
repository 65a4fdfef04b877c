use std::sync::atomic::Ordering;

use getset::Getters;
use serde::Serialize;
use tracing::info;

use crate::dispatcher::QueueHandle;
use crate::engine::Engine;
use crate::errors::{EngineError, Result};

/// A point-in-time snapshot of one queue on one engine instance.
#[derive(Debug, Clone, Getters, Serialize)]
#[getset(get = "pub")]
pub struct QueueStatus {
    queue: String,
    /// Whether a dispatcher is serving the queue (false after a stop)
    running: bool,
    paused: bool,
    /// Current concurrency limit
    concurrency: usize,
    /// Jobs executing right now on this instance
    executing: usize,
    /// The reporting engine instance
    node_id: String,
}

/// Operator control of individual queues.
///
/// Every change takes effect on the dispatcher's next claim cycle and
/// never interrupts jobs already executing. Unknown queue names are an
/// error, not a no-op.
impl Engine {
    fn handle(&self, queue: &str) -> Result<&QueueHandle> {
        self.queues
            .get(queue)
            .ok_or_else(|| EngineError::QueueNotFound(queue.to_string()))
    }

    /// Stops claiming on a queue. Executing jobs settle normally.
    pub fn pause_queue(&self, queue: &str) -> Result<()> {
        let handle = self.handle(queue)?;
        handle.runtime.send_modify(|rt| rt.paused = true);
        info!(queue, "Queue paused");
        Ok(())
    }

    /// Resumes claiming on a paused queue.
    pub fn resume_queue(&self, queue: &str) -> Result<()> {
        let handle = self.handle(queue)?;
        handle.runtime.send_modify(|rt| rt.paused = false);
        handle.wake.notify_one();
        info!(queue, "Queue resumed");
        Ok(())
    }

    /// Detaches a queue's dispatcher entirely. Use [`start_queue`] to
    /// bring it back.
    ///
    /// [`start_queue`]: Engine::start_queue
    pub fn stop_queue(&self, queue: &str) -> Result<()> {
        let handle = self.handle(queue)?;
        handle.runtime.send_modify(|rt| rt.stopped = true);
        info!(queue, "Queue stopped");
        Ok(())
    }

    /// Re-attaches a stopped queue's dispatcher.
    pub fn start_queue(&self, queue: &str) -> Result<()> {
        let handle = self.handle(queue)?;
        handle.runtime.send_modify(|rt| rt.stopped = false);
        if self.running.load(Ordering::SeqCst) {
            self.spawn_dispatcher(queue);
        }
        info!(queue, "Queue started");
        Ok(())
    }

    /// Changes a queue's concurrency limit. A lower limit never interrupts
    /// executing jobs; the queue shrinks as they settle.
    pub fn scale_queue(&self, queue: &str, limit: usize) -> Result<()> {
        let handle = self.handle(queue)?;
        handle.runtime.send_modify(|rt| rt.limit = limit);
        handle.wake.notify_one();
        info!(queue, limit, "Queue scaled");
        Ok(())
    }

    pub fn check_queue(&self, queue: &str) -> Result<QueueStatus> {
        let handle = self.handle(queue)?;
        let runtime = *handle.runtime.borrow();
        Ok(QueueStatus {
            queue: queue.to_string(),
            running: !runtime.stopped,
            paused: runtime.paused,
            concurrency: runtime.limit,
            executing: handle.executing.load(Ordering::SeqCst),
            node_id: self.node_id.clone(),
        })
    }

    /// Names of every queue this engine serves, sorted.
    pub fn queue_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.queues.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
