/// Bounded worker pool for short blocking jobs.
///
/// ```text
///   TaskPool::submit(ticket, job)
///         │
///         └── tokio task ── acquire permit (N per pool)
///                              └── spawn_blocking(job)
///                                     └── Completion { generation, ticket, outcome }
///                                            └── wrap() ──► event channel (single consumer)
/// ```
///
/// Every completion carries the generation the pool was created (or last
/// reset) with.  Consumers compare it against their current generation and
/// drop anything older, so a superseded batch can never leak results into a
/// new one.  `reset` additionally aborts jobs still waiting for a permit.
use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::AbortHandle;
use tracing::{debug, warn};

/// Why a job produced no payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("job failed: {0}")]
    Failed(String),
    #[error("job panicked: {0}")]
    Panicked(String),
    #[error("job cancelled")]
    Cancelled,
}

/// Result of one job, tagged for the consumer.
#[derive(Debug)]
pub struct Completion<T> {
    pub generation: u64,
    pub ticket: usize,
    pub outcome: Result<T, TaskError>,
}

pub struct TaskPool<T, E> {
    name: &'static str,
    concurrency: usize,
    generation: u64,
    permits: Arc<Semaphore>,
    events: mpsc::UnboundedSender<E>,
    wrap: fn(Completion<T>) -> E,
    inflight: Vec<AbortHandle>,
}

impl<T, E> TaskPool<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    pub fn new(
        name: &'static str,
        concurrency: usize,
        generation: u64,
        events: mpsc::UnboundedSender<E>,
        wrap: fn(Completion<T>) -> E,
    ) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            name,
            concurrency,
            generation,
            permits: Arc::new(Semaphore::new(concurrency)),
            events,
            wrap,
            inflight: Vec::new(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Queue `job`.  Never blocks the caller; the outcome arrives later on
    /// the event channel.  Must be called from within a tokio runtime.
    pub fn submit<F>(&mut self, ticket: usize, job: F)
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        self.inflight.retain(|h| !h.is_finished());

        let name = self.name;
        let generation = self.generation;
        let permits = Arc::clone(&self.permits);
        let events = self.events.clone();
        let wrap = self.wrap;

        let handle = tokio::spawn(async move {
            let outcome = match permits.acquire_owned().await {
                Ok(permit) => {
                    let joined = tokio::task::spawn_blocking(job).await;
                    drop(permit);
                    match joined {
                        Ok(Ok(payload)) => Ok(payload),
                        Ok(Err(e)) => Err(TaskError::Failed(format!("{:#}", e))),
                        Err(e) if e.is_panic() => {
                            let msg = panic_message(e.into_panic());
                            warn!("pool {}: job {} panicked: {}", name, ticket, msg);
                            Err(TaskError::Panicked(msg))
                        }
                        Err(_) => Err(TaskError::Cancelled),
                    }
                }
                // Semaphore closed by reset()
                Err(_) => Err(TaskError::Cancelled),
            };

            debug!(
                "pool {}: job {} of generation {} done ok={}",
                name,
                ticket,
                generation,
                outcome.is_ok()
            );
            let _ = events.send(wrap(Completion {
                generation,
                ticket,
                outcome,
            }));
        });

        self.inflight.push(handle.abort_handle());
    }

    /// Abandon the current batch and start a fresh one under `generation`.
    ///
    /// Jobs still queued are aborted and never deliver.  A job already
    /// running on a worker thread finishes, but its completion carries the
    /// old generation.
    pub fn reset(&mut self, generation: u64) {
        let aborted = self.abort_all();
        if aborted > 0 {
            debug!(
                "pool {}: reset {} → {}, aborted {} jobs",
                self.name, self.generation, generation, aborted
            );
        }
        self.permits = Arc::new(Semaphore::new(self.concurrency));
        self.generation = generation;
    }

    fn abort_all(&mut self) -> usize {
        let mut aborted = 0;
        for handle in self.inflight.drain(..) {
            if !handle.is_finished() {
                handle.abort();
                aborted += 1;
            }
        }
        // After the aborts, so no waiter wakes up to report a cancellation
        self.permits.close();
        aborted
    }
}

impl<T, E> Drop for TaskPool<T, E> {
    fn drop(&mut self) {
        for handle in self.inflight.drain(..) {
            handle.abort();
        }
        self.permits.close();
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
