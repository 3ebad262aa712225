//! RefreshCoordinator: one fetch-then-validate pass over the catalog.
//!
//! ```text
//!   refresh() ─► Getting ── fetch pool (1) ──► on_fetched()
//!                                                 │  replace list, progress(0, n)
//!                                                 ▼
//!                            Validating ── probe pool (N) ──► on_probed() × n
//!                                                                │  progress(k, n)
//!                                                                ▼
//!                                                        k == n: RefreshDone ─► Idle
//! ```
//!
//! Each `refresh()` bumps the generation and resets both pools.  Completions
//! tagged with an older generation are dropped on arrival, so a superseded
//! cycle can neither advance the counter nor emit a second `RefreshDone`.
use std::sync::Arc;

use birb_proto::protocol::{Notification, StreamDescriptor, StreamEntry, StreamId, StreamStatus};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::event::CoreEvent;
use crate::probe::{HealthProbe, ProbeVerdict};
use crate::sources::Catalog;
use crate::task_pool::{Completion, TaskPool};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Getting,
    Validating,
}

/// Aggregate of one validation fan-out.
#[derive(Debug)]
struct RefreshCycle {
    total: usize,
    completed: usize,
    /// Per-entry latch: a probe result is applied at most once.
    applied: Vec<bool>,
}

impl RefreshCycle {
    fn new(total: usize) -> Self {
        Self {
            total,
            completed: 0,
            applied: vec![false; total],
        }
    }

    fn is_done(&self) -> bool {
        self.completed == self.total
    }
}

pub struct RefreshCoordinator {
    catalog: Arc<dyn Catalog>,
    probe: Arc<HealthProbe>,
    fetch_pool: TaskPool<Vec<StreamDescriptor>, CoreEvent>,
    probe_pool: TaskPool<ProbeVerdict, CoreEvent>,
    generation: u64,
    phase: Phase,
    cycle: Option<RefreshCycle>,
    entries: Vec<StreamEntry>,
    next_id: u64,
}

impl RefreshCoordinator {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        probe: Arc<HealthProbe>,
        concurrency: usize,
        events: mpsc::UnboundedSender<CoreEvent>,
    ) -> Self {
        Self {
            catalog,
            probe,
            fetch_pool: TaskPool::new("fetch", 1, 0, events.clone(), CoreEvent::Fetched),
            probe_pool: TaskPool::new("probe", concurrency, 0, events, CoreEvent::Probed),
            generation: 0,
            phase: Phase::Idle,
            cycle: None,
            entries: Vec::new(),
            next_id: 1,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_refreshing(&self) -> bool {
        self.phase != Phase::Idle
    }

    /// `(completed, total)` of the validation in progress.
    pub fn progress(&self) -> Option<(usize, usize)> {
        self.cycle.as_ref().map(|c| (c.completed, c.total))
    }

    pub fn entries(&self) -> &[StreamEntry] {
        &self.entries
    }

    pub fn entries_mut(&mut self) -> &mut [StreamEntry] {
        &mut self.entries
    }

    pub fn find(&self, id: StreamId) -> Option<&StreamEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// Start a new cycle, superseding any in flight.
    pub fn refresh(&mut self) -> Vec<Notification> {
        self.generation += 1;
        if self.phase != Phase::Idle {
            info!(
                "refresh: superseding cycle {} while {:?}",
                self.generation - 1,
                self.phase
            );
        }
        self.fetch_pool.reset(self.generation);
        self.probe_pool.reset(self.generation);
        self.cycle = None;
        self.phase = Phase::Getting;

        let catalog = Arc::clone(&self.catalog);
        self.fetch_pool.submit(0, move || Ok(catalog.fetch()));
        debug!("refresh: cycle {} getting", self.generation);

        vec![Notification::RefreshStarted, Notification::Getting]
    }

    pub fn on_fetched(&mut self, done: Completion<Vec<StreamDescriptor>>) -> Vec<Notification> {
        if done.generation != self.generation || self.phase != Phase::Getting {
            debug!(
                "refresh: dropping stale fetch of cycle {} (current {})",
                done.generation, self.generation
            );
            return Vec::new();
        }

        let descriptors = match done.outcome {
            Ok(list) => list,
            Err(e) => {
                warn!("refresh: fetch job failed: {}", e);
                Vec::new()
            }
        };

        self.entries.clear();
        for descriptor in descriptors {
            self.entries.push(StreamEntry {
                id: StreamId(self.next_id),
                descriptor,
                status: StreamStatus::default(),
            });
            self.next_id += 1;
        }

        let total = self.entries.len();
        info!("refresh: cycle {} validating {} streams", self.generation, total);
        self.phase = Phase::Validating;
        self.cycle = Some(RefreshCycle::new(total));

        let mut out = vec![
            Notification::Validating,
            Notification::ListReplaced {
                entries: self.entries.clone(),
            },
            Notification::ValidatingProgress {
                completed: 0,
                total,
            },
        ];

        for (index, entry) in self.entries.iter().enumerate() {
            let probe = Arc::clone(&self.probe);
            let descriptor = entry.descriptor.clone();
            self.probe_pool
                .submit(index, move || Ok(probe.check(&descriptor)));
        }

        if total == 0 {
            out.push(self.finish());
        }
        out
    }

    pub fn on_probed(&mut self, done: Completion<ProbeVerdict>) -> Vec<Notification> {
        if done.generation != self.generation {
            debug!(
                "refresh: dropping stale probe {} of cycle {} (current {})",
                done.ticket, done.generation, self.generation
            );
            return Vec::new();
        }
        let Some(cycle) = self.cycle.as_mut() else {
            debug!("refresh: probe {} arrived with no cycle open", done.ticket);
            return Vec::new();
        };
        let ticket = done.ticket;
        if cycle.applied.get(ticket) != Some(&false) {
            warn!("refresh: ignoring repeated or unknown probe {}", ticket);
            return Vec::new();
        }
        cycle.applied[ticket] = true;

        let verdict = done.outcome.unwrap_or_else(|e| {
            warn!("refresh: probe job {} failed: {}", ticket, e);
            ProbeVerdict::unhealthy()
        });

        cycle.completed += 1;
        let (completed, total) = (cycle.completed, cycle.total);
        let finished = cycle.is_done();

        let entry = &mut self.entries[ticket];
        entry.status.healthy = Some(verdict.healthy);
        entry.status.quality = verdict.quality;
        debug!(
            "refresh: {} {} → {} ({}/{})",
            entry.id,
            entry.descriptor.name,
            entry.status.health_label(),
            completed,
            total
        );

        let mut out = vec![
            Notification::ItemUpdated {
                entry: entry.clone(),
            },
            Notification::ValidatingProgress { completed, total },
        ];
        if finished {
            out.push(self.finish());
        }
        out
    }

    fn finish(&mut self) -> Notification {
        info!("refresh: cycle {} done", self.generation);
        self.cycle = None;
        self.phase = Phase::Idle;
        Notification::RefreshDone
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{ProbeError, Resolver, VariantSet};
    use crate::task_pool::TaskError;

    struct Fixed(Vec<&'static str>);

    impl Catalog for Fixed {
        fn fetch(&self) -> Vec<StreamDescriptor> {
            self.0
                .iter()
                .map(|name| StreamDescriptor {
                    name: name.to_string(),
                    description: String::new(),
                    url: format!("https://example.org/{}", name),
                })
                .collect()
        }
    }

    struct NoVariants;

    impl Resolver for NoVariants {
        fn resolve(&self, _url: &str) -> Result<VariantSet, ProbeError> {
            Ok(VariantSet::new())
        }
    }

    fn coordinator(
        names: Vec<&'static str>,
    ) -> (RefreshCoordinator, mpsc::UnboundedReceiver<CoreEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let probe = HealthProbe::new(Arc::new(NoVariants), vec!["best".into()]);
        (
            RefreshCoordinator::new(Arc::new(Fixed(names)), Arc::new(probe), 2, tx),
            rx,
        )
    }

    fn fetched(generation: u64, names: &[&'static str]) -> Completion<Vec<StreamDescriptor>> {
        Completion {
            generation,
            ticket: 0,
            outcome: Ok(Fixed(names.to_vec()).fetch()),
        }
    }

    fn verdict(generation: u64, ticket: usize, healthy: bool) -> Completion<ProbeVerdict> {
        Completion {
            generation,
            ticket,
            outcome: Ok(ProbeVerdict {
                healthy,
                quality: healthy.then(|| "480p".to_string()),
            }),
        }
    }

    #[tokio::test]
    async fn test_refresh_announces_getting() {
        let (mut rc, _rx) = coordinator(vec![]);
        assert_eq!(
            rc.refresh(),
            vec![Notification::RefreshStarted, Notification::Getting]
        );
        assert_eq!(rc.phase(), Phase::Getting);
        assert_eq!(rc.generation(), 1);
    }

    #[tokio::test]
    async fn test_empty_list_finishes_immediately() {
        let (mut rc, _rx) = coordinator(vec![]);
        rc.refresh();
        let out = rc.on_fetched(fetched(1, &[]));
        assert_eq!(
            out,
            vec![
                Notification::Validating,
                Notification::ListReplaced { entries: vec![] },
                Notification::ValidatingProgress {
                    completed: 0,
                    total: 0
                },
                Notification::RefreshDone,
            ]
        );
        assert_eq!(rc.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn test_probe_results_counted_once() {
        let (mut rc, _rx) = coordinator(vec![]);
        rc.refresh();
        rc.on_fetched(fetched(1, &["a", "b"]));
        assert_eq!(rc.progress(), Some((0, 2)));

        let out = rc.on_probed(verdict(1, 1, true));
        assert_eq!(
            out[1],
            Notification::ValidatingProgress {
                completed: 1,
                total: 2
            }
        );
        assert!(rc.on_probed(verdict(1, 1, false)).is_empty());
        assert_eq!(rc.entries()[1].status.quality.as_deref(), Some("480p"));

        let out = rc.on_probed(Completion {
            generation: 1,
            ticket: 0,
            outcome: Err(TaskError::Panicked("boom".into())),
        });
        assert_eq!(out.last(), Some(&Notification::RefreshDone));
        assert_eq!(rc.entries()[0].status.healthy, Some(false));
        assert!(!rc.is_refreshing());
    }

    #[tokio::test]
    async fn test_stale_generation_is_dropped() {
        let (mut rc, _rx) = coordinator(vec![]);
        rc.refresh();
        rc.on_fetched(fetched(1, &["a"]));
        rc.refresh();
        assert!(rc.on_probed(verdict(1, 0, true)).is_empty());
        assert!(rc.on_fetched(fetched(1, &["x", "y"])).is_empty());
        assert_eq!(rc.phase(), Phase::Getting);
    }

    #[tokio::test]
    async fn test_ids_are_fresh_per_cycle() {
        let (mut rc, _rx) = coordinator(vec![]);
        rc.refresh();
        rc.on_fetched(fetched(1, &["a", "b"]));
        let first: Vec<StreamId> = rc.entries().iter().map(|e| e.id).collect();
        rc.refresh();
        rc.on_fetched(fetched(2, &["a", "b"]));
        assert!(rc.entries().iter().all(|e| !first.contains(&e.id)));
        assert!(rc.find(first[0]).is_none());
        assert!(rc.find(rc.entries()[0].id).is_some());
    }

    #[tokio::test]
    async fn test_pools_deliver_real_jobs() {
        let (mut rc, mut rx) = coordinator(vec!["a", "b", "c"]);
        rc.refresh();
        let mut done = false;
        while !done {
            let notes = match rx.recv().await.unwrap() {
                CoreEvent::Fetched(c) => rc.on_fetched(c),
                CoreEvent::Probed(c) => rc.on_probed(c),
                other => panic!("unexpected {:?}", other),
            };
            done = notes.contains(&Notification::RefreshDone);
        }
        assert_eq!(rc.entries().len(), 3);
        assert!(rc
            .entries()
            .iter()
            .all(|e| e.status.healthy == Some(false) && e.status.quality.is_none()));
    }
}
