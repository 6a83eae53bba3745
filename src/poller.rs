//! Periodic reconciliation of displayed VM state with the backend.
//!
//! One registry entry per mounted VM holds its interval task and at most one
//! pending deferred refresh. Stopping an entry aborts both, so no timer
//! outlives the view it was started for. Readings are applied only while no
//! action is in flight for the VM; the action's own response is
//! authoritative until its lock is released. Ticks stay on the interval
//! grid: a poll that overruns one or more boundaries skips those ticks
//! rather than shifting the schedule.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::board::{StatusApplied, VmBoard};
use crate::client::VmBackend;
use crate::config::PanelConfig;
use crate::models::VmState;
use crate::outcome::bounded;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollResult {
    Applied(VmState),
    SkippedLocked,
    Failed(String),
    NotTracked,
}

/// Everything a poll needs; cloned into each spawned task.
#[derive(Clone)]
struct StatusReader {
    board: Arc<VmBoard>,
    backend: Arc<dyn VmBackend>,
    timeout: Option<Duration>,
}

impl StatusReader {
    /// One status read. Never panics and never returns an error: failures are
    /// logged and reported as [`PollResult::Failed`].
    async fn poll(&self, vm_id: &str) -> PollResult {
        let response = match bounded(self.timeout, self.backend.status(vm_id)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!(vm_id, error = %e, "status poll failed");
                return PollResult::Failed(e.to_string());
            }
            Err(_) => {
                warn!(vm_id, "status poll timed out");
                return PollResult::Failed("timed out".to_string());
            }
        };

        let state = match (response.success, response.state) {
            (true, Some(state)) => state,
            (_, _) => {
                let error = response
                    .error
                    .unwrap_or_else(|| "status unavailable".to_string());
                warn!(vm_id, %error, "status poll rejected");
                return PollResult::Failed(error);
            }
        };

        match self.board.apply_status(vm_id, state.clone(), response.uptime) {
            StatusApplied::Applied => {
                debug!(vm_id, %state, "status applied");
                PollResult::Applied(state)
            }
            StatusApplied::SkippedLocked => {
                debug!(vm_id, %state, "status ignored, action in flight");
                PollResult::SkippedLocked
            }
            StatusApplied::NotTracked => PollResult::NotTracked,
        }
    }
}

#[derive(Default)]
struct VmTasks {
    ticker: Option<JoinHandle<()>>,
    deferred: Option<JoinHandle<()>>,
}

impl VmTasks {
    fn abort(self) {
        if let Some(ticker) = self.ticker {
            ticker.abort();
        }
        if let Some(deferred) = self.deferred {
            deferred.abort();
        }
    }
}

struct PollerInner {
    reader: StatusReader,
    interval: Duration,
    tasks: Mutex<HashMap<String, VmTasks>>,
}

impl PollerInner {
    fn tasks(&self) -> MutexGuard<'_, HashMap<String, VmTasks>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for PollerInner {
    fn drop(&mut self) {
        let tasks = std::mem::take(self.tasks.get_mut().unwrap_or_else(PoisonError::into_inner));
        for (_, entry) in tasks {
            entry.abort();
        }
    }
}

/// Poller registry keyed by VM id. Cheap to clone; all clones share the
/// same entries.
#[derive(Clone)]
pub struct PollerRegistry {
    inner: Arc<PollerInner>,
}

impl PollerRegistry {
    pub fn new(board: Arc<VmBoard>, backend: Arc<dyn VmBackend>, config: &PanelConfig) -> Self {
        Self {
            inner: Arc::new(PollerInner {
                reader: StatusReader {
                    board,
                    backend,
                    timeout: config.request_timeout,
                },
                interval: config.poll_interval,
                tasks: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Start polling `vm_id`. Any previous schedule for the same VM is
    /// cancelled first. Must be called from within a tokio runtime.
    pub fn start(&self, vm_id: &str) {
        let ticker = (!self.inner.interval.is_zero())
            .then(|| spawn_ticker(self.inner.reader.clone(), vm_id.to_string(), self.inner.interval));

        let previous = self.inner.tasks().insert(
            vm_id.to_string(),
            VmTasks {
                ticker,
                deferred: None,
            },
        );
        if let Some(previous) = previous {
            debug!(vm_id, "replacing existing poller");
            previous.abort();
        }
        info!(vm_id, interval_secs = self.inner.interval.as_secs(), "status poller started");
    }

    /// Cancel every timer for `vm_id`. Returns whether one was running.
    pub fn stop(&self, vm_id: &str) -> bool {
        match self.inner.tasks().remove(vm_id) {
            Some(entry) => {
                entry.abort();
                info!(vm_id, "status poller stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, vm_id: &str) -> bool {
        self.inner.tasks().contains_key(vm_id)
    }

    pub fn active(&self) -> usize {
        self.inner.tasks().len()
    }

    /// Schedule a single poll of `vm_id` after `delay`, replacing any refresh
    /// already pending for it. Ignored when the VM has no poller entry.
    pub fn schedule_refresh(&self, vm_id: &str, delay: Duration) {
        let mut tasks = self.inner.tasks();
        let Some(entry) = tasks.get_mut(vm_id) else {
            debug!(vm_id, "refresh not scheduled, VM not mounted");
            return;
        };

        let reader = self.inner.reader.clone();
        let id = vm_id.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            reader.poll(&id).await;
        });

        if let Some(previous) = entry.deferred.replace(handle) {
            previous.abort();
        }
        debug!(vm_id, delay_ms = delay.as_millis() as u64, "deferred refresh scheduled");
    }

    /// Poll `vm_id` now.
    pub async fn refresh(&self, vm_id: &str) -> PollResult {
        self.inner.reader.poll(vm_id).await
    }

    /// Poll every tracked VM concurrently.
    pub async fn refresh_all(&self) -> Vec<(String, PollResult)> {
        let ids = self.inner.reader.board.ids();
        let polls = ids.iter().map(|id| self.inner.reader.poll(id));
        let results = futures::future::join_all(polls).await;
        ids.into_iter().zip(results).collect()
    }

    /// Cancel all timers.
    pub fn shutdown(&self) {
        let tasks = std::mem::take(&mut *self.inner.tasks());
        for (vm_id, entry) in tasks {
            debug!(%vm_id, "status poller stopped on shutdown");
            entry.abort();
        }
    }
}

fn spawn_ticker(reader: StatusReader, vm_id: String, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut boundary = Instant::now() + period;
        loop {
            tokio::time::sleep_until(boundary).await;
            if let PollResult::NotTracked = reader.poll(&vm_id).await {
                debug!(%vm_id, "VM no longer tracked, poller exiting");
                break;
            }
            boundary = next_boundary(boundary, period, Instant::now());
        }
    })
}

/// First boundary after `now` on the grid `last + k * period`.
fn next_boundary(last: Instant, period: Duration, now: Instant) -> Instant {
    let mut next = last + period;
    if next <= now {
        let behind = now.duration_since(next).as_nanos() / period.as_nanos();
        let skipped = u32::try_from(behind + 1).unwrap_or(u32::MAX);
        debug!(skipped, "status poll overran its interval");
        next += period.saturating_mul(skipped);
    }
    next
}
