//! Cancellable tasks keyed by upload session.
//!
//! Every timer and deferred task runs as a spawned Tokio task registered
//! under `(SessionId, TimerKind)`. Cancelling aborts the join handles
//! synchronously, so no tick of a replaced or cancelled session runs again.

use std::collections::HashMap;
use std::future::Future;
use std::ops::ControlFlow;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::debug;

use crate::model::SessionId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TimerKind {
    SimulatedProgress,
    FinishRamp,
    FinishGrace,
    Redirect,
}

#[derive(Debug, Default)]
pub struct TaskScheduler {
    tasks: HashMap<SessionId, Vec<(TimerKind, JoinHandle<()>)>>,
}

impl TaskScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `task` once after `delay`. Must be called within a Tokio runtime.
    pub fn after<F>(&mut self, session: &SessionId, kind: TimerKind, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.spawn(session, kind, async move {
            time::sleep(delay).await;
            task.await;
        });
    }

    /// Calls `tick` every `period`, first after one full period, until it
    /// returns `Break`.
    pub fn every<F>(&mut self, session: &SessionId, kind: TimerKind, period: Duration, mut tick: F)
    where
        F: FnMut() -> ControlFlow<()> + Send + 'static,
    {
        self.spawn(session, kind, async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if tick().is_break() {
                    break;
                }
            }
        });
    }

    pub fn spawn<F>(&mut self, session: &SessionId, kind: TimerKind, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task);
        let entry = self.tasks.entry(session.clone()).or_default();
        entry.retain(|(_, h)| !h.is_finished());
        entry.push((kind, handle));
        debug!(session = %session, ?kind, "task scheduled");
    }

    /// Aborts every task of `kind` for `session`.
    pub fn cancel(&mut self, session: &SessionId, kind: TimerKind) -> usize {
        let Some(entry) = self.tasks.get_mut(session) else {
            return 0;
        };
        let mut cancelled = 0;
        entry.retain(|(k, handle)| {
            if *k == kind {
                handle.abort();
                cancelled += 1;
                false
            } else {
                true
            }
        });
        if entry.is_empty() {
            self.tasks.remove(session);
        }
        cancelled
    }

    /// Aborts every task of `session`.
    pub fn cancel_session(&mut self, session: &SessionId) -> usize {
        let Some(entry) = self.tasks.remove(session) else {
            return 0;
        };
        let count = entry.len();
        for (_, handle) in entry {
            handle.abort();
        }
        if count > 0 {
            debug!(session = %session, count, "session tasks cancelled");
        }
        count
    }

    pub fn cancel_all(&mut self) -> usize {
        let sessions: Vec<SessionId> = self.tasks.keys().cloned().collect();
        sessions.iter().map(|s| self.cancel_session(s)).sum()
    }

    /// Tasks of `session` that have not run to completion.
    pub fn pending(&self, session: &SessionId) -> usize {
        self.tasks
            .get(session)
            .map_or(0, |entry| entry.iter().filter(|(_, h)| !h.is_finished()).count())
    }

    pub fn pending_kind(&self, session: &SessionId, kind: TimerKind) -> usize {
        self.tasks.get(session).map_or(0, |entry| {
            entry
                .iter()
                .filter(|(k, h)| *k == kind && !h.is_finished())
                .count()
        })
    }

    pub fn pending_total(&self) -> usize {
        self.tasks
            .values()
            .flatten()
            .filter(|(_, h)| !h.is_finished())
            .count()
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        for (_, handle) in self.tasks.drain().flat_map(|(_, entry)| entry) {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn after_fires_once() {
        let mut scheduler = TaskScheduler::new();
        let session = SessionId::generate();
        let fired = Arc::new(AtomicU32::new(0));
        let counter = fired.clone();
        scheduler.after(&session, TimerKind::Redirect, Duration::from_millis(900), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        time::sleep(Duration::from_millis(899)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        time::sleep(Duration::from_millis(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        tokio::task::yield_now().await;
        assert_eq!(scheduler.pending(&session), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn every_stops_on_break() {
        let mut scheduler = TaskScheduler::new();
        let session = SessionId::generate();
        let ticks = Arc::new(AtomicU32::new(0));
        let counter = ticks.clone();
        scheduler.every(&session, TimerKind::FinishRamp, Duration::from_millis(90), move || {
            if counter.fetch_add(1, Ordering::SeqCst) + 1 == 3 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });

        time::sleep(Duration::from_millis(1_000)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
        assert_eq!(scheduler.pending_kind(&session, TimerKind::FinishRamp), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_session_stops_pending_ticks() {
        let mut scheduler = TaskScheduler::new();
        let session = SessionId::generate();
        let other = SessionId::generate();
        let ticks = Arc::new(AtomicU32::new(0));
        let counter = ticks.clone();
        scheduler.every(&session, TimerKind::SimulatedProgress, Duration::from_millis(180), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            ControlFlow::Continue(())
        });
        scheduler.after(&other, TimerKind::Redirect, Duration::from_secs(5), async {});

        time::sleep(Duration::from_millis(400)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 2);

        assert_eq!(scheduler.cancel_session(&session), 1);
        assert_eq!(scheduler.pending(&session), 0);
        time::sleep(Duration::from_millis(1_000)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.pending(&other), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_by_kind_leaves_other_kinds() {
        let mut scheduler = TaskScheduler::new();
        let session = SessionId::generate();
        scheduler.after(&session, TimerKind::FinishGrace, Duration::from_secs(1), async {});
        scheduler.after(&session, TimerKind::Redirect, Duration::from_secs(1), async {});

        assert_eq!(scheduler.cancel(&session, TimerKind::FinishGrace), 1);
        assert_eq!(scheduler.cancel(&session, TimerKind::FinishGrace), 0);
        assert_eq!(scheduler.pending_kind(&session, TimerKind::Redirect), 1);
        assert_eq!(scheduler.cancel_all(), 1);
        assert_eq!(scheduler.pending_total(), 0);
    }
}
