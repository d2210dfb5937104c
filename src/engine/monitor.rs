//! Quiescence monitor: decides the single moment a run should stop.
//!
//! Tracks the outstanding work count (seeds + spawned - completed - failed)
//! and an inactivity clock reset on every lifecycle event. The supervisory
//! loop fires the registered cancel hook exactly once, either when the
//! count drains to zero or when no event has arrived for the configured
//! inactivity window.

use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Span, debug, info, warn};

use crate::error::{Error, Result};
use crate::model::{EventKind, ExitReason, LifecycleEvent, RunState};
use crate::telemetry::work::{record_run_exit, record_state_transition, start_run_span};

type CancelHook = Box<dyn FnOnce() + Send + 'static>;

/// Point-in-time view of the monitor's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSnapshot {
    pub state: RunState,
    pub outstanding: u64,
    pub seeded: u64,
    pub spawned: u64,
    pub completed: u64,
    pub failed: u64,
    pub exit: Option<ExitReason>,
}

struct Inner {
    state: RunState,
    outstanding: u64,
    seeded: u64,
    spawned: u64,
    completed: u64,
    failed: u64,
    last_activity: Instant,
    hook: Option<CancelHook>,
    hook_fired: bool,
    exit: Option<ExitReason>,
}

/// One per run. Share it with `Arc`.
pub struct QuiescenceMonitor {
    inner: Mutex<Inner>,
    activity: Notify,
    inactivity: Duration,
    span: Span,
}

impl std::fmt::Debug for QuiescenceMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuiescenceMonitor")
            .field("inactivity", &self.inactivity)
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

impl QuiescenceMonitor {
    pub fn new(inactivity: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: RunState::Idle,
                outstanding: 0,
                seeded: 0,
                spawned: 0,
                completed: 0,
                failed: 0,
                last_activity: Instant::now(),
                hook: None,
                hook_fired: false,
                exit: None,
            }),
            activity: Notify::new(),
            inactivity,
            span: start_run_span(inactivity),
        }
    }

    /// Store the function invoked on entry to `Cancelling`.
    ///
    /// If the run already went through `Cancelling` without a hook (e.g. an
    /// empty seed set primed first), the hook runs immediately so it is
    /// still invoked exactly once.
    pub fn register_cancel_hook(&self, hook: impl FnOnce() + Send + 'static) {
        let mut inner = self.lock();
        if inner.state.is_shutting_down() && !inner.hook_fired {
            inner.hook_fired = true;
            drop(inner);
            hook();
            return;
        }
        if inner.hook_fired {
            warn!("cancel hook registered after cancellation already fired, ignoring");
            return;
        }
        if inner.hook.replace(Box::new(hook)).is_some() {
            warn!("cancel hook replaced");
        }
    }

    /// Set the initial outstanding count. Called once, before any event.
    ///
    /// Zero seeds is a valid run that terminates immediately.
    pub fn prime_seed_count(&self, n: usize) -> Result<()> {
        let mut inner = self.lock();
        if inner.state != RunState::Idle {
            return Err(Error::InvalidTransition {
                from: inner.state,
                to: RunState::Active,
            });
        }

        inner.outstanding = n as u64;
        inner.seeded = n as u64;
        inner.last_activity = Instant::now();
        info!(seeds = n, "monitor primed");

        if n == 0 {
            self.advance(&mut inner, RunState::Quiescent);
            drop(inner);
            self.begin_cancel(ExitReason::Quiescent);
        } else {
            self.advance(&mut inner, RunState::Active);
            drop(inner);
        }

        self.activity.notify_one();
        Ok(())
    }

    /// Record one lifecycle event and reset the inactivity clock.
    ///
    /// Events that arrive after cancellation are still counted but can no
    /// longer trigger the hook.
    pub fn notify(&self, event: LifecycleEvent) -> Result<()> {
        let kind = event.kind();
        let mut inner = self.lock();

        if inner.state == RunState::Idle {
            return Err(Error::NotPrimed(kind));
        }

        match kind {
            EventKind::Spawned => {
                inner.outstanding += 1;
                inner.spawned += 1;
            }
            EventKind::Completed | EventKind::Failed => {
                if inner.outstanding == 0 {
                    if inner.state.is_shutting_down() {
                        debug!(id = %event.id(), %kind, "late terminal event after shutdown");
                        return Ok(());
                    }
                    return Err(Error::CounterUnderflow(kind));
                }
                inner.outstanding -= 1;
                if kind == EventKind::Completed {
                    inner.completed += 1;
                } else {
                    inner.failed += 1;
                }
            }
        }

        inner.last_activity = Instant::now();
        if inner.state == RunState::Active {
            self.advance(&mut inner, RunState::Draining);
        }

        debug!(
            id = %event.id(),
            %kind,
            outstanding = inner.outstanding,
            "lifecycle event"
        );
        drop(inner);

        self.activity.notify_one();
        Ok(())
    }

    /// Supervisory loop. Returns once the run is `Closed`.
    ///
    /// `ctx` is the surrounding cancellation context; if it fires first the
    /// run is cancelled with [`ExitReason::Interrupted`].
    pub async fn run(&self, ctx: CancellationToken) -> ExitReason {
        let mut interrupted = false;
        loop {
            let deadline = match self.observe() {
                Observation::Done(reason) => return reason,
                Observation::Wait(deadline) => deadline,
            };

            tokio::select! {
                _ = self.activity.notified() => {}
                _ = sleep_until_opt(deadline) => {}
                _ = ctx.cancelled(), if !interrupted => {
                    info!("run context cancelled");
                    interrupted = true;
                    self.begin_cancel(ExitReason::Interrupted);
                }
            }
        }
    }

    /// Current counters and state.
    pub fn snapshot(&self) -> MonitorSnapshot {
        let inner = self.lock();
        MonitorSnapshot {
            state: inner.state,
            outstanding: inner.outstanding,
            seeded: inner.seeded,
            spawned: inner.spawned,
            completed: inner.completed,
            failed: inner.failed,
            exit: inner.exit,
        }
    }

    pub fn state(&self) -> RunState {
        self.lock().state
    }

    pub fn outstanding(&self) -> u64 {
        self.lock().outstanding
    }

    /// One observation point: apply the quiescence and stall edges, then
    /// report what to wait for next.
    fn observe(&self) -> Observation {
        let mut inner = self.lock();
        match inner.state {
            RunState::Closed => Observation::Done(inner.exit.unwrap_or(ExitReason::Quiescent)),
            // Another caller is running the hook; it wakes us when closed.
            RunState::Quiescent | RunState::Cancelling => Observation::Wait(None),
            RunState::Idle => Observation::Wait(None),
            RunState::Active | RunState::Draining => {
                if inner.outstanding == 0 {
                    self.advance(&mut inner, RunState::Quiescent);
                    drop(inner);
                    self.begin_cancel(ExitReason::Quiescent);
                    return self.observe();
                }

                let deadline = inner.last_activity + self.inactivity;
                if Instant::now() >= deadline {
                    warn!(
                        outstanding = inner.outstanding,
                        inactivity_ms = self.inactivity.as_millis() as u64,
                        "no lifecycle event within inactivity window, forcing shutdown"
                    );
                    drop(inner);
                    self.begin_cancel(ExitReason::Stalled);
                    return self.observe();
                }

                Observation::Wait(Some(deadline))
            }
        }
    }

    /// Move into `Cancelling`, fire the hook outside the lock, then close.
    fn begin_cancel(&self, reason: ExitReason) {
        let mut inner = self.lock();
        if inner.state.is_shutting_down() {
            return;
        }

        self.advance(&mut inner, RunState::Cancelling);
        inner.exit = Some(reason);
        let hook = inner.hook.take();
        if hook.is_some() {
            inner.hook_fired = true;
        }
        let outstanding = inner.outstanding;
        drop(inner);

        record_run_exit(&self.span, reason.as_str());
        info!(reason = %reason, outstanding, "cancelling run");
        if let Some(hook) = hook {
            hook();
        }

        let mut inner = self.lock();
        self.advance(&mut inner, RunState::Closed);
        drop(inner);

        self.activity.notify_one();
    }

    fn advance(&self, inner: &mut Inner, to: RunState) {
        let from = inner.state;
        debug_assert!(
            from.can_transition_to(to),
            "invalid run state transition {from} -> {to}"
        );
        inner.state = to;
        record_state_transition(&self.span, &from.to_string(), &to.to_string());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // No critical section can leave Inner half-updated.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

enum Observation {
    Done(ExitReason),
    Wait(Option<Instant>),
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
