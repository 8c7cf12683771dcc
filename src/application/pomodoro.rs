use crate::application::clock::{next_id, system_clock, NowProvider};
use crate::application::productivity::ProductivityTracker;
use crate::domain::models::{PomodoroSettings, Session, SessionKind};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::persistent_store::PersistentStore;
use crate::infrastructure::storage::KeyValueStorage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;

pub const POMODORO_KEY: &str = "pomodoro:v1";
const TICK_PERIOD: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TimerStatus {
    #[default]
    Idle,
    Running,
    Paused,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Idle,
    Paused { remaining_seconds: i64 },
    Running { remaining_seconds: i64 },
    Completed {
        finished: Session,
        next: Option<Session>,
    },
}

/// Single-session countdown. Remaining time is always derived from the wall
/// clock, so missed ticks cost nothing.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CountdownState {
    pub status: TimerStatus,
    pub current: Option<Session>,
    pub history: Vec<Session>,
    pub completed_focus_sessions: u32,
    pub settings: PomodoroSettings,
}

impl CountdownState {
    /// Replaces any current session with a fresh running one.
    pub fn start(
        &mut self,
        task_id: Option<String>,
        kind: SessionKind,
        duration_minutes: u32,
        now: DateTime<Utc>,
    ) -> Session {
        let session = Session {
            id: next_id("pom"),
            task_id,
            kind,
            start_time: now,
            end_time: None,
            duration_minutes: duration_minutes.max(1),
            completed: false,
        };
        self.current = Some(session.clone());
        self.status = TimerStatus::Running;
        session
    }

    pub fn pause(&mut self, now: DateTime<Utc>) -> bool {
        if self.status != TimerStatus::Running {
            return false;
        }
        let Some(session) = self.current.as_mut() else {
            return false;
        };
        session.end_time = Some(now);
        self.status = TimerStatus::Paused;
        true
    }

    pub fn resume(&mut self, now: DateTime<Utc>) -> bool {
        if self.status != TimerStatus::Paused {
            return false;
        }
        let Some(session) = self.current.as_mut() else {
            return false;
        };
        if let Some(paused_at) = session.end_time.take() {
            session.start_time += now - paused_at;
        }
        self.status = TimerStatus::Running;
        true
    }

    /// Drops the current session without recording it.
    pub fn cancel(&mut self) -> Option<Session> {
        self.status = TimerStatus::Idle;
        self.current.take()
    }

    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> i64 {
        let Some(session) = self.current.as_ref() else {
            return 0;
        };
        let reference = match self.status {
            TimerStatus::Paused => session.end_time.unwrap_or(now),
            _ => now,
        };
        let elapsed = (reference - session.start_time).num_seconds();
        (session.total_seconds() - elapsed).max(0)
    }

    /// Break that follows the focus session which just brought the completed
    /// count to `completed_focus_sessions`.
    pub fn next_break(&self) -> (SessionKind, u32) {
        let every = self.settings.sessions_until_long_break.max(1);
        if self.completed_focus_sessions > 0 && self.completed_focus_sessions % every == 0 {
            (SessionKind::LongBreak, self.settings.long_break_minutes)
        } else {
            (SessionKind::ShortBreak, self.settings.short_break_minutes)
        }
    }

    /// Read-only view of what a tick at `now` would do.
    pub fn peek(&self, now: DateTime<Utc>) -> TickOutcome {
        match self.status {
            TimerStatus::Idle | TimerStatus::Completed => TickOutcome::Idle,
            TimerStatus::Paused => TickOutcome::Paused {
                remaining_seconds: self.remaining_seconds(now),
            },
            TimerStatus::Running => TickOutcome::Running {
                remaining_seconds: self.remaining_seconds(now),
            },
        }
    }

    /// Finalizes the current session when its time is up and chains a break
    /// after focus sessions.
    pub fn tick(&mut self, now: DateTime<Utc>) -> TickOutcome {
        match self.peek(now) {
            TickOutcome::Running {
                remaining_seconds: 0,
            } => {}
            other => return other,
        }
        let Some(mut finished) = self.current.take() else {
            self.status = TimerStatus::Idle;
            return TickOutcome::Idle;
        };

        finished.completed = true;
        finished.end_time = Some(now);
        self.history.push(finished.clone());
        self.status = TimerStatus::Completed;

        let next = if finished.kind.is_break() {
            None
        } else {
            self.completed_focus_sessions += 1;
            if self.settings.auto_start_breaks {
                let (kind, minutes) = self.next_break();
                Some(self.start(finished.task_id.clone(), kind, minutes, now))
            } else {
                None
            }
        };
        if next.is_none() {
            self.status = TimerStatus::Idle;
        }

        TickOutcome::Completed { finished, next }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PomodoroSnapshot {
    pub status: TimerStatus,
    pub current: Option<Session>,
    pub remaining_seconds: i64,
    pub completed_focus_sessions: u32,
}

struct TimerCore {
    store: Mutex<PersistentStore<CountdownState>>,
    tracker: Arc<ProductivityTracker>,
    now_provider: NowProvider,
}

impl TimerCore {
    fn lock(&self) -> Result<MutexGuard<'_, PersistentStore<CountdownState>>, InfraError> {
        self.store
            .lock()
            .map_err(|error| InfraError::StateUnavailable(format!("pomodoro store lock poisoned: {error}")))
    }

    fn tick(&self) -> Result<TickOutcome, InfraError> {
        let now = (self.now_provider)();
        let outcome = {
            let mut store = self.lock()?;
            match store.state().peek(now) {
                TickOutcome::Running {
                    remaining_seconds: 0,
                } => store.mutate(|state| state.tick(now)),
                other => return Ok(other),
            }
        };

        if let TickOutcome::Completed { finished, next } = &outcome {
            tracing::info!(
                session_id = %finished.id,
                kind = ?finished.kind,
                next = ?next.as_ref().map(|session| session.kind),
                "session completed"
            );
            if !finished.kind.is_break() {
                self.tracker.track_pomodoro_session(finished.duration_minutes)?;
            }
        }
        Ok(outcome)
    }
}

/// Owns the recurring tick task; dropping it stops the countdown.
struct TickerHandle {
    task: JoinHandle<()>,
}

impl TickerHandle {
    fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for TickerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub struct PomodoroTimer {
    core: Arc<TimerCore>,
    ticker: Mutex<Option<TickerHandle>>,
    tick_period: Duration,
}

impl PomodoroTimer {
    pub fn new(
        storage: Arc<dyn KeyValueStorage>,
        tracker: Arc<ProductivityTracker>,
        settings: PomodoroSettings,
    ) -> Self {
        let mut store = PersistentStore::<CountdownState>::load(storage, POMODORO_KEY);
        if store.state().settings != settings {
            store.mutate(|state| state.settings = settings);
        }
        if let Some(Err(reason)) = store.state().current.as_ref().map(Session::validate) {
            tracing::warn!(%reason, "discarding invalid persisted session");
            store.mutate(CountdownState::cancel);
        }

        Self {
            core: Arc::new(TimerCore {
                store: Mutex::new(store),
                tracker,
                now_provider: system_clock(),
            }),
            ticker: Mutex::new(None),
            tick_period: TICK_PERIOD,
        }
    }

    /// Only valid before the timer is shared.
    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        if let Some(core) = Arc::get_mut(&mut self.core) {
            core.now_provider = now_provider;
        }
        self
    }

    pub fn with_tick_period(mut self, tick_period: Duration) -> Self {
        self.tick_period = tick_period;
        self
    }

    /// Re-acquires the ticker for a session persisted as running.
    pub fn restore(&self) -> Result<(), InfraError> {
        let running = self.core.lock()?.state().status == TimerStatus::Running;
        if running {
            tracing::info!("resuming persisted running session");
            self.acquire_ticker()?;
        }
        Ok(())
    }

    pub fn settings(&self) -> Result<PomodoroSettings, InfraError> {
        Ok(self.core.lock()?.state().settings.clone())
    }

    pub fn start(
        &self,
        task_id: Option<String>,
        kind: SessionKind,
        duration_minutes: u32,
    ) -> Result<Session, InfraError> {
        if duration_minutes == 0 {
            return Err(InfraError::InvalidInput(
                "duration_minutes must be > 0".to_string(),
            ));
        }
        self.release_ticker()?;

        let now = (self.core.now_provider)();
        let session = self
            .core
            .lock()?
            .mutate(|state| state.start(task_id, kind, duration_minutes, now));
        self.acquire_ticker()?;

        tracing::info!(session_id = %session.id, kind = ?kind, duration_minutes, "session started");
        Ok(session)
    }

    pub fn start_focus(&self, task_id: Option<String>) -> Result<Session, InfraError> {
        let minutes = self.settings()?.focus_minutes;
        self.start(task_id, SessionKind::Focus, minutes)
    }

    pub fn pause(&self) -> Result<bool, InfraError> {
        let now = (self.core.now_provider)();
        let paused = {
            let mut store = self.core.lock()?;
            store.state().status == TimerStatus::Running && store.mutate(|state| state.pause(now))
        };
        if paused {
            self.release_ticker()?;
            tracing::info!("session paused");
        }
        Ok(paused)
    }

    pub fn resume(&self) -> Result<bool, InfraError> {
        let now = (self.core.now_provider)();
        let resumed = {
            let mut store = self.core.lock()?;
            store.state().status == TimerStatus::Paused && store.mutate(|state| state.resume(now))
        };
        if resumed {
            self.acquire_ticker()?;
            tracing::info!("session resumed");
        }
        Ok(resumed)
    }

    pub fn cancel(&self) -> Result<Option<Session>, InfraError> {
        self.release_ticker()?;
        let mut store = self.core.lock()?;
        if store.state().current.is_none() && store.state().status == TimerStatus::Idle {
            return Ok(None);
        }
        let cancelled = store.mutate(CountdownState::cancel);
        if let Some(session) = cancelled.as_ref() {
            tracing::info!(session_id = %session.id, "session cancelled");
        }
        Ok(cancelled)
    }

    /// Runs one tick immediately; the background ticker calls the same path.
    pub fn tick(&self) -> Result<TickOutcome, InfraError> {
        self.core.tick()
    }

    pub fn snapshot(&self) -> Result<PomodoroSnapshot, InfraError> {
        let now = (self.core.now_provider)();
        let store = self.core.lock()?;
        let state = store.state();
        Ok(PomodoroSnapshot {
            status: state.status,
            current: state.current.clone(),
            remaining_seconds: state.remaining_seconds(now),
            completed_focus_sessions: state.completed_focus_sessions,
        })
    }

    pub fn history(&self) -> Result<Vec<Session>, InfraError> {
        Ok(self.core.lock()?.state().history.clone())
    }

    pub fn is_ticking(&self) -> Result<bool, InfraError> {
        Ok(self
            .lock_ticker()?
            .as_ref()
            .map(TickerHandle::is_active)
            .unwrap_or(false))
    }

    fn lock_ticker(&self) -> Result<MutexGuard<'_, Option<TickerHandle>>, InfraError> {
        self.ticker
            .lock()
            .map_err(|error| InfraError::StateUnavailable(format!("ticker lock poisoned: {error}")))
    }

    fn acquire_ticker(&self) -> Result<(), InfraError> {
        let mut ticker = self.lock_ticker()?;
        // The old handle is dropped (and aborted) before the new task starts.
        ticker.take();

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("no async runtime; countdown advances only on explicit ticks");
            return Ok(());
        };
        let core = Arc::downgrade(&self.core);
        let period = self.tick_period;
        *ticker = Some(TickerHandle {
            task: runtime.spawn(run_ticker(core, period)),
        });
        Ok(())
    }

    fn release_ticker(&self) -> Result<(), InfraError> {
        self.lock_ticker()?.take();
        Ok(())
    }
}

async fn run_ticker(core: Weak<TimerCore>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        interval.tick().await;
        let Some(core) = core.upgrade() else {
            break;
        };
        match core.tick() {
            Ok(TickOutcome::Running { .. }) => {}
            Ok(TickOutcome::Completed { next: Some(_), .. }) => {}
            Ok(_) => break,
            Err(error) => {
                tracing::error!(%error, "countdown tick failed");
                break;
            }
        }
    }
}
