use crate::application::clock::{next_id, system_clock, NowProvider};
use crate::domain::models::{Goal, GoalProgress, GoalType, ProductivityStats};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::persistent_store::PersistentStore;
use crate::infrastructure::storage::KeyValueStorage;
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};

pub const PRODUCTIVITY_KEY: &str = "productivity:v1";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProductivityState {
    pub goals: Vec<Goal>,
    pub stats: ProductivityStats,
}

pub fn day_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub fn week_key(date: NaiveDate) -> String {
    let week = date.iso_week();
    format!("{}-W{:02}", week.year(), week.week())
}

/// Streak after a completion on `today`.
fn streak_after_completion(stats: &ProductivityStats, today: NaiveDate) -> u32 {
    match stats.last_completed_date {
        Some(last) if last == today => stats.current_streak.max(1),
        Some(last) if last + Duration::days(1) == today => stats.current_streak + 1,
        _ => 1,
    }
}

/// A streak survives only while the last completion is today or yesterday.
fn streak_is_live(stats: &ProductivityStats, today: NaiveDate) -> bool {
    matches!(
        stats.last_completed_date,
        Some(last) if last == today || last + Duration::days(1) == today
    )
}

/// Goals plus aggregate counters, keyed by the local day in `timezone`.
pub struct ProductivityTracker {
    store: Mutex<PersistentStore<ProductivityState>>,
    timezone: Tz,
    now_provider: NowProvider,
}

impl ProductivityTracker {
    pub fn new(storage: Arc<dyn KeyValueStorage>, timezone: Tz) -> Self {
        Self {
            store: Mutex::new(PersistentStore::load(storage, PRODUCTIVITY_KEY)),
            timezone,
            now_provider: system_clock(),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, PersistentStore<ProductivityState>>, InfraError> {
        self.store.lock().map_err(|error| {
            InfraError::StateUnavailable(format!("productivity store lock poisoned: {error}"))
        })
    }

    /// Observers run under the tracker lock and must not call back into it.
    pub fn subscribe(
        &self,
        subscriber: impl Fn(&ProductivityState) + Send + Sync + 'static,
    ) -> Result<(), InfraError> {
        self.lock()?.subscribe(subscriber);
        Ok(())
    }

    pub fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.timezone).date_naive()
    }

    pub fn track_task_completion(&self) -> Result<ProductivityStats, InfraError> {
        let today = self.local_date((self.now_provider)());
        let stats = self.lock()?.mutate(|state| {
            let stats = &mut state.stats;
            stats.current_streak = streak_after_completion(stats, today);
            stats.longest_streak = stats.longest_streak.max(stats.current_streak);
            stats.last_completed_date = Some(today);
            stats.total_tasks_completed += 1;
            *stats.daily_stats.entry(day_key(today)).or_insert(0) += 1;
            *stats.weekly_stats.entry(week_key(today)).or_insert(0) += 1;
            stats.clone()
        });
        tracing::info!(
            total = stats.total_tasks_completed,
            streak = stats.current_streak,
            "tracked task completion"
        );
        Ok(stats)
    }

    pub fn track_pomodoro_session(&self, minutes: u32) -> Result<ProductivityStats, InfraError> {
        Ok(self.lock()?.mutate(|state| {
            state.stats.total_pomodoro_sessions += 1;
            state.stats.total_focus_minutes += u64::from(minutes);
            state.stats.clone()
        }))
    }

    /// Current stats with the streak recomputed for today.
    pub fn stats(&self) -> Result<ProductivityStats, InfraError> {
        let today = self.local_date((self.now_provider)());
        let mut store = self.lock()?;
        let stats = store.state().stats.clone();
        if stats.current_streak > 0 && !streak_is_live(&stats, today) {
            return Ok(store.mutate(|state| {
                state.stats.current_streak = 0;
                state.stats.clone()
            }));
        }
        Ok(stats)
    }

    pub fn add_goal(
        &self,
        goal_type: GoalType,
        target: u32,
        description: &str,
    ) -> Result<Goal, InfraError> {
        let goal = Goal {
            id: next_id("goal"),
            goal_type,
            target,
            description: description.trim().to_string(),
            created_at: (self.now_provider)(),
        };
        goal.validate().map_err(InfraError::InvalidInput)?;

        self.lock()?.mutate(|state| state.goals.push(goal.clone()));
        tracing::info!(goal_id = %goal.id, "added goal");
        Ok(goal)
    }

    pub fn remove_goal(&self, goal_id: &str) -> Result<bool, InfraError> {
        let mut store = self.lock()?;
        if !store.state().goals.iter().any(|goal| goal.id == goal_id) {
            return Ok(false);
        }
        store.mutate(|state| state.goals.retain(|goal| goal.id != goal_id));
        Ok(true)
    }

    pub fn list_goals(&self) -> Result<Vec<Goal>, InfraError> {
        Ok(self.lock()?.state().goals.clone())
    }

    pub fn goal_progress(&self, goal_id: &str) -> Result<GoalProgress, InfraError> {
        let today = self.local_date((self.now_provider)());
        let store = self.lock()?;
        let state = store.state();
        let goal = state
            .goals
            .iter()
            .find(|goal| goal.id == goal_id)
            .ok_or_else(|| InfraError::NotFound(format!("goal not found: {goal_id}")))?;

        let completed = match goal.goal_type {
            GoalType::Daily => state.stats.daily_stats.get(&day_key(today)),
            GoalType::Weekly => state.stats.weekly_stats.get(&week_key(today)),
        }
        .copied()
        .unwrap_or(0);

        let percent = (u64::from(completed) * 100 / u64::from(goal.target.max(1))).min(100) as u8;
        Ok(GoalProgress {
            goal_id: goal.id.clone(),
            completed,
            target: goal.target,
            percent,
            achieved: completed >= goal.target,
        })
    }
}
