use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    #[default]
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Item {
    pub id: String,
    pub title: String,
    pub notes: Option<String>,
    pub done: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub priority: Priority,
    pub due: Option<NaiveDate>,
}

impl Item {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "item.id")?;
        validate_non_empty(&self.title, "item.title")?;
        if self.updated_at < self.created_at {
            return Err("item.updated_at must be >= item.created_at".to_string());
        }
        Ok(())
    }
}

/// Fields a caller may supply when creating an item; the rest are defaulted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewItem {
    pub title: String,
    pub notes: Option<String>,
    pub priority: Option<Priority>,
    pub due: Option<NaiveDate>,
}

/// Shallow patch: `Some` replaces the field. `notes`/`due` use a nested option
/// so a patch can clear them.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ItemPatch {
    pub title: Option<String>,
    pub notes: Option<Option<String>>,
    pub done: Option<bool>,
    pub priority: Option<Priority>,
    pub due: Option<Option<NaiveDate>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    Focus,
    ShortBreak,
    LongBreak,
}

impl SessionKind {
    pub fn is_break(self) -> bool {
        !matches!(self, SessionKind::Focus)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    pub task_id: Option<String>,
    pub kind: SessionKind,
    pub start_time: DateTime<Utc>,
    /// Completion time once finished; while paused it marks the pause instant.
    pub end_time: Option<DateTime<Utc>>,
    pub duration_minutes: u32,
    pub completed: bool,
}

impl Session {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "session.id")?;
        if self.duration_minutes == 0 {
            return Err("session.duration_minutes must be > 0".to_string());
        }
        if let Some(end_time) = self.end_time {
            if end_time < self.start_time {
                return Err("session.end_time must be >= session.start_time".to_string());
            }
        }
        Ok(())
    }

    pub fn total_seconds(&self) -> i64 {
        i64::from(self.duration_minutes) * 60
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PomodoroSettings {
    pub focus_minutes: u32,
    pub short_break_minutes: u32,
    pub long_break_minutes: u32,
    pub sessions_until_long_break: u32,
    pub auto_start_breaks: bool,
}

impl Default for PomodoroSettings {
    fn default() -> Self {
        Self {
            focus_minutes: 25,
            short_break_minutes: 5,
            long_break_minutes: 15,
            sessions_until_long_break: 4,
            auto_start_breaks: true,
        }
    }
}

impl PomodoroSettings {
    pub fn validate(&self) -> Result<(), String> {
        if self.focus_minutes == 0 {
            return Err("pomodoro.focus_minutes must be > 0".to_string());
        }
        if self.short_break_minutes == 0 || self.long_break_minutes == 0 {
            return Err("pomodoro break durations must be > 0".to_string());
        }
        if self.sessions_until_long_break == 0 {
            return Err("pomodoro.sessions_until_long_break must be > 0".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GoalType {
    Daily,
    Weekly,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Goal {
    pub id: String,
    pub goal_type: GoalType,
    pub target: u32,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl Goal {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "goal.id")?;
        validate_non_empty(&self.description, "goal.description")?;
        if self.target == 0 {
            return Err("goal.target must be > 0".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GoalProgress {
    pub goal_id: String,
    pub completed: u32,
    pub target: u32,
    pub percent: u8,
    pub achieved: bool,
}

/// Aggregate counters. Streak fields are only ever recomputed by the tracker.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProductivityStats {
    pub total_tasks_completed: u32,
    pub total_pomodoro_sessions: u32,
    pub total_focus_minutes: u64,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub last_completed_date: Option<NaiveDate>,
    pub daily_stats: BTreeMap<String, u32>,
    pub weekly_stats: BTreeMap<String, u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Video {
    pub id: String,
    pub title: String,
    pub thumbnail: Option<String>,
    pub channel_title: Option<String>,
    pub position: u32,
    pub done: bool,
    pub revisit: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VideoField {
    Done,
    Revisit,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Playlist {
    pub id: String,
    pub url: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub videos: HashMap<String, Video>,
    pub order: Vec<String>,
    pub fetching: bool,
    pub error: Option<String>,
    pub fetched_at: Option<DateTime<Utc>>,
}

impl Playlist {
    pub fn ordered_videos(&self) -> Vec<&Video> {
        self.order
            .iter()
            .filter_map(|video_id| self.videos.get(video_id))
            .collect()
    }

    /// Every order entry has a video and no id repeats.
    pub fn order_is_consistent(&self) -> bool {
        let mut seen = std::collections::HashSet::new();
        self.order
            .iter()
            .all(|video_id| self.videos.contains_key(video_id) && seen.insert(video_id.as_str()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlaylistProgress {
    pub total: usize,
    pub done: usize,
    pub revisit: usize,
    pub percent: f32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PracticeProblem {
    pub id: String,
    pub title: String,
    pub topic: String,
    pub difficulty: Difficulty,
    pub url: String,
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}
