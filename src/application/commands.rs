use crate::application::bootstrap::{bootstrap_workspace, BootstrapResult};
use crate::application::playlist_import::{ImportReport, PlaylistImporter};
use crate::application::playlist_store::{PlaylistStore, VideoFlags};
use crate::application::pomodoro::{PomodoroSnapshot, PomodoroTimer};
use crate::application::practice_sheet::{PracticeSheet, SheetProgress};
use crate::application::productivity::ProductivityTracker;
use crate::application::todos::TodoStore;
use crate::domain::models::{
    Goal, GoalProgress, GoalType, Item, ItemPatch, NewItem, Playlist, PlaylistProgress, Priority,
    ProductivityStats, Session, SessionKind, Video, VideoField,
};
use crate::infrastructure::config::{read_pomodoro_settings, read_timezone};
use crate::infrastructure::credentials::{env_lookup, youtube_api_key, CredentialLookup};
use crate::infrastructure::error::{ImportError, InfraError};
use crate::infrastructure::storage::{KeyValueStorage, SqliteKeyValueStorage};
use crate::infrastructure::youtube_client::{PlaylistClient, ReqwestYouTubeClient};
use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Every store the app needs, wired against one workspace directory.
pub struct AppState<C = ReqwestYouTubeClient>
where
    C: PlaylistClient,
{
    config_dir: PathBuf,
    database_path: PathBuf,
    logs_dir: PathBuf,
    todos: TodoStore,
    tracker: Arc<ProductivityTracker>,
    timer: PomodoroTimer,
    importer: PlaylistImporter<C>,
    practice_sheet: PracticeSheet,
    credential_lookup: CredentialLookup,
}

impl AppState<ReqwestYouTubeClient> {
    pub fn new(workspace_root: PathBuf) -> Result<Self, InfraError> {
        Self::with_client(workspace_root, Arc::new(ReqwestYouTubeClient::new()))
    }
}

impl<C> AppState<C>
where
    C: PlaylistClient,
{
    pub fn with_client(workspace_root: PathBuf, client: Arc<C>) -> Result<Self, InfraError> {
        Self::from_bootstrap(bootstrap_workspace(&workspace_root)?, client)
    }

    /// Wires the stores against an already prepared workspace.
    pub fn from_bootstrap(bootstrap: BootstrapResult, client: Arc<C>) -> Result<Self, InfraError> {
        let storage: Arc<dyn KeyValueStorage> =
            Arc::new(SqliteKeyValueStorage::new(&bootstrap.database_path));

        let timezone = read_timezone(&bootstrap.config_dir)?;
        let settings = read_pomodoro_settings(&bootstrap.config_dir)?;

        let tracker = Arc::new(ProductivityTracker::new(Arc::clone(&storage), timezone));
        let timer = PomodoroTimer::new(Arc::clone(&storage), Arc::clone(&tracker), settings);
        timer.restore()?;
        let playlists = Arc::new(PlaylistStore::new(Arc::clone(&storage)));

        tracing::info!(workspace = %bootstrap.workspace_root.display(), "app state initialized");
        Ok(Self {
            config_dir: bootstrap.config_dir,
            database_path: bootstrap.database_path,
            logs_dir: bootstrap.logs_dir,
            todos: TodoStore::new(Arc::clone(&storage)),
            tracker,
            timer,
            importer: PlaylistImporter::new(client, playlists),
            practice_sheet: PracticeSheet::new(storage)?,
            credential_lookup: env_lookup(),
        })
    }

    pub fn with_credential_lookup(mut self, lookup: CredentialLookup) -> Self {
        self.credential_lookup = lookup;
        self
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn logs_dir(&self) -> &Path {
        &self.logs_dir
    }

    pub fn todos(&self) -> &TodoStore {
        &self.todos
    }

    pub fn tracker(&self) -> &ProductivityTracker {
        &self.tracker
    }

    pub fn timer(&self) -> &PomodoroTimer {
        &self.timer
    }

    pub fn playlists(&self) -> &PlaylistStore {
        self.importer.store()
    }

    pub fn practice_sheet(&self) -> &PracticeSheet {
        &self.practice_sheet
    }

    fn api_key(&self) -> Option<String> {
        let lookup = &self.credential_lookup;
        youtube_api_key(|key| lookup(key))
    }
}

pub fn create_task_impl<C: PlaylistClient>(
    state: &AppState<C>,
    title: String,
    notes: Option<String>,
    priority: Option<String>,
    due: Option<String>,
) -> Result<Item, InfraError> {
    let priority = priority.as_deref().map(parse_priority).transpose()?;
    let due = due.as_deref().map(|raw| parse_date(raw, "due")).transpose()?;
    state.todos.create(NewItem {
        title,
        notes,
        priority,
        due,
    })
}

pub fn list_tasks_impl<C: PlaylistClient>(state: &AppState<C>) -> Result<Vec<Item>, InfraError> {
    state.todos.list()
}

pub fn toggle_task_impl<C: PlaylistClient>(
    state: &AppState<C>,
    task_id: String,
) -> Result<Option<Item>, InfraError> {
    state.todos.toggle(task_id.trim())
}

/// Toggles a task and counts it towards stats when it became done.
pub fn complete_task_impl<C: PlaylistClient>(
    state: &AppState<C>,
    task_id: String,
) -> Result<Option<Item>, InfraError> {
    let toggled = state.todos.toggle(task_id.trim())?;
    if toggled.as_ref().is_some_and(|item| item.done) {
        state.tracker.track_task_completion()?;
    }
    Ok(toggled)
}

pub fn update_task_impl<C: PlaylistClient>(
    state: &AppState<C>,
    task_id: String,
    patch: ItemPatch,
) -> Result<Item, InfraError> {
    let task_id = task_id.trim();
    state
        .todos
        .update(task_id, patch)?
        .ok_or_else(|| InfraError::NotFound(format!("task not found: {task_id}")))
}

pub fn delete_task_impl<C: PlaylistClient>(
    state: &AppState<C>,
    task_id: String,
) -> Result<bool, InfraError> {
    state.todos.remove(task_id.trim())
}

pub fn reorder_tasks_impl<C: PlaylistClient>(
    state: &AppState<C>,
    from_index: usize,
    to_index: usize,
) -> Result<bool, InfraError> {
    state.todos.reorder(from_index, to_index)
}

pub fn clear_completed_tasks_impl<C: PlaylistClient>(state: &AppState<C>) -> Result<usize, InfraError> {
    state.todos.clear_completed()
}

pub fn start_pomodoro_impl<C: PlaylistClient>(
    state: &AppState<C>,
    task_id: Option<String>,
    duration_minutes: Option<u32>,
) -> Result<Session, InfraError> {
    let task_id = task_id
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned);
    if let Some(task_id) = task_id.as_deref() {
        if state.todos.get(task_id)?.is_none() {
            return Err(InfraError::NotFound(format!("task not found: {task_id}")));
        }
    }

    match duration_minutes {
        Some(minutes) => state.timer.start(task_id, SessionKind::Focus, minutes),
        None => state.timer.start_focus(task_id),
    }
}

pub fn pause_pomodoro_impl<C: PlaylistClient>(state: &AppState<C>) -> Result<PomodoroSnapshot, InfraError> {
    if !state.timer.pause()? {
        return Err(InfraError::InvalidInput("timer is not running".to_string()));
    }
    state.timer.snapshot()
}

pub fn resume_pomodoro_impl<C: PlaylistClient>(state: &AppState<C>) -> Result<PomodoroSnapshot, InfraError> {
    if !state.timer.resume()? {
        return Err(InfraError::InvalidInput("timer is not paused".to_string()));
    }
    state.timer.snapshot()
}

pub fn cancel_pomodoro_impl<C: PlaylistClient>(state: &AppState<C>) -> Result<PomodoroSnapshot, InfraError> {
    state.timer.cancel()?;
    state.timer.snapshot()
}

pub fn get_pomodoro_state_impl<C: PlaylistClient>(
    state: &AppState<C>,
) -> Result<PomodoroSnapshot, InfraError> {
    state.timer.snapshot()
}

pub fn get_stats_impl<C: PlaylistClient>(state: &AppState<C>) -> Result<ProductivityStats, InfraError> {
    state.tracker.stats()
}

pub fn add_goal_impl<C: PlaylistClient>(
    state: &AppState<C>,
    goal_type: String,
    target: u32,
    description: String,
) -> Result<Goal, InfraError> {
    let goal_type = parse_goal_type(&goal_type)?;
    state.tracker.add_goal(goal_type, target, &description)
}

pub fn list_goal_progress_impl<C: PlaylistClient>(
    state: &AppState<C>,
) -> Result<Vec<GoalProgress>, InfraError> {
    state
        .tracker
        .list_goals()?
        .iter()
        .map(|goal| state.tracker.goal_progress(&goal.id))
        .collect()
}

pub fn remove_goal_impl<C: PlaylistClient>(
    state: &AppState<C>,
    goal_id: String,
) -> Result<bool, InfraError> {
    state.tracker.remove_goal(goal_id.trim())
}

pub async fn add_playlist_impl<C: PlaylistClient>(
    state: &AppState<C>,
    url: String,
) -> Result<ImportReport, ImportError> {
    let api_key = state.api_key();
    state
        .importer
        .add_playlist_by_url(&url, api_key.as_deref())
        .await
}

/// Refetches a playlist; with `keep_progress` the done/revisit flags of
/// videos still present afterwards are carried over.
pub async fn refetch_playlist_impl<C: PlaylistClient>(
    state: &AppState<C>,
    playlist_id: String,
    keep_progress: bool,
) -> Result<ImportReport, ImportError> {
    let playlist_id = playlist_id.trim();
    let api_key = state.api_key();
    let flags = if keep_progress {
        match state.playlists().snapshot_flags(playlist_id) {
            Ok(flags) => flags,
            Err(error) => {
                tracing::error!(playlist_id, %error, "failed snapshotting video flags");
                VideoFlags::default()
            }
        }
    } else {
        VideoFlags::default()
    };

    let report = state
        .importer
        .refetch_playlist(playlist_id, api_key.as_deref())
        .await?;

    if keep_progress {
        match state.playlists().restore_flags(playlist_id, &flags) {
            Ok(restored) => tracing::info!(playlist_id, restored, "restored video flags"),
            Err(error) => tracing::error!(playlist_id, %error, "failed restoring video flags"),
        }
    }
    Ok(report)
}

pub fn list_playlists_impl<C: PlaylistClient>(state: &AppState<C>) -> Result<Vec<Playlist>, InfraError> {
    state.playlists().list()
}

/// Videos of one playlist in display order.
pub fn list_playlist_videos_impl<C: PlaylistClient>(
    state: &AppState<C>,
    playlist_id: String,
) -> Result<Vec<Video>, InfraError> {
    let playlist_id = playlist_id.trim();
    let playlist = state
        .playlists()
        .get(playlist_id)?
        .ok_or_else(|| InfraError::NotFound(format!("playlist not found: {playlist_id}")))?;
    Ok(playlist.ordered_videos().into_iter().cloned().collect())
}

pub fn toggle_video_impl<C: PlaylistClient>(
    state: &AppState<C>,
    playlist_id: String,
    video_id: String,
    field: String,
) -> Result<bool, InfraError> {
    let field = parse_video_field(&field)?;
    state
        .playlists()
        .toggle_video_field(playlist_id.trim(), video_id.trim(), field)?
        .ok_or_else(|| {
            InfraError::NotFound(format!("video not found: {}/{}", playlist_id.trim(), video_id.trim()))
        })
}

pub fn playlist_progress_impl<C: PlaylistClient>(
    state: &AppState<C>,
    playlist_id: String,
) -> Result<PlaylistProgress, InfraError> {
    let playlist_id = playlist_id.trim();
    state
        .playlists()
        .progress(playlist_id)?
        .ok_or_else(|| InfraError::NotFound(format!("playlist not found: {playlist_id}")))
}

pub fn remove_playlist_impl<C: PlaylistClient>(
    state: &AppState<C>,
    playlist_id: String,
) -> Result<bool, InfraError> {
    state.playlists().remove_playlist(playlist_id.trim())
}

pub fn toggle_practice_problem_impl<C: PlaylistClient>(
    state: &AppState<C>,
    problem_id: String,
) -> Result<bool, InfraError> {
    let problem_id = problem_id.trim();
    state
        .practice_sheet
        .toggle(problem_id)?
        .ok_or_else(|| InfraError::NotFound(format!("problem not found: {problem_id}")))
}

pub fn practice_progress_impl<C: PlaylistClient>(state: &AppState<C>) -> Result<SheetProgress, InfraError> {
    state.practice_sheet.progress()
}

fn parse_priority(value: &str) -> Result<Priority, InfraError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "low" => Ok(Priority::Low),
        "medium" => Ok(Priority::Medium),
        "high" => Ok(Priority::High),
        other => Err(InfraError::InvalidInput(format!("unsupported priority: {other}"))),
    }
}

fn parse_goal_type(value: &str) -> Result<GoalType, InfraError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "daily" => Ok(GoalType::Daily),
        "weekly" => Ok(GoalType::Weekly),
        other => Err(InfraError::InvalidInput(format!("unsupported goal type: {other}"))),
    }
}

fn parse_video_field(value: &str) -> Result<VideoField, InfraError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "done" => Ok(VideoField::Done),
        "revisit" => Ok(VideoField::Revisit),
        other => Err(InfraError::InvalidInput(format!("unsupported video field: {other}"))),
    }
}

fn parse_date(value: &str, field_name: &str) -> Result<NaiveDate, InfraError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| InfraError::InvalidInput(format!("{field_name} must be YYYY-MM-DD")))
}
