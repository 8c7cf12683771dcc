pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::commands::AppState;
pub use application::playlist_import::ImportReport;
pub use application::pomodoro::{PomodoroSnapshot, TimerStatus};
pub use infrastructure::error::{ImportError, InfraError};
pub use infrastructure::logging::LoggingGuard;

use application::bootstrap::bootstrap_workspace;
use infrastructure::logging::init_logging;
use infrastructure::youtube_client::ReqwestYouTubeClient;
use std::path::PathBuf;
use std::sync::Arc;

/// Prepares the workspace, installs file logging and builds the app state.
/// Keep the returned guard alive for as long as logs should be written.
pub fn start(workspace_root: PathBuf) -> Result<(AppState, Option<LoggingGuard>), InfraError> {
    let bootstrap = bootstrap_workspace(&workspace_root)?;
    let guard = init_logging(&bootstrap.logs_dir);
    let state = AppState::from_bootstrap(bootstrap, Arc::new(ReqwestYouTubeClient::new()))?;
    Ok((state, guard))
}
