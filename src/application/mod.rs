pub mod bootstrap;
pub mod clock;
pub mod commands;
pub mod playlist_import;
pub mod playlist_store;
pub mod pomodoro;
pub mod practice_sheet;
pub mod productivity;
pub mod todos;
