use crate::domain::models::PomodoroSettings;
use crate::infrastructure::error::InfraError;
use chrono_tz::Tz;
use std::fs;
use std::path::Path;

const APP_JSON: &str = "app.json";

fn default_app_config() -> serde_json::Value {
    serde_json::json!({
        "schema": 1,
        "appName": "FocusBoard",
        "timezone": "UTC",
        "pomodoro": {
            "focusMinutes": 25,
            "shortBreakMinutes": 5,
            "longBreakMinutes": 15,
            "sessionsUntilLongBreak": 4,
            "autoStartBreaks": true
        }
    })
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    let path = config_dir.join(APP_JSON);
    if !path.exists() {
        let formatted = serde_json::to_string_pretty(&default_app_config())?;
        fs::write(path, format!("{formatted}\n"))?;
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != 1 {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

pub fn load_app_config(config_dir: &Path) -> Result<serde_json::Value, InfraError> {
    read_config(&config_dir.join(APP_JSON))
}

/// Configured IANA timezone; unknown names fall back to UTC.
pub fn read_timezone(config_dir: &Path) -> Result<Tz, InfraError> {
    let app = load_app_config(config_dir)?;
    let name = app
        .get("timezone")
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or("UTC");
    match name.parse::<Tz>() {
        Ok(tz) => Ok(tz),
        Err(error) => {
            tracing::warn!(timezone = name, %error, "unknown timezone in config; using UTC");
            Ok(Tz::UTC)
        }
    }
}

pub fn read_pomodoro_settings(config_dir: &Path) -> Result<PomodoroSettings, InfraError> {
    let app = load_app_config(config_dir)?;
    let defaults = PomodoroSettings::default();
    let Some(section) = app.get("pomodoro").and_then(serde_json::Value::as_object) else {
        return Ok(defaults);
    };

    let minutes = |key: &str, fallback: u32| -> u32 {
        section
            .get(key)
            .and_then(serde_json::Value::as_u64)
            .and_then(|value| u32::try_from(value).ok())
            .unwrap_or(fallback)
    };

    let settings = PomodoroSettings {
        focus_minutes: minutes("focusMinutes", defaults.focus_minutes),
        short_break_minutes: minutes("shortBreakMinutes", defaults.short_break_minutes),
        long_break_minutes: minutes("longBreakMinutes", defaults.long_break_minutes),
        sessions_until_long_break: minutes(
            "sessionsUntilLongBreak",
            defaults.sessions_until_long_break,
        ),
        auto_start_breaks: section
            .get("autoStartBreaks")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(defaults.auto_start_breaks),
    };
    settings.validate().map_err(InfraError::InvalidConfig)?;
    Ok(settings)
}
