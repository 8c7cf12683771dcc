use std::sync::Arc;

const API_KEY_VARS: [&str; 2] = ["FOCUSBOARD_YOUTUBE_API_KEY", "YOUTUBE_API_KEY"];

pub type CredentialLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

pub fn env_lookup() -> CredentialLookup {
    Arc::new(|key: &str| std::env::var(key).ok())
}

/// First non-blank API key among the known variables.
pub fn youtube_api_key<F>(lookup: F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    API_KEY_VARS.iter().find_map(|key| {
        lookup(*key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}
