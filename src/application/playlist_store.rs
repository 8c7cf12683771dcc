use crate::domain::models::{Playlist, PlaylistProgress, Video, VideoField};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::persistent_store::PersistentStore;
use crate::infrastructure::storage::KeyValueStorage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

pub const PLAYLISTS_KEY: &str = "playlists:v1";
pub const PLACEHOLDER_TITLE: &str = "Loading…";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlaylistState {
    pub playlists: HashMap<String, Playlist>,
    /// Display order of playlists, insertion order.
    pub order: Vec<String>,
}

/// `(done, revisit)` per video id.
pub type VideoFlags = HashMap<String, (bool, bool)>;

/// Persisted playlist aggregate shared between the importer and user edits.
pub struct PlaylistStore {
    store: Mutex<PersistentStore<PlaylistState>>,
}

impl PlaylistStore {
    pub fn new(storage: Arc<dyn KeyValueStorage>) -> Self {
        Self {
            store: Mutex::new(PersistentStore::load(storage, PLAYLISTS_KEY)),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, PersistentStore<PlaylistState>>, InfraError> {
        self.store
            .lock()
            .map_err(|error| InfraError::StateUnavailable(format!("playlist store lock poisoned: {error}")))
    }

    /// Registers an observer that receives the whole state after every change,
    /// including each merged page. Observers run under the store lock and must
    /// not call back into the store.
    pub fn subscribe(
        &self,
        subscriber: impl Fn(&PlaylistState) + Send + Sync + 'static,
    ) -> Result<(), InfraError> {
        self.lock()?.subscribe(subscriber);
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn poison(&self) {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = self.store.lock();
            panic!("simulated crash while holding the playlist store");
        }));
    }

    /// Placeholder entry visible before any network round-trip. An existing
    /// entry keeps its title and creation time but loses its videos.
    pub fn register_placeholder(
        &self,
        playlist_id: &str,
        url: &str,
        now: DateTime<Utc>,
    ) -> Result<Playlist, InfraError> {
        Ok(self.lock()?.mutate(|state| {
            if !state.playlists.contains_key(playlist_id) {
                state.order.push(playlist_id.to_string());
            }
            let playlist = state
                .playlists
                .entry(playlist_id.to_string())
                .or_insert_with(|| Playlist {
                    id: playlist_id.to_string(),
                    url: url.to_string(),
                    title: PLACEHOLDER_TITLE.to_string(),
                    created_at: now,
                    videos: HashMap::new(),
                    order: Vec::new(),
                    fetching: true,
                    error: None,
                    fetched_at: None,
                });
            playlist.url = url.to_string();
            playlist.videos.clear();
            playlist.order.clear();
            playlist.fetching = true;
            playlist.error = None;
            playlist.clone()
        }))
    }

    /// Clears videos for a refetch; `None` if the playlist is unknown.
    pub fn reset_for_refetch(&self, playlist_id: &str) -> Result<Option<Playlist>, InfraError> {
        let mut store = self.lock()?;
        if !store.state().playlists.contains_key(playlist_id) {
            return Ok(None);
        }
        Ok(store.mutate(|state| {
            state.playlists.get_mut(playlist_id).map(|playlist| {
                playlist.videos.clear();
                playlist.order.clear();
                playlist.fetching = true;
                playlist.error = None;
                playlist.clone()
            })
        }))
    }

    /// Merges a page of videos. Known ids keep their order slot and their
    /// user flags; only the remote fields are overwritten. Returns the number
    /// of ids appended to `order`.
    pub fn merge_batch(&self, playlist_id: &str, batch: Vec<Video>) -> Result<usize, InfraError> {
        let mut store = self.lock()?;
        if !store.state().playlists.contains_key(playlist_id) {
            tracing::warn!(playlist_id, "dropping page for removed playlist");
            return Ok(0);
        }

        let appended = store.mutate(|state| {
            let Some(playlist) = state.playlists.get_mut(playlist_id) else {
                return 0;
            };
            let mut appended = 0;
            for mut video in batch {
                match playlist.videos.get(&video.id) {
                    Some(existing) => {
                        video.done = existing.done;
                        video.revisit = existing.revisit;
                    }
                    None => {
                        playlist.order.push(video.id.clone());
                        appended += 1;
                    }
                }
                playlist.videos.insert(video.id.clone(), video);
            }
            appended
        });
        Ok(appended)
    }

    pub fn finalize(
        &self,
        playlist_id: &str,
        title: Option<String>,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Option<Playlist>, InfraError> {
        let mut store = self.lock()?;
        if !store.state().playlists.contains_key(playlist_id) {
            return Ok(None);
        }
        Ok(store.mutate(|state| {
            state.playlists.get_mut(playlist_id).map(|playlist| {
                playlist.fetching = false;
                if let Some(title) = title {
                    playlist.title = title;
                }
                playlist.error = error;
                playlist.fetched_at = Some(now);
                playlist.clone()
            })
        }))
    }

    pub fn get(&self, playlist_id: &str) -> Result<Option<Playlist>, InfraError> {
        Ok(self.lock()?.state().playlists.get(playlist_id).cloned())
    }

    pub fn list(&self) -> Result<Vec<Playlist>, InfraError> {
        let store = self.lock()?;
        let state = store.state();
        Ok(state
            .order
            .iter()
            .filter_map(|id| state.playlists.get(id).cloned())
            .collect())
    }

    pub fn remove_playlist(&self, playlist_id: &str) -> Result<bool, InfraError> {
        let mut store = self.lock()?;
        if !store.state().playlists.contains_key(playlist_id) {
            return Ok(false);
        }
        store.mutate(|state| {
            state.playlists.remove(playlist_id);
            state.order.retain(|id| id != playlist_id);
        });
        tracing::info!(playlist_id, "removed playlist");
        Ok(true)
    }

    /// Flips one flag of a video; `None` if the playlist or video is unknown.
    pub fn toggle_video_field(
        &self,
        playlist_id: &str,
        video_id: &str,
        field: VideoField,
    ) -> Result<Option<bool>, InfraError> {
        let mut store = self.lock()?;
        let known = store
            .state()
            .playlists
            .get(playlist_id)
            .is_some_and(|playlist| playlist.videos.contains_key(video_id));
        if !known {
            return Ok(None);
        }

        Ok(store.mutate(|state| {
            let video = state
                .playlists
                .get_mut(playlist_id)
                .and_then(|playlist| playlist.videos.get_mut(video_id))?;
            let flag = match field {
                VideoField::Done => &mut video.done,
                VideoField::Revisit => &mut video.revisit,
            };
            *flag = !*flag;
            Some(*flag)
        }))
    }

    pub fn snapshot_flags(&self, playlist_id: &str) -> Result<VideoFlags, InfraError> {
        let store = self.lock()?;
        Ok(store
            .state()
            .playlists
            .get(playlist_id)
            .map(|playlist| {
                playlist
                    .videos
                    .values()
                    .filter(|video| video.done || video.revisit)
                    .map(|video| (video.id.clone(), (video.done, video.revisit)))
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Reapplies flags to videos that still exist; returns how many matched.
    pub fn restore_flags(&self, playlist_id: &str, flags: &VideoFlags) -> Result<usize, InfraError> {
        if flags.is_empty() {
            return Ok(0);
        }
        let mut store = self.lock()?;
        if !store.state().playlists.contains_key(playlist_id) {
            return Ok(0);
        }
        Ok(store.mutate(|state| {
            let Some(playlist) = state.playlists.get_mut(playlist_id) else {
                return 0;
            };
            let mut restored = 0;
            for (video_id, (done, revisit)) in flags {
                if let Some(video) = playlist.videos.get_mut(video_id) {
                    video.done = *done;
                    video.revisit = *revisit;
                    restored += 1;
                }
            }
            restored
        }))
    }

    pub fn progress(&self, playlist_id: &str) -> Result<Option<PlaylistProgress>, InfraError> {
        let store = self.lock()?;
        Ok(store.state().playlists.get(playlist_id).map(|playlist| {
            let total = playlist.videos.len();
            let done = playlist.videos.values().filter(|video| video.done).count();
            let revisit = playlist.videos.values().filter(|video| video.revisit).count();
            let percent = if total == 0 {
                0.0
            } else {
                done as f32 * 100.0 / total as f32
            };
            PlaylistProgress {
                total,
                done,
                revisit,
                percent,
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::storage::InMemoryKeyValueStorage;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-10-17T08:00:00Z")
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn video(id: &str, position: u32) -> Video {
        Video {
            id: id.to_string(),
            title: format!("Video {id}"),
            thumbnail: None,
            channel_title: None,
            position,
            done: false,
            revisit: false,
        }
    }

    fn store_with_playlist() -> PlaylistStore {
        let store = PlaylistStore::new(Arc::new(InMemoryKeyValueStorage::default()));
        store.register_placeholder("PL1", "PL1", now()).expect("placeholder");
        store
    }

    #[test]
    fn placeholder_is_fetching_and_empty() {
        let store = store_with_playlist();
        let playlist = store.get("PL1").expect("get").expect("exists");
        assert_eq!(playlist.title, PLACEHOLDER_TITLE);
        assert!(playlist.fetching);
        assert!(playlist.videos.is_empty());
        assert_eq!(store.list().expect("list").len(), 1);
    }

    #[test]
    fn repeated_merge_does_not_duplicate_order_and_keeps_flags() {
        let store = store_with_playlist();
        store
            .merge_batch("PL1", vec![video("a", 0), video("b", 1)])
            .expect("merge");
        store
            .toggle_video_field("PL1", "a", VideoField::Done)
            .expect("toggle");

        let mut renamed = video("a", 0);
        renamed.title = "Renamed".to_string();
        let appended = store
            .merge_batch("PL1", vec![renamed, video("c", 2)])
            .expect("merge again");
        assert_eq!(appended, 1);

        let playlist = store.get("PL1").expect("get").expect("exists");
        assert_eq!(playlist.order, vec!["a", "b", "c"]);
        assert!(playlist.order_is_consistent());
        assert_eq!(playlist.videos["a"].title, "Renamed");
        assert!(playlist.videos["a"].done);
    }

    #[test]
    fn toggle_unknown_video_is_none() {
        let store = store_with_playlist();
        assert_eq!(
            store
                .toggle_video_field("PL1", "missing", VideoField::Revisit)
                .expect("toggle"),
            None
        );
        assert_eq!(
            store
                .toggle_video_field("nope", "a", VideoField::Revisit)
                .expect("toggle"),
            None
        );
    }

    #[test]
    fn flags_snapshot_and_restore_across_reset() {
        let store = store_with_playlist();
        store
            .merge_batch("PL1", vec![video("a", 0), video("b", 1)])
            .expect("merge");
        store.toggle_video_field("PL1", "a", VideoField::Done).expect("toggle");
        store.toggle_video_field("PL1", "b", VideoField::Revisit).expect("toggle");

        let flags = store.snapshot_flags("PL1").expect("snapshot");
        assert_eq!(flags.len(), 2);

        store.reset_for_refetch("PL1").expect("reset");
        store.merge_batch("PL1", vec![video("a", 0)]).expect("merge");
        assert_eq!(store.restore_flags("PL1", &flags).expect("restore"), 1);

        let progress = store.progress("PL1").expect("progress").expect("exists");
        assert_eq!(progress.total, 1);
        assert_eq!(progress.done, 1);
        assert_eq!(progress.revisit, 0);
        assert!((progress.percent - 100.0).abs() < f32::EPSILON);
    }

    #[test]
    fn finalize_keeps_title_when_none_fetched() {
        let store = store_with_playlist();
        let playlist = store
            .finalize("PL1", None, Some("http 500".to_string()), now())
            .expect("finalize")
            .expect("exists");
        assert_eq!(playlist.title, PLACEHOLDER_TITLE);
        assert!(!playlist.fetching);
        assert_eq!(playlist.error.as_deref(), Some("http 500"));
        assert_eq!(playlist.fetched_at, Some(now()));
    }

    #[test]
    fn removed_playlist_ignores_late_pages() {
        let store = store_with_playlist();
        assert!(store.remove_playlist("PL1").expect("remove"));
        assert_eq!(store.merge_batch("PL1", vec![video("a", 0)]).expect("merge"), 0);
        assert!(store.list().expect("list").is_empty());
        assert!(!store.remove_playlist("PL1").expect("remove again"));
    }
}
