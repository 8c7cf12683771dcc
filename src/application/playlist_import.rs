use crate::application::clock::{system_clock, NowProvider};
use crate::application::playlist_store::PlaylistStore;
use crate::domain::models::Video;
use crate::infrastructure::error::{ImportError, InfraError};
use crate::infrastructure::youtube_client::{PlaylistClient, RemotePlaylistItem};
use std::sync::Arc;
use url::Url;

const MIN_PLAYLIST_ID_LEN: usize = 10;
const MAX_PLAYLIST_ID_LEN: usize = 64;

/// Outcome of an import that got past input validation. Transport failures
/// land in `error` (and on the playlist) rather than in an `Err`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportReport {
    pub playlist_id: String,
    pub pages_fetched: usize,
    pub videos_fetched: usize,
    pub title: Option<String>,
    pub error: Option<ImportError>,
}

fn is_playlist_id(candidate: &str) -> bool {
    (MIN_PLAYLIST_ID_LEN..=MAX_PLAYLIST_ID_LEN).contains(&candidate.len())
        && candidate
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
}

/// Accepts a URL carrying a `list` query parameter or a bare playlist id.
pub fn parse_playlist_id(raw: &str) -> Result<String, ImportError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ImportError::InvalidInput("playlist input is empty".to_string()));
    }

    // Pasted links often come without a scheme.
    let url = Url::parse(raw).ok().or_else(|| {
        if raw.contains('?') || raw.contains('/') {
            Url::parse(&format!("https://{raw}")).ok()
        } else {
            None
        }
    });
    if let Some(url) = url {
        let list = url
            .query_pairs()
            .find(|(key, _)| key == "list")
            .map(|(_, value)| value.trim().to_string());
        return match list {
            Some(list) if is_playlist_id(&list) => Ok(list),
            Some(list) => Err(ImportError::InvalidInput(format!(
                "invalid list parameter: {list}"
            ))),
            None => Err(ImportError::InvalidInput(format!(
                "url has no list parameter: {raw}"
            ))),
        };
    }

    if is_playlist_id(raw) {
        return Ok(raw.to_string());
    }
    Err(ImportError::InvalidInput(format!(
        "not a playlist url or id: {raw}"
    )))
}

fn to_video(playlist_id: &str, item: RemotePlaylistItem, fallback_position: u32) -> Video {
    let position = item.position.unwrap_or(fallback_position);
    let id = item
        .video_id
        .unwrap_or_else(|| format!("{playlist_id}-{position}"));
    let title = if item.title.is_empty() {
        format!("Video {}", position + 1)
    } else {
        item.title
    };
    Video {
        id,
        title,
        thumbnail: item.thumbnail,
        channel_title: item.channel_title,
        position,
        done: false,
        revisit: false,
    }
}

/// Imports playlists page by page, merging each page into the store as it
/// arrives so readers can render partial results.
pub struct PlaylistImporter<C>
where
    C: PlaylistClient,
{
    client: Arc<C>,
    store: Arc<PlaylistStore>,
    now_provider: NowProvider,
}

impl<C> PlaylistImporter<C>
where
    C: PlaylistClient,
{
    pub fn new(client: Arc<C>, store: Arc<PlaylistStore>) -> Self {
        Self {
            client,
            store,
            now_provider: system_clock(),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn store(&self) -> &Arc<PlaylistStore> {
        &self.store
    }

    pub async fn add_playlist_by_url(
        &self,
        raw: &str,
        api_key: Option<&str>,
    ) -> Result<ImportReport, ImportError> {
        let playlist_id = parse_playlist_id(raw)?;
        let api_key = require_api_key(api_key)?;

        self.store
            .register_placeholder(&playlist_id, raw.trim(), (self.now_provider)())
            .map_err(local_failure)?;
        tracing::info!(playlist_id = %playlist_id, "registered playlist placeholder");

        Ok(self.import(&playlist_id, api_key).await)
    }

    pub async fn refetch_playlist(
        &self,
        playlist_id: &str,
        api_key: Option<&str>,
    ) -> Result<ImportReport, ImportError> {
        let api_key = require_api_key(api_key)?;
        if self
            .store
            .reset_for_refetch(playlist_id)
            .map_err(local_failure)?
            .is_none()
        {
            return Err(ImportError::InvalidInput(format!(
                "unknown playlist: {playlist_id}"
            )));
        }
        tracing::info!(playlist_id, "refetching playlist");

        Ok(self.import(playlist_id, api_key).await)
    }

    async fn import(&self, playlist_id: &str, api_key: &str) -> ImportReport {
        let metadata = self.client.fetch_playlist_title(api_key, playlist_id);
        let pages = self.fetch_pages(playlist_id, api_key);
        let (metadata, (pages_fetched, videos_fetched, page_error)) = tokio::join!(metadata, pages);

        let (title, metadata_error) = match metadata {
            Ok(title) => (title, None),
            Err(error) => {
                tracing::warn!(playlist_id, %error, "playlist metadata request failed");
                (None, Some(ImportError::from_infra(error, pages_fetched, videos_fetched)))
            }
        };
        let error = metadata_error.or(page_error);

        if let Err(store_error) = self.store.finalize(
            playlist_id,
            title.clone(),
            error.as_ref().map(ToString::to_string),
            (self.now_provider)(),
        ) {
            tracing::error!(playlist_id, %store_error, "failed finalizing playlist");
        }

        tracing::info!(
            playlist_id,
            pages_fetched,
            videos_fetched,
            failed = error.is_some(),
            "playlist import finished"
        );
        ImportReport {
            playlist_id: playlist_id.to_string(),
            pages_fetched,
            videos_fetched,
            title,
            error,
        }
    }

    /// Requests pages sequentially until no continuation token is returned or
    /// a request fails. Already merged pages are kept on failure.
    async fn fetch_pages(
        &self,
        playlist_id: &str,
        api_key: &str,
    ) -> (usize, usize, Option<ImportError>) {
        let mut page_token: Option<String> = None;
        let mut pages_fetched = 0;
        let mut videos_fetched = 0;

        loop {
            let page = match self
                .client
                .fetch_items_page(api_key, playlist_id, page_token.as_deref())
                .await
            {
                Ok(page) => page,
                Err(error) => {
                    tracing::warn!(playlist_id, pages_fetched, %error, "playlist page request failed");
                    return (
                        pages_fetched,
                        videos_fetched,
                        Some(ImportError::from_infra(error, pages_fetched, videos_fetched)),
                    );
                }
            };

            let batch = page
                .items
                .into_iter()
                .enumerate()
                .map(|(index, item)| {
                    let fallback = u32::try_from(videos_fetched + index).unwrap_or(u32::MAX);
                    to_video(playlist_id, item, fallback)
                })
                .collect::<Vec<_>>();
            videos_fetched += batch.len();
            pages_fetched += 1;

            if let Err(error) = self.store.merge_batch(playlist_id, batch) {
                tracing::error!(playlist_id, %error, "failed merging playlist page");
                return (
                    pages_fetched,
                    videos_fetched,
                    Some(local_failure(error)),
                );
            }
            tracing::debug!(playlist_id, pages_fetched, videos_fetched, "merged playlist page");

            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        (pages_fetched, videos_fetched, None)
    }
}

fn require_api_key(api_key: Option<&str>) -> Result<&str, ImportError> {
    api_key
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .ok_or(ImportError::MissingCredential)
}

fn local_failure(error: InfraError) -> ImportError {
    ImportError::LocalStore(error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::playlist_store::{PlaylistState, PLACEHOLDER_TITLE};
    use crate::domain::models::VideoField;
    use crate::infrastructure::storage::InMemoryKeyValueStorage;
    use crate::infrastructure::youtube_client::PlaylistItemsPage;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const PLAYLIST_ID: &str = "PLabcdef123456";

    #[derive(Debug, Clone)]
    enum FakePage {
        Success(PlaylistItemsPage),
        HttpError(u16),
        NetworkError,
    }

    #[derive(Default)]
    struct FakePlaylistClient {
        title: Mutex<Option<Result<Option<String>, u16>>>,
        pages: Mutex<VecDeque<FakePage>>,
        page_tokens: Mutex<Vec<Option<String>>>,
        page_calls: AtomicUsize,
        metadata_calls: AtomicUsize,
        observed_store: Mutex<Option<Arc<PlaylistStore>>>,
        observed_fetching: Mutex<Vec<bool>>,
    }

    impl FakePlaylistClient {
        fn with_pages(title: Option<&str>, pages: Vec<FakePage>) -> Self {
            Self {
                title: Mutex::new(Some(Ok(title.map(ToOwned::to_owned)))),
                pages: Mutex::new(pages.into()),
                ..Self::default()
            }
        }

        fn total_calls(&self) -> usize {
            self.page_calls.load(Ordering::SeqCst) + self.metadata_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PlaylistClient for FakePlaylistClient {
        async fn fetch_playlist_title(
            &self,
            _api_key: &str,
            _playlist_id: &str,
        ) -> Result<Option<String>, InfraError> {
            self.metadata_calls.fetch_add(1, Ordering::SeqCst);
            match self.title.lock().expect("title lock").clone() {
                Some(Ok(title)) => Ok(title),
                Some(Err(status)) => Err(InfraError::Http {
                    status,
                    body: String::new(),
                }),
                None => Ok(None),
            }
        }

        async fn fetch_items_page(
            &self,
            _api_key: &str,
            playlist_id: &str,
            page_token: Option<&str>,
        ) -> Result<PlaylistItemsPage, InfraError> {
            self.page_calls.fetch_add(1, Ordering::SeqCst);
            self.page_tokens
                .lock()
                .expect("token lock")
                .push(page_token.map(ToOwned::to_owned));

            if let Some(store) = self.observed_store.lock().expect("store lock").as_ref() {
                let fetching = store
                    .get(playlist_id)
                    .expect("store read")
                    .map(|playlist| playlist.fetching)
                    .unwrap_or(false);
                self.observed_fetching.lock().expect("observed lock").push(fetching);
            }

            let next = self
                .pages
                .lock()
                .expect("pages lock")
                .pop_front()
                .unwrap_or(FakePage::Success(PlaylistItemsPage::default()));
            match next {
                FakePage::Success(page) => Ok(page),
                FakePage::HttpError(status) => Err(InfraError::Http {
                    status,
                    body: "{\"error\":{}}".to_string(),
                }),
                FakePage::NetworkError => Err(InfraError::Network("connection reset".to_string())),
            }
        }
    }

    fn item(video_id: &str, position: u32) -> RemotePlaylistItem {
        RemotePlaylistItem {
            video_id: Some(video_id.to_string()),
            title: format!("Title {video_id}"),
            position: Some(position),
            thumbnail: None,
            channel_title: Some("Channel".to_string()),
        }
    }

    fn page(items: Vec<RemotePlaylistItem>, next: Option<&str>) -> FakePage {
        FakePage::Success(PlaylistItemsPage {
            items,
            next_page_token: next.map(ToOwned::to_owned),
        })
    }

    fn importer(client: Arc<FakePlaylistClient>) -> PlaylistImporter<FakePlaylistClient> {
        let store = Arc::new(PlaylistStore::new(Arc::new(InMemoryKeyValueStorage::default())));
        PlaylistImporter::new(client, store)
    }

    #[test]
    fn parses_urls_and_bare_ids() {
        assert_eq!(
            parse_playlist_id("https://www.youtube.com/playlist?list=PLabcdef123456").expect("url"),
            "PLabcdef123456"
        );
        assert_eq!(
            parse_playlist_id("https://www.youtube.com/watch?v=xyz&list=PL_x-y1234567890&index=2")
                .expect("watch url"),
            "PL_x-y1234567890"
        );
        assert_eq!(parse_playlist_id("  PLabcdef123456 ").expect("bare"), "PLabcdef123456");
        assert_eq!(
            parse_playlist_id("www.youtube.com/playlist?list=PLabcdef123456").expect("no scheme"),
            "PLabcdef123456"
        );
        assert_eq!(
            parse_playlist_id("youtube.com/watch?v=x&list=PLabcdef123456").expect("no scheme watch"),
            "PLabcdef123456"
        );
        assert!(parse_playlist_id("youtube.com/watch?v=x").is_err());
        assert!(parse_playlist_id("https://www.youtube.com/watch?v=xyz").is_err());
        assert!(parse_playlist_id("short").is_err());
        assert!(parse_playlist_id("").is_err());
    }

    #[test]
    fn missing_identifier_falls_back_to_position() {
        let video = to_video(
            "PL1",
            RemotePlaylistItem {
                video_id: None,
                title: String::new(),
                position: Some(4),
                thumbnail: None,
                channel_title: None,
            },
            9,
        );
        assert_eq!(video.id, "PL1-4");
        assert_eq!(video.position, 4);
        assert!(!video.done && !video.revisit);
    }

    #[tokio::test]
    async fn pages_are_merged_in_order() {
        let client = Arc::new(FakePlaylistClient::with_pages(
            Some("Algorithms"),
            vec![
                page(vec![item("v1", 0), item("v2", 1)], Some("page-2")),
                page(vec![item("v3", 2)], None),
            ],
        ));
        let importer = importer(Arc::clone(&client));

        let report = importer
            .add_playlist_by_url("https://www.youtube.com/playlist?list=PLabcdef123456", Some("key"))
            .await
            .expect("import");
        assert_eq!(report.pages_fetched, 2);
        assert_eq!(report.videos_fetched, 3);
        assert!(report.error.is_none());

        let playlist = importer.store().get(PLAYLIST_ID).expect("get").expect("exists");
        assert_eq!(playlist.order, vec!["v1", "v2", "v3"]);
        let mut keys = playlist.videos.keys().cloned().collect::<Vec<_>>();
        keys.sort();
        assert_eq!(keys, vec!["v1", "v2", "v3"]);
        assert_eq!(playlist.title, "Algorithms");
        assert!(!playlist.fetching);
        assert!(playlist.fetched_at.is_some());

        let tokens = client.page_tokens.lock().expect("tokens").clone();
        assert_eq!(tokens, vec![None, Some("page-2".to_string())]);
    }

    #[tokio::test]
    async fn observers_are_notified_after_each_merged_page() {
        let client = Arc::new(FakePlaylistClient::with_pages(
            Some("Algorithms"),
            vec![
                page(vec![item("v1", 0), item("v2", 1)], Some("page-2")),
                page(vec![item("v3", 2)], None),
            ],
        ));
        let importer = importer(client);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let observer = Arc::clone(&seen);
        importer
            .store()
            .subscribe(move |state: &PlaylistState| {
                if let Some(playlist) = state.playlists.get(PLAYLIST_ID) {
                    observer
                        .lock()
                        .expect("seen lock")
                        .push((playlist.order.len(), playlist.fetching));
                }
            })
            .expect("subscribe");

        importer
            .add_playlist_by_url(PLAYLIST_ID, Some("key"))
            .await
            .expect("import");

        assert_eq!(
            *seen.lock().expect("seen lock"),
            vec![(0, true), (2, true), (3, true), (3, false)]
        );
    }

    #[tokio::test]
    async fn unusable_store_is_reported_as_local_failure() {
        let client = Arc::new(FakePlaylistClient::with_pages(Some("Algorithms"), vec![]));
        let importer = importer(Arc::clone(&client));
        importer.store().poison();

        let result = importer.add_playlist_by_url(PLAYLIST_ID, Some("key")).await;
        assert!(matches!(result, Err(ImportError::LocalStore(_))));
        assert_eq!(client.total_calls(), 0);
    }

    #[tokio::test]
    async fn failure_on_second_page_keeps_first_page() {
        let client = Arc::new(FakePlaylistClient::with_pages(
            Some("Course"),
            vec![
                page(vec![item("v1", 0), item("v2", 1)], Some("page-2")),
                FakePage::HttpError(403),
            ],
        ));
        let importer = importer(Arc::clone(&client));

        let report = importer
            .add_playlist_by_url(PLAYLIST_ID, Some("key"))
            .await
            .expect("import returns report");
        assert_eq!(
            report.error,
            Some(ImportError::FetchFailed {
                status: 403,
                pages_fetched: 1,
                videos_fetched: 2,
            })
        );

        let playlist = importer.store().get(PLAYLIST_ID).expect("get").expect("exists");
        assert_eq!(playlist.order, vec!["v1", "v2"]);
        assert_eq!(playlist.videos.len(), 2);
        assert!(!playlist.fetching);
        assert!(playlist.error.as_deref().is_some_and(|error| !error.is_empty()));
    }

    #[tokio::test]
    async fn network_error_is_recorded_on_playlist() {
        let client = Arc::new(FakePlaylistClient::with_pages(None, vec![FakePage::NetworkError]));
        let importer = importer(client);

        let report = importer
            .add_playlist_by_url(PLAYLIST_ID, Some("key"))
            .await
            .expect("report");
        assert!(matches!(report.error, Some(ImportError::NetworkError { .. })));

        let playlist = importer.store().get(PLAYLIST_ID).expect("get").expect("exists");
        assert_eq!(playlist.title, PLACEHOLDER_TITLE);
        assert!(playlist.videos.is_empty());
        assert!(playlist.error.is_some());
    }

    #[tokio::test]
    async fn invalid_input_makes_no_network_calls() {
        let client = Arc::new(FakePlaylistClient::default());
        let importer = importer(Arc::clone(&client));

        let result = importer
            .add_playlist_by_url("not a url, no list param", Some("key"))
            .await;
        assert!(matches!(result, Err(ImportError::InvalidInput(_))));
        assert_eq!(client.total_calls(), 0);
        assert!(importer.store().list().expect("list").is_empty());
    }

    #[tokio::test]
    async fn missing_credential_makes_no_network_calls() {
        let client = Arc::new(FakePlaylistClient::default());
        let importer = importer(Arc::clone(&client));

        let result = importer.add_playlist_by_url(PLAYLIST_ID, Some("  ")).await;
        assert_eq!(result, Err(ImportError::MissingCredential));
        let result = importer.add_playlist_by_url(PLAYLIST_ID, None).await;
        assert_eq!(result, Err(ImportError::MissingCredential));
        assert_eq!(client.total_calls(), 0);
        assert!(importer.store().get(PLAYLIST_ID).expect("get").is_none());
    }

    #[tokio::test]
    async fn placeholder_is_visible_while_pages_load() {
        let client = Arc::new(FakePlaylistClient::with_pages(
            Some("Visible"),
            vec![page(vec![item("v1", 0)], Some("next")), page(vec![item("v2", 1)], None)],
        ));
        let importer = importer(Arc::clone(&client));
        *client.observed_store.lock().expect("store lock") = Some(Arc::clone(importer.store()));

        importer
            .add_playlist_by_url(PLAYLIST_ID, Some("key"))
            .await
            .expect("import");

        let observed = client.observed_fetching.lock().expect("observed").clone();
        assert_eq!(observed, vec![true, true]);
    }

    #[tokio::test]
    async fn metadata_failure_keeps_videos_and_sets_error() {
        let client = Arc::new(FakePlaylistClient {
            title: Mutex::new(Some(Err(404))),
            pages: Mutex::new(vec![page(vec![item("v1", 0)], None)].into()),
            ..FakePlaylistClient::default()
        });
        let importer = importer(client);

        let report = importer
            .add_playlist_by_url(PLAYLIST_ID, Some("key"))
            .await
            .expect("report");
        assert!(matches!(
            report.error,
            Some(ImportError::FetchFailed { status: 404, .. })
        ));
        let playlist = importer.store().get(PLAYLIST_ID).expect("get").expect("exists");
        assert_eq!(playlist.order, vec!["v1"]);
        assert_eq!(playlist.title, PLACEHOLDER_TITLE);
    }

    #[tokio::test]
    async fn refetch_resets_and_reimports() {
        let client = Arc::new(FakePlaylistClient::with_pages(
            Some("Course"),
            vec![
                page(vec![item("v1", 0), item("v2", 1)], None),
                page(vec![item("v2", 0), item("v3", 1)], None),
            ],
        ));
        let importer = importer(Arc::clone(&client));
        importer
            .add_playlist_by_url(PLAYLIST_ID, Some("key"))
            .await
            .expect("first import");
        importer
            .store()
            .toggle_video_field(PLAYLIST_ID, "v2", VideoField::Done)
            .expect("toggle");

        let report = importer
            .refetch_playlist(PLAYLIST_ID, Some("key"))
            .await
            .expect("refetch");
        assert!(report.error.is_none());

        let playlist = importer.store().get(PLAYLIST_ID).expect("get").expect("exists");
        assert_eq!(playlist.order, vec!["v2", "v3"]);
        assert!(!playlist.videos["v2"].done, "refetch does not preserve flags by itself");
        assert_eq!(client.metadata_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn refetch_of_unknown_playlist_is_invalid_input() {
        let client = Arc::new(FakePlaylistClient::default());
        let importer = importer(Arc::clone(&client));
        let result = importer.refetch_playlist("PLunknown12345", Some("key")).await;
        assert!(matches!(result, Err(ImportError::InvalidInput(_))));
        assert_eq!(client.total_calls(), 0);
    }

    #[tokio::test]
    async fn overlapping_pages_do_not_duplicate_order() {
        let client = Arc::new(FakePlaylistClient::with_pages(
            None,
            vec![
                page(vec![item("v1", 0), item("v2", 1)], Some("p2")),
                page(vec![item("v2", 1), item("v3", 2)], None),
            ],
        ));
        let importer = importer(client);
        importer
            .add_playlist_by_url(PLAYLIST_ID, Some("key"))
            .await
            .expect("import");

        let playlist = importer.store().get(PLAYLIST_ID).expect("get").expect("exists");
        assert_eq!(playlist.order, vec!["v1", "v2", "v3"]);
        assert!(playlist.order_is_consistent());
    }
}
