use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use reqwest::Client;
use url::Url;

const YOUTUBE_API_BASE: &str = "https://www.googleapis.com/youtube/v3/";
pub const PAGE_SIZE: u32 = 50;

/// One entry of a playlist page, already flattened out of the API's snippet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePlaylistItem {
    pub video_id: Option<String>,
    pub title: String,
    pub position: Option<u32>,
    pub thumbnail: Option<String>,
    pub channel_title: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaylistItemsPage {
    pub items: Vec<RemotePlaylistItem>,
    pub next_page_token: Option<String>,
}

#[async_trait]
pub trait PlaylistClient: Send + Sync {
    async fn fetch_playlist_title(
        &self,
        api_key: &str,
        playlist_id: &str,
    ) -> Result<Option<String>, InfraError>;

    async fn fetch_items_page(
        &self,
        api_key: &str,
        playlist_id: &str,
        page_token: Option<&str>,
    ) -> Result<PlaylistItemsPage, InfraError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestYouTubeClient {
    client: Client,
    base_url: String,
}

impl Default for ReqwestYouTubeClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ReqwestYouTubeClient {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            base_url: YOUTUBE_API_BASE.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        self.base_url = base_url;
        self
    }

    fn endpoint(&self, resource: &str) -> Result<Url, InfraError> {
        Url::parse(&self.base_url)
            .and_then(|base| base.join(resource))
            .map_err(|error| InfraError::InvalidConfig(format!("invalid youtube api base url: {error}")))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: Url,
        what: &str,
    ) -> Result<T, InfraError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|error| InfraError::Network(format!("network error while fetching {what}: {error}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| InfraError::Network(format!("failed reading {what} response: {error}")))?;

        if !status.is_success() {
            return Err(InfraError::Http {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body)
            .map_err(|error| InfraError::Network(format!("invalid {what} payload: {error}")))
    }
}

#[derive(Debug, serde::Deserialize)]
struct PlaylistsResponse {
    items: Option<Vec<PlaylistResource>>,
}

#[derive(Debug, serde::Deserialize)]
struct PlaylistResource {
    snippet: Option<PlaylistSnippet>,
}

#[derive(Debug, serde::Deserialize)]
struct PlaylistSnippet {
    title: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct PlaylistItemsResponse {
    items: Option<Vec<PlaylistItemResource>>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct PlaylistItemResource {
    snippet: Option<ItemSnippet>,
    #[serde(rename = "contentDetails")]
    content_details: Option<ContentDetails>,
}

#[derive(Debug, serde::Deserialize)]
struct ItemSnippet {
    title: Option<String>,
    position: Option<u32>,
    thumbnails: Option<Thumbnails>,
    #[serde(rename = "videoOwnerChannelTitle")]
    video_owner_channel_title: Option<String>,
    #[serde(rename = "channelTitle")]
    channel_title: Option<String>,
    #[serde(rename = "resourceId")]
    resource_id: Option<ResourceId>,
}

#[derive(Debug, serde::Deserialize)]
struct ResourceId {
    #[serde(rename = "videoId")]
    video_id: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct ContentDetails {
    #[serde(rename = "videoId")]
    video_id: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct Thumbnails {
    medium: Option<Thumbnail>,
    high: Option<Thumbnail>,
    default: Option<Thumbnail>,
}

#[derive(Debug, serde::Deserialize)]
struct Thumbnail {
    url: Option<String>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

impl From<PlaylistItemResource> for RemotePlaylistItem {
    fn from(resource: PlaylistItemResource) -> Self {
        let snippet = resource.snippet;
        let content_id = resource.content_details.and_then(|details| details.video_id);

        let Some(snippet) = snippet else {
            return RemotePlaylistItem {
                video_id: non_blank(content_id),
                title: String::new(),
                position: None,
                thumbnail: None,
                channel_title: None,
            };
        };

        let video_id = non_blank(content_id)
            .or_else(|| non_blank(snippet.resource_id.and_then(|resource| resource.video_id)));
        let thumbnail = snippet.thumbnails.and_then(|thumbnails| {
            [thumbnails.medium, thumbnails.high, thumbnails.default]
                .into_iter()
                .flatten()
                .find_map(|thumbnail| non_blank(thumbnail.url))
        });

        RemotePlaylistItem {
            video_id,
            title: snippet.title.unwrap_or_default().trim().to_string(),
            position: snippet.position,
            thumbnail,
            channel_title: non_blank(snippet.video_owner_channel_title)
                .or_else(|| non_blank(snippet.channel_title)),
        }
    }
}

#[async_trait]
impl PlaylistClient for ReqwestYouTubeClient {
    async fn fetch_playlist_title(
        &self,
        api_key: &str,
        playlist_id: &str,
    ) -> Result<Option<String>, InfraError> {
        let mut url = self.endpoint("playlists")?;
        url.query_pairs_mut()
            .append_pair("part", "snippet")
            .append_pair("id", playlist_id)
            .append_pair("key", api_key);

        let parsed: PlaylistsResponse = self.get_json(url, "playlist metadata").await?;
        Ok(parsed
            .items
            .unwrap_or_default()
            .into_iter()
            .find_map(|item| non_blank(item.snippet.and_then(|snippet| snippet.title))))
    }

    async fn fetch_items_page(
        &self,
        api_key: &str,
        playlist_id: &str,
        page_token: Option<&str>,
    ) -> Result<PlaylistItemsPage, InfraError> {
        let mut url = self.endpoint("playlistItems")?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("part", "snippet,contentDetails")
                .append_pair("maxResults", &PAGE_SIZE.to_string())
                .append_pair("playlistId", playlist_id)
                .append_pair("key", api_key);
            if let Some(page_token) = page_token {
                query.append_pair("pageToken", page_token);
            }
        }

        let parsed: PlaylistItemsResponse = self.get_json(url, "playlist items").await?;
        Ok(PlaylistItemsPage {
            items: parsed
                .items
                .unwrap_or_default()
                .into_iter()
                .map(RemotePlaylistItem::from)
                .collect(),
            next_page_token: non_blank(parsed.next_page_token),
        })
    }
}
