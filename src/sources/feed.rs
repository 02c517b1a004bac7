//! Remote chapter feed client.
//!
//! Talks to a MangaDex-style `manga/{id}/feed` endpoint. Every transport,
//! status or decode failure is reported as an unsuccessful batch rather
//! than an error, so the catalogue resolver can degrade gracefully.

use crate::catalog::{RemoteBatch, RemoteChapterSource};
use crate::config::RemoteConfig;
use crate::error::ConfigError;
use crate::model::{Chapter, ChapterNumber, Language};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Feed response envelope.
#[derive(Debug, Deserialize)]
struct FeedResponse {
    result: String,
    #[serde(default)]
    data: Vec<FeedChapter>,
}

#[derive(Debug, Deserialize)]
struct FeedChapter {
    id: String,
    attributes: FeedAttributes,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FeedAttributes {
    chapter: Option<String>,
    title: Option<String>,
    translated_language: String,
    publish_at: Option<String>,
}

/// HTTP client for the remote paginated chapter feed.
#[derive(Debug, Clone)]
pub struct ChapterFeedClient {
    client: reqwest::Client,
    base_url: Url,
}

impl ChapterFeedClient {
    /// Creates a client for the configured feed.
    pub fn new(config: &RemoteConfig) -> Result<Self, ConfigError> {
        let base_url = Url::parse(&config.base_url).map_err(|e| ConfigError::InvalidValue {
            key: "remote.base_url".to_string(),
            message: e.to_string(),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(ConfigError::InvalidValue {
                key: "remote.base_url".to_string(),
                message: "must be an absolute http(s) URL".to_string(),
            });
        }

        let client = reqwest::Client::builder()
            .user_agent(concat!("tankobon/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                key: "remote".to_string(),
                message: e.to_string(),
            })?;

        Ok(Self { client, base_url })
    }

    /// Builds the feed URL for one batch.
    fn feed_url(&self, content_id: &str, limit: usize, offset: usize) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend(["manga", content_id, "feed"]);
        }
        url.query_pairs_mut()
            .append_pair("limit", &limit.to_string())
            .append_pair("offset", &offset.to_string())
            .append_pair("translatedLanguage[]", Language::SECONDARY.code())
            .append_pair("order[chapter]", "asc");
        url
    }

    async fn fetch_batch(&self, url: Url) -> Result<FeedResponse, String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !response.status().is_success() {
            return Err(format!("HTTP {}", response.status()));
        }

        response
            .json::<FeedResponse>()
            .await
            .map_err(|e| e.to_string())
    }
}

/// Converts feed entries to chapters, skipping entries without a usable number or language.
fn chapters_from_feed(data: Vec<FeedChapter>) -> Vec<Chapter> {
    data.into_iter()
        .filter_map(|entry| {
            let attributes = entry.attributes;
            let number = attributes
                .chapter
                .as_deref()
                .and_then(|raw| raw.trim().parse::<f64>().ok())
                .and_then(ChapterNumber::new)?;
            let language = Language::from_code(&attributes.translated_language)?;
            Some(Chapter {
                id: entry.id,
                number,
                title: attributes.title.unwrap_or_default(),
                language,
                pages: Vec::new(),
                release_date: attributes.publish_at,
                external: true,
            })
        })
        .collect()
}

#[async_trait]
impl RemoteChapterSource for ChapterFeedClient {
    async fn fetch(&self, content_id: &str, limit: usize, offset: usize) -> RemoteBatch {
        let url = self.feed_url(content_id, limit, offset);
        match self.fetch_batch(url).await {
            Ok(response) if response.result == "ok" => {
                let chapters = chapters_from_feed(response.data);
                debug!(content_id, offset, chapters = chapters.len(), "feed batch received");
                RemoteBatch::ok(chapters)
            }
            Ok(response) => {
                warn!(content_id, offset, result = %response.result, "feed returned an error result");
                RemoteBatch::failed()
            }
            Err(err) => {
                warn!(content_id, offset, error = %err, "feed request failed");
                RemoteBatch::failed()
            }
        }
    }
}
