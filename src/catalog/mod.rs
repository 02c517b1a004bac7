//! Chapter catalogue resolution.
//!
//! Merges chapters from the local authoritative source with chapters
//! backfilled from a remote paginated feed into one deduplicated list
//! ordered by chapter number. The remote list is cached per content item
//! for a fixed time window.
//!
//! Resolution is not reentrant: callers must not start a second
//! `resolve` for the same content item while one is in flight.

pub mod cache;
mod merge;

pub use cache::{ChapterCache, ChapterCacheEntry};
pub use merge::{merge_chapters, sort_by_number};

use crate::config::CatalogConfig;
use crate::error::{CatalogError, RemoteFetchFailed, SourceError};
use crate::model::{Chapter, Language};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Progress reported once the local fetch is done.
const LOCAL_DONE_PERCENT: u8 = 10;

/// Progress added per completed remote batch.
const BATCH_PERCENT_STEP: u8 = 5;

/// Ceiling for progress reported while the remote loop is still running.
const LOOP_PERCENT_CEILING: u8 = 95;

/// Limit/offset window for a local query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pagination {
    /// `None` returns every chapter from `offset` on.
    pub limit: Option<usize>,
    pub offset: usize,
}

impl Pagination {
    /// Every chapter.
    pub const ALL: Pagination = Pagination {
        limit: None,
        offset: 0,
    };

    /// Applies this window to an already ordered list.
    pub fn apply<T>(self, items: Vec<T>) -> Vec<T> {
        let iter = items.into_iter().skip(self.offset);
        match self.limit {
            Some(limit) => iter.take(limit).collect(),
            None => iter.collect(),
        }
    }
}

/// The locally authoritative chapter store.
#[async_trait]
pub trait LocalChapterSource: Send + Sync {
    /// Returns the chapters of `content_id` in `language`, ordered by number ascending.
    async fn query(
        &self,
        content_id: &str,
        language: Language,
        page: Pagination,
    ) -> Result<Vec<Chapter>, SourceError>;
}

/// One page of the remote feed. Failures are reported as `success = false`.
#[derive(Debug, Clone, Default)]
pub struct RemoteBatch {
    pub success: bool,
    pub chapters: Vec<Chapter>,
}

impl RemoteBatch {
    pub fn ok(chapters: Vec<Chapter>) -> Self {
        Self {
            success: true,
            chapters,
        }
    }

    pub fn failed() -> Self {
        Self {
            success: false,
            chapters: Vec::new(),
        }
    }
}

/// The external, rate-limited, paginated chapter feed.
#[async_trait]
pub trait RemoteChapterSource: Send + Sync {
    /// Fetches up to `limit` chapters of any language starting at `offset`.
    async fn fetch(&self, content_id: &str, limit: usize, offset: usize) -> RemoteBatch;
}

/// What to resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveRequest {
    pub content_id: String,
    /// Query the local source for local-language chapters.
    pub include_local: bool,
    /// Backfill secondary-language chapters from cache or the remote feed.
    pub include_secondary: bool,
    /// Skip the cache read and always run the remote loop.
    pub refresh: bool,
}

impl ResolveRequest {
    /// Resolves both languages, using the cache when fresh.
    pub fn new(content_id: impl Into<String>) -> Self {
        Self {
            content_id: content_id.into(),
            include_local: true,
            include_secondary: true,
            refresh: false,
        }
    }

    pub fn local_only(mut self) -> Self {
        self.include_secondary = false;
        self
    }

    pub fn secondary_only(mut self) -> Self {
        self.include_local = false;
        self
    }

    pub fn refreshing(mut self) -> Self {
        self.refresh = true;
        self
    }
}

/// Where the secondary-language chapters came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecondaryStatus {
    NotRequested,
    /// Served from a fresh cache entry.
    Cached,
    /// The remote loop ran to completion and the result was cached.
    Complete,
    /// A remote batch failed; the list holds what was collected before it.
    Incomplete(RemoteFetchFailed),
}

/// A resolved chapter catalogue.
#[derive(Debug, Clone)]
pub struct CatalogResolution {
    /// Deduplicated chapters ordered by number ascending.
    pub chapters: Vec<Chapter>,
    pub secondary: SecondaryStatus,
}

impl CatalogResolution {
    /// True when secondary data is partial and worth retrying later.
    pub fn is_incomplete(&self) -> bool {
        matches!(self.secondary, SecondaryStatus::Incomplete(_))
    }
}

/// Outcome of the remote batch loop.
#[derive(Debug)]
struct RemoteDrain {
    chapters: Vec<Chapter>,
    calls: usize,
    failure: Option<RemoteFetchFailed>,
}

/// Merges local and remote chapter sources into one cached catalogue.
pub struct CatalogResolver {
    local: Arc<dyn LocalChapterSource>,
    remote: Arc<dyn RemoteChapterSource>,
    cache: ChapterCache,
    config: CatalogConfig,
}

impl std::fmt::Debug for CatalogResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogResolver")
            .field("cache", &self.cache)
            .field("config", &self.config)
            .finish()
    }
}

impl CatalogResolver {
    pub fn new(
        local: Arc<dyn LocalChapterSource>,
        remote: Arc<dyn RemoteChapterSource>,
        cache: ChapterCache,
        config: CatalogConfig,
    ) -> Self {
        Self {
            local,
            remote,
            cache,
            config,
        }
    }

    pub fn cache(&self) -> &ChapterCache {
        &self.cache
    }

    /// Resolves the chapter catalogue for a content item.
    pub async fn resolve(
        &self,
        request: &ResolveRequest,
    ) -> Result<CatalogResolution, CatalogError> {
        self.resolve_with_progress(request, |_| {}).await
    }

    /// Resolves the catalogue, reporting progress as a percentage (0-100).
    ///
    /// A local source failure is fatal. Remote failures degrade to an
    /// incomplete result.
    pub async fn resolve_with_progress<F>(
        &self,
        request: &ResolveRequest,
        mut on_progress: F,
    ) -> Result<CatalogResolution, CatalogError>
    where
        F: FnMut(u8) + Send,
    {
        let content_id = request.content_id.as_str();
        on_progress(0);

        let local = if request.include_local {
            let chapters = self
                .local
                .query(content_id, Language::LOCAL, Pagination::ALL)
                .await?;
            debug!(content_id, chapters = chapters.len(), "local chapters loaded");
            chapters
        } else {
            Vec::new()
        };

        if !request.include_secondary {
            on_progress(100);
            return Ok(CatalogResolution {
                chapters: merge_chapters(local, Vec::new()),
                secondary: SecondaryStatus::NotRequested,
            });
        }
        on_progress(LOCAL_DONE_PERCENT);

        if !request.refresh {
            if let Some(entry) = self.cache.load_fresh(content_id).await {
                on_progress(100);
                return Ok(CatalogResolution {
                    chapters: merge_chapters(local, entry.chapters),
                    secondary: SecondaryStatus::Cached,
                });
            }
        }

        let mut drain = self.drain_remote(content_id, &mut on_progress).await;
        sort_by_number(&mut drain.chapters);

        let secondary = match drain.failure {
            Some(failure) => {
                warn!(content_id, error = %failure, "secondary chapters incomplete");
                SecondaryStatus::Incomplete(failure)
            }
            None => {
                if let Err(err) = self.cache.save(content_id, &drain.chapters).await {
                    warn!(content_id, error = %err, "failed to cache chapter list");
                }
                SecondaryStatus::Complete
            }
        };

        info!(
            content_id,
            local = local.len(),
            secondary = drain.chapters.len(),
            calls = drain.calls,
            "chapter catalogue resolved"
        );
        on_progress(100);

        Ok(CatalogResolution {
            chapters: merge_chapters(local, drain.chapters),
            secondary,
        })
    }

    /// Runs the bounded batch loop against the remote feed.
    ///
    /// A batch is exhausted when it adds no new secondary chapter or comes
    /// back shorter than requested. The loop ends after
    /// `empty_batch_limit` consecutive exhausted batches, once the offset
    /// passes `max_offset`, or at the first failed batch.
    async fn drain_remote<F>(&self, content_id: &str, on_progress: &mut F) -> RemoteDrain
    where
        F: FnMut(u8) + Send,
    {
        let batch_size = self.config.batch_size.max(1);
        let mut chapters = Vec::new();
        let mut seen = HashSet::new();
        let mut offset = 0;
        let mut exhausted = 0;
        let mut calls = 0;
        let mut percent = LOCAL_DONE_PERCENT;

        while exhausted < self.config.empty_batch_limit && offset <= self.config.max_offset {
            if calls > 0 {
                tokio::time::sleep(self.config.batch_delay()).await;
            }

            let batch = self.remote.fetch(content_id, batch_size, offset).await;
            calls += 1;

            if !batch.success {
                return RemoteDrain {
                    chapters,
                    calls,
                    failure: Some(RemoteFetchFailed {
                        offset,
                        batches: calls - 1,
                    }),
                };
            }

            let received = batch.chapters.len();
            let mut added = 0;
            for mut chapter in batch.chapters {
                if chapter.language != Language::SECONDARY {
                    continue;
                }
                if seen.insert(chapter.dedup_key()) {
                    chapter.external = true;
                    chapters.push(chapter);
                    added += 1;
                }
            }

            if added == 0 || received < batch_size {
                exhausted += 1;
            } else {
                exhausted = 0;
            }
            debug!(content_id, offset, received, added, exhausted, "remote batch processed");

            offset += batch_size;
            percent = percent
                .saturating_add(BATCH_PERCENT_STEP)
                .min(LOOP_PERCENT_CEILING);
            on_progress(percent);
        }

        RemoteDrain {
            chapters,
            calls,
            failure: None,
        }
    }
}
