//! Page asset preloading around the reading position.

use crate::error::PreloadError;
use crate::model::ReadingMode;
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashSet;
use tracing::{debug, warn};

/// Host image acquisition. Loads are fire-and-track signals only.
#[async_trait]
pub trait ImageLoader: Send + Sync {
    async fn load(&self, reference: &str) -> Result<(), PreloadError>;
}

/// How many pages around the current one are preloaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreloadPolicy {
    pub ahead: usize,
    pub behind: usize,
}

impl PreloadPolicy {
    pub fn for_mode(mode: ReadingMode) -> Self {
        match mode {
            ReadingMode::LongStrip => Self {
                ahead: 5,
                behind: 0,
            },
            ReadingMode::SinglePage => Self {
                ahead: 3,
                behind: 0,
            },
            ReadingMode::DoublePage => Self {
                ahead: 3,
                behind: 1,
            },
        }
    }
}

/// One page asset to request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreloadTask {
    pub page_index: usize,
    pub reference: String,
}

/// Outcome of one preload round.
#[derive(Debug, Default, PartialEq)]
pub struct PreloadReport {
    pub loaded: Vec<PreloadTask>,
    pub failed: Vec<PreloadError>,
}

/// Pages in the window around `center` whose assets are not known-loaded.
///
/// Forward pages come first, nearest first, then the backward ones.
pub fn plan(
    pages: &[String],
    center: usize,
    policy: PreloadPolicy,
    preloaded: &HashSet<String>,
) -> Vec<PreloadTask> {
    if pages.is_empty() {
        return Vec::new();
    }

    let forward = (center + 1)..=(center + policy.ahead).min(pages.len() - 1);
    let backward = (center.saturating_sub(policy.behind)..center).rev();

    let mut seen = HashSet::new();
    forward
        .chain(backward)
        .filter_map(|index| {
            let reference = pages.get(index)?;
            if preloaded.contains(reference) || !seen.insert(reference.as_str()) {
                return None;
            }
            Some(PreloadTask {
                page_index: index,
                reference: reference.clone(),
            })
        })
        .collect()
}

/// Requests every task concurrently and sorts the outcomes.
pub async fn run(loader: &dyn ImageLoader, tasks: Vec<PreloadTask>) -> PreloadReport {
    let results = join_all(tasks.iter().map(|task| loader.load(&task.reference))).await;

    let mut report = PreloadReport::default();
    for (task, result) in tasks.into_iter().zip(results) {
        match result {
            Ok(()) => {
                debug!(page = task.page_index, reference = %task.reference, "preloaded page");
                report.loaded.push(task);
            }
            Err(err) => {
                warn!(page = task.page_index, error = %err, "page preload failed");
                report.failed.push(err);
            }
        }
    }
    report
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingLoader;
    use super::*;

    fn pages(count: usize) -> Vec<String> {
        (0..count).map(|i| format!("p{}.webp", i)).collect()
    }

    fn indexes(tasks: &[PreloadTask]) -> Vec<usize> {
        tasks.iter().map(|task| task.page_index).collect()
    }

    #[test]
    fn test_window_per_mode() {
        let pages = pages(20);
        let none = HashSet::new();

        let strip = plan(&pages, 4, PreloadPolicy::for_mode(ReadingMode::LongStrip), &none);
        assert_eq!(indexes(&strip), vec![5, 6, 7, 8, 9]);

        let single = plan(&pages, 4, PreloadPolicy::for_mode(ReadingMode::SinglePage), &none);
        assert_eq!(indexes(&single), vec![5, 6, 7]);

        let double = plan(&pages, 4, PreloadPolicy::for_mode(ReadingMode::DoublePage), &none);
        assert_eq!(indexes(&double), vec![5, 6, 7, 3]);
    }

    #[test]
    fn test_window_is_clipped_at_edges() {
        let pages = pages(3);
        let none = HashSet::new();
        let policy = PreloadPolicy::for_mode(ReadingMode::DoublePage);

        assert_eq!(indexes(&plan(&pages, 0, policy, &none)), vec![1, 2]);
        assert_eq!(indexes(&plan(&pages, 2, policy, &none)), vec![1]);
        assert!(plan(&[], 0, policy, &none).is_empty());
    }

    #[test]
    fn test_known_assets_are_skipped() {
        let pages = pages(10);
        let preloaded: HashSet<String> = ["p2.webp".to_string()].into_iter().collect();
        let tasks = plan(&pages, 0, PreloadPolicy::for_mode(ReadingMode::SinglePage), &preloaded);
        assert_eq!(indexes(&tasks), vec![1, 3]);
    }

    #[tokio::test]
    async fn test_run_separates_failures() {
        let loader = RecordingLoader::failing(&["p2.webp"]);
        let tasks = plan(
            &pages(10),
            0,
            PreloadPolicy::for_mode(ReadingMode::SinglePage),
            &HashSet::new(),
        );

        let report = run(&loader, tasks).await;
        assert_eq!(indexes(&report.loaded), vec![1, 3]);
        assert_eq!(
            report.failed,
            vec![PreloadError::LoadFailed {
                reference: "p2.webp".to_string(),
                message: "HTTP 404".to_string(),
            }]
        );
        assert_eq!(loader.requested().len(), 3);
    }
}
