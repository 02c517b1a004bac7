//! Reading session state machine.
//!
//! A session owns the position inside one content item: the active
//! chapter, the discrete page used by the paged modes and the visible page
//! inferred in long strip mode. Every position change is handed to the
//! [`ProgressStore`], which debounces the actual writes.

pub mod preload;
pub mod visibility;

pub use preload::{ImageLoader, PreloadPolicy, PreloadReport, PreloadTask};
pub use visibility::{
    MIN_VISIBLE_RATIO, PageHandle, VisibilityReporter, VisibilityTracker, VisibilityUpdate,
};

use crate::clock::Clock;
use crate::error::StoreError;
use crate::model::{
    Chapter, LanguageFilter, ReaderSettings, ReadingDirection, ReadingMode, ReadingProgress,
};
use crate::progress::ProgressStore;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Manual scroll distance that toggles the controls when auto-hide is on.
const CONTROLS_SCROLL_THRESHOLD_PX: f64 = 10.0;

/// Metadata of the content item being read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContentInfo {
    pub id: String,
    pub title: String,
    pub thumbnail: Option<String>,
}

impl ContentInfo {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            thumbnail: None,
        }
    }
}

/// In-memory position of an open session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub chapter_index: usize,
    /// Current page in the paged modes.
    pub page_index: usize,
    /// Most visible page in long strip mode.
    pub visible_page_index: usize,
    /// Pages of the current chapter whose asset is known to be loaded.
    pub loaded_pages: HashSet<usize>,
    /// Asset references already preloaded during this session.
    pub preloaded_assets: HashSet<String>,
}

/// Visual page turn, resolved against the reading direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Turn {
    Left,
    Right,
}

/// Result of a navigation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavOutcome {
    /// Moved within the current chapter.
    Moved,
    /// Crossed into another chapter.
    ChapterChanged,
    /// Already at the first or last page of the first or last chapter.
    Boundary,
}

/// Pages shown side by side in double page mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Spread {
    pub left: Option<usize>,
    pub right: Option<usize>,
}

/// Controller of one reading session.
pub struct ReadingSession {
    content: ContentInfo,
    all_chapters: Vec<Chapter>,
    filter: LanguageFilter,
    chapters: Vec<Chapter>,
    settings: ReaderSettings,
    state: SessionState,
    visibility: VisibilityTracker,
    progress: ProgressStore,
    clock: Arc<dyn Clock>,
    auto_scroll_active: bool,
    auto_scroll_rx: Option<watch::Receiver<bool>>,
    controls_visible: bool,
}

impl std::fmt::Debug for ReadingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadingSession")
            .field("content", &self.content.id)
            .field("mode", &self.settings.mode)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl ReadingSession {
    /// Opens a session, seeding the position from `resume` when given.
    pub fn open(
        content: ContentInfo,
        chapters: Vec<Chapter>,
        settings: ReaderSettings,
        progress: ProgressStore,
        clock: Arc<dyn Clock>,
        resume: Option<&ReadingProgress>,
    ) -> Self {
        let mut session = Self {
            content,
            chapters: chapters.clone(),
            all_chapters: chapters,
            filter: LanguageFilter::All,
            settings: settings.normalized(),
            state: SessionState::default(),
            visibility: VisibilityTracker::default(),
            progress,
            clock,
            auto_scroll_active: false,
            auto_scroll_rx: None,
            controls_visible: true,
        };

        let (chapter_index, page) = resume
            .map(|saved| session.resume_position(saved))
            .unwrap_or((0, 0));
        session.enter_chapter(chapter_index, page);
        if page > 0 && session.settings.mode == ReadingMode::LongStrip {
            session.visibility.jump_to(page);
        }

        info!(
            content_id = %session.content.id,
            chapters = session.chapters.len(),
            chapter_index,
            page,
            "reading session opened"
        );
        session
    }

    /// Opens a session resuming from the stored progress record, if any.
    pub async fn open_saved(
        content: ContentInfo,
        chapters: Vec<Chapter>,
        settings: ReaderSettings,
        progress: ProgressStore,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StoreError> {
        let saved = progress.read(&content.id).await?;
        Ok(Self::open(
            content,
            chapters,
            settings,
            progress,
            clock,
            saved.as_ref(),
        ))
    }

    /// Persists any pending progress and ends the session.
    pub async fn close(self) -> Result<(), StoreError> {
        self.progress.flush().await?;
        debug!(content_id = %self.content.id, "reading session closed");
        Ok(())
    }

    fn resume_position(&self, saved: &ReadingProgress) -> (usize, usize) {
        let found = self
            .chapters
            .iter()
            .position(|chapter| chapter.id == saved.chapter_id)
            .or_else(|| {
                self.chapters
                    .iter()
                    .position(|chapter| chapter.number == saved.chapter_number)
            });

        let Some(index) = found else {
            debug!(chapter_id = %saved.chapter_id, "resume chapter not in list, starting over");
            return (0, 0);
        };

        let total = self.chapters[index].page_count();
        let page = (saved.current_page as usize)
            .saturating_sub(1)
            .min(total.saturating_sub(1));
        (index, page)
    }

    pub fn content(&self) -> &ContentInfo {
        &self.content
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn settings(&self) -> &ReaderSettings {
        &self.settings
    }

    /// Chapters passing the active language filter.
    pub fn chapters(&self) -> &[Chapter] {
        &self.chapters
    }

    pub fn language_filter(&self) -> LanguageFilter {
        self.filter
    }

    pub fn current_chapter(&self) -> Option<&Chapter> {
        self.chapters.get(self.state.chapter_index)
    }

    /// Page the reader is on: the visible page in long strip mode, the
    /// discrete page otherwise.
    pub fn position(&self) -> usize {
        match self.settings.mode {
            ReadingMode::LongStrip => self.state.visible_page_index,
            _ => self.state.page_index,
        }
    }

    fn step(&self) -> usize {
        match self.settings.mode {
            ReadingMode::DoublePage => 2,
            _ => 1,
        }
    }

    /// Advances one logical page (one spread in double page mode).
    pub fn next_page(&mut self) -> NavOutcome {
        let total = self.current_chapter().map_or(0, Chapter::page_count);
        let next = self.position() + self.step();
        if next < total {
            self.set_position(next);
            return NavOutcome::Moved;
        }
        if self.state.chapter_index + 1 < self.chapters.len() {
            self.switch_chapter(self.state.chapter_index + 1);
            return NavOutcome::ChapterChanged;
        }
        NavOutcome::Boundary
    }

    /// Goes back one logical page (one spread in double page mode).
    pub fn prev_page(&mut self) -> NavOutcome {
        let position = self.position();
        if position > 0 {
            self.set_position(position.saturating_sub(self.step()));
            return NavOutcome::Moved;
        }
        if self.state.chapter_index > 0 {
            self.switch_chapter(self.state.chapter_index - 1);
            return NavOutcome::ChapterChanged;
        }
        NavOutcome::Boundary
    }

    /// Turns the page visually; in right-to-left reading, left is forward.
    pub fn turn(&mut self, turn: Turn) -> NavOutcome {
        match (self.settings.direction, turn) {
            (ReadingDirection::Ltr, Turn::Right) | (ReadingDirection::Rtl, Turn::Left) => {
                self.next_page()
            }
            (ReadingDirection::Ltr, Turn::Left) | (ReadingDirection::Rtl, Turn::Right) => {
                self.prev_page()
            }
        }
    }

    /// Jumps to `page` of the current chapter, clamped to its length.
    pub fn go_to_page(&mut self, page: usize) {
        let total = self.current_chapter().map_or(0, Chapter::page_count);
        self.set_position(page.min(total.saturating_sub(1)));
    }

    /// Opens chapter `index` of the filtered list at its first page.
    pub fn go_to_chapter(&mut self, index: usize) -> NavOutcome {
        if index >= self.chapters.len() {
            return NavOutcome::Boundary;
        }
        if index == self.state.chapter_index {
            self.set_position(0);
            return NavOutcome::Moved;
        }
        self.switch_chapter(index);
        NavOutcome::ChapterChanged
    }

    /// The two page slots of the current spread.
    ///
    /// The partner page follows the reading direction: the next page in
    /// LTR, the previous page in RTL. The earlier page always sits in the
    /// slot read first. The partner slot is empty when it would fall
    /// outside the chapter.
    pub fn spread(&self) -> Option<Spread> {
        if self.settings.mode != ReadingMode::DoublePage {
            return None;
        }
        let total = self.current_chapter()?.page_count();
        let page = self.state.page_index;
        if page >= total {
            return None;
        }

        Some(match self.settings.direction {
            ReadingDirection::Ltr => Spread {
                left: Some(page),
                right: (page + 1 < total).then_some(page + 1),
            },
            ReadingDirection::Rtl => Spread {
                left: Some(page),
                right: page.checked_sub(1),
            },
        })
    }

    /// Starts observing the pages of the current chapter.
    pub fn observe_strip(
        &self,
        reporter: &mut dyn VisibilityReporter,
    ) -> mpsc::UnboundedReceiver<Vec<VisibilityUpdate>> {
        let chapter_index = self.state.chapter_index;
        let total = self.current_chapter().map_or(0, Chapter::page_count);
        let handles: Vec<PageHandle> = (0..total)
            .map(|page_index| PageHandle {
                chapter_index,
                page_index,
            })
            .collect();
        reporter.observe(&handles)
    }

    /// Feeds one visibility batch. Returns the new visible page if it changed.
    ///
    /// Ignored outside long strip mode.
    pub fn apply_visibility(&mut self, updates: &[VisibilityUpdate]) -> Option<usize> {
        if self.settings.mode != ReadingMode::LongStrip {
            return None;
        }
        let page = self.visibility.apply(updates)?;
        self.state.visible_page_index = page;
        self.record_progress();
        Some(page)
    }

    /// Applies a language filter and restarts at page 0.
    ///
    /// The chapter with the same number is kept when the new list has one.
    pub fn set_language_filter(&mut self, filter: LanguageFilter) {
        let current_number = self.current_chapter().map(|chapter| chapter.number);
        self.filter = filter;
        self.chapters = filter.apply(&self.all_chapters);

        let index = current_number
            .and_then(|number| {
                self.chapters
                    .iter()
                    .position(|chapter| chapter.number == number)
            })
            .unwrap_or(0);
        debug!(?filter, chapters = self.chapters.len(), index, "language filter changed");
        self.enter_chapter(index, 0);
        self.record_progress();
    }

    /// Replaces the chapter list, e.g. after a later resolve completed.
    ///
    /// The position survives when the current chapter is still listed.
    pub fn set_chapters(&mut self, chapters: Vec<Chapter>) {
        let current_id = self.current_chapter().map(|chapter| chapter.id.clone());
        self.all_chapters = chapters;
        self.chapters = self.filter.apply(&self.all_chapters);

        let kept = current_id.and_then(|id| {
            self.chapters
                .iter()
                .position(|chapter| chapter.id == id)
        });
        match kept {
            Some(index) => self.state.chapter_index = index,
            None => {
                self.enter_chapter(0, 0);
                self.record_progress();
            }
        }
        self.visibility
            .reset(self.state.chapter_index, self.state.visible_page_index);
    }

    /// Applies new reader settings, carrying the position across mode changes.
    pub fn set_settings(&mut self, next: ReaderSettings) {
        let next = next.normalized();
        let previous = self.settings.mode;
        let position = self.position();
        self.settings = next;

        if previous == self.settings.mode {
            return;
        }
        match self.settings.mode {
            ReadingMode::LongStrip => {
                self.state.visible_page_index = position;
                self.visibility.jump_to(position);
            }
            _ => {
                self.auto_scroll_active = false;
                self.state.page_index = position;
            }
        }
        debug!(from = ?previous, to = ?self.settings.mode, position, "reading mode changed");
    }

    /// Whether auto-scroll may run in the current mode.
    pub fn auto_scroll_allowed(&self) -> bool {
        self.settings.mode == ReadingMode::LongStrip
    }

    /// Whether auto-scroll is moving the viewport.
    ///
    /// Follows the attached driver toggle when there is one, so a driver
    /// that stops itself at the end of the strip is seen at once.
    pub fn auto_scroll_active(&self) -> bool {
        let active = match &self.auto_scroll_rx {
            Some(rx) => *rx.borrow(),
            None => self.auto_scroll_active,
        };
        active && self.auto_scroll_allowed()
    }

    /// Mirrors the auto-scroll driver toggle by hand. Refused outside long
    /// strip mode. Ignored by [`Self::auto_scroll_active`] once a driver
    /// is attached.
    pub fn set_auto_scroll_active(&mut self, active: bool) -> bool {
        self.auto_scroll_active = active && self.auto_scroll_allowed();
        self.auto_scroll_active()
    }

    /// Follows the toggle channel of an auto-scroll driver, as returned by
    /// [`crate::autoscroll::AutoScroller::subscribe`].
    pub fn attach_auto_scroll(&mut self, toggle: watch::Receiver<bool>) {
        self.auto_scroll_rx = Some(toggle);
    }

    pub fn controls_visible(&self) -> bool {
        self.controls_visible
    }

    /// Toggles the controls, as on a tap.
    pub fn toggle_controls(&mut self) -> bool {
        self.controls_visible = !self.controls_visible;
        self.controls_visible
    }

    /// Manual scroll heuristic: scrolling down hides the controls, up shows them.
    ///
    /// Has no effect while auto-scroll is moving the viewport.
    pub fn on_scroll_delta(&mut self, delta_px: f64) -> bool {
        if !self.settings.auto_hide_controls || self.auto_scroll_active() {
            return self.controls_visible;
        }
        if delta_px > CONTROLS_SCROLL_THRESHOLD_PX {
            self.controls_visible = false;
        } else if delta_px < -CONTROLS_SCROLL_THRESHOLD_PX {
            self.controls_visible = true;
        }
        self.controls_visible
    }

    /// Preloads assets around the current position.
    pub async fn preload(&mut self, loader: &dyn ImageLoader) -> PreloadReport {
        let Some(chapter) = self.current_chapter() else {
            return PreloadReport::default();
        };
        let tasks = preload::plan(
            &chapter.pages,
            self.position(),
            PreloadPolicy::for_mode(self.settings.mode),
            &self.state.preloaded_assets,
        );
        if tasks.is_empty() {
            return PreloadReport::default();
        }

        let report = preload::run(loader, tasks).await;
        for task in &report.loaded {
            self.state.loaded_pages.insert(task.page_index);
            self.state.preloaded_assets.insert(task.reference.clone());
        }
        report
    }

    /// Records that the host finished loading `page` of the current chapter.
    pub fn mark_page_loaded(&mut self, page: usize) {
        self.state.loaded_pages.insert(page);
        if let Some(reference) = self
            .current_chapter()
            .and_then(|chapter| chapter.pages.get(page))
            .cloned()
        {
            self.state.preloaded_assets.insert(reference);
        }
    }

    /// Whether `page` can be shown without a loading placeholder.
    pub fn is_page_loaded(&self, page: usize) -> bool {
        self.state.loaded_pages.contains(&page)
            || self
                .current_chapter()
                .and_then(|chapter| chapter.pages.get(page))
                .is_some_and(|reference| self.state.preloaded_assets.contains(reference))
    }

    fn set_position(&mut self, page: usize) {
        match self.settings.mode {
            ReadingMode::LongStrip => {
                self.state.visible_page_index = page;
                self.visibility.jump_to(page);
            }
            _ => self.state.page_index = page,
        }
        self.record_progress();
    }

    fn switch_chapter(&mut self, index: usize) {
        self.enter_chapter(index, 0);
        if let Some(chapter) = self.current_chapter() {
            debug!(chapter_id = %chapter.id, number = %chapter.number, "switched chapter");
        }
        self.record_progress();
    }

    fn enter_chapter(&mut self, index: usize, page: usize) {
        self.state.chapter_index = index;
        self.state.page_index = page;
        self.state.visible_page_index = page;
        self.state.loaded_pages.clear();
        self.visibility.reset(index, page);
    }

    fn record_progress(&self) {
        let Some(chapter) = self.current_chapter() else {
            return;
        };
        let record = ReadingProgress {
            content_id: self.content.id.clone(),
            chapter_id: chapter.id.clone(),
            chapter_number: chapter.number,
            chapter_title: chapter.title.clone(),
            current_page: u32::try_from(self.position() + 1).unwrap_or(u32::MAX),
            total_pages: u32::try_from(chapter.page_count()).unwrap_or(u32::MAX),
            last_read_at: self.clock.now_ms(),
            content_title: self.content.title.clone(),
            content_thumbnail: self.content.thumbnail.clone(),
        };
        if let Err(err) = self.progress.upsert(&record) {
            warn!(content_id = %self.content.id, error = %err, "failed to record progress");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::preload::testing::RecordingLoader;
    use super::*;
    use crate::autoscroll::AutoScroller;
    use crate::autoscroll::testing::{ManualFrames, Strip};
    use crate::clock::testing::ManualClock;
    use crate::model::{ChapterNumber, Language};
    use crate::progress::DEFAULT_DEBOUNCE;
    use crate::store::MemoryStore;
    use std::time::Duration;

    fn chapter(id: &str, number: f64, language: Language, pages: usize) -> Chapter {
        Chapter {
            id: id.to_string(),
            number: ChapterNumber::new(number).unwrap(),
            title: format!("Chapter {}", number),
            language,
            pages: (0..pages).map(|p| format!("{}/{}.jpg", id, p)).collect(),
            release_date: None,
            external: language == Language::SECONDARY,
        }
    }

    fn library() -> Vec<Chapter> {
        vec![
            chapter("ge1", 1.0, Language::Georgian, 4),
            chapter("en1", 1.0, Language::English, 3),
            chapter("ge2", 2.0, Language::Georgian, 5),
            chapter("en2", 2.0, Language::English, 2),
        ]
    }

    fn settings(mode: ReadingMode) -> ReaderSettings {
        ReaderSettings {
            mode,
            ..ReaderSettings::default()
        }
    }

    fn progress_store() -> ProgressStore {
        ProgressStore::new(Arc::new(MemoryStore::new()), DEFAULT_DEBOUNCE)
    }

    fn open(mode: ReadingMode, resume: Option<&ReadingProgress>) -> (ProgressStore, ReadingSession) {
        let progress = progress_store();
        let session = ReadingSession::open(
            ContentInfo::new("m1", "Title"),
            library(),
            settings(mode),
            progress.clone(),
            Arc::new(ManualClock::at(1_000)),
            resume,
        );
        (progress, session)
    }

    fn saved(chapter_id: &str, number: f64, page: u32) -> ReadingProgress {
        ReadingProgress {
            content_id: "m1".to_string(),
            chapter_id: chapter_id.to_string(),
            chapter_number: ChapterNumber::new(number).unwrap(),
            chapter_title: String::new(),
            current_page: page,
            total_pages: 5,
            last_read_at: 0,
            content_title: "Title".to_string(),
            content_thumbnail: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_without_resume_starts_at_zero() {
        let (_progress, session) = open(ReadingMode::SinglePage, None);
        let state = session.state();
        assert_eq!(
            (state.chapter_index, state.page_index, state.visible_page_index),
            (0, 0, 0)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_by_id_and_clamp() {
        let (_progress, session) = open(ReadingMode::SinglePage, Some(&saved("ge2", 2.0, 3)));
        assert_eq!(session.state().chapter_index, 2);
        assert_eq!(session.state().page_index, 2);

        let (_progress, session) = open(ReadingMode::SinglePage, Some(&saved("ge2", 2.0, 99)));
        assert_eq!(session.state().page_index, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_falls_back_to_number() {
        let (_progress, session) = open(ReadingMode::LongStrip, Some(&saved("gone", 2.0, 2)));
        assert_eq!(session.state().chapter_index, 2);
        assert_eq!(session.state().visible_page_index, 1);

        let (_progress, session) = open(ReadingMode::SinglePage, Some(&saved("gone", 9.0, 2)));
        assert_eq!(session.state().chapter_index, 0);
        assert_eq!(session.state().page_index, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_page_switches_chapter_at_end() {
        let (_progress, mut session) = open(ReadingMode::SinglePage, None);
        for _ in 0..3 {
            assert_eq!(session.next_page(), NavOutcome::Moved);
        }
        assert_eq!(session.state().page_index, 3);

        assert_eq!(session.next_page(), NavOutcome::ChapterChanged);
        assert_eq!(session.state().chapter_index, 1);
        assert_eq!(session.state().page_index, 0);

        assert_eq!(session.prev_page(), NavOutcome::ChapterChanged);
        assert_eq!(session.state().chapter_index, 0);
        assert_eq!(session.state().page_index, 0);
        assert_eq!(session.prev_page(), NavOutcome::Boundary);
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_page_of_last_chapter_is_boundary() {
        let (_progress, mut session) = open(ReadingMode::SinglePage, None);
        assert_eq!(session.go_to_chapter(3), NavOutcome::ChapterChanged);
        session.go_to_page(10);
        assert_eq!(session.state().page_index, 1);
        assert_eq!(session.next_page(), NavOutcome::Boundary);
        assert_eq!(session.state().page_index, 1);
        assert_eq!(session.go_to_chapter(4), NavOutcome::Boundary);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rtl_turn_left_moves_forward() {
        let (_progress, mut session) = open(ReadingMode::SinglePage, None);
        session.set_settings(ReaderSettings {
            direction: ReadingDirection::Rtl,
            ..session.settings().clone()
        });

        session.turn(Turn::Left);
        assert_eq!(session.state().page_index, 1);
        session.turn(Turn::Right);
        assert_eq!(session.state().page_index, 0);

        session.set_settings(ReaderSettings::default());
        session.turn(Turn::Right);
        assert_eq!(session.state().page_index, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_page_spread() {
        let (_progress, mut session) = open(ReadingMode::DoublePage, None);
        assert_eq!(
            session.spread(),
            Some(Spread {
                left: Some(0),
                right: Some(1)
            })
        );

        session.next_page();
        assert_eq!(session.state().page_index, 2);

        session.set_settings(ReaderSettings {
            direction: ReadingDirection::Rtl,
            ..session.settings().clone()
        });
        assert_eq!(
            session.spread(),
            Some(Spread {
                left: Some(2),
                right: Some(1)
            })
        );

        // chapter two has five pages
        session.go_to_chapter(2);
        assert_eq!(
            session.spread(),
            Some(Spread {
                left: Some(0),
                right: None
            })
        );
        session.next_page();
        session.next_page();
        assert_eq!(session.state().page_index, 4);
        assert_eq!(
            session.spread(),
            Some(Spread {
                left: Some(4),
                right: Some(3)
            })
        );

        // the final odd page has no next partner
        session.set_settings(ReaderSettings {
            direction: ReadingDirection::Ltr,
            ..session.settings().clone()
        });
        assert_eq!(
            session.spread(),
            Some(Spread {
                left: Some(4),
                right: None
            })
        );
        assert_eq!(session.next_page(), NavOutcome::ChapterChanged);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spread_only_in_double_page() {
        let (_progress, session) = open(ReadingMode::SinglePage, None);
        assert_eq!(session.spread(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_strip_persists_visible_page() {
        let (progress, mut session) = open(ReadingMode::LongStrip, None);
        session.go_to_chapter(2);

        let changed = session.apply_visibility(&[
            VisibilityUpdate::new(2, 3, 0.2),
            VisibilityUpdate::new(2, 4, 0.75),
            VisibilityUpdate::new(2, 5, 0.1),
        ]);
        assert_eq!(changed, Some(4));
        assert_eq!(session.state().visible_page_index, 4);
        assert_eq!(session.state().page_index, 0);

        session.close().await.unwrap();
        let stored = progress.read("m1").await.unwrap().unwrap();
        assert_eq!(stored.chapter_id, "ge2");
        assert_eq!(stored.current_page, 5);
        assert_eq!(stored.total_pages, 5);
        assert_eq!(stored.last_read_at, 1_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_visibility_ignored_in_paged_mode() {
        let (_progress, mut session) = open(ReadingMode::SinglePage, None);
        assert_eq!(
            session.apply_visibility(&[VisibilityUpdate::new(0, 2, 1.0)]),
            None
        );
        assert_eq!(session.state().visible_page_index, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_jump_beats_stale_visibility() {
        let (_progress, mut session) = open(ReadingMode::LongStrip, None);
        session.apply_visibility(&[VisibilityUpdate::new(0, 1, 0.9)]);
        assert_eq!(session.position(), 1);

        session.go_to_page(3);
        assert_eq!(
            session.apply_visibility(&[VisibilityUpdate::new(0, 1, 0.9)]),
            None
        );
        assert_eq!(session.position(), 3);

        // an update from the previous chapter arriving late
        session.next_page();
        session.apply_visibility(&[VisibilityUpdate::new(0, 0, 1.0)]);
        assert_eq!(session.state().chapter_index, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_language_filter_resets_position() {
        let (_progress, mut session) = open(ReadingMode::SinglePage, None);
        session.go_to_chapter(2);
        session.go_to_page(3);

        session.set_language_filter(LanguageFilter::Only(Language::English));
        assert_eq!(session.chapters().len(), 2);
        let current = session.current_chapter().unwrap();
        assert_eq!(current.id, "en2");
        assert_eq!(session.state().page_index, 0);
        assert_eq!(session.state().visible_page_index, 0);

        session.set_language_filter(LanguageFilter::All);
        assert_eq!(session.current_chapter().unwrap().number.value(), 2.0);
        assert_eq!(session.state().page_index, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_chapters_keeps_listed_chapter() {
        let (_progress, mut session) = open(ReadingMode::SinglePage, None);
        session.go_to_chapter(2);
        session.go_to_page(2);

        let mut refreshed = library();
        refreshed.insert(0, chapter("ge0", 0.5, Language::Georgian, 1));
        session.set_chapters(refreshed);
        assert_eq!(session.current_chapter().unwrap().id, "ge2");
        assert_eq!(session.state().chapter_index, 3);
        assert_eq!(session.state().page_index, 2);

        session.set_chapters(vec![chapter("x", 1.0, Language::Georgian, 2)]);
        assert_eq!(session.state().chapter_index, 0);
        assert_eq!(session.state().page_index, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mode_switch_carries_position() {
        let (_progress, mut session) = open(ReadingMode::SinglePage, None);
        session.go_to_page(3);

        session.set_settings(settings(ReadingMode::LongStrip));
        assert_eq!(session.position(), 3);
        assert!(session.set_auto_scroll_active(true));

        session.set_settings(settings(ReadingMode::SinglePage));
        assert_eq!(session.position(), 3);
        assert!(!session.auto_scroll_active());
        assert!(!session.set_auto_scroll_active(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_paging_writes_last_position_once() {
        let memory = Arc::new(MemoryStore::new());
        let progress = ProgressStore::new(memory.clone(), DEFAULT_DEBOUNCE);
        let mut session = ReadingSession::open(
            ContentInfo::new("m1", "Title"),
            library(),
            settings(ReadingMode::SinglePage),
            progress.clone(),
            Arc::new(ManualClock::at(0)),
            None,
        );

        session.next_page();
        session.next_page();
        session.next_page();
        assert!(memory.is_empty());

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(memory.len(), 1);
        assert_eq!(progress.read("m1").await.unwrap().unwrap().current_page, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_saved_resumes() {
        let progress = progress_store();
        progress.upsert(&saved("en1", 1.0, 2)).unwrap();

        let session = ReadingSession::open_saved(
            ContentInfo::new("m1", "Title"),
            library(),
            settings(ReadingMode::SinglePage),
            progress,
            Arc::new(ManualClock::at(0)),
        )
        .await
        .unwrap();
        assert_eq!(session.current_chapter().unwrap().id, "en1");
        assert_eq!(session.state().page_index, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_controls_heuristic_suppressed_during_auto_scroll() {
        let (_progress, mut session) = open(ReadingMode::LongStrip, None);
        assert!(!session.on_scroll_delta(40.0));
        assert!(session.on_scroll_delta(-40.0));

        session.set_auto_scroll_active(true);
        assert!(session.on_scroll_delta(40.0));
        assert!(session.controls_visible());

        session.set_auto_scroll_active(false);
        assert!(session.on_scroll_delta(3.0));
        assert!(!session.toggle_controls());
    }

    #[tokio::test(start_paused = true)]
    async fn test_controls_heuristic_resumes_when_driver_stops_itself() {
        let (_progress, mut session) = open(ReadingMode::LongStrip, None);
        let frames = Arc::new(ManualFrames::default());
        let scroller = AutoScroller::new(Strip { top: 0.0, max: 100.0 }, frames.clone());
        session.attach_auto_scroll(scroller.subscribe());

        scroller.start(5.0);
        assert!(session.auto_scroll_active());
        assert!(session.on_scroll_delta(40.0));

        let mut iterations = 0;
        while scroller.is_active() {
            frames.fire(16.0);
            iterations += 1;
            assert!(iterations < 1_000, "auto-scroll never finished");
        }

        assert!(!session.auto_scroll_active());
        assert!(!session.on_scroll_delta(40.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_preload_tracks_loaded_and_retries_failures() {
        let (_progress, mut session) = open(ReadingMode::SinglePage, None);
        let loader = RecordingLoader::failing(&["ge1/2.jpg"]);

        let report = session.preload(&loader).await;
        assert_eq!(report.loaded.len(), 2);
        assert_eq!(report.failed.len(), 1);
        assert!(session.is_page_loaded(1));
        assert!(!session.is_page_loaded(2));
        assert!(session.is_page_loaded(3));

        loader.failing.lock().unwrap().clear();
        let report = session.preload(&loader).await;
        assert_eq!(report.loaded.len(), 1);
        assert_eq!(report.loaded[0].page_index, 2);
        assert_eq!(loader.requested().len(), 4);

        session.mark_page_loaded(0);
        assert!(session.is_page_loaded(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_observe_strip_reports_current_chapter_handles() {
        struct ChannelReporter {
            observed: Vec<PageHandle>,
            tx: Option<mpsc::UnboundedSender<Vec<VisibilityUpdate>>>,
        }

        impl VisibilityReporter for ChannelReporter {
            fn observe(
                &mut self,
                handles: &[PageHandle],
            ) -> mpsc::UnboundedReceiver<Vec<VisibilityUpdate>> {
                self.observed = handles.to_vec();
                let (tx, rx) = mpsc::unbounded_channel();
                self.tx = Some(tx);
                rx
            }
        }

        let (_progress, mut session) = open(ReadingMode::LongStrip, None);
        session.go_to_chapter(1);
        let mut reporter = ChannelReporter {
            observed: Vec::new(),
            tx: None,
        };
        let mut rx = session.observe_strip(&mut reporter);
        assert_eq!(reporter.observed.len(), 3);
        assert!(reporter.observed.iter().all(|h| h.chapter_index == 1));

        let tx = reporter.tx.take().unwrap();
        tx.send(vec![VisibilityUpdate::new(1, 2, 0.8)]).unwrap();
        drop(tx);
        while let Some(batch) = rx.recv().await {
            session.apply_visibility(&batch);
        }
        assert_eq!(session.position(), 2);
    }
}
