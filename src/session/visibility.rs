//! Viewport-driven position inference for the long strip mode.
//!
//! The host reports a visibility ratio per rendered page. The page with the
//! highest ratio at or above [`MIN_VISIBLE_RATIO`] becomes the visible page.
//! On a tie the previous page is kept.

use std::collections::HashMap;
use tokio::sync::mpsc;

/// Ratio a page must reach before it can become the visible page.
pub const MIN_VISIBLE_RATIO: f64 = 0.5;

/// Batches ignored while waiting for an explicit jump target to show up.
const JUMP_GUARD_BATCHES: u32 = 8;

/// Identifies a rendered page element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageHandle {
    pub chapter_index: usize,
    pub page_index: usize,
}

/// One visibility observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisibilityUpdate {
    pub handle: PageHandle,
    pub ratio: f64,
}

impl VisibilityUpdate {
    pub fn new(chapter_index: usize, page_index: usize, ratio: f64) -> Self {
        Self {
            handle: PageHandle {
                chapter_index,
                page_index,
            },
            ratio,
        }
    }
}

/// Platform observer of page visibility.
///
/// Each message on the returned channel is one batch of updates, delivered
/// whenever the layout or the viewport changes.
pub trait VisibilityReporter {
    fn observe(&mut self, handles: &[PageHandle]) -> mpsc::UnboundedReceiver<Vec<VisibilityUpdate>>;
}

#[derive(Debug, Clone, Copy)]
struct PendingJump {
    target: usize,
    ignored: u32,
}

/// Tracks the most visible page of one chapter.
#[derive(Debug, Clone, Default)]
pub struct VisibilityTracker {
    chapter_index: usize,
    visible: usize,
    ratios: HashMap<usize, f64>,
    jump: Option<PendingJump>,
}

impl VisibilityTracker {
    pub fn new(chapter_index: usize, visible: usize) -> Self {
        Self {
            chapter_index,
            visible,
            ..Self::default()
        }
    }

    pub fn visible(&self) -> usize {
        self.visible
    }

    pub fn chapter_index(&self) -> usize {
        self.chapter_index
    }

    /// Forgets all observations, e.g. after a chapter switch.
    pub fn reset(&mut self, chapter_index: usize, visible: usize) {
        self.chapter_index = chapter_index;
        self.visible = visible;
        self.ratios.clear();
        self.jump = None;
    }

    /// Sets the visible page explicitly.
    ///
    /// Updates that do not yet show `page` as the winner are treated as
    /// stale and ignored for a bounded number of batches.
    pub fn jump_to(&mut self, page: usize) {
        self.visible = page;
        self.ratios.clear();
        self.jump = Some(PendingJump {
            target: page,
            ignored: 0,
        });
    }

    /// Applies one batch and returns the new visible page if it changed.
    pub fn apply(&mut self, updates: &[VisibilityUpdate]) -> Option<usize> {
        let mut relevant = false;
        for update in updates {
            if update.handle.chapter_index != self.chapter_index {
                continue;
            }
            let ratio = if update.ratio.is_nan() {
                0.0
            } else {
                update.ratio.clamp(0.0, 1.0)
            };
            self.ratios.insert(update.handle.page_index, ratio);
            relevant = true;
        }
        if !relevant {
            return None;
        }

        let winner = self.winner();

        if let Some(mut jump) = self.jump {
            if winner == Some(jump.target) {
                self.jump = None;
                return None;
            }
            jump.ignored += 1;
            if jump.ignored < JUMP_GUARD_BATCHES {
                self.jump = Some(jump);
                self.ratios.clear();
                return None;
            }
            self.jump = None;
        }

        match winner {
            Some(page) if page != self.visible => {
                self.visible = page;
                Some(page)
            }
            _ => None,
        }
    }

    fn winner(&self) -> Option<usize> {
        let best = self
            .ratios
            .values()
            .copied()
            .filter(|ratio| *ratio >= MIN_VISIBLE_RATIO)
            .fold(None, |best: Option<f64>, ratio| {
                Some(best.map_or(ratio, |b| b.max(ratio)))
            })?;

        if self.ratios.get(&self.visible) == Some(&best) {
            return Some(self.visible);
        }
        self.ratios
            .iter()
            .filter(|(_, ratio)| **ratio == best)
            .map(|(page, _)| *page)
            .min()
    }
}
