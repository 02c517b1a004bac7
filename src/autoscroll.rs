//! Frame-paced automatic scrolling for the long strip mode.
//!
//! Each frame scrolls by `speed * BASE_RATE_PX * elapsed / NOMINAL_FRAME_MS`,
//! so the perceived speed does not depend on the device frame rate. The
//! driver turns itself off when it reaches the end of the content.

use crate::model::{ReaderSettings, ReadingMode, clamp_speed};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, info};

/// Frame interval the scroll rate is normalised against (60 Hz).
pub const NOMINAL_FRAME_MS: f64 = 1000.0 / 60.0;

/// Pixels scrolled per nominal frame at speed 1.0.
pub const BASE_RATE_PX: f64 = 1.5;

/// Distance from the end at which scrolling counts as finished.
pub const END_TOLERANCE_PX: f64 = 1.0;

/// Scroll distance for one frame.
pub fn scroll_delta(speed: f64, elapsed_ms: f64) -> f64 {
    speed * BASE_RATE_PX * elapsed_ms.max(0.0) / NOMINAL_FRAME_MS
}

/// The scrollable viewport being driven.
pub trait ScrollSurface: Send {
    fn scroll_top(&self) -> f64;
    fn max_scroll_top(&self) -> f64;
    fn scroll_to(&mut self, top: f64);
}

/// Handle of a scheduled frame callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(pub u64);

/// Callback receiving the milliseconds elapsed since the previous frame.
pub type FrameCallback = Box<dyn FnOnce(f64) + Send + 'static>;

/// Host-provided frame scheduling.
///
/// Implementations must not invoke the callback from inside `schedule_frame`.
pub trait FrameScheduler: Send + Sync {
    fn schedule_frame(&self, callback: FrameCallback) -> FrameId;

    /// Deschedules a frame that has not run yet. Unknown ids are ignored.
    fn cancel_frame(&self, id: FrameId);
}

/// Frame scheduler running callbacks on the tokio timer.
#[derive(Debug)]
pub struct TokioFrameScheduler {
    interval: Duration,
    next_id: AtomicU64,
    tasks: Arc<Mutex<HashMap<FrameId, AbortHandle>>>,
}

impl Default for TokioFrameScheduler {
    fn default() -> Self {
        Self::new(Duration::from_secs_f64(NOMINAL_FRAME_MS / 1000.0))
    }
}

impl TokioFrameScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_id: AtomicU64::new(1),
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn tasks(&self) -> MutexGuard<'_, HashMap<FrameId, AbortHandle>> {
        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl FrameScheduler for TokioFrameScheduler {
    fn schedule_frame(&self, callback: FrameCallback) -> FrameId {
        let id = FrameId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let interval = self.interval;
        let tasks = Arc::clone(&self.tasks);
        let scheduled_at = tokio::time::Instant::now();

        let mut registry = self.tasks();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            let still_scheduled = tasks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .remove(&id)
                .is_some();
            if still_scheduled {
                callback(scheduled_at.elapsed().as_secs_f64() * 1000.0);
            }
        });
        registry.insert(id, handle.abort_handle());
        id
    }

    fn cancel_frame(&self, id: FrameId) {
        if let Some(handle) = self.tasks().remove(&id) {
            handle.abort();
        }
    }
}

struct DriverState<S> {
    surface: S,
    speed: f64,
    active: bool,
    generation: u64,
    pending: Option<FrameId>,
}

struct Inner<S> {
    state: Mutex<DriverState<S>>,
    scheduler: Arc<dyn FrameScheduler>,
    active_tx: watch::Sender<bool>,
}

impl<S> Inner<S> {
    fn lock(&self) -> MutexGuard<'_, DriverState<S>> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Cancelable auto-scroll driver.
pub struct AutoScroller<S: ScrollSurface + 'static> {
    inner: Arc<Inner<S>>,
}

impl<S: ScrollSurface + 'static> std::fmt::Debug for AutoScroller<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("AutoScroller")
            .field("active", &state.active)
            .field("speed", &state.speed)
            .finish()
    }
}

impl<S: ScrollSurface + 'static> AutoScroller<S> {
    pub fn new(surface: S, scheduler: Arc<dyn FrameScheduler>) -> Self {
        let (active_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(DriverState {
                    surface,
                    speed: 1.0,
                    active: false,
                    generation: 0,
                    pending: None,
                }),
                scheduler,
                active_tx,
            }),
        }
    }

    /// Starts scrolling at `speed`, clamped to the supported range.
    ///
    /// Calling it while active only changes the speed.
    pub fn start(&self, speed: f64) {
        let mut state = self.inner.lock();
        state.speed = clamp_speed(speed);
        if state.active {
            return;
        }
        state.active = true;
        state.generation += 1;
        schedule_next(&self.inner, &mut state);
        let speed = state.speed;
        drop(state);

        info!(speed, "auto-scroll started");
        self.inner.active_tx.send_replace(true);
    }

    /// Starts scrolling with the configured speed if the mode allows it.
    pub fn start_with(&self, settings: &ReaderSettings) -> bool {
        if settings.mode != ReadingMode::LongStrip {
            debug!(mode = ?settings.mode, "auto-scroll ignored outside long strip mode");
            return false;
        }
        self.start(settings.auto_scroll_speed);
        true
    }

    /// Stops scrolling and deschedules any queued frame.
    pub fn stop(&self) {
        let mut state = self.inner.lock();
        if !state.active {
            return;
        }
        state.active = false;
        state.generation += 1;
        if let Some(id) = state.pending.take() {
            self.inner.scheduler.cancel_frame(id);
        }
        drop(state);

        info!("auto-scroll stopped");
        self.inner.active_tx.send_replace(false);
    }

    pub fn is_active(&self) -> bool {
        self.inner.lock().active
    }

    pub fn speed(&self) -> f64 {
        self.inner.lock().speed
    }

    /// Receiver notified whenever the driver toggles on or off.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.inner.active_tx.subscribe()
    }

    /// Runs `f` with the driven surface, e.g. after a layout change.
    pub fn with_surface<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        f(&mut self.inner.lock().surface)
    }
}

impl<S: ScrollSurface + 'static> Drop for AutoScroller<S> {
    fn drop(&mut self) {
        let mut state = self.inner.lock();
        if let Some(id) = state.pending.take() {
            self.inner.scheduler.cancel_frame(id);
        }
    }
}

fn schedule_next<S: ScrollSurface + 'static>(inner: &Arc<Inner<S>>, state: &mut DriverState<S>) {
    let weak: Weak<Inner<S>> = Arc::downgrade(inner);
    let generation = state.generation;
    let id = inner.scheduler.schedule_frame(Box::new(move |elapsed_ms| {
        if let Some(inner) = weak.upgrade() {
            on_frame(&inner, generation, elapsed_ms);
        }
    }));
    state.pending = Some(id);
}

fn on_frame<S: ScrollSurface + 'static>(inner: &Arc<Inner<S>>, generation: u64, elapsed_ms: f64) {
    let mut state = inner.lock();
    if !state.active || state.generation != generation {
        return;
    }
    state.pending = None;

    let max = state.surface.max_scroll_top();
    let next = (state.surface.scroll_top() + scroll_delta(state.speed, elapsed_ms)).min(max);
    state.surface.scroll_to(next);

    if max - next <= END_TOLERANCE_PX {
        state.active = false;
        state.generation += 1;
        drop(state);

        info!("auto-scroll reached the end");
        inner.active_tx.send_replace(false);
        return;
    }

    schedule_next(inner, &mut state);
}
