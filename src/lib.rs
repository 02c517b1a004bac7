//! Tankobon - chapter acquisition and reading-session engine.
//!
//! This library provides functionality for:
//! - Resolving a chapter catalogue from a local library and a remote feed
//! - Driving reading sessions across paged and long strip modes
//! - Persisting reading progress and reader settings

pub mod autoscroll;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod console;
pub mod error;
pub mod logging;
pub mod model;
pub mod progress;
pub mod session;
pub mod settings;
pub mod sources;
pub mod store;

// Re-export commonly used types
pub use autoscroll::{AutoScroller, FrameScheduler, ScrollSurface, TokioFrameScheduler};
pub use catalog::{CatalogResolution, CatalogResolver, ResolveRequest, SecondaryStatus};
pub use clock::{Clock, SystemClock};
pub use config::Config;
pub use console::Console;
pub use error::{CatalogError, ConfigError, PreloadError, RemoteFetchFailed, SourceError, StoreError};
pub use model::{
    Chapter, ChapterNumber, Language, LanguageFilter, ReaderSettings, ReadingMode,
    ReadingProgress,
};
pub use progress::ProgressStore;
pub use session::{ContentInfo, NavOutcome, ReadingSession, SessionState};
pub use settings::SettingsStore;
pub use sources::{ChapterFeedClient, LibrarySource};
pub use store::{FileStore, KeyValueStore, MemoryStore};
