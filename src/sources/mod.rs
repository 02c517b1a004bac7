//! Concrete chapter sources plugged into the catalogue resolver.

mod feed;
mod library;

pub use feed::ChapterFeedClient;
pub use library::LibrarySource;
