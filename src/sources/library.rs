//! Local authoritative chapter source backed by a JSON library file.
//!
//! The library maps content ids to their chapter lists:
//!
//! ```json
//! { "m1": [ { "id": "c1", "number": 1, "language": "ge", "pages": ["..."] } ] }
//! ```

use crate::catalog::{LocalChapterSource, Pagination, sort_by_number};
use crate::error::SourceError;
use crate::model::{Chapter, Language};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

type Library = HashMap<String, Vec<Chapter>>;

#[derive(Debug)]
enum Backing {
    File(PathBuf),
    Memory(Library),
}

/// Local chapter library.
#[derive(Debug)]
pub struct LibrarySource {
    backing: Backing,
}

impl LibrarySource {
    /// Reads the library from `path` on every query.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            backing: Backing::File(path.into()),
        }
    }

    /// Serves a fixed in-memory library.
    pub fn from_chapters(library: HashMap<String, Vec<Chapter>>) -> Self {
        Self {
            backing: Backing::Memory(library),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.backing {
            Backing::File(path) => Some(path),
            Backing::Memory(_) => None,
        }
    }

    async fn chapters_of(&self, content_id: &str) -> Result<Vec<Chapter>, SourceError> {
        match &self.backing {
            Backing::File(path) => {
                let content = tokio::fs::read_to_string(path).await?;
                let mut library: Library = serde_json::from_str(&content)?;
                library
                    .remove(content_id)
                    .ok_or_else(|| SourceError::NotFound(content_id.to_string()))
            }
            Backing::Memory(library) => library
                .get(content_id)
                .cloned()
                .ok_or_else(|| SourceError::NotFound(content_id.to_string())),
        }
    }
}

#[async_trait]
impl LocalChapterSource for LibrarySource {
    async fn query(
        &self,
        content_id: &str,
        language: Language,
        page: Pagination,
    ) -> Result<Vec<Chapter>, SourceError> {
        let mut chapters: Vec<Chapter> = self
            .chapters_of(content_id)
            .await?
            .into_iter()
            .filter(|chapter| chapter.language == language)
            .map(|mut chapter| {
                chapter.external = false;
                chapter
            })
            .collect();
        sort_by_number(&mut chapters);
        Ok(page.apply(chapters))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const LIBRARY: &str = r#"{
        "m1": [
            {"id": "c3", "number": 3, "title": "Three", "language": "ge", "pages": ["3/1.jpg"]},
            {"id": "c1", "number": 1, "title": "One", "language": "ge", "pages": ["1/1.jpg", "1/2.jpg"]},
            {"id": "c1.5", "number": 1.5, "language": "ge"},
            {"id": "e1", "number": 1, "language": "en"}
        ]
    }"#;

    fn write_library(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("library.json");
        std::fs::write(&path, LIBRARY).unwrap();
        path
    }

    #[tokio::test]
    async fn test_query_filters_and_orders() {
        let temp_dir = TempDir::new().unwrap();
        let source = LibrarySource::open(write_library(&temp_dir));

        let chapters = source
            .query("m1", Language::Georgian, Pagination::ALL)
            .await
            .unwrap();
        let ids: Vec<&str> = chapters.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c1.5", "c3"]);
        assert_eq!(chapters[0].pages.len(), 2);
        assert!(chapters.iter().all(|c| !c.external));
    }

    #[tokio::test]
    async fn test_query_pagination() {
        let temp_dir = TempDir::new().unwrap();
        let source = LibrarySource::open(write_library(&temp_dir));

        let chapters = source
            .query(
                "m1",
                Language::Georgian,
                Pagination {
                    limit: Some(1),
                    offset: 1,
                },
            )
            .await
            .unwrap();
        assert_eq!(chapters.len(), 1);
        assert_eq!(chapters[0].id, "c1.5");
    }

    #[tokio::test]
    async fn test_unknown_content_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let source = LibrarySource::open(write_library(&temp_dir));

        let result = source.query("missing", Language::Georgian, Pagination::ALL).await;
        assert!(matches!(result, Err(SourceError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let source = LibrarySource::open(temp_dir.path().join("nope.json"));

        let result = source.query("m1", Language::Georgian, Pagination::ALL).await;
        assert!(matches!(result, Err(SourceError::Io(_))));
    }

    #[tokio::test]
    async fn test_memory_library() {
        let library: Library = serde_json::from_str(LIBRARY).unwrap();
        let source = LibrarySource::from_chapters(library);

        let chapters = source
            .query("m1", Language::English, Pagination::ALL)
            .await
            .unwrap();
        assert_eq!(chapters.len(), 1);
        assert!(source.path().is_none());
    }
}
