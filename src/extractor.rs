/**
 * Extractor
 * External capability boundary for turning a raw PDF into full text
 * (spec.md's pipeline stage Located -> Extracted). The lopdf implementation
 * mirrors the page-by-page concatenation pattern of the PyPDF2 extractor
 * this system's pipeline was distilled from.
 */

use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{DircError, DircResult};

/// Per-page extracted text, preserved so callers can attribute hits to a
/// page range (`RankedHit.page_numbers`, spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PageContent {
    pub page_number: usize,
    pub text: String,
    pub char_count: usize,
}

/// Result of extracting one document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractedContent {
    pub full_text: String,
    pub pages: Vec<PageContent>,
    pub total_chars: usize,
    pub total_pages: usize,
    pub extraction_duration_ms: f64,
}

/// External capability interface: turn file bytes at `path` into
/// `ExtractedContent`. Implementations are swappable per spec.md's
/// Extractor collaborator boundary.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, path: &Path) -> DircResult<ExtractedContent>;
}

/// Reference implementation backed by `lopdf`. PDF parsing is synchronous
/// and CPU-bound, so it runs on the blocking pool.
pub struct LopdfExtractor;

impl LopdfExtractor {
    pub fn new() -> Self {
        Self
    }

    fn extract_sync(path: &PathBuf) -> DircResult<ExtractedContent> {
        let start = Instant::now();
        let document = lopdf::Document::load(path)
            .map_err(|e| DircError::ExtractionError(format!("failed to load {}: {}", path.display(), e)))?;

        let mut pages = Vec::new();
        let mut full_text_parts = Vec::new();

        let page_ids: Vec<u32> = document.get_pages().into_keys().collect();
        for (idx, page_id) in page_ids.iter().enumerate() {
            let text = document
                .extract_text(&[*page_id])
                .unwrap_or_default();
            let char_count = text.chars().count();
            full_text_parts.push(text.clone());
            pages.push(PageContent {
                page_number: idx + 1,
                text,
                char_count,
            });
        }

        let full_text = full_text_parts.join("\n\n");
        let total_chars = full_text.chars().count();
        let total_pages = pages.len();
        let extraction_duration_ms = start.elapsed().as_secs_f64() * 1000.0;

        Ok(ExtractedContent {
            full_text,
            pages,
            total_chars,
            total_pages,
            extraction_duration_ms,
        })
    }
}

impl Default for LopdfExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Extractor for LopdfExtractor {
    async fn extract(&self, path: &Path) -> DircResult<ExtractedContent> {
        if !path.exists() {
            return Err(DircError::InputError(format!(
                "file not found: {}",
                path.display()
            )));
        }
        let owned = path.to_path_buf();
        tokio::task::spawn_blocking(move || Self::extract_sync(&owned))
            .await
            .map_err(|e| DircError::ExtractionError(format!("extraction task panicked: {}", e)))?
    }
}

/// Test double returning fixed text without touching the filesystem.
pub struct MockExtractor {
    pub text: String,
    pub fail: bool,
}

impl MockExtractor {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            text: String::new(),
            fail: true,
        }
    }
}

#[async_trait]
impl Extractor for MockExtractor {
    async fn extract(&self, _path: &Path) -> DircResult<ExtractedContent> {
        if self.fail {
            return Err(DircError::ExtractionError("mock extractor configured to fail".to_string()));
        }
        let total_chars = self.text.chars().count();
        Ok(ExtractedContent {
            full_text: self.text.clone(),
            pages: vec![PageContent {
                page_number: 1,
                text: self.text.clone(),
                char_count: total_chars,
            }],
            total_chars,
            total_pages: 1,
            extraction_duration_ms: 0.0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[tokio::test]
    async fn mock_extractor_returns_configured_text() {
        let extractor = MockExtractor::new("ARTICULO 1 texto de prueba");
        let result = extractor.extract(Path::new("irrelevant.pdf")).await.unwrap();
        assert_eq!(result.full_text, "ARTICULO 1 texto de prueba");
        assert_eq!(result.total_pages, 1);
    }

    #[tokio::test]
    async fn mock_extractor_can_simulate_failure() {
        let extractor = MockExtractor::failing();
        assert!(extractor.extract(Path::new("irrelevant.pdf")).await.is_err());
    }

    #[tokio::test]
    async fn lopdf_extractor_rejects_missing_file() {
        let extractor = LopdfExtractor::new();
        let result = extractor.extract(Path::new("/nonexistent/does-not-exist.pdf")).await;
        assert!(result.is_err());
    }
}
