//! # Resume Loader
//!
//! Downloads the candidate's resume PDF into the session's storage and
//! extracts the plain text of its first page for the system prompt.
//!
//! Extraction runs on a blocking thread; PDF parsing is CPU-bound and a
//! large document would otherwise stall the runtime.

use crate::error::{SessionError, SessionResult};
use crate::session::storage::SessionStorage;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

/// Somewhere a resume can be fetched from and turned into text.
#[async_trait]
pub trait ResumeSource: Send + Sync {
    /// Fetch the document at `url` into `storage` and return its first page as text.
    async fn fetch(&self, url: &str, storage: &SessionStorage) -> SessionResult<String>;
}

/// HTTP resume fetcher backed by `reqwest` and `lopdf`.
pub struct ResumeLoader {
    client: reqwest::Client,
}

impl ResumeLoader {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ResumeSource for ResumeLoader {
    async fn fetch(&self, url: &str, storage: &SessionStorage) -> SessionResult<String> {
        info!(url = %url, "Fetching resume");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SessionError::Fetch(format!("request to {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SessionError::Fetch(format!("{} returned {}", url, status)));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| SessionError::Fetch(format!("failed to read body: {}", e)))?;

        let path = storage.resume_path().await?;
        tokio::fs::write(&path, &bytes).await?;
        debug!(path = %path.display(), bytes = bytes.len(), "Resume stored");

        let text = tokio::task::spawn_blocking(move || extract_first_page_text(&bytes))
            .await
            .map_err(|e| SessionError::Extract(format!("extraction task failed: {}", e)))??;

        info!(chars = text.len(), "Resume text extracted");
        Ok(text)
    }
}

/// Text of the first page of a PDF document.
pub fn extract_first_page_text(data: &[u8]) -> SessionResult<String> {
    let document = lopdf::Document::load_mem(data)
        .map_err(|e| SessionError::Extract(format!("not a readable PDF: {}", e)))?;

    let first_page = document
        .get_pages()
        .keys()
        .next()
        .copied()
        .ok_or_else(|| SessionError::Extract("document has no pages".to_string()))?;

    let raw = document
        .extract_text(&[first_page])
        .map_err(|e| SessionError::Extract(format!("failed to extract text: {}", e)))?;

    Ok(join_fragments(raw.lines()))
}

/// Join text fragments in reading order, each followed by one space.
pub fn join_fragments<'a>(fragments: impl IntoIterator<Item = &'a str>) -> String {
    let mut text = String::new();
    for fragment in fragments {
        let fragment = fragment.trim();
        if fragment.is_empty() {
            continue;
        }
        text.push_str(fragment);
        text.push(' ');
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Document, Object, Stream};

    fn pdf_with_pages(pages_text: &[&str]) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut kids: Vec<Object> = Vec::new();
        for text in pages_text {
            let content = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 24.into()]),
                    Operation::new("Td", vec![100.into(), 600.into()]),
                    Operation::new("Tj", vec![Object::string_literal(*text)]),
                    Operation::new("ET", vec![]),
                ],
            };
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(page_id.into());
        }

        let pages = dictionary! {
            "Type" => "Pages",
            "Count" => kids.len() as i64,
            "Kids" => kids,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        };
        doc.objects.insert(pages_id, Object::Dictionary(pages));
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut buffer = Vec::new();
        doc.save_to(&mut buffer).unwrap();
        buffer
    }

    #[test]
    fn test_extracts_only_first_page() {
        let pdf = pdf_with_pages(&["Experienced engineer", "Hobbies and references"]);
        let text = extract_first_page_text(&pdf).unwrap();

        assert!(text.contains("Experienced engineer"));
        assert!(!text.contains("Hobbies"));
        assert!(text.ends_with(' '));
    }

    #[test]
    fn test_garbage_is_an_extract_error() {
        let err = extract_first_page_text(b"<html>not a pdf</html>").unwrap_err();
        assert_eq!(err.kind(), "extract_error");
    }

    #[test]
    fn test_join_fragments() {
        assert_eq!(join_fragments(["Jane Doe", "", "  Rust  ", "Go"]), "Jane Doe Rust Go ");
        assert_eq!(join_fragments(Vec::<&str>::new()), "");
    }

    #[tokio::test]
    async fn test_unreachable_url_is_a_fetch_error() {
        let root = tempfile::tempdir().unwrap();
        let storage = SessionStorage::new(root.path(), "s1");
        let loader = ResumeLoader::new(Duration::from_secs(2)).unwrap();

        let err = loader
            .fetch("http://127.0.0.1:9/resume.pdf", &storage)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "fetch_error");
        assert!(!storage.dir().join("resume.pdf").exists());
    }
}
