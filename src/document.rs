use std::panic::{self, AssertUnwindSafe};

const TRUNCATION_MARKER: &str = "[truncated]";

/// Turns an uploaded PDF into prompt context. Never fails: problems come
/// back as inline text so the model (and the user) can see them.
#[derive(Debug, Clone)]
pub struct DocumentExtractor {
    max_chars: usize,
}

impl DocumentExtractor {
    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }

    pub async fn extract_text(&self, bytes: Vec<u8>) -> String {
        log::info!("Extracting text from uploaded document ({} bytes)", bytes.len());
        let extracted = tokio::task::spawn_blocking(move || {
            panic::catch_unwind(AssertUnwindSafe(|| pdf_extract::extract_text_from_mem(&bytes)))
        })
        .await;

        let text = match extracted {
            Ok(Ok(Ok(text))) => text,
            Ok(Ok(Err(e))) => return failure(e),
            Ok(Err(_)) => return failure("the PDF parser crashed on this file"),
            Err(e) => return failure(e),
        };
        self.cap(text.trim())
    }

    /// Cuts `text` to at most `max_chars` characters, marking the cut.
    pub fn cap(&self, text: &str) -> String {
        match text.char_indices().nth(self.max_chars) {
            Some((cut, _)) => {
                log::warn!(
                    "Document context truncated to {} characters (was {} bytes)",
                    self.max_chars,
                    text.len()
                );
                format!("{}\n{}", text[..cut].trim_end(), TRUNCATION_MARKER)
            }
            None => text.to_string(),
        }
    }
}

fn failure(detail: impl std::fmt::Display) -> String {
    log::warn!("Document extraction failed: {}", detail);
    format!("Error reading PDF: {}", detail)
}
