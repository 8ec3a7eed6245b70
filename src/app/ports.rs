use async_trait::async_trait;

use crate::domain::FetchMode;
use crate::error::Result;

/// Raw page as returned by a fetch, before any interpretation.
#[derive(Clone, Debug)]
pub struct FetchedPage {
    pub status: u16,
    pub final_url: String,
    pub body: String,
    pub content_type: String,
    pub mode: FetchMode,
}

impl FetchedPage {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Retrieves raw page content. `Rendered` runs the page's scripts before returning markup.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str, mode: FetchMode) -> Result<FetchedPage>;

    /// Whether `mode` can be served at all (rendering needs an external service).
    fn supports(&self, mode: FetchMode) -> bool {
        mode == FetchMode::Plain
    }
}
