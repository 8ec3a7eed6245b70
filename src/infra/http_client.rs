use crate::app::ports::{FetchedPage, Fetcher};
use crate::config::{DiscoveryConfig, RendererConfig};
use crate::domain::FetchMode;
use crate::error::{DiscoveryError, Result};
use crate::observability::metrics::DiscoveryMetrics;
use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use std::time::Instant;
use tracing::debug;

/// Browserless-style `/content` endpoint returning fully-rendered HTML.
struct RenderService {
    base_url: String,
    token: Option<String>,
}

pub struct ReqwestFetcher {
    client: reqwest::Client,
    user_agent: String,
    renderer: Option<RenderService>,
}

impl ReqwestFetcher {
    pub fn new(discovery: &DiscoveryConfig, renderer: &RendererConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(discovery.fetch_timeout())
            .gzip(true)
            .build()
            .map_err(|e| DiscoveryError::Config(format!("Failed to build HTTP client: {}", e)))?;
        let renderer = renderer.base_url.as_ref().map(|base| RenderService {
            base_url: base.trim_end_matches('/').to_string(),
            token: renderer.token.clone(),
        });
        Ok(Self {
            client,
            user_agent: discovery.user_agent.clone(),
            renderer,
        })
    }

    fn map_err(url: &str, e: reqwest::Error) -> DiscoveryError {
        if e.is_timeout() {
            DiscoveryError::Timeout { url: url.to_string() }
        } else {
            DiscoveryError::Fetch {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    }

    async fn fetch_plain(&self, url: &str) -> Result<FetchedPage> {
        let resp = self
            .client
            .get(url)
            .header(USER_AGENT, &self.user_agent)
            .send()
            .await
            .map_err(|e| Self::map_err(url, e))?;
        let status = resp.status().as_u16();
        let final_url = resp.url().to_string();
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("text/html")
            .to_string();
        let body = resp.text().await.map_err(|e| Self::map_err(url, e))?;
        Ok(FetchedPage {
            status,
            final_url,
            body,
            content_type,
            mode: FetchMode::Plain,
        })
    }

    async fn fetch_rendered(&self, url: &str) -> Result<FetchedPage> {
        let service = self.renderer.as_ref().ok_or_else(|| {
            DiscoveryError::Config("rendered fetch requested but no renderer is configured".to_string())
        })?;
        let mut endpoint = format!("{}/content", service.base_url);
        if let Some(ref token) = service.token {
            endpoint.push_str(&format!("?token={token}"));
        }

        let resp = self
            .client
            .post(&endpoint)
            .json(&serde_json::json!({ "url": url }))
            .send()
            .await
            .map_err(|e| Self::map_err(url, e))?;
        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(|e| Self::map_err(url, e))?;
        Ok(FetchedPage {
            status,
            final_url: url.to_string(),
            body,
            content_type: "text/html".to_string(),
            mode: FetchMode::Rendered,
        })
    }
}

#[async_trait]
impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, url: &str, mode: FetchMode) -> Result<FetchedPage> {
        let started = Instant::now();
        let result = match mode {
            FetchMode::Plain => self.fetch_plain(url).await,
            FetchMode::Rendered => self.fetch_rendered(url).await,
        };
        match &result {
            Ok(page) => {
                debug!(url, status = page.status, bytes = page.body.len(), %mode, "fetched");
                DiscoveryMetrics::record_fetch(mode, page.is_success(), started.elapsed().as_secs_f64());
            }
            Err(_) => DiscoveryMetrics::record_fetch(mode, false, started.elapsed().as_secs_f64()),
        }
        result
    }

    fn supports(&self, mode: FetchMode) -> bool {
        match mode {
            FetchMode::Plain => true,
            FetchMode::Rendered => self.renderer.is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rendered_mode_requires_renderer() {
        let discovery = DiscoveryConfig::default();
        let plain_only = ReqwestFetcher::new(&discovery, &RendererConfig::default()).unwrap();
        assert!(plain_only.supports(FetchMode::Plain));
        assert!(!plain_only.supports(FetchMode::Rendered));

        let renderer = RendererConfig {
            base_url: Some("http://localhost:3000/".to_string()),
            ..RendererConfig::default()
        };
        let with_renderer = ReqwestFetcher::new(&discovery, &renderer).unwrap();
        assert!(with_renderer.supports(FetchMode::Rendered));
    }
}
