use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use async_trait::async_trait;
use lexborg_core::{config::Config, source::DocumentSource, Authority, RetrievedDocument};
use tracing::{debug, info, warn};

use super::lexml_page::PageParser;

const USER_AGENT: &str = "Mozilla/5.0";

/// Fetches one HTML page. Split out so the pager can run against canned pages.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String>;
}

pub struct HttpPageFetcher {
    http: reqwest::Client,
}

impl HttpPageFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .context("building LexML HTTP client")?;
        Ok(Self { http })
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        let resp = self.http.get(url).send().await?.error_for_status()?;
        Ok(resp.text().await?)
    }
}

/// Client for the LexML Brasil search interface.
/// Walks result pages until the requested number of titled documents is found.
pub struct LexmlClient {
    base_url: String,
    page_size: usize,
    max_pages: usize,
    fetcher: Arc<dyn PageFetcher>,
    parser: PageParser,
}

impl LexmlClient {
    pub fn new(base_url: &str, fetcher: Arc<dyn PageFetcher>) -> Result<Self> {
        let base_url = base_url.trim_end_matches('/').to_string();
        Ok(Self {
            parser: PageParser::new(&base_url)?,
            base_url,
            page_size: 10,
            max_pages: 20,
            fetcher,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let fetcher = HttpPageFetcher::new(Duration::from_secs(config.lexml_timeout_s))?;
        Ok(Self::new(&config.lexml_base_url, Arc::new(fetcher))?
            .with_page_size(config.lexml_page_size)
            .with_max_pages(config.lexml_max_pages))
    }

    pub fn with_page_size(mut self, n: usize) -> Self {
        self.page_size = n.max(1);
        self
    }

    pub fn with_max_pages(mut self, n: usize) -> Self {
        self.max_pages = n.max(1);
        self
    }

    /// URL of 1-based result page `page`. Parameters are `;`-separated.
    pub fn search_url(&self, term: &str, page: usize, authority: Option<Authority>) -> String {
        let start_doc = (page.max(1) - 1) * self.page_size + 1;
        let mut url = format!("{}/busca/search?keyword={}", self.base_url, urlencoding::encode(term));
        if let Some(a) = authority {
            url.push_str(";f1-autoridade=");
            url.push_str(a.as_str());
        }
        url.push_str(&format!(";startDoc={start_doc}"));
        url
    }

    /// Up to `desired` titled documents for `term`, in page order.
    /// Fetch failures end the walk; whatever was collected is returned.
    pub async fn collect(&self, term: &str, desired: usize, authority: Option<Authority>) -> Vec<RetrievedDocument> {
        let mut out = Vec::new();
        if desired == 0 {
            return out;
        }

        let mut pages = 0;
        for page in 1..=self.max_pages {
            let url = self.search_url(term, page, authority);
            let html = match self.fetcher.fetch(&url).await {
                Ok(html) => html,
                Err(e) => {
                    warn!(term, page, "lexml fetch failed: {e:#}");
                    break;
                },
            };
            pages = page;

            let parsed = self.parser.parse(&html);
            if !parsed.results_found {
                debug!(term, page, "no results container on page");
                break;
            }
            if parsed.blocks == 0 {
                break;
            }
            debug!(
                term,
                page,
                blocks = parsed.blocks,
                titled = parsed.documents.len(),
                "lexml page parsed"
            );

            let room = desired - out.len();
            out.extend(parsed.documents.into_iter().take(room));
            if out.len() >= desired || !parsed.has_next {
                break;
            }
            if page == self.max_pages {
                warn!(term, max_pages = self.max_pages, "page limit reached before quota");
            }
        }

        info!(term, found = out.len(), desired, pages, "lexml search finished");
        out
    }
}

#[async_trait]
impl DocumentSource for LexmlClient {
    async fn search(&self, term: &str, desired: usize, authority: Option<Authority>) -> Vec<RetrievedDocument> {
        self.collect(term, desired, authority).await
    }
}
