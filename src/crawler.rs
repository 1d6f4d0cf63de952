//! Web crawling for documentation sites.
//!
//! One entry point handles three kinds of URL:
//!
//! - **Sitemaps** (`sitemap.xml` or a path containing `sitemap`):
//!   every `<loc>` entry is fetched in parallel.
//! - **Text files** (`.txt`, e.g. `llms.txt`): the raw body is the
//!   document, no HTML extraction.
//! - **Webpages**: fetched and followed breadth-first through
//!   same-host links up to a depth limit.
//!
//! Fetch concurrency is bounded by a semaphore; pages that fail to
//! fetch are skipped and logged rather than failing the whole crawl.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use quick_xml::events::Event;
use quick_xml::Reader;
use scraper::{Html, Selector};
use tokio::sync::Semaphore;
use tracing::{debug, warn};
use url::Url;

use crate::config::IngestConfig;
use crate::error::{Error, Result};

/// Elements whose text content counts as documentation prose.
const CONTENT_SELECTOR: &str = "p, h1, h2, h3, h4, h5, h6, li, pre, td, th, blockquote";

/// What a crawl target URL is, decided from its path alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlKind {
    Sitemap,
    TextFile,
    Webpage,
}

pub fn classify_url(url: &str) -> UrlKind {
    let path = Url::parse(url)
        .map(|u| u.path().to_lowercase())
        .unwrap_or_else(|_| url.to_lowercase());
    if path.ends_with("sitemap.xml") || path.contains("sitemap") {
        UrlKind::Sitemap
    } else if path.ends_with(".txt") {
        UrlKind::TextFile
    } else {
        UrlKind::Webpage
    }
}

/// A fetched document: extracted text plus the outbound links found.
#[derive(Debug, Clone)]
pub struct Page {
    pub url: String,
    pub text: String,
    pub links: Vec<String>,
}

pub struct WebCrawler {
    http: reqwest::Client,
    max_concurrent: usize,
    max_depth: usize,
}

impl WebCrawler {
    pub fn new(config: &IngestConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("docrag/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            max_concurrent: config.max_concurrent_crawl.max(1),
            max_depth: config.max_depth.max(1),
        })
    }

    /// Crawl `url` according to its kind. Returns every page that
    /// yielded non-empty text, in the order crawled.
    pub async fn smart_crawl(&self, url: &str) -> Result<Vec<Page>> {
        match classify_url(url) {
            UrlKind::Sitemap => {
                let body = self.fetch_body(url).await?;
                let locations = parse_sitemap(&body);
                if locations.is_empty() {
                    return Err(Error::Crawl(format!("sitemap has no <loc> entries: {url}")));
                }
                debug!(count = locations.len(), "crawling sitemap entries");
                Ok(self.fetch_many(&locations).await)
            }
            UrlKind::TextFile => {
                let body = self.fetch_body(url).await?;
                Ok(vec![Page {
                    url: url.to_string(),
                    text: body,
                    links: Vec::new(),
                }])
            }
            UrlKind::Webpage => self.crawl_recursive(url).await,
        }
    }

    /// Fetch a single page and extract its text. Public because the
    /// single-page tool uses it directly.
    pub async fn fetch_page(&self, url: &str) -> Result<Page> {
        let body = self.fetch_body(url).await?;
        let (text, links) = extract_content(&body, url);
        Ok(Page {
            url: url.to_string(),
            text,
            links,
        })
    }

    async fn fetch_body(&self, url: &str) -> Result<String> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Crawl(format!("{url}: {e}")))?;
        if !resp.status().is_success() {
            return Err(Error::Crawl(format!("{url}: HTTP {}", resp.status())));
        }
        resp.text()
            .await
            .map_err(|e| Error::Crawl(format!("{url}: {e}")))
    }

    /// Fetch a batch of URLs concurrently, dropping failures.
    async fn fetch_many(&self, urls: &[String]) -> Vec<Page> {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let futures = urls.iter().map(|url| {
            let semaphore = Arc::clone(&semaphore);
            async move {
                let _permit = semaphore.acquire().await.ok()?;
                match self.fetch_page(url).await {
                    Ok(page) if !page.text.trim().is_empty() => Some(page),
                    Ok(_) => None,
                    Err(e) => {
                        warn!(url = %url, error = %e, "skipping page");
                        None
                    }
                }
            }
        });
        join_all(futures).await.into_iter().flatten().collect()
    }

    /// Breadth-first crawl of same-host links starting from `start`.
    async fn crawl_recursive(&self, start: &str) -> Result<Vec<Page>> {
        let origin = Url::parse(start).map_err(|e| Error::Validation(format!("{start}: {e}")))?;
        let host = origin
            .host_str()
            .ok_or_else(|| Error::Validation(format!("URL has no host: {start}")))?
            .to_string();

        let mut visited: HashSet<String> = HashSet::new();
        let mut frontier = vec![start.to_string()];
        let mut pages = Vec::new();

        for depth in 0..self.max_depth {
            let batch: Vec<String> = frontier
                .drain(..)
                .filter(|u| visited.insert(u.clone()))
                .collect();
            if batch.is_empty() {
                break;
            }
            debug!(depth, count = batch.len(), "crawling level");

            let fetched = self.fetch_many(&batch).await;
            for page in &fetched {
                for link in &page.links {
                    let same_host = Url::parse(link)
                        .ok()
                        .and_then(|u| u.host_str().map(|h| h == host))
                        .unwrap_or(false);
                    if same_host && !visited.contains(link) {
                        frontier.push(link.clone());
                    }
                }
            }
            pages.extend(fetched);
        }

        if pages.is_empty() {
            return Err(Error::Crawl(format!("no content found at {start}")));
        }
        Ok(pages)
    }
}

/// Extract prose text and resolved outbound links from an HTML body.
fn extract_content(html: &str, base_url: &str) -> (String, Vec<String>) {
    let document = Html::parse_document(html);

    let content = Selector::parse(CONTENT_SELECTOR).expect("static selector");
    let mut parts: Vec<String> = document
        .select(&content)
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    // Pages without any matching element still get their raw text.
    if parts.is_empty() {
        let body = document.root_element().text().collect::<String>();
        let trimmed = body.trim();
        if !trimmed.is_empty() {
            parts.push(trimmed.to_string());
        }
    }
    let text = parts.join("\n\n");

    let anchors = Selector::parse("a[href]").expect("static selector");
    let base = Url::parse(base_url).ok();
    let mut seen = HashSet::new();
    let links = document
        .select(&anchors)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| match &base {
            Some(base) => base.join(href).ok(),
            None => Url::parse(href).ok(),
        })
        .map(|mut u| {
            u.set_fragment(None);
            u.to_string()
        })
        .filter(|u| u.starts_with("http") && seen.insert(u.clone()))
        .collect();

    (text, links)
}

/// Pull every `<loc>` value out of a sitemap document.
pub fn parse_sitemap(xml: &str) -> Vec<String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut locations = Vec::new();
    let mut in_loc = false;
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"loc" => in_loc = true,
            Ok(Event::End(e)) if e.local_name().as_ref() == b"loc" => in_loc = false,
            Ok(Event::Text(t)) if in_loc => {
                if let Ok(text) = t.unescape() {
                    let text = text.trim().to_string();
                    if !text.is_empty() {
                        locations.push(text);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                warn!(error = %e, "sitemap parse error");
                break;
            }
            _ => {}
        }
    }
    locations
}
