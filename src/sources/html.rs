//! Listing-page scraper.
//!
//! Reads a section listing page, collects article anchors matching the profile's
//! link selector, and fetches each article page sequentially.
//!
//! # URL Pattern
//!
//! Anchors are usually relative (`/article/2026020512345`) and are resolved against
//! the source's base URL before use, so stored URLs are always absolute.

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use itertools::Itertools;
use reqwest::Client;
use scraper::{Html, Selector};
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::page::{ExtractedPage, PageExtractor};
use super::{SourceAdapter, get_text};
use crate::error::SourceError;
use crate::models::ArticleRecord;
use crate::utils::{collapse_whitespace, normalize_content, normalize_title, parse_published_at};

/// Anchor texts shorter than this are navigation, not headlines.
const MIN_TITLE_CHARS: usize = 10;

/// Static description of an HTML-listing source.
pub struct HtmlListProfile {
    pub name: &'static str,
    pub tag: &'static str,
    pub base_url: &'static str,
    pub list_url: &'static str,
    pub link_selector: &'static str,
    pub content_selectors: &'static [&'static str],
    pub image_selectors: &'static [&'static str],
}

/// A headline and its resolved article URL.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingLink {
    pub url: String,
    pub title: String,
}

pub struct HtmlListSource {
    name: &'static str,
    tag: &'static str,
    base_url: Url,
    list_url: &'static str,
    link_selector: Selector,
    page: PageExtractor,
    client: Client,
}

impl HtmlListSource {
    pub fn new(profile: &HtmlListProfile, client: Client) -> Result<Self, SourceError> {
        let link_selector = Selector::parse(profile.link_selector)
            .map_err(|_| SourceError::Selector(profile.link_selector.to_string()))?;
        Ok(Self {
            name: profile.name,
            tag: profile.tag,
            base_url: Url::parse(profile.base_url)?,
            list_url: profile.list_url,
            link_selector,
            page: PageExtractor::new(profile.content_selectors, profile.image_selectors)?,
            client,
        })
    }

    /// Collect up to `max_items` distinct article links from a listing page.
    ///
    /// Short anchor texts (image links, "more" buttons) are dropped before
    /// deduplication so the headline anchor for a URL is the one kept.
    pub fn parse_listing(&self, html: &str, max_items: usize) -> Vec<ListingLink> {
        let document = Html::parse_document(html);
        document
            .select(&self.link_selector)
            .filter_map(|el| {
                let href = el.value().attr("href")?;
                let url = crate::utils::resolve_url(&self.base_url, href)?;
                let title = collapse_whitespace(&el.text().collect::<Vec<_>>().join(" "));
                (title.chars().count() >= MIN_TITLE_CHARS).then_some(ListingLink { url, title })
            })
            .unique_by(|link| link.url.clone())
            .take(max_items)
            .collect()
    }

    fn to_record(&self, link: ListingLink, page: ExtractedPage) -> ArticleRecord {
        ArticleRecord {
            title: normalize_title(&link.title),
            content: normalize_content(&page.content),
            url: link.url,
            source: self.tag.to_string(),
            published_at: parse_published_at(page.published_at.as_deref(), Utc::now()),
            image_url: page.image_url,
        }
    }

    /// Fetch one article page; a failed page degrades to an empty extraction.
    #[instrument(level = "debug", skip_all, fields(source = self.name, url = %link.url))]
    async fn fetch_record(&self, link: ListingLink) -> ArticleRecord {
        let page = match get_text(&self.client, &link.url).await {
            Ok(body) => self.page.extract(&body, &self.base_url),
            Err(e) => {
                warn!(source = self.name, url = %link.url, error = %e, "Article page fetch failed; storing placeholder");
                ExtractedPage::default()
            }
        };
        self.to_record(link, page)
    }
}

#[async_trait]
impl SourceAdapter for HtmlListSource {
    fn name(&self) -> &str {
        self.name
    }

    #[instrument(level = "info", skip(self), fields(source = self.name))]
    async fn fetch(&self, max_items: usize) -> Result<Vec<ArticleRecord>, SourceError> {
        let listing = get_text(&self.client, self.list_url).await?;
        let links = self.parse_listing(&listing, max_items);
        info!(source = self.name, count = links.len(), list_url = self.list_url, "Indexed article links");
        debug!(urls = ?links.iter().map(|l| &l.url).collect::<Vec<_>>(), "Listing URLs");

        let records: Vec<ArticleRecord> = stream::iter(links)
            .then(|link| self.fetch_record(link))
            .collect()
            .await;

        info!(source = self.name, count = records.len(), "Fetched article contents");
        Ok(records)
    }
}
