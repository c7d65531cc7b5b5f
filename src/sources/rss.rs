//! RSS 2.0 feed scraper.
//!
//! The feed supplies title, link, publication date and a short description; the
//! article page is then fetched for the full body and lead image. When the page
//! yields no body, the feed description (stripped of markup) is used instead.

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use reqwest::Client;
use scraper::Html;
use serde::Deserialize;
use tracing::{info, instrument, warn};
use url::Url;

use super::page::{ExtractedPage, PageExtractor};
use super::{SourceAdapter, get_text};
use crate::error::SourceError;
use crate::models::ArticleRecord;
use crate::utils::{collapse_whitespace, normalize_content, normalize_title, parse_published_at};

/// Static description of an RSS-backed source.
pub struct RssProfile {
    pub name: &'static str,
    pub tag: &'static str,
    pub base_url: &'static str,
    pub feed_url: &'static str,
    pub content_selectors: &'static [&'static str],
    pub image_selectors: &'static [&'static str],
}

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    items: Vec<FeedItem>,
}

/// One `<item>` of the feed.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FeedItem {
    pub title: Option<String>,
    pub link: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "pubDate")]
    pub pub_date: Option<String>,
}

/// Parse an RSS document into its items, in feed order.
pub fn parse_feed(xml: &str) -> Result<Vec<FeedItem>, SourceError> {
    let rss: Rss = quick_xml::de::from_str(xml)?;
    Ok(rss.channel.items)
}

fn strip_markup(fragment: &str) -> String {
    let html = Html::parse_fragment(fragment);
    collapse_whitespace(&html.root_element().text().collect::<Vec<_>>().join(" "))
}

pub struct RssSource {
    name: &'static str,
    tag: &'static str,
    base_url: Url,
    feed_url: &'static str,
    page: PageExtractor,
    client: Client,
}

impl RssSource {
    pub fn new(profile: &RssProfile, client: Client) -> Result<Self, SourceError> {
        Ok(Self {
            name: profile.name,
            tag: profile.tag,
            base_url: Url::parse(profile.base_url)?,
            feed_url: profile.feed_url,
            page: PageExtractor::new(profile.content_selectors, profile.image_selectors)?,
            client,
        })
    }

    /// Items usable as articles: a non-blank title and an absolute http(s) link.
    fn usable_items(&self, items: Vec<FeedItem>, max_items: usize) -> Vec<(String, FeedItem)> {
        items
            .into_iter()
            .filter(|item| item.title.as_deref().is_some_and(|t| !t.trim().is_empty()))
            .filter_map(|item| {
                let link = item.link.as_deref()?;
                let url = crate::utils::resolve_url(&self.base_url, link)?;
                Some((url, item))
            })
            .take(max_items)
            .collect()
    }

    fn to_record(&self, url: String, item: FeedItem, page: ExtractedPage) -> ArticleRecord {
        let body = if page.content.is_empty() {
            item.description.as_deref().map(strip_markup).unwrap_or_default()
        } else {
            page.content
        };

        ArticleRecord {
            title: normalize_title(item.title.as_deref().unwrap_or_default()),
            content: normalize_content(&body),
            url,
            source: self.tag.to_string(),
            published_at: parse_published_at(
                item.pub_date.as_deref().or(page.published_at.as_deref()),
                Utc::now(),
            ),
            image_url: page.image_url,
        }
    }

    #[instrument(level = "debug", skip_all, fields(source = self.name, %url))]
    async fn fetch_record(&self, url: String, item: FeedItem) -> ArticleRecord {
        let page = match get_text(&self.client, &url).await {
            Ok(body) => self.page.extract(&body, &self.base_url),
            Err(e) => {
                warn!(source = self.name, %url, error = %e, "Article page fetch failed; using feed description");
                ExtractedPage::default()
            }
        };
        self.to_record(url, item, page)
    }
}

#[async_trait]
impl SourceAdapter for RssSource {
    fn name(&self) -> &str {
        self.name
    }

    #[instrument(level = "info", skip(self), fields(source = self.name))]
    async fn fetch(&self, max_items: usize) -> Result<Vec<ArticleRecord>, SourceError> {
        let xml = get_text(&self.client, self.feed_url).await?;
        let items = self.usable_items(parse_feed(&xml)?, max_items);
        info!(source = self.name, count = items.len(), feed_url = self.feed_url, "Indexed feed items");

        let records: Vec<ArticleRecord> = stream::iter(items)
            .then(|(url, item)| self.fetch_record(url, item))
            .collect()
            .await;

        info!(source = self.name, count = records.len(), "Fetched article contents");
        Ok(records)
    }
}
