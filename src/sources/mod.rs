//! News source adapters.
//!
//! Every source is one [`SourceAdapter`]: `fetch(max_items)` returns up to
//! `max_items` normalized [`ArticleRecord`]s. Each adapter follows the same
//! two-phase pattern:
//!
//! 1. **Indexing**: read the source's listing page or RSS feed for article links
//! 2. **Fetching**: download each article page in turn and extract body and image
//!
//! # Registered Sources
//!
//! | Name | Tag | Method |
//! |------|-----|--------|
//! | `hankyung` | `HANKYUNG` | HTML listing (economy section) |
//! | `mk` | `MK` | HTML listing (stock news) |
//! | `edaily` | `EDAILY` | HTML listing |
//! | `herald` | `HERALD` | HTML listing |
//! | `chosunbiz` | `CHOSUNBIZ` | RSS feed (economy category) |
//!
//! # Failure Semantics
//!
//! An unreachable listing page or feed is an error (`SourceError`) and is isolated
//! by the coordinator. A single article page that fails to load degrades to the
//! placeholder content; "nothing found" is never an error.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use crate::error::SourceError;
use crate::models::ArticleRecord;

pub mod html;
pub mod page;
pub mod rss;

pub use html::{HtmlListProfile, HtmlListSource};
pub use rss::{RssProfile, RssSource};

/// Fetch capability of one news source.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Key under which this source's tally appears in `mediaResults`.
    fn name(&self) -> &str;

    /// Fetch up to `max_items` normalized records. Fewer is normal.
    async fn fetch(&self, max_items: usize) -> Result<Vec<ArticleRecord>, SourceError>;
}

/// Default User-Agent sent to news sites.
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36";

static HANKYUNG: HtmlListProfile = HtmlListProfile {
    name: "hankyung",
    tag: "HANKYUNG",
    base_url: "https://www.hankyung.com",
    list_url: "https://www.hankyung.com/economy",
    link_selector: r#"a[href*="/article/"]"#,
    content_selectors: &[".article-body", "#articletxt", r#"[itemprop="articleBody"]"#],
    image_selectors: &["article img"],
};

static MK: HtmlListProfile = HtmlListProfile {
    name: "mk",
    tag: "MK",
    base_url: "https://www.mk.co.kr",
    list_url: "https://www.mk.co.kr/news/stock",
    link_selector: ".news_list li a[href], .article_list li a[href], article a[href]",
    content_selectors: &[".news_cnt_detail_wrap", ".art_txt", "#article-view-content-div"],
    image_selectors: &[".thumb_area img", ".view_img img"],
};

static EDAILY: HtmlListProfile = HtmlListProfile {
    name: "edaily",
    tag: "EDAILY",
    base_url: "https://www.edaily.co.kr",
    list_url: "https://www.edaily.co.kr/news/newsList.asp?newsType=politics&DirCode=0010",
    link_selector: ".newslist li a[href], .articlelist li a[href]",
    content_selectors: &[".news_body", ".newsContents", "#newsBody"],
    image_selectors: &[".news_photo img"],
};

static HERALD: HtmlListProfile = HtmlListProfile {
    name: "herald",
    tag: "HERALD",
    base_url: "http://biz.heraldcorp.com",
    list_url: "http://biz.heraldcorp.com/list.php?ct=010200000",
    link_selector: ".article_list li a[href], .news_list li a[href]",
    content_selectors: &[".article_view", "#articleText", ".article_txt"],
    image_selectors: &[".article_photo img"],
};

static CHOSUNBIZ: RssProfile = RssProfile {
    name: "chosunbiz",
    tag: "CHOSUNBIZ",
    base_url: "https://biz.chosun.com",
    feed_url: "https://www.chosun.com/arc/outboundfeeds/rss/category/economy/?outputType=xml",
    content_selectors: &[
        ".article-body",
        ".story-news-content",
        "article .content",
        ".news-body",
        r#"[itemprop="articleBody"]"#,
    ],
    image_selectors: &[".article-body img", "article img", ".story-news-content img"],
};

/// Build the shared HTTP client used by every adapter.
pub fn build_client(user_agent: &str, timeout: Duration) -> Result<Client, SourceError> {
    Ok(Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()?)
}

/// The registered sources, in the fixed order the coordinator visits them.
pub fn registry(client: &Client) -> Result<Vec<Box<dyn SourceAdapter>>, SourceError> {
    let sources: Vec<Box<dyn SourceAdapter>> = vec![
        Box::new(HtmlListSource::new(&HANKYUNG, client.clone())?),
        Box::new(HtmlListSource::new(&MK, client.clone())?),
        Box::new(HtmlListSource::new(&EDAILY, client.clone())?),
        Box::new(HtmlListSource::new(&HERALD, client.clone())?),
        Box::new(RssSource::new(&CHOSUNBIZ, client.clone())?),
    ];
    Ok(sources)
}

/// GET a URL and return its body, treating non-2xx responses as errors.
pub(crate) async fn get_text(client: &Client, url: &str) -> Result<String, SourceError> {
    Ok(client.get(url).send().await?.error_for_status()?.text().await?)
}
