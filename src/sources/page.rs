//! Article page extraction shared by the HTML and RSS adapters.

use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use url::Url;

use crate::error::SourceError;
use crate::utils::{collapse_whitespace, resolve_url};

static PUBLISHED_META: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"meta[property="article:published_time"], meta[name="pubdate"]"#).unwrap()
});
static TIME_DATETIME: Lazy<Selector> = Lazy::new(|| Selector::parse("time[datetime]").unwrap());

/// What could be pulled out of one article page. Every field may be missing.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ExtractedPage {
    pub content: String,
    pub image_url: Option<String>,
    pub published_at: Option<String>,
}

/// Ordered fallback selectors for an article body and its lead image.
pub struct PageExtractor {
    content: Vec<Selector>,
    image: Vec<Selector>,
}

pub(crate) fn parse_selectors(raw: &[&str]) -> Result<Vec<Selector>, SourceError> {
    raw.iter()
        .map(|s| Selector::parse(s).map_err(|_| SourceError::Selector(s.to_string())))
        .collect()
}

impl PageExtractor {
    pub fn new(content: &[&str], image: &[&str]) -> Result<Self, SourceError> {
        Ok(Self {
            content: parse_selectors(content)?,
            image: parse_selectors(image)?,
        })
    }

    /// Extract body text, lead image and publication time from an article page.
    ///
    /// The first content selector yielding non-blank text wins; likewise for images,
    /// where `src` is preferred over lazy-loading `data-src`.
    pub fn extract(&self, html: &str, base: &Url) -> ExtractedPage {
        let document = Html::parse_document(html);

        let content = self
            .content
            .iter()
            .filter_map(|sel| document.select(sel).next())
            .map(|el| collapse_whitespace(&el.text().collect::<Vec<_>>().join(" ")))
            .find(|text| !text.is_empty())
            .unwrap_or_default();

        let image_url = self
            .image
            .iter()
            .flat_map(|sel| document.select(sel))
            .filter_map(|el| el.value().attr("src").or_else(|| el.value().attr("data-src")))
            .find_map(|src| resolve_url(base, src));

        let published_at = document
            .select(&PUBLISHED_META)
            .filter_map(|el| el.value().attr("content"))
            .chain(
                document
                    .select(&TIME_DATETIME)
                    .filter_map(|el| el.value().attr("datetime")),
            )
            .map(str::to_string)
            .next();

        ExtractedPage {
            content,
            image_url,
            published_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><head>
          <meta property="article:published_time" content="2026-02-05T10:30:00+09:00">
        </head><body>
          <div id="articletxt">  Second   choice body </div>
          <article>
            <img data-src="/photo/lazy.jpg">
            <img src="//img.example.com/lead.jpg">
          </article>
        </body></html>
    "#;

    #[test]
    fn test_extract_uses_first_matching_selector() {
        let extractor =
            PageExtractor::new(&[".article-body", "#articletxt"], &["article img"]).unwrap();
        let base = Url::parse("https://www.hankyung.com").unwrap();
        let page = extractor.extract(PAGE, &base);

        assert_eq!(page.content, "Second choice body");
        assert_eq!(page.image_url.as_deref(), Some("https://www.hankyung.com/photo/lazy.jpg"));
        assert_eq!(page.published_at.as_deref(), Some("2026-02-05T10:30:00+09:00"));
    }

    #[test]
    fn test_extract_empty_page() {
        let extractor = PageExtractor::new(&[".article-body"], &[".photo img"]).unwrap();
        let base = Url::parse("https://www.mk.co.kr").unwrap();
        let page = extractor.extract("<html><body><p>nav</p></body></html>", &base);
        assert_eq!(page, ExtractedPage::default());
    }

    #[test]
    fn test_invalid_selector_is_reported() {
        let err = PageExtractor::new(&["<<nope"], &[]).err().unwrap();
        assert!(matches!(err, SourceError::Selector(s) if s == "<<nope"));
    }
}
