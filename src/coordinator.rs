//! Crawl coordinator.
//!
//! Drives every registered [`SourceAdapter`] one after another for a single job and
//! writes what they return through the [`ArticleStore`]. Sources are never run
//! concurrently: per-source load stays bounded and a failing source only ever costs
//! its own tally.

use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info, instrument, warn};

use crate::models::MediaResults;
use crate::sources::SourceAdapter;
use crate::store::ArticleStore;

pub struct CrawlCoordinator {
    sources: Vec<Box<dyn SourceAdapter>>,
    articles: Arc<dyn ArticleStore>,
}

impl CrawlCoordinator {
    pub fn new(sources: Vec<Box<dyn SourceAdapter>>, articles: Arc<dyn ArticleStore>) -> Self {
        Self { sources, articles }
    }

    /// Names of the registered sources, in visiting order.
    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    /// Crawl every source with a per-source cap of `max_per_source`.
    ///
    /// Returns the number of newly inserted articles per source, in registry order.
    /// Duplicates and failed saves are not counted; a source whose fetch fails
    /// reports 0. This never fails as a whole.
    #[instrument(level = "info", skip(self))]
    pub async fn run(&self, max_per_source: usize) -> MediaResults {
        let mut media_results = MediaResults::with_capacity(self.sources.len());

        for source in &self.sources {
            let name = source.name();
            let t0 = Instant::now();
            info!(source = name, max_per_source, "Crawl started");

            let inserted = match source.fetch(max_per_source).await {
                Ok(records) => {
                    let fetched = records.len().min(max_per_source);
                    let mut inserted = 0i64;
                    for record in records.iter().take(max_per_source) {
                        if self.articles.insert_if_absent(record).await {
                            inserted += 1;
                        }
                    }
                    if fetched == 0 {
                        warn!(source = name, "Source returned no articles");
                    }
                    info!(
                        source = name,
                        fetched,
                        inserted,
                        skipped = fetched as i64 - inserted,
                        elapsed_ms = t0.elapsed().as_millis() as u64,
                        "Crawl finished"
                    );
                    inserted
                }
                Err(e) => {
                    error!(
                        source = name,
                        error = %e,
                        elapsed_ms = t0.elapsed().as_millis() as u64,
                        "Crawl failed; recording 0 for this source"
                    );
                    0
                }
            };

            media_results.insert(name.to_string(), inserted);
        }

        media_results
    }
}
