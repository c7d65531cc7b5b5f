//! In-memory doubles for the store, source, publisher and broker seams, plus a
//! shared PostgreSQL for the store tests that need real SQL.
//!
//! The doubles are deterministic and record what was done to them so tests can
//! assert on side effects (writes, events, acknowledgments) without PostgreSQL,
//! RabbitMQ, or the network.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use indexmap::IndexMap;
use quick_xml::DeError;
use sqlx::PgPool;
use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

use crate::consumer::Delivery;
use crate::error::{BrokerError, PublishError, SourceError, StoreError};
use crate::models::{
    Article, ArticleRecord, CrawlJob, CrawlResultEvent, JobStatus, JobTransition,
    TransitionOutcome,
};
use crate::publisher::ResultPublisher;
use crate::sources::SourceAdapter;
use crate::store::{ArticleStore, JobStore};

/// Database shared by every PostgreSQL-backed test. Migrated once, then reused.
struct SharedDatabase {
    url: String,
    // Keeps the container alive for the whole test run.
    _postgres: Option<ContainerAsync<Postgres>>,
}

static SHARED_DB: OnceCell<Option<SharedDatabase>> = OnceCell::const_new();

impl SharedDatabase {
    /// Use `TEST_DATABASE_URL` when set, otherwise start a throwaway Postgres 16.
    async fn init() -> Result<Self, Box<dyn Error + Send + Sync>> {
        let (url, postgres) = match std::env::var("TEST_DATABASE_URL") {
            Ok(url) => (url, None),
            Err(_) => {
                let postgres = Postgres::default().with_tag("16").start().await?;
                let host = postgres.get_host().await?;
                let port = postgres.get_host_port_ipv4(5432).await?;
                (
                    format!("postgresql://postgres:postgres@{host}:{port}/postgres"),
                    Some(postgres),
                )
            }
        };

        let pool = PgPool::connect(&url).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        pool.close().await;

        Ok(Self {
            url,
            _postgres: postgres,
        })
    }
}

/// A fresh pool on the migrated test database.
///
/// Returns `None` when neither `TEST_DATABASE_URL` nor a container runtime is
/// available, so database tests skip instead of failing on machines without one.
pub async fn pg_pool() -> Option<PgPool> {
    let shared = SHARED_DB
        .get_or_init(|| async {
            match SharedDatabase::init().await {
                Ok(db) => Some(db),
                Err(e) => {
                    eprintln!("PostgreSQL unavailable, skipping database tests: {e}");
                    None
                }
            }
        })
        .await
        .as_ref()?;

    // Pools are per test: each #[tokio::test] runs on its own runtime.
    Some(
        PgPool::connect(&shared.url)
            .await
            .expect("connect to test database"),
    )
}

/// A minimal valid record for `url`, tagged with `source`.
pub fn record(source: &str, url: &str) -> ArticleRecord {
    ArticleRecord {
        title: format!("Headline for {url}"),
        content: "Body text".to_string(),
        url: url.to_string(),
        source: source.to_uppercase(),
        published_at: Utc.with_ymd_and_hms(2026, 2, 5, 1, 30, 0).unwrap(),
        image_url: None,
    }
}

/// Article store keyed by URL, keeping insertion order.
#[derive(Default)]
pub struct MemoryArticleStore {
    rows: RwLock<IndexMap<String, Article>>,
    failing_urls: RwLock<HashSet<String>>,
}

impl MemoryArticleStore {
    /// Pre-populate a row as if an earlier job had stored it.
    pub fn seed(&self, record: ArticleRecord) {
        let article = Article::from_record(&record, Utc::now());
        self.rows.write().unwrap().insert(article.url.clone(), article);
    }

    /// Make every insert of `url` fail as a persistence error would.
    pub fn fail_on(&self, url: &str) {
        self.failing_urls.write().unwrap().insert(url.to_string());
    }

    pub fn len(&self) -> usize {
        self.rows.read().unwrap().len()
    }

    pub fn urls_in_insert_order(&self) -> Vec<String> {
        self.rows.read().unwrap().keys().cloned().collect()
    }
}

#[async_trait]
impl ArticleStore for MemoryArticleStore {
    async fn insert_if_absent(&self, record: &ArticleRecord) -> bool {
        if self.failing_urls.read().unwrap().contains(&record.url) {
            return false;
        }
        let mut rows = self.rows.write().unwrap();
        if rows.contains_key(&record.url) {
            return false;
        }
        rows.insert(record.url.clone(), Article::from_record(record, Utc::now()));
        true
    }
}

/// Job store enforcing the same state machine as the PostgreSQL implementation.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<String, CrawlJob>>,
    writes: AtomicUsize,
    fail_finds: AtomicBool,
    fail_transitions_to: RwLock<HashSet<JobStatus>>,
}

impl MemoryJobStore {
    pub fn with_job(self, job: CrawlJob) -> Self {
        self.jobs.write().unwrap().insert(job.id.clone(), job);
        self
    }

    pub fn job(&self, job_id: &str) -> Option<CrawlJob> {
        self.jobs.read().unwrap().get(job_id).cloned()
    }

    pub fn status(&self, job_id: &str) -> Option<JobStatus> {
        self.job(job_id).map(|j| j.status)
    }

    /// Number of applied transitions.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make every `find` return a storage error.
    pub fn fail_finds(&self) {
        self.fail_finds.store(true, Ordering::SeqCst);
    }

    /// Make every transition into `status` return a storage error.
    pub fn fail_transitions_to(&self, status: JobStatus) {
        self.fail_transitions_to.write().unwrap().insert(status);
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn find(&self, job_id: &str) -> Result<Option<CrawlJob>, StoreError> {
        if self.fail_finds.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(self.job(job_id))
    }

    async fn update_status(
        &self,
        job_id: &str,
        transition: JobTransition,
    ) -> Result<TransitionOutcome, StoreError> {
        let target = transition.target();
        if self.fail_transitions_to.read().unwrap().contains(&target) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }

        let mut jobs = self.jobs.write().unwrap();
        let Some(job) = jobs.get_mut(job_id) else {
            return Ok(TransitionOutcome::NotFound);
        };
        if !job.status.can_transition_to(target) {
            return Ok(TransitionOutcome::Rejected { current: job.status });
        }

        let now = Utc::now();
        job.status = target;
        job.updated_at = now;
        match transition {
            JobTransition::Running => {}
            JobTransition::Completed {
                total_articles,
                media_results,
            } => {
                job.total_articles = total_articles;
                job.media_results = media_results;
                job.completed_at = Some(now);
            }
            JobTransition::Failed { error } => {
                job.error_message = Some(error);
                job.completed_at = Some(now);
            }
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(TransitionOutcome::Applied)
    }
}

/// Publisher that keeps every event it was handed.
#[derive(Default)]
pub struct RecordingPublisher {
    events: RwLock<Vec<CrawlResultEvent>>,
    fail: AtomicBool,
}

impl RecordingPublisher {
    /// Reject every publish as an unreachable broker would.
    pub fn failing() -> Self {
        Self {
            fail: AtomicBool::new(true),
            ..Default::default()
        }
    }

    /// Events successfully published, in order.
    pub fn events(&self) -> Vec<CrawlResultEvent> {
        self.events.read().unwrap().clone()
    }
}

#[async_trait]
impl ResultPublisher for RecordingPublisher {
    async fn publish(&self, event: &CrawlResultEvent) -> Result<(), PublishError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PublishError::Nacked);
        }
        self.events.write().unwrap().push(event.clone());
        Ok(())
    }
}

/// How a delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Ack,
    Nack { requeue: bool },
}

fn channel_closed() -> BrokerError {
    BrokerError::Amqp(lapin::Error::InvalidChannelState(lapin::ChannelState::Closed))
}

/// Delivery handle whose ack and nack can be made to fail.
#[derive(Default)]
pub struct ScriptedDelivery {
    settlements: RwLock<Vec<Settlement>>,
    fail_ack: bool,
    fail_nack: bool,
}

impl ScriptedDelivery {
    /// Ack fails as if the channel dropped after the work was persisted.
    pub fn losing_ack() -> Self {
        Self {
            fail_ack: true,
            ..Default::default()
        }
    }

    pub fn losing_nack(mut self) -> Self {
        self.fail_nack = true;
        self
    }

    /// Settlements attempted, including ones that failed.
    pub fn settlements(&self) -> Vec<Settlement> {
        self.settlements.read().unwrap().clone()
    }
}

#[async_trait]
impl Delivery for ScriptedDelivery {
    fn redelivered(&self) -> bool {
        false
    }

    async fn ack(&self) -> Result<(), BrokerError> {
        self.settlements.write().unwrap().push(Settlement::Ack);
        if self.fail_ack {
            return Err(channel_closed());
        }
        Ok(())
    }

    async fn nack(&self, requeue: bool) -> Result<(), BrokerError> {
        self.settlements.write().unwrap().push(Settlement::Nack { requeue });
        if self.fail_nack {
            return Err(channel_closed());
        }
        Ok(())
    }
}

/// Source returning a fixed list of records.
pub struct StaticSource {
    name: String,
    records: Vec<ArticleRecord>,
    honor_cap: bool,
}

impl StaticSource {
    pub fn new(name: &str, records: Vec<ArticleRecord>) -> Self {
        Self {
            name: name.to_string(),
            records,
            honor_cap: true,
        }
    }

    /// Return every record regardless of `max_items`.
    pub fn ignoring_cap(mut self) -> Self {
        self.honor_cap = false;
        self
    }
}

#[async_trait]
impl SourceAdapter for StaticSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, max_items: usize) -> Result<Vec<ArticleRecord>, SourceError> {
        let limit = if self.honor_cap { max_items } else { usize::MAX };
        Ok(self.records.iter().take(limit).cloned().collect())
    }
}

/// Source whose listing is always unreachable.
pub struct FailingSource {
    name: String,
}

impl FailingSource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl SourceAdapter for FailingSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, _max_items: usize) -> Result<Vec<ArticleRecord>, SourceError> {
        Err(SourceError::Feed(DeError::Custom(format!("{} listing unreachable", self.name))))
    }
}
