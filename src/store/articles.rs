//! PostgreSQL article store (`news` table).

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use tracing::{debug, error, instrument};

use super::ArticleStore;
use crate::error::StoreError;
use crate::models::{Article, ArticleRecord};

pub struct PgArticleStore {
    pool: PgPool,
}

impl PgArticleStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn try_insert(&self, record: &ArticleRecord) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        let existing: Option<(i32,)> = sqlx::query_as("SELECT 1 FROM news WHERE url = $1")
            .bind(&record.url)
            .fetch_optional(&mut *tx)
            .await?;
        if existing.is_some() {
            tx.rollback().await?;
            debug!(url = %record.url, "Duplicate URL, skipping");
            return Ok(false);
        }

        let article = Article::from_record(record, Utc::now());

        // The unique index on `url` settles races with other workers: the loser
        // inserts nothing and reports "already exists".
        let result = sqlx::query(
            r#"
            INSERT INTO news (
                id, title, content, source, url, image_url,
                published_at, crawled_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (url) DO NOTHING
            "#,
        )
        .bind(article.id)
        .bind(&article.title)
        .bind(&article.content)
        .bind(&article.source)
        .bind(&article.url)
        .bind(article.image_url.as_deref())
        .bind(article.published_at.naive_utc())
        .bind(article.crawled_at.naive_utc())
        .bind(article.created_at.naive_utc())
        .bind(article.updated_at.naive_utc())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            debug!(url = %record.url, "Lost insert race, URL already stored");
            return Ok(false);
        }

        tx.commit().await?;
        Ok(true)
    }
}

#[async_trait]
impl ArticleStore for PgArticleStore {
    #[instrument(level = "debug", skip_all, fields(url = %record.url))]
    async fn insert_if_absent(&self, record: &ArticleRecord) -> bool {
        match self.try_insert(record).await {
            Ok(inserted) => inserted,
            Err(e) => {
                error!(url = %record.url, error = %e, "Failed to save article; counted as not inserted");
                false
            }
        }
    }
}
