//! Blog article repository backed by `PostgreSQL`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, QueryBuilder};
use tracing::instrument;

use mysite_core::ArticleId;

use super::query::ArticleQuery;
use super::{ArticleRepository, RepositoryError};
use crate::models::{Article, NewArticle};

#[derive(sqlx::FromRow)]
struct ArticleRow {
    id: ArticleId,
    title: String,
    body: String,
    published_at: Option<DateTime<Utc>>,
}

impl From<ArticleRow> for Article {
    fn from(row: ArticleRow) -> Self {
        Self {
            id: row.id,
            title: row.title,
            body: row.body,
            published_at: row.published_at,
        }
    }
}

/// sqlx implementation of [`ArticleRepository`].
pub struct PgArticleRepository {
    pool: PgPool,
}

impl PgArticleRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ArticleRepository for PgArticleRepository {
    #[instrument(skip(self))]
    async fn list(&self, query: &ArticleQuery) -> Result<Vec<Article>, RepositoryError> {
        let mut qb = QueryBuilder::new("SELECT id, title, body, published_at FROM blog_article");
        if query.published_only {
            qb.push(" WHERE published_at IS NOT NULL");
        }
        if query.newest_first {
            qb.push(" ORDER BY published_at DESC NULLS LAST, id DESC");
        } else {
            qb.push(" ORDER BY id");
        }
        if let Some(limit) = query.limit {
            qb.push(" LIMIT ").push_bind(i64::from(limit));
        }

        let rows = qb
            .build_query_as::<ArticleRow>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Article::from).collect())
    }

    #[instrument(skip(self))]
    async fn get(&self, id: ArticleId) -> Result<Option<Article>, RepositoryError> {
        let row = sqlx::query_as::<_, ArticleRow>(
            "SELECT id, title, body, published_at FROM blog_article WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Article::from))
    }

    #[instrument(skip(self, article), fields(title = %article.title))]
    async fn create(&self, article: NewArticle) -> Result<Article, RepositoryError> {
        let row = sqlx::query_as::<_, ArticleRow>(
            r"
            INSERT INTO blog_article (title, body, published_at)
            VALUES ($1, $2, $3)
            RETURNING id, title, body, published_at
            ",
        )
        .bind(&article.title)
        .bind(&article.body)
        .bind(article.published_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }
}
