//! Blog route handlers.

use askama::Template;
use askama_web::WebTemplate;
use axum::{
    Router,
    extract::{Path, State},
    response::IntoResponse,
    routing::get,
};
use tracing::instrument;

use mysite_core::ArticleId;

use crate::db::ArticleQuery;
use crate::error::{AppError, Result};
use crate::models::Article;
use crate::state::AppState;

/// Article list template.
#[derive(Template, WebTemplate)]
#[template(path = "blog/articles_list.html")]
pub struct ArticlesListTemplate {
    pub articles: Vec<Article>,
}

/// Article detail template.
#[derive(Template, WebTemplate)]
#[template(path = "blog/article_details.html")]
pub struct ArticleDetailsTemplate {
    pub article: Article,
}

/// Display published articles, newest first.
#[instrument(skip(state))]
pub async fn index(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let articles = state
        .repos()
        .articles
        .list(&ArticleQuery::published())
        .await?;
    Ok(ArticlesListTemplate { articles })
}

/// Display a single article.
///
/// # Errors
///
/// Returns 404 if the article doesn't exist or is a draft.
#[instrument(skip(state))]
pub async fn show(
    State(state): State<AppState>,
    Path(id): Path<ArticleId>,
) -> Result<impl IntoResponse> {
    let article = state
        .repos()
        .articles
        .get(id)
        .await?
        .filter(Article::is_published)
        .ok_or_else(|| AppError::NotFound(format!("article {id}")))?;

    Ok(ArticleDetailsTemplate { article })
}

/// Create the blog routes router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/blog/articles/", get(index))
        .route("/blog/articles/{id}/", get(show))
        .route("/blog/feed/", get(super::feeds::blog_feed))
}
