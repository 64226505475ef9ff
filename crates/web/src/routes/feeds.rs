//! RSS feeds and the sitemap.
//!
//! Feeds reuse the list queries of the pages they mirror, so whatever is
//! hidden there (drafts, archived products) is hidden here too.

use askama::Template;
use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use tracing::instrument;

use crate::config::WebConfig;
use crate::db::{ArticleQuery, ProductQuery};
use crate::error::Result;
use crate::models::{Article, Product};
use crate::state::AppState;

const RSS_CONTENT_TYPE: &str = "application/rss+xml; charset=utf-8";
const XML_CONTENT_TYPE: &str = "application/xml; charset=utf-8";

/// Items in the blog feed.
const BLOG_FEED_SIZE: u32 = 5;

/// Characters of body text kept in an item description.
pub const DESCRIPTION_CHARS: usize = 200;

pub struct FeedItem {
    pub title: String,
    pub link: String,
    pub description: String,
    pub pub_date: Option<String>,
}

pub struct FeedChannel {
    pub title: &'static str,
    pub link: String,
    pub description: &'static str,
    pub self_link: String,
    pub last_build_date: Option<String>,
    pub items: Vec<FeedItem>,
}

#[derive(Template)]
#[template(path = "feeds/rss.xml")]
pub struct RssTemplate {
    pub channel: FeedChannel,
}

pub struct SitemapEntry {
    pub loc: String,
    pub lastmod: Option<String>,
    pub changefreq: &'static str,
    pub priority: &'static str,
}

#[derive(Template)]
#[template(path = "feeds/sitemap.xml")]
pub struct SitemapTemplate {
    pub entries: Vec<SitemapEntry>,
}

/// The first `DESCRIPTION_CHARS` characters of `text`.
#[must_use]
pub fn truncate_chars(text: &str) -> String {
    text.chars().take(DESCRIPTION_CHARS).collect()
}

fn article_item(config: &WebConfig, article: &Article) -> FeedItem {
    FeedItem {
        title: article.title.clone(),
        link: config.absolute_url(&format!("/blog/articles/{}/", article.id)),
        description: truncate_chars(&article.body),
        pub_date: article.published_at.map(|at| at.to_rfc2822()),
    }
}

fn product_item(config: &WebConfig, product: &Product) -> FeedItem {
    FeedItem {
        title: product.name.clone(),
        link: config.absolute_url(&format!("/products/{}/", product.id)),
        description: truncate_chars(&product.description),
        pub_date: Some(product.created_at.to_rfc2822()),
    }
}

fn latest(dates: impl Iterator<Item = DateTime<Utc>>) -> Option<String> {
    dates.max().map(|at| at.to_rfc2822())
}

fn xml(content_type: &'static str, body: String) -> Response {
    ([(header::CONTENT_TYPE, content_type)], body).into_response()
}

/// Five most recent published articles.
#[instrument(skip(state))]
pub async fn blog_feed(State(state): State<AppState>) -> Result<Response> {
    let articles = state
        .repos()
        .articles
        .list(&ArticleQuery::published().limit(BLOG_FEED_SIZE))
        .await?;
    let config = state.config();

    let channel = FeedChannel {
        title: "Blog articles",
        link: config.absolute_url("/blog/articles/"),
        description: "Updates on changes and additions of articles.",
        self_link: config.absolute_url("/blog/feed/"),
        last_build_date: latest(articles.iter().filter_map(|a| a.published_at)),
        items: articles.iter().map(|a| article_item(config, a)).collect(),
    };

    Ok(xml(RSS_CONTENT_TYPE, RssTemplate { channel }.render()?))
}

/// Every non-archived product, oldest first.
#[instrument(skip(state))]
pub async fn products_feed(State(state): State<AppState>) -> Result<Response> {
    let products = state.repos().products.list(&ProductQuery::feed()).await?;
    let config = state.config();

    let channel = FeedChannel {
        title: "Our products",
        link: config.absolute_url("/products/"),
        description: "Updates on changes or addition new product.",
        self_link: config.absolute_url("/products/feed/"),
        last_build_date: latest(products.iter().map(|p| p.created_at)),
        items: products.iter().map(|p| product_item(config, p)).collect(),
    };

    Ok(xml(RSS_CONTENT_TYPE, RssTemplate { channel }.render()?))
}

/// Published articles and non-archived products.
#[instrument(skip(state))]
pub async fn sitemap(State(state): State<AppState>) -> Result<Response> {
    let articles = state
        .repos()
        .articles
        .list(&ArticleQuery::published())
        .await?;
    let products = state.repos().products.list(&ProductQuery::active()).await?;
    let config = state.config();

    let articles = articles.iter().map(|article| SitemapEntry {
        loc: config.absolute_url(&format!("/blog/articles/{}/", article.id)),
        lastmod: article.published_at.map(|at| at.to_rfc3339()),
        changefreq: "monthly",
        priority: "0.5",
    });
    let products = products.iter().map(|product| SitemapEntry {
        loc: config.absolute_url(&format!("/products/{}/", product.id)),
        lastmod: None,
        changefreq: "weekly",
        priority: "0.6",
    });

    let template = SitemapTemplate {
        entries: articles.chain(products).collect(),
    };
    tracing::debug!(entries = template.entries.len(), "Rendering sitemap");

    Ok(xml(XML_CONTENT_TYPE, template.render()?))
}
