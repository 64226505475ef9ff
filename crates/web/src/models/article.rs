//! Blog article types.

use chrono::{DateTime, Utc};

use mysite_core::ArticleId;

/// Maximum length of an article title.
pub const TITLE_MAX_LENGTH: usize = 200;

/// A blog article. `published_at = None` marks a draft.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Article {
    pub id: ArticleId,
    pub title: String,
    pub body: String,
    pub published_at: Option<DateTime<Utc>>,
}

impl Article {
    #[must_use]
    pub const fn is_published(&self) -> bool {
        self.published_at.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewArticle {
    pub title: String,
    pub body: String,
    pub published_at: Option<DateTime<Utc>>,
}
