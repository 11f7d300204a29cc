//! Content directory boundary
//!
//! The engine needs to know who wrote a post or a comment to attribute an
//! event. Content storage lives elsewhere, so it is reached through
//! [`ContentDirectory`].

use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Resolves content ids to their authors
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContentDirectory: Send + Sync {
    /// Author of a post, or `None` if the post is unknown
    async fn post_author(&self, post_id: &str) -> Result<Option<String>>;

    /// Author of a comment, or `None` if the comment is unknown
    async fn comment_author(&self, comment_id: &str) -> Result<Option<String>>;
}

/// Directory backed by in-process maps
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    posts: RwLock<HashMap<String, String>>,
    comments: RwLock<HashMap<String, String>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_post(mut self, post_id: impl Into<String>, author_id: impl Into<String>) -> Self {
        self.posts.get_mut().insert(post_id.into(), author_id.into());
        self
    }

    pub fn with_comment(
        mut self,
        comment_id: impl Into<String>,
        author_id: impl Into<String>,
    ) -> Self {
        self.comments
            .get_mut()
            .insert(comment_id.into(), author_id.into());
        self
    }

    pub async fn register_post(&self, post_id: impl Into<String>, author_id: impl Into<String>) {
        self.posts
            .write()
            .await
            .insert(post_id.into(), author_id.into());
    }

    pub async fn register_comment(
        &self,
        comment_id: impl Into<String>,
        author_id: impl Into<String>,
    ) {
        self.comments
            .write()
            .await
            .insert(comment_id.into(), author_id.into());
    }
}

#[async_trait]
impl ContentDirectory for MemoryDirectory {
    async fn post_author(&self, post_id: &str) -> Result<Option<String>> {
        Ok(self.posts.read().await.get(post_id).cloned())
    }

    async fn comment_author(&self, comment_id: &str) -> Result<Option<String>> {
        Ok(self.comments.read().await.get(comment_id).cloned())
    }
}
