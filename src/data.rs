use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::api::ApiRequest;
use crate::error::Result;
use crate::model::{Comment, FeedPage, Post, PostId, UserId};
use crate::pipeline::RequestPipeline;

pub const DEFAULT_PAGE_SIZE: u32 = 20;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FeedSource {
    Home,
    Author(UserId),
}

impl FeedSource {
    pub fn path(&self) -> String {
        match self {
            FeedSource::Home => "/feed/home".to_string(),
            FeedSource::Author(user) => format!("/users/{}/posts", user),
        }
    }
}

#[async_trait]
pub trait FeedService: Send + Sync {
    async fn fetch_page(&self, source: &FeedSource, page: u32) -> Result<FeedPage>;
    async fn fetch_post(&self, id: &PostId) -> Result<Post>;
}

/// Like/unlike and commenting. Like calls may return the canonical post.
#[async_trait]
pub trait InteractionService: Send + Sync {
    async fn like(&self, id: &PostId) -> Result<Option<Post>>;
    async fn unlike(&self, id: &PostId) -> Result<Option<Post>>;
    async fn comment(&self, id: &PostId, text: &str) -> Result<Comment>;
}

pub struct ApiFeedService {
    pipeline: Arc<RequestPipeline>,
    page_size: u32,
}

impl ApiFeedService {
    pub fn new(pipeline: Arc<RequestPipeline>, page_size: u32) -> Self {
        let page_size = if page_size == 0 {
            DEFAULT_PAGE_SIZE
        } else {
            page_size
        };
        Self {
            pipeline,
            page_size,
        }
    }
}

#[async_trait]
impl FeedService for ApiFeedService {
    async fn fetch_page(&self, source: &FeedSource, page: u32) -> Result<FeedPage> {
        let request = ApiRequest::get(source.path())
            .query("page", page)
            .query("limit", self.page_size);
        self.pipeline.execute(request).await?.json()
    }

    async fn fetch_post(&self, id: &PostId) -> Result<Post> {
        let request = ApiRequest::get(format!("/posts/{}", id));
        self.pipeline.execute(request).await?.json()
    }
}

pub struct ApiInteractionService {
    pipeline: Arc<RequestPipeline>,
}

impl ApiInteractionService {
    pub fn new(pipeline: Arc<RequestPipeline>) -> Self {
        Self { pipeline }
    }
}

#[derive(Serialize)]
struct CommentBody<'a> {
    text: &'a str,
}

#[async_trait]
impl InteractionService for ApiInteractionService {
    async fn like(&self, id: &PostId) -> Result<Option<Post>> {
        let request = ApiRequest::post(format!("/posts/{}/like", id));
        self.pipeline.execute(request).await?.json_opt()
    }

    async fn unlike(&self, id: &PostId) -> Result<Option<Post>> {
        let request = ApiRequest::delete(format!("/posts/{}/like", id));
        self.pipeline.execute(request).await?.json_opt()
    }

    async fn comment(&self, id: &PostId, text: &str) -> Result<Comment> {
        let request =
            ApiRequest::post(format!("/posts/{}/comments", id)).json(&CommentBody { text })?;
        self.pipeline.execute(request).await?.json()
    }
}
