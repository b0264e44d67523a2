#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use feedline::api::{ApiRequest, ApiResponse, Transport};
use feedline::auth::{
    AuthApi, AuthPaths, Credential, CredentialStore, HttpAuthApi, MemoryCredentialStore,
};
use feedline::data::{FeedService, FeedSource, InteractionService};
use feedline::model::{Comment, FeedPage, Post, PostId, PostKind, UserId};
use feedline::pipeline::RequestPipeline;
use feedline::refresh::RefreshCoordinator;
use feedline::{Error, Result};

pub fn post(id: &str, author: &str, likes: &[&str]) -> Post {
    Post {
        id: id.into(),
        author: author.into(),
        kind: PostKind::Text,
        title: format!("post {id}"),
        body: String::new(),
        likes: likes.iter().map(|u| UserId::from(*u)).collect(),
        comments: Vec::new(),
        created_at: None,
    }
}

pub fn page(ids: &[&str], page_index: u32, total_pages: u32) -> FeedPage {
    FeedPage {
        entities: ids.iter().map(|id| post(id, "author", &[])).collect(),
        page_index,
        total_pages,
        is_last: page_index + 1 >= total_pages,
    }
}

pub fn ids(posts: &[Arc<Post>]) -> Vec<String> {
    posts.iter().map(|p| p.id.to_string()).collect()
}

/// Accepts only the access token issued by its latest refresh. The initial
/// client token is never valid, so the first request always sees a 401.
pub struct TokenServer {
    valid: Mutex<String>,
    generation: AtomicUsize,
    refreshes: AtomicUsize,
    reject_refresh: AtomicBool,
    delay: Duration,
}

impl TokenServer {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            valid: Mutex::new(String::new()),
            generation: AtomicUsize::new(0),
            refreshes: AtomicUsize::new(0),
            reject_refresh: AtomicBool::new(false),
            delay,
        })
    }

    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub fn reject_refresh(&self) {
        self.reject_refresh.store(true, Ordering::SeqCst);
    }

    /// Revokes the current access token.
    pub fn expire_tokens(&self) {
        self.valid.lock().clear();
    }
}

#[async_trait]
impl Transport for TokenServer {
    async fn send(&self, request: &ApiRequest, bearer: Option<&str>) -> Result<ApiResponse> {
        if request.path == "/auth/refresh" {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.reject_refresh.load(Ordering::SeqCst) {
                return Ok(ApiResponse::new(
                    401,
                    r#"{"error":"invalid_grant","error_description":"refresh token revoked"}"#,
                ));
            }
            let n = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            *self.valid.lock() = format!("access-{n}");
            return Ok(ApiResponse::new(
                200,
                format!(r#"{{"access_token":"access-{n}","refresh_token":"refresh-{n}","expires_in":3600}}"#),
            ));
        }

        let valid = self.valid.lock().clone();
        match bearer {
            Some(token) if !valid.is_empty() && token == valid => {
                Ok(ApiResponse::new(200, r#"{"ok":true}"#))
            }
            _ => Ok(ApiResponse::new(401, "")),
        }
    }
}

pub struct AuthHarness {
    pub server: Arc<TokenServer>,
    pub store: Arc<dyn CredentialStore>,
    pub coordinator: RefreshCoordinator,
    pub pipeline: Arc<RequestPipeline>,
}

pub fn auth_harness(delay: Duration) -> AuthHarness {
    let server = TokenServer::new(delay);
    let store: Arc<dyn CredentialStore> = Arc::new(MemoryCredentialStore::with_credential(
        Credential::new("access-0", "refresh-0"),
    ));
    let auth: Arc<dyn AuthApi> = Arc::new(HttpAuthApi::new(server.clone(), AuthPaths::default()));
    let coordinator = RefreshCoordinator::new(store.clone(), auth);
    let pipeline = Arc::new(RequestPipeline::new(
        server.clone(),
        store.clone(),
        coordinator.clone(),
    ));
    AuthHarness {
        server,
        store,
        coordinator,
        pipeline,
    }
}

/// Serves fixed pages. While gated, each fetch announces itself on `started`
/// and waits for `release`.
pub struct PagedFeed {
    pages: HashMap<u32, FeedPage>,
    gated: AtomicBool,
    calls: Mutex<Vec<u32>>,
    pub started: Notify,
    pub release: Notify,
}

impl PagedFeed {
    pub fn new(pages: Vec<FeedPage>) -> Arc<Self> {
        Arc::new(Self {
            pages: pages.into_iter().map(|p| (p.page_index, p)).collect(),
            gated: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
            started: Notify::new(),
            release: Notify::new(),
        })
    }

    pub fn set_gated(&self, gated: bool) {
        self.gated.store(gated, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<u32> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl FeedService for PagedFeed {
    async fn fetch_page(&self, _source: &FeedSource, page: u32) -> Result<FeedPage> {
        self.calls.lock().push(page);
        if self.gated.load(Ordering::SeqCst) {
            self.started.notify_one();
            self.release.notified().await;
        }
        self.pages
            .get(&page)
            .cloned()
            .ok_or_else(|| Error::ServerRejected {
                status: 404,
                message: format!("no page {page}"),
            })
    }

    async fn fetch_post(&self, id: &PostId) -> Result<Post> {
        Err(Error::NotCached(id.clone()))
    }
}

/// Like calls block until released and then fail. Comments succeed at once.
pub struct FlakyInteractions {
    pub started: Notify,
    pub release: Notify,
}

impl FlakyInteractions {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            started: Notify::new(),
            release: Notify::new(),
        })
    }

    async fn fail(&self) -> Result<Option<Post>> {
        self.started.notify_one();
        self.release.notified().await;
        Err(Error::ServerRejected {
            status: 503,
            message: "try again later".into(),
        })
    }
}

#[async_trait]
impl InteractionService for FlakyInteractions {
    async fn like(&self, _id: &PostId) -> Result<Option<Post>> {
        self.fail().await
    }

    async fn unlike(&self, _id: &PostId) -> Result<Option<Post>> {
        self.fail().await
    }

    async fn comment(&self, id: &PostId, text: &str) -> Result<Comment> {
        Ok(Comment {
            id: format!("{id}-c"),
            author: "a".into(),
            body: text.to_string(),
            created_at: None,
        })
    }
}
