use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::{self, HttpTransport, Transport};
use crate::auth::{AuthApi, AuthPaths, CredentialStore, HttpAuthApi, MemoryCredentialStore};
use crate::cache::EntityCache;
use crate::config::{self, Config, LogConfig};
use crate::data::{
    ApiFeedService, ApiInteractionService, FeedService, FeedSource, InteractionService,
};
use crate::detail::PostDetail;
use crate::feed::{FeedController, FeedView, LoadResult};
use crate::model::{Post, PostId, UserId};
use crate::mutation::MutationExecutor;
use crate::pipeline::RequestPipeline;
use crate::refresh::RefreshCoordinator;
use crate::session;

/// Everything a screen needs, wired once per process. All feeds, detail
/// views and mutation executors handed out share one cache and one session.
pub struct App {
    session: Arc<session::Manager>,
    cache: Arc<EntityCache>,
    pipeline: Arc<RequestPipeline>,
    feeds: Arc<dyn FeedService>,
    interactions: Arc<dyn InteractionService>,
}

impl App {
    pub fn new(cfg: &Config) -> Result<Self> {
        let transport = HttpTransport::new(api::ClientConfig {
            user_agent: cfg.api.user_agent.clone(),
            base_url: Some(cfg.api.base_url.clone()),
            timeout: Some(cfg.api.timeout),
            http_client: None,
        })
        .context("build http transport")?;
        Ok(Self::with_transport(cfg, Arc::new(transport)))
    }

    pub fn with_transport(cfg: &Config, transport: Arc<dyn Transport>) -> Self {
        let store: Arc<dyn CredentialStore> = Arc::new(MemoryCredentialStore::new());
        let auth: Arc<dyn AuthApi> = Arc::new(HttpAuthApi::new(
            transport.clone(),
            AuthPaths {
                login: cfg.api.login_path.clone(),
                refresh: cfg.api.refresh_path.clone(),
            },
        ));
        let coordinator = RefreshCoordinator::new(store.clone(), auth.clone());
        let pipeline = Arc::new(RequestPipeline::new(
            transport,
            store.clone(),
            coordinator.clone(),
        ));
        let session = Arc::new(session::Manager::new(store, auth, coordinator));

        let feeds: Arc<dyn FeedService> =
            Arc::new(ApiFeedService::new(pipeline.clone(), cfg.feed.page_size));
        let interactions: Arc<dyn InteractionService> =
            Arc::new(ApiInteractionService::new(pipeline.clone()));

        let app = Self {
            session,
            cache: Arc::new(EntityCache::new()),
            pipeline,
            feeds,
            interactions,
        };
        if let Some((user, credential)) = cfg.session.resume() {
            app.session.resume(user, credential);
        }
        app
    }

    pub fn session(&self) -> &Arc<session::Manager> {
        &self.session
    }

    pub fn cache(&self) -> &Arc<EntityCache> {
        &self.cache
    }

    pub fn pipeline(&self) -> &Arc<RequestPipeline> {
        &self.pipeline
    }

    pub fn feed(&self, source: FeedSource) -> FeedController {
        FeedController::new(source, self.feeds.clone(), self.cache.clone())
    }

    pub fn detail(&self, id: PostId) -> PostDetail {
        PostDetail::new(id, self.feeds.clone(), self.cache.clone())
    }

    pub fn mutations(&self, user: UserId) -> MutationExecutor {
        MutationExecutor::new(self.cache.clone(), self.interactions.clone(), user)
    }

    /// Ends the session and drops every cached post.
    pub fn sign_out(&self) {
        self.session.sign_out();
        self.cache.clear();
    }
}

/// Installs the global subscriber. `RUST_LOG` wins over the configured filter.
pub fn init_logging(cfg: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

pub fn run() -> Result<()> {
    let cfg = config::load(config::LoadOptions::default()).context("load config")?;
    init_logging(&cfg.log);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("start async runtime")?;
    runtime.block_on(print_home_feed(&cfg))
}

async fn print_home_feed(cfg: &Config) -> Result<()> {
    let app = App::new(cfg)?;
    let user = match app.session().active_user() {
        Some(user) => user,
        None => bail!(
            "no session configured; set session.user_id and session.access_token in {}",
            friendly_path(config::default_path().as_ref())
        ),
    };
    info!(user = %user, base_url = %cfg.api.base_url, "loading home feed");

    let mut expired = app.session().subscribe_expired();
    let feed = app.feed(FeedSource::Home);
    let result = feed.load_initial().await;
    if let Ok(event) = expired.try_recv() {
        warn!(reason = %event.reason, "session expired");
    }

    match (result, feed.view()) {
        (LoadResult::Applied, FeedView::Loaded { posts, has_more }) => {
            for post in &posts {
                println!("{}", summary_line(post, &user));
            }
            if has_more {
                println!("(more posts available)");
            }
            Ok(())
        }
        (_, FeedView::Failed { error, .. }) => bail!("load home feed: {error}"),
        (result, view) => bail!("load home feed: unexpected state {result:?} {view:?}"),
    }
}

fn summary_line(post: &Post, viewer: &UserId) -> String {
    let marker = if post.is_liked_by(viewer) { "*" } else { " " };
    format!(
        "{marker} [{}] {} by {} ({} likes, {} comments)",
        post.kind.as_str(),
        post.title,
        post.author,
        post.like_count(),
        post.comments.len()
    )
}

fn friendly_path(path: Option<&PathBuf>) -> String {
    if let Some(path) = path {
        if let Some(home) = dirs::home_dir() {
            if let Ok(stripped) = path.strip_prefix(&home) {
                let mut display = String::from("~");
                if !stripped.as_os_str().is_empty() {
                    display.push_str(&format!("/{}", stripped.display()));
                }
                return display;
            }
        }
        path.display().to_string()
    } else {
        "~/.config/feedline/config.yaml".to_string()
    }
}
