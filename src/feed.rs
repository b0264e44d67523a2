//! Paginated, filterable feed over the entity cache.
//!
//! The controller owns only the ordered id list and paging flags. Post
//! contents always come from [`EntityCache`], so a like applied from any
//! screen shows up in every feed that lists the post.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::cache::EntityCache;
use crate::data::{FeedService, FeedSource};
use crate::error::Error;
use crate::model::{Post, PostId, PostKind, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FeedFilter {
    #[default]
    All,
    Kind(PostKind),
    Author(UserId),
}

impl FeedFilter {
    pub fn matches(&self, post: &Post) -> bool {
        match self {
            FeedFilter::All => true,
            FeedFilter::Kind(kind) => post.kind == *kind,
            FeedFilter::Author(author) => post.author == *author,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeedState {
    pub ordered_ids: Vec<PostId>,
    pub current_page: u32,
    pub total_pages: u32,
    pub has_more: bool,
    pub filter: FeedFilter,
    pub is_loading: bool,
    pub is_loading_more: bool,
    pub error: Option<Error>,
    /// Set once the first page has been applied.
    pub loaded: bool,
}

/// What a screen renders. `Refreshing` keeps the current posts on screen
/// while a reload is in flight.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedView {
    Idle,
    Loading,
    Refreshing { posts: Vec<Arc<Post>> },
    Loaded { posts: Vec<Arc<Post>>, has_more: bool },
    LoadingMore { posts: Vec<Arc<Post>> },
    Failed { error: Error, posts: Vec<Arc<Post>> },
}

impl FeedView {
    pub fn posts(&self) -> &[Arc<Post>] {
        match self {
            FeedView::Idle | FeedView::Loading => &[],
            FeedView::Refreshing { posts }
            | FeedView::Loaded { posts, .. }
            | FeedView::LoadingMore { posts }
            | FeedView::Failed { posts, .. } => posts,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadResult {
    Applied,
    /// Another load was in flight or there was nothing more to load.
    Skipped,
    /// The error is recorded in [`FeedState::error`].
    Failed,
}

#[derive(Clone, Copy)]
enum LoadKind {
    Initial,
    More,
}

pub struct FeedController {
    source: FeedSource,
    service: Arc<dyn FeedService>,
    cache: Arc<EntityCache>,
    state: watch::Sender<FeedState>,
}

impl FeedController {
    pub fn new(source: FeedSource, service: Arc<dyn FeedService>, cache: Arc<EntityCache>) -> Self {
        let (state, _) = watch::channel(FeedState::default());
        Self {
            source,
            service,
            cache,
            state,
        }
    }

    pub fn source(&self) -> &FeedSource {
        &self.source
    }

    pub fn state(&self) -> FeedState {
        self.state.borrow().clone()
    }

    pub fn view(&self) -> FeedView {
        derive_view(&self.state(), &self.cache)
    }

    pub fn subscribe(&self) -> FeedSubscription {
        FeedSubscription {
            state: self.state.subscribe(),
            revisions: self.cache.changes(),
            cache: Arc::clone(&self.cache),
        }
    }

    /// Loads page 0 and replaces the id list.
    pub async fn load_initial(&self) -> LoadResult {
        let started = self.state.send_if_modified(|s| {
            if s.is_loading || s.is_loading_more {
                return false;
            }
            s.is_loading = true;
            true
        });
        if !started {
            debug!(source = ?self.source, "initial load already in flight, skipping");
            return LoadResult::Skipped;
        }
        let _flag = LoadingFlag::new(&self.state, LoadKind::Initial);

        match self.service.fetch_page(&self.source, 0).await {
            Ok(page) => {
                let ids = dedup_ids(page.entities.iter().map(|p| p.id.clone()));
                self.cache.put_all(page.entities);
                self.state.send_modify(|s| {
                    s.ordered_ids = ids;
                    s.current_page = 0;
                    s.total_pages = page.total_pages;
                    s.has_more = !page.is_last;
                    s.error = None;
                    s.loaded = true;
                    s.is_loading = false;
                });
                LoadResult::Applied
            }
            Err(err) => {
                warn!(source = ?self.source, error = %err, "initial feed load failed");
                self.state.send_modify(|s| {
                    s.error = Some(err);
                    s.is_loading = false;
                });
                LoadResult::Failed
            }
        }
    }

    /// Loads the next page and appends ids not already listed.
    pub async fn load_more(&self) -> LoadResult {
        let mut next_page = None;
        self.state.send_if_modified(|s| {
            if s.is_loading
                || s.is_loading_more
                || !s.has_more
                || s.current_page + 1 >= s.total_pages
            {
                return false;
            }
            s.is_loading_more = true;
            next_page = Some(s.current_page + 1);
            true
        });
        let next = match next_page {
            Some(next) => next,
            None => return LoadResult::Skipped,
        };
        let _flag = LoadingFlag::new(&self.state, LoadKind::More);

        match self.service.fetch_page(&self.source, next).await {
            Ok(page) => {
                let fetched: Vec<PostId> = page.entities.iter().map(|p| p.id.clone()).collect();
                self.cache.put_all(page.entities);
                self.state.send_modify(|s| {
                    let mut seen: HashSet<PostId> = s.ordered_ids.iter().cloned().collect();
                    for id in fetched {
                        if seen.insert(id.clone()) {
                            s.ordered_ids.push(id);
                        }
                    }
                    s.current_page = next;
                    s.total_pages = page.total_pages;
                    s.has_more = !page.is_last;
                    s.error = None;
                    s.is_loading_more = false;
                });
                LoadResult::Applied
            }
            Err(err) => {
                warn!(source = ?self.source, page = next, error = %err, "feed page load failed");
                self.state.send_modify(|s| {
                    s.error = Some(err);
                    s.is_loading_more = false;
                });
                LoadResult::Failed
            }
        }
    }

    /// Changes the filter. Never fetches.
    pub fn set_filter(&self, filter: FeedFilter) {
        self.state.send_if_modified(|s| {
            if s.filter == filter {
                return false;
            }
            s.filter = filter;
            true
        });
    }

    pub fn clear_error(&self) {
        self.state.send_if_modified(|s| s.error.take().is_some());
    }
}

/// Clears the loading flag if the load future is dropped before finishing.
struct LoadingFlag<'a> {
    state: &'a watch::Sender<FeedState>,
    kind: LoadKind,
}

impl<'a> LoadingFlag<'a> {
    fn new(state: &'a watch::Sender<FeedState>, kind: LoadKind) -> Self {
        Self { state, kind }
    }
}

impl Drop for LoadingFlag<'_> {
    fn drop(&mut self) {
        let kind = self.kind;
        self.state.send_if_modified(|s| {
            let flag = match kind {
                LoadKind::Initial => &mut s.is_loading,
                LoadKind::More => &mut s.is_loading_more,
            };
            std::mem::replace(flag, false)
        });
    }
}

fn dedup_ids<I>(ids: I) -> Vec<PostId>
where
    I: IntoIterator<Item = PostId>,
{
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}

fn visible_posts(state: &FeedState, cache: &EntityCache) -> Vec<Arc<Post>> {
    state
        .ordered_ids
        .iter()
        .filter_map(|id| cache.get(id))
        .filter(|post| state.filter.matches(post))
        .collect()
}

pub fn derive_view(state: &FeedState, cache: &EntityCache) -> FeedView {
    let has_data = state.loaded || !state.ordered_ids.is_empty();
    if state.is_loading {
        if has_data {
            return FeedView::Refreshing {
                posts: visible_posts(state, cache),
            };
        }
        return FeedView::Loading;
    }
    if state.is_loading_more {
        return FeedView::LoadingMore {
            posts: visible_posts(state, cache),
        };
    }
    if let Some(error) = state.error.clone() {
        return FeedView::Failed {
            error,
            posts: visible_posts(state, cache),
        };
    }
    if has_data {
        return FeedView::Loaded {
            posts: visible_posts(state, cache),
            has_more: state.has_more,
        };
    }
    FeedView::Idle
}

/// Yields a fresh [`FeedView`] whenever the feed state or the cache changes.
pub struct FeedSubscription {
    state: watch::Receiver<FeedState>,
    revisions: watch::Receiver<u64>,
    cache: Arc<EntityCache>,
}

impl FeedSubscription {
    pub fn current(&self) -> FeedView {
        let state = self.state.borrow().clone();
        derive_view(&state, &self.cache)
    }

    /// Returns `None` once the controller is dropped.
    pub async fn next(&mut self) -> Option<FeedView> {
        tokio::select! {
            changed = self.state.changed() => changed.ok()?,
            changed = self.revisions.changed() => changed.ok()?,
        }
        let state = self.state.borrow_and_update().clone();
        self.revisions.borrow_and_update();
        Some(derive_view(&state, &self.cache))
    }
}
