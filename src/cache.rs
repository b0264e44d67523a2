//! Process-wide store of the latest known post snapshots.
//!
//! Every screen reads posts from here. Writes to the same id are serialized
//! by the map's entry lock; writes to different ids never block each other.
//! Each write bumps a revision counter that observers wait on.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;

use crate::model::{Post, PostId};

pub struct EntityCache {
    entries: DashMap<PostId, Arc<Post>>,
    revision: watch::Sender<u64>,
}

impl Default for EntityCache {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityCache {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            entries: DashMap::new(),
            revision,
        }
    }

    pub fn get(&self, id: &PostId) -> Option<Arc<Post>> {
        self.entries.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, id: &PostId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stores `post`, replacing any previous snapshot with the same id.
    pub fn put(&self, post: Post) -> Arc<Post> {
        let post = Arc::new(post);
        self.entries.insert(post.id.clone(), Arc::clone(&post));
        self.bump();
        post
    }

    pub fn put_all<I>(&self, posts: I)
    where
        I: IntoIterator<Item = Post>,
    {
        let mut wrote = false;
        for post in posts {
            self.entries.insert(post.id.clone(), Arc::new(post));
            wrote = true;
        }
        if wrote {
            self.bump();
        }
    }

    /// Replaces the snapshot for `id` with `f(current)`.
    ///
    /// No-op returning `None` when `id` is absent. The read and the write
    /// happen under the entry lock, so concurrent updates of one id never lose
    /// each other's changes.
    pub fn update<F>(&self, id: &PostId, f: F) -> Option<Arc<Post>>
    where
        F: FnOnce(&Post) -> Post,
    {
        let updated = {
            let mut entry = self.entries.get_mut(id)?;
            let current: &Post = entry.value();
            let next = Arc::new(f(current));
            *entry.value_mut() = Arc::clone(&next);
            next
        };
        self.bump();
        Some(updated)
    }

    pub fn evict(&self, id: &PostId) -> Option<Arc<Post>> {
        let removed = self.entries.remove(id).map(|(_, post)| post);
        if removed.is_some() {
            self.bump();
        }
        removed
    }

    pub fn clear(&self) {
        self.entries.clear();
        self.bump();
    }

    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    /// Receiver that is notified after every write.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    /// Observes a single post, yielding only when its snapshot changes.
    pub fn watch(self: &Arc<Self>, id: PostId) -> EntityWatch {
        let last = self.get(&id);
        EntityWatch {
            cache: Arc::clone(self),
            changes: self.changes(),
            id,
            last,
        }
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev = rev.wrapping_add(1));
    }
}

pub struct EntityWatch {
    cache: Arc<EntityCache>,
    changes: watch::Receiver<u64>,
    id: PostId,
    last: Option<Arc<Post>>,
}

impl EntityWatch {
    pub fn id(&self) -> &PostId {
        &self.id
    }

    pub fn current(&self) -> Option<Arc<Post>> {
        self.last.clone()
    }

    /// Waits for the next distinct snapshot. `None` inside `Some` means the post
    /// was evicted; an outer `None` means the cache is gone.
    pub async fn changed(&mut self) -> Option<Option<Arc<Post>>> {
        loop {
            self.changes.changed().await.ok()?;
            let next = self.cache.get(&self.id);
            let same = match (&self.last, &next) {
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                (None, None) => true,
                _ => false,
            };
            if !same {
                self.last = next.clone();
                return Some(next);
            }
        }
    }
}
