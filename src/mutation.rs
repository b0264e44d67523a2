//! Optimistic like/unlike.
//!
//! The cache is updated before the remote call starts. On failure only the
//! acting user's membership is restored on whatever the cache holds by then,
//! so unrelated writes that landed in between (a new comment, a refreshed
//! page) survive the rollback.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::cache::EntityCache;
use crate::data::InteractionService;
use crate::error::{Error, Result};
use crate::model::{Comment, Post, PostId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Like,
    Unlike,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMutation {
    pub entity_id: PostId,
    pub kind: MutationKind,
    /// Whether the acting user was in the like-set before the change.
    pub was_liked: bool,
}

pub struct MutationExecutor {
    cache: Arc<EntityCache>,
    service: Arc<dyn InteractionService>,
    user: UserId,
    pending: Mutex<HashMap<PostId, PendingMutation>>,
}

impl MutationExecutor {
    pub fn new(
        cache: Arc<EntityCache>,
        service: Arc<dyn InteractionService>,
        user: UserId,
    ) -> Self {
        Self {
            cache,
            service,
            user,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn user(&self) -> &UserId {
        &self.user
    }

    pub fn is_pending(&self, id: &PostId) -> bool {
        self.pending.lock().contains_key(id)
    }

    pub fn pending(&self, id: &PostId) -> Option<PendingMutation> {
        self.pending.lock().get(id).cloned()
    }

    /// Likes the post when `currently_liked` is false, unlikes it otherwise.
    ///
    /// Returns [`Error::Busy`] while another mutation on the same post is in
    /// flight. On remote failure the optimistic change is rolled back and the
    /// remote error is returned.
    ///
    /// Dropping the future mid-call releases the pending marker but leaves the
    /// optimistic like-set in the cache until the post is next fetched.
    pub async fn toggle_like(&self, id: &PostId, currently_liked: bool) -> Result<()> {
        let kind = if currently_liked {
            MutationKind::Unlike
        } else {
            MutationKind::Like
        };

        let _marker = {
            let mut pending = self.pending.lock();
            if pending.contains_key(id) {
                debug!(post = %id, "rejecting mutation, another one is in flight");
                return Err(Error::Busy(id.clone()));
            }
            let snapshot = self.cache.get(id).ok_or_else(|| Error::NotCached(id.clone()))?;
            pending.insert(
                id.clone(),
                PendingMutation {
                    entity_id: id.clone(),
                    kind,
                    was_liked: snapshot.is_liked_by(&self.user),
                },
            );
            PendingMarker {
                pending: &self.pending,
                id,
            }
        };

        let liked = kind == MutationKind::Like;
        self.cache
            .update(id, |post| post.with_like_membership(&self.user, liked));

        let result = match kind {
            MutationKind::Like => self.service.like(id).await,
            MutationKind::Unlike => self.service.unlike(id).await,
        };

        match result {
            Ok(Some(canonical)) => {
                self.cache.put(canonical);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(err) => {
                warn!(post = %id, ?kind, error = %err, "like mutation failed, rolling back");
                self.rollback(id);
                Err(err)
            }
        }
    }

    /// Posts a comment and appends the server's copy to the cached post.
    pub async fn add_comment(&self, id: &PostId, text: &str) -> Result<Comment> {
        let comment = self.service.comment(id, text).await?;
        let appended = comment.clone();
        self.cache.update(id, move |post: &Post| post.with_comment(appended));
        Ok(comment)
    }

    fn rollback(&self, id: &PostId) {
        let was_liked = match self.pending.lock().get(id) {
            Some(pending) => pending.was_liked,
            None => return,
        };
        self.cache
            .update(id, |post| post.with_like_membership(&self.user, was_liked));
    }
}

/// Removes the pending entry however the mutation ends.
struct PendingMarker<'a> {
    pending: &'a Mutex<HashMap<PostId, PendingMutation>>,
    id: &'a PostId,
}

impl Drop for PendingMarker<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(self.id);
    }
}
