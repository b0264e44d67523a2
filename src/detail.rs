use std::sync::Arc;

use tracing::warn;

use crate::cache::{EntityCache, EntityWatch};
use crate::data::FeedService;
use crate::error::Result;
use crate::model::{Post, PostId};

/// Reader for a single post, backed by the shared cache so it stays in step
/// with every feed listing the same post.
pub struct PostDetail {
    id: PostId,
    service: Arc<dyn FeedService>,
    cache: Arc<EntityCache>,
}

impl PostDetail {
    pub fn new(id: PostId, service: Arc<dyn FeedService>, cache: Arc<EntityCache>) -> Self {
        Self { id, service, cache }
    }

    pub fn id(&self) -> &PostId {
        &self.id
    }

    pub fn current(&self) -> Option<Arc<Post>> {
        self.cache.get(&self.id)
    }

    /// Fetches the post and stores it in the cache.
    pub async fn load(&self) -> Result<Arc<Post>> {
        match self.service.fetch_post(&self.id).await {
            Ok(post) => Ok(self.cache.put(post)),
            Err(err) => {
                warn!(post = %self.id, error = %err, "post detail load failed");
                Err(err)
            }
        }
    }

    pub fn watch(&self) -> EntityWatch {
        self.cache.watch(self.id.clone())
    }
}
