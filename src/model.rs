use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PostId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

macro_rules! string_id {
    ($name:ident) => {
        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(PostId);
string_id!(UserId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PostKind {
    #[default]
    Text,
    Image,
    Link,
    Question,
}

impl PostKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostKind::Text => "text",
            PostKind::Image => "image",
            PostKind::Link => "link",
            PostKind::Question => "question",
        }
    }
}

/// Immutable snapshot of a post. Mutations build a new snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: PostId,
    pub author: UserId,
    #[serde(default)]
    pub kind: PostKind,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub likes: BTreeSet<UserId>,
    #[serde(default)]
    pub comments: Vec<Comment>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Post {
    pub fn is_liked_by(&self, user: &UserId) -> bool {
        self.likes.contains(user)
    }

    pub fn like_count(&self) -> usize {
        self.likes.len()
    }

    pub fn with_like(&self, user: &UserId) -> Post {
        let mut next = self.clone();
        next.likes.insert(user.clone());
        next
    }

    pub fn without_like(&self, user: &UserId) -> Post {
        let mut next = self.clone();
        next.likes.remove(user);
        next
    }

    /// Returns a snapshot where `user`'s membership in the like-set is `liked`.
    pub fn with_like_membership(&self, user: &UserId, liked: bool) -> Post {
        if liked {
            self.with_like(user)
        } else {
            self.without_like(user)
        }
    }

    pub fn with_comment(&self, comment: Comment) -> Post {
        let mut next = self.clone();
        next.comments.push(comment);
        next
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub author: UserId,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// One page of a feed as returned by the remote API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedPage {
    #[serde(default)]
    pub entities: Vec<Post>,
    pub page_index: u32,
    pub total_pages: u32,
    #[serde(default)]
    pub is_last: bool,
}
