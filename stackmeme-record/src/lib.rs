// Data model for backend documents, shaped after the hosted collections:
// memes, comments, comment reactions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DefaultOnError};
use stackmeme_ref::{CommentRef, IdentityRef, MemeRef, ReactionRef};
use std::fmt;
use std::str::FromStr;
use thiserror::Error as ThisError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactionKind {
    Like,
    Dislike,
}

impl ReactionKind {
    pub fn opposite(&self) -> ReactionKind {
        match self {
            ReactionKind::Like => ReactionKind::Dislike,
            ReactionKind::Dislike => ReactionKind::Like,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReactionKind::Like => "like",
            ReactionKind::Dislike => "dislike",
        }
    }
}

#[derive(Clone, Debug, ThisError)]
#[error("Unknown reaction kind: {0}")]
pub struct ParseReactionKindError(String);

impl FromStr for ReactionKind {
    type Err = ParseReactionKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "like" => Ok(ReactionKind::Like),
            "dislike" => Ok(ReactionKind::Dislike),
            other => Err(ParseReactionKindError(other.to_string())),
        }
    }
}

impl fmt::Display for ReactionKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Public,
    Friends,
    Private,
    Anonymous,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Friends => "friends",
            Visibility::Private => "private",
            Visibility::Anonymous => "anonymous",
        }
    }
}

#[derive(Clone, Debug, ThisError)]
#[error("Unknown visibility: {0}")]
pub struct ParseVisibilityError(String);

impl FromStr for Visibility {
    type Err = ParseVisibilityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Visibility::Public),
            "friends" => Ok(Visibility::Friends),
            "private" => Ok(Visibility::Private),
            "anonymous" => Ok(Visibility::Anonymous),
            other => Err(ParseVisibilityError(other.to_string())),
        }
    }
}

#[serde_as]
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct MemeRecord {
    pub id: MemeRef,
    pub image_url: String,
    #[serde_as(deserialize_as = "DefaultOnError")]
    #[serde(default)]
    pub caption: Option<String>,
    #[serde_as(deserialize_as = "DefaultOnError")]
    #[serde(default)]
    pub author: Option<String>,
    #[serde_as(deserialize_as = "DefaultOnError")]
    #[serde(default)]
    pub author_id: Option<IdentityRef>,
    #[serde_as(deserialize_as = "DefaultOnError")]
    #[serde(default)]
    pub likes: u32,
    #[serde_as(deserialize_as = "DefaultOnError")]
    #[serde(default)]
    pub dislikes: u32,
    #[serde_as(deserialize_as = "DefaultOnError")]
    #[serde(default)]
    pub comments_count: u32,
    #[serde_as(deserialize_as = "DefaultOnError")]
    #[serde(default)]
    pub user_likes: Vec<IdentityRef>,
    #[serde_as(deserialize_as = "DefaultOnError")]
    #[serde(default)]
    pub user_dislikes: Vec<IdentityRef>,
    #[serde_as(deserialize_as = "DefaultOnError")]
    #[serde(default)]
    pub is_anonymous: bool,
    #[serde_as(deserialize_as = "DefaultOnError")]
    #[serde(default)]
    pub visibility: Visibility,
    pub created_at: DateTime<Utc>,
}

#[serde_as]
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CommentRecord {
    pub id: CommentRef,
    pub meme_id: MemeRef,
    pub text: String,
    #[serde_as(deserialize_as = "DefaultOnError")]
    #[serde(default)]
    pub author: Option<String>,
    #[serde_as(deserialize_as = "DefaultOnError")]
    #[serde(default)]
    pub author_id: Option<IdentityRef>,
    #[serde_as(deserialize_as = "DefaultOnError")]
    #[serde(default)]
    pub parent_id: Option<CommentRef>,
    #[serde_as(deserialize_as = "DefaultOnError")]
    #[serde(default)]
    pub depth: u32,
    #[serde_as(deserialize_as = "DefaultOnError")]
    #[serde(default)]
    pub likes: u32,
    #[serde_as(deserialize_as = "DefaultOnError")]
    #[serde(default)]
    pub dislikes: u32,
    #[serde_as(deserialize_as = "DefaultOnError")]
    #[serde(default)]
    pub replies_count: u32,
    #[serde_as(deserialize_as = "DefaultOnError")]
    #[serde(default)]
    pub is_anonymous: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ReactionRecord {
    pub id: ReactionRef,
    pub comment_id: CommentRef,
    pub kind: ReactionKind,
    pub author_id: IdentityRef,
    pub created_at: DateTime<Utc>,
}
