use chrono::Utc;
use log::info;
use sqlx::SqliteConnection;
use stackmeme_reactions::{reconcile, IdentityLists, ReactionCounts, ReactionState, ReactionStateStore};
use stackmeme_record::{
    CommentRecord, MemeRecord, ParseReactionKindError, ReactionKind, ReactionRecord, Visibility,
};
use stackmeme_ref::{CommentRef, IdentityRef, MemeRef, ReactionRef};
use thiserror::Error as ThisError;

pub mod sql;
pub use sql::SelectMemesOptions;
use sql::*;

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("Sql error, cause: {0}")]
    Sql(#[from] sqlx::Error),
    #[error("Failed to parse timestamp, cause: {0}")]
    Time(#[from] chrono::ParseError),
    #[error("Invalid ref in stored row, cause: {0}")]
    Ref(#[from] stackmeme_ref::RefError),
    #[error("Invalid reaction kind in stored row, cause: {0}")]
    Kind(#[from] ParseReactionKindError),
    #[error("Reaction state error, cause: {0}")]
    Reaction(#[from] stackmeme_reactions::Error),
    #[error("Meme not found: {0}")]
    MemeNotFound(MemeRef),
    #[error("Comment not found: {0}")]
    CommentNotFound(CommentRef),
}

pub struct NewMeme {
    pub image_url: String,
    pub caption: Option<String>,
    pub author: Option<String>,
    pub author_id: Option<IdentityRef>,
    pub is_anonymous: bool,
    pub visibility: Visibility,
}

pub struct NewComment {
    pub meme_id: MemeRef,
    pub text: String,
    pub parent_id: Option<CommentRef>,
    pub author: Option<String>,
    pub author_id: Option<IdentityRef>,
    pub is_anonymous: bool,
}

/// The persistence collaborator: durable storage for memes, comments, and
/// per-identity reactions, backed by sqlite.
pub struct Database {
    sql: SqliteConnection,
}

impl Database {
    pub async fn new(sql_path: &str) -> Result<Self, Error> {
        let mut sql = create_connection(sql_path).await?;
        setup_db(&mut sql).await?;
        info!("Opened stackmeme database at {}", sql_path);

        Ok(Self { sql })
    }

    // memes

    pub async fn create_meme(&mut self, new: NewMeme) -> Result<MemeRecord, Error> {
        let meme = MemeRecord {
            id: MemeRef::unique(),
            image_url: new.image_url,
            caption: new.caption,
            author: new.author,
            author_id: new.author_id,
            likes: 0,
            dislikes: 0,
            comments_count: 0,
            user_likes: Vec::new(),
            user_dislikes: Vec::new(),
            is_anonymous: new.is_anonymous,
            visibility: new.visibility,
            created_at: Utc::now(),
        };
        insert_meme(&mut self.sql, &meme).await?;

        Ok(meme)
    }

    pub async fn get_meme(&mut self, meme_ref: &MemeRef) -> Result<Option<MemeRecord>, Error> {
        select_meme(&mut self.sql, meme_ref).await
    }

    pub async fn get_memes(
        &mut self,
        options: SelectMemesOptions,
    ) -> Result<Vec<MemeRecord>, Error> {
        select_memes(&mut self.sql, options).await
    }

    pub async fn delete_meme(&mut self, meme_ref: &MemeRef) -> Result<(), Error> {
        delete_comments_for_meme(&mut self.sql, meme_ref).await?;
        delete_meme_row(&mut self.sql, meme_ref).await?;

        Ok(())
    }

    // comments

    /// Creates a comment, deriving its depth from the parent and maintaining
    /// the parent's reply counter and the meme's comment counter.
    pub async fn create_comment(&mut self, new: NewComment) -> Result<CommentRecord, Error> {
        let parent = match &new.parent_id {
            Some(parent_ref) => Some(
                select_comment(&mut self.sql, parent_ref)
                    .await?
                    .ok_or_else(|| Error::CommentNotFound(parent_ref.clone()))?,
            ),
            None => None,
        };
        let depth = parent.as_ref().map(|p| p.depth + 1).unwrap_or(0);

        let comment = CommentRecord {
            id: CommentRef::unique(),
            meme_id: new.meme_id,
            text: new.text,
            author: new.author,
            author_id: new.author_id,
            parent_id: new.parent_id,
            depth,
            likes: 0,
            dislikes: 0,
            replies_count: 0,
            is_anonymous: new.is_anonymous,
            created_at: Utc::now(),
        };
        insert_comment(&mut self.sql, &comment).await?;
        bump_meme_comments(&mut self.sql, &comment.meme_id, 1).await?;
        if let Some(parent) = parent {
            bump_replies_count(&mut self.sql, &parent.id, 1).await?;
        }

        Ok(comment)
    }

    pub async fn get_comment(
        &mut self,
        comment_ref: &CommentRef,
    ) -> Result<Option<CommentRecord>, Error> {
        select_comment(&mut self.sql, comment_ref).await
    }

    pub async fn get_comments_for_meme(
        &mut self,
        meme_ref: &MemeRef,
    ) -> Result<Vec<CommentRecord>, Error> {
        select_comments_for_meme(&mut self.sql, meme_ref).await
    }

    /// Deletes a comment and its whole reply subtree, then settles the parent
    /// reply counter and the meme comment counter.
    pub async fn delete_comment(&mut self, comment_ref: &CommentRef) -> Result<(), Error> {
        let comment = select_comment(&mut self.sql, comment_ref)
            .await?
            .ok_or_else(|| Error::CommentNotFound(comment_ref.clone()))?;

        let removed = delete_comment_tree(&mut self.sql, comment_ref).await?;

        if let Some(parent_ref) = &comment.parent_id {
            bump_replies_count(&mut self.sql, parent_ref, -1).await?;
        }
        bump_meme_comments(&mut self.sql, &comment.meme_id, -(removed as i64)).await?;

        Ok(())
    }

    // reactions

    /// Authenticated comment reaction: one reaction row per (comment,
    /// identity), toggled off on repeat, switched on the opposite kind.
    /// Returns the updated counts.
    ///
    /// Read-then-write without compare-and-swap; concurrent reactors against
    /// the same comment may produce approximate counts.
    pub async fn apply_comment_reaction(
        &mut self,
        comment_ref: &CommentRef,
        kind: ReactionKind,
        author_id: &IdentityRef,
    ) -> Result<ReactionCounts, Error> {
        let comment = select_comment(&mut self.sql, comment_ref)
            .await?
            .ok_or_else(|| Error::CommentNotFound(comment_ref.clone()))?;
        let counts = ReactionCounts::new(comment.likes, comment.dislikes);

        let existing = select_reaction_by_author(&mut self.sql, comment_ref, author_id).await?;
        let state = match &existing {
            Some((_, existing_kind)) => ReactionState::active(*existing_kind),
            None => ReactionState::None,
        };

        let (next, next_state) = reconcile(counts, state, kind);

        match (existing, next_state) {
            (Some((reaction_ref, _)), ReactionState::None) => {
                delete_reaction(&mut self.sql, &reaction_ref).await?;
            }
            (Some((reaction_ref, _)), _) => {
                update_reaction_kind(&mut self.sql, &reaction_ref, kind).await?;
            }
            (None, _) => {
                insert_reaction(
                    &mut self.sql,
                    &ReactionRecord {
                        id: ReactionRef::unique(),
                        comment_id: comment_ref.clone(),
                        kind,
                        author_id: author_id.clone(),
                        created_at: Utc::now(),
                    },
                )
                .await?;
            }
        }

        update_comment_counts(&mut self.sql, comment_ref, next).await?;

        Ok(next)
    }

    /// Authenticated meme reaction: state is membership in the meme's
    /// like/dislike identity lists. Returns the updated record.
    pub async fn apply_meme_reaction(
        &mut self,
        meme_ref: &MemeRef,
        kind: ReactionKind,
        identity: &IdentityRef,
    ) -> Result<MemeRecord, Error> {
        let meme = select_meme(&mut self.sql, meme_ref)
            .await?
            .ok_or_else(|| Error::MemeNotFound(meme_ref.clone()))?;

        let mut lists = IdentityLists::for_meme(identity.clone(), &meme);
        let state = lists.state(meme_ref.as_str())?;
        let (next, next_state) =
            reconcile(ReactionCounts::new(meme.likes, meme.dislikes), state, kind);
        lists.set_state(meme_ref.as_str(), next_state)?;

        update_meme_reactions(&mut self.sql, meme_ref, next, &lists.likes, &lists.dislikes)
            .await?;

        Ok(MemeRecord {
            likes: next.likes,
            dislikes: next.dislikes,
            user_likes: lists.likes,
            user_dislikes: lists.dislikes,
            ..meme
        })
    }

    /// Raw counter write, used by the anonymous path where the identity lives
    /// on the device rather than in a server-side list.
    pub async fn update_meme_counts(
        &mut self,
        meme_ref: &MemeRef,
        counts: ReactionCounts,
    ) -> Result<(), Error> {
        update_meme_counts(&mut self.sql, meme_ref, counts).await
    }

    /// Raw counter write for comments, anonymous path.
    pub async fn update_comment_counts(
        &mut self,
        comment_ref: &CommentRef,
        counts: ReactionCounts,
    ) -> Result<(), Error> {
        update_comment_counts(&mut self.sql, comment_ref, counts).await
    }
}
