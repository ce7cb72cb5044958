//! View-session orchestration over the comment forest and the persistence
//! collaborator. Local state changes only after the corresponding database
//! call succeeds; a failed call leaves the forest exactly as it was.

use log::trace;
use stackmeme_db::{Database, NewComment};
use stackmeme_reactions::{
    reconcile, DeviceReactions, ReactionCounts, ReactionStateStore,
};
use stackmeme_record::{CommentRecord, MemeRecord, ReactionKind};
use stackmeme_ref::{CommentRef, IdentityRef, MemeRef};
use stackmeme_threads::{CommentPatch, Forest, ThreadedComment};
use thiserror::Error as ThisError;

pub const DEFAULT_MAX_DEPTH: u32 = 5;

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("Comment not found: {0}")]
    CommentNotFound(CommentRef),
    #[error("Meme not found: {0}")]
    MemeNotFound(MemeRef),
    #[error("Maximum reply depth of {0} reached")]
    DepthLimit(u32),
    #[error("Comment text is empty")]
    EmptyText,
    #[error("Persistence error, cause: {0}")]
    Db(#[from] stackmeme_db::Error),
    #[error("Reaction store error, cause: {0}")]
    Reactions(#[from] stackmeme_reactions::Error),
}

/// Who is posting: a signed-in user or an anonymous visitor.
#[derive(Clone, Debug)]
pub struct Author {
    pub name: Option<String>,
    pub identity: Option<IdentityRef>,
}

impl Author {
    pub fn anonymous() -> Author {
        Author {
            name: None,
            identity: None,
        }
    }

    pub fn user(name: &str, identity: IdentityRef) -> Author {
        Author {
            name: Some(name.to_string()),
            identity: Some(identity),
        }
    }

    fn is_anonymous(&self) -> bool {
        self.identity.is_none()
    }
}

/// Who is reacting, and through which state backend: server identity lists
/// for signed-in users, device-local sets for anonymous visitors.
pub enum Reactor<'a> {
    User(&'a IdentityRef),
    Device(&'a mut DeviceReactions),
}

/// One loaded comment thread for one meme. Owns the in-memory forest; every
/// mutation goes through the database first and is merged locally only on
/// success.
pub struct ThreadSession<'a> {
    db: &'a mut Database,
    meme_id: MemeRef,
    forest: Forest,
    max_depth: u32,
}

impl<'a> ThreadSession<'a> {
    pub async fn load(db: &'a mut Database, meme_id: MemeRef) -> Result<ThreadSession<'a>, Error> {
        Self::load_with_max_depth(db, meme_id, DEFAULT_MAX_DEPTH).await
    }

    pub async fn load_with_max_depth(
        db: &'a mut Database,
        meme_id: MemeRef,
        max_depth: u32,
    ) -> Result<ThreadSession<'a>, Error> {
        let records = db.get_comments_for_meme(&meme_id).await?;
        let forest = Forest::build(records);
        trace!(
            "Loaded thread for meme {} with {} comment(s)",
            meme_id,
            forest.count_all()
        );

        Ok(ThreadSession {
            db,
            meme_id,
            forest,
            max_depth,
        })
    }

    pub fn meme_id(&self) -> &MemeRef {
        &self.meme_id
    }

    /// Nested view of the thread, for rendering.
    pub fn comments(&self) -> Vec<ThreadedComment> {
        self.forest.threaded()
    }

    /// Total comments shown, replies at every depth included.
    pub fn comment_count(&self) -> usize {
        self.forest.count_all()
    }

    pub fn get_comment(&self, id: &CommentRef) -> Option<&CommentRecord> {
        self.forest.get(id)
    }

    /// Posts a top-level comment and appends it to the forest.
    pub async fn post_comment(
        &mut self,
        text: &str,
        author: &Author,
    ) -> Result<CommentRecord, Error> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::EmptyText);
        }

        let comment = self
            .db
            .create_comment(NewComment {
                meme_id: self.meme_id.clone(),
                text: text.to_string(),
                parent_id: None,
                author: author.name.clone(),
                author_id: author.identity.clone(),
                is_anonymous: author.is_anonymous(),
            })
            .await?;
        self.forest.push_root(comment.clone());

        Ok(comment)
    }

    /// Posts a reply under `parent_id`.
    ///
    /// Replying to a comment already sitting at the maximum depth is refused
    /// up front; nothing is sent to the database in that case.
    pub async fn post_reply(
        &mut self,
        parent_id: &CommentRef,
        text: &str,
        author: &Author,
    ) -> Result<CommentRecord, Error> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::EmptyText);
        }
        let parent = self
            .forest
            .get(parent_id)
            .ok_or_else(|| Error::CommentNotFound(parent_id.clone()))?;
        if parent.depth >= self.max_depth {
            return Err(Error::DepthLimit(self.max_depth));
        }

        let reply = self
            .db
            .create_comment(NewComment {
                meme_id: self.meme_id.clone(),
                text: text.to_string(),
                parent_id: Some(parent_id.clone()),
                author: author.name.clone(),
                author_id: author.identity.clone(),
                is_anonymous: author.is_anonymous(),
            })
            .await?;

        // The parent was present above and the forest has not changed since.
        self.forest.insert_reply(parent_id, reply.clone()).ok();

        Ok(reply)
    }

    /// Deletes a comment and its whole subtree, remotely then locally.
    pub async fn delete_comment(&mut self, id: &CommentRef) -> Result<(), Error> {
        self.db.delete_comment(id).await?;
        self.forest.remove(id);

        Ok(())
    }

    /// Applies a like/dislike to one comment, then re-syncs that comment's
    /// counters from the database into the forest.
    pub async fn react(
        &mut self,
        id: &CommentRef,
        kind: ReactionKind,
        reactor: Reactor<'_>,
    ) -> Result<ReactionCounts, Error> {
        let counts = match reactor {
            Reactor::User(identity) => self.db.apply_comment_reaction(id, kind, identity).await?,
            Reactor::Device(store) => {
                let comment = self
                    .db
                    .get_comment(id)
                    .await?
                    .ok_or_else(|| Error::CommentNotFound(id.clone()))?;
                let state = store.state(id.as_str())?;
                let (next, next_state) =
                    reconcile(ReactionCounts::new(comment.likes, comment.dislikes), state, kind);
                self.db.update_comment_counts(id, next).await?;
                store.set_state(id.as_str(), next_state)?;
                next
            }
        };

        // Counts come back from the collaborator, not from local arithmetic.
        let updated = self
            .db
            .get_comment(id)
            .await?
            .ok_or_else(|| Error::CommentNotFound(id.clone()))?;
        self.forest.update(
            id,
            CommentPatch {
                likes: Some(updated.likes),
                dislikes: Some(updated.dislikes),
                ..Default::default()
            },
        );

        Ok(counts)
    }
}

/// Applies a like/dislike to a meme through the reactor's state backend.
pub async fn react_to_meme(
    db: &mut Database,
    meme_id: &MemeRef,
    kind: ReactionKind,
    reactor: Reactor<'_>,
) -> Result<MemeRecord, Error> {
    match reactor {
        Reactor::User(identity) => Ok(db.apply_meme_reaction(meme_id, kind, identity).await?),
        Reactor::Device(store) => {
            let meme = db
                .get_meme(meme_id)
                .await?
                .ok_or_else(|| Error::MemeNotFound(meme_id.clone()))?;
            let state = store.state(meme_id.as_str())?;
            let (next, next_state) =
                reconcile(ReactionCounts::new(meme.likes, meme.dislikes), state, kind);
            // Remote write first; the device sets move only once it lands.
            db.update_meme_counts(meme_id, next).await?;
            store.set_state(meme_id.as_str(), next_state)?;

            Ok(MemeRecord {
                likes: next.likes,
                dislikes: next.dislikes,
                ..meme
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stackmeme_db::NewMeme;
    use stackmeme_record::Visibility;

    async fn test_db() -> Database {
        Database::new("sqlite::memory:").await.unwrap()
    }

    async fn seed_meme(db: &mut Database) -> MemeRecord {
        db.create_meme(NewMeme {
            image_url: "https://example.com/cat.png".to_string(),
            caption: None,
            author: None,
            author_id: None,
            is_anonymous: true,
            visibility: Visibility::Public,
        })
        .await
        .unwrap()
    }

    fn device_store(name: &str) -> DeviceReactions {
        let path = std::env::temp_dir().join(format!(
            "stackmeme-session-{}-{}.json",
            name,
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        DeviceReactions::open(path).unwrap()
    }

    fn identity(s: &str) -> IdentityRef {
        IdentityRef::from_string(s.to_string()).unwrap()
    }

    #[tokio::test]
    async fn test_load_builds_thread() {
        let mut db = test_db().await;
        let meme = seed_meme(&mut db).await;

        let mut session = ThreadSession::load(&mut db, meme.id.clone()).await.unwrap();
        let top = session
            .post_comment("first!", &Author::anonymous())
            .await
            .unwrap();
        session
            .post_reply(&top.id, "reply", &Author::anonymous())
            .await
            .unwrap();
        assert_eq!(session.comment_count(), 2);

        // A fresh session sees the same thread from storage.
        let session = ThreadSession::load(&mut db, meme.id.clone()).await.unwrap();
        assert_eq!(session.comment_count(), 2);
        let comments = session.comments();
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].replies.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_text_rejected() {
        let mut db = test_db().await;
        let meme = seed_meme(&mut db).await;
        let mut session = ThreadSession::load(&mut db, meme.id.clone()).await.unwrap();

        let err = session
            .post_comment("   ", &Author::anonymous())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EmptyText));
        assert_eq!(session.comment_count(), 0);
    }

    #[tokio::test]
    async fn test_reply_depth_limit() {
        let mut db = test_db().await;
        let meme = seed_meme(&mut db).await;
        let mut session = ThreadSession::load(&mut db, meme.id.clone()).await.unwrap();

        let mut last = session
            .post_comment("depth 0", &Author::anonymous())
            .await
            .unwrap();
        for depth in 1..=DEFAULT_MAX_DEPTH {
            last = session
                .post_reply(&last.id, &format!("depth {}", depth), &Author::anonymous())
                .await
                .unwrap();
        }
        assert_eq!(last.depth, DEFAULT_MAX_DEPTH);

        let count_before = session.comment_count();
        let err = session
            .post_reply(&last.id, "too deep", &Author::anonymous())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DepthLimit(5)));
        assert_eq!(session.comment_count(), count_before);
    }

    #[tokio::test]
    async fn test_reply_to_missing_parent() {
        let mut db = test_db().await;
        let meme = seed_meme(&mut db).await;
        let mut session = ThreadSession::load(&mut db, meme.id.clone()).await.unwrap();

        let ghost = CommentRef::unique();
        let err = session
            .post_reply(&ghost, "hello?", &Author::anonymous())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CommentNotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_removes_subtree_everywhere() {
        let mut db = test_db().await;
        let meme = seed_meme(&mut db).await;
        let mut session = ThreadSession::load(&mut db, meme.id.clone()).await.unwrap();

        let a = session
            .post_comment("a", &Author::anonymous())
            .await
            .unwrap();
        let b = session
            .post_reply(&a.id, "b", &Author::anonymous())
            .await
            .unwrap();
        let c = session
            .post_reply(&b.id, "c", &Author::anonymous())
            .await
            .unwrap();

        session.delete_comment(&b.id).await.unwrap();
        assert_eq!(session.comment_count(), 1);
        assert!(session.get_comment(&a.id).is_some());
        assert!(session.get_comment(&c.id).is_none());

        // Gone from storage too, cascade included.
        let reloaded = ThreadSession::load(&mut db, meme.id.clone()).await.unwrap();
        assert_eq!(reloaded.comment_count(), 1);
    }

    #[tokio::test]
    async fn test_react_as_user_resyncs_counts() {
        let mut db = test_db().await;
        let meme = seed_meme(&mut db).await;
        let mut session = ThreadSession::load(&mut db, meme.id.clone()).await.unwrap();

        let user = identity("u1");
        let comment = session
            .post_comment("rate me", &Author::user("Uma", user.clone()))
            .await
            .unwrap();

        let counts = session
            .react(&comment.id, ReactionKind::Like, Reactor::User(&user))
            .await
            .unwrap();
        assert_eq!((counts.likes, counts.dislikes), (1, 0));
        assert_eq!(session.get_comment(&comment.id).unwrap().likes, 1);

        let counts = session
            .react(&comment.id, ReactionKind::Dislike, Reactor::User(&user))
            .await
            .unwrap();
        assert_eq!((counts.likes, counts.dislikes), (0, 1));
        let local = session.get_comment(&comment.id).unwrap();
        assert_eq!((local.likes, local.dislikes), (0, 1));
    }

    #[tokio::test]
    async fn test_react_as_device_toggles() {
        let mut db = test_db().await;
        let meme = seed_meme(&mut db).await;
        let mut session = ThreadSession::load(&mut db, meme.id.clone()).await.unwrap();
        let mut store = device_store("comment-toggle");

        let comment = session
            .post_comment("anon thoughts", &Author::anonymous())
            .await
            .unwrap();

        let counts = session
            .react(&comment.id, ReactionKind::Like, Reactor::Device(&mut store))
            .await
            .unwrap();
        assert_eq!(counts.likes, 1);
        assert!(store.liked_ids().contains(comment.id.as_str()));

        let counts = session
            .react(&comment.id, ReactionKind::Like, Reactor::Device(&mut store))
            .await
            .unwrap();
        assert_eq!(counts.likes, 0);
        assert!(!store.liked_ids().contains(comment.id.as_str()));

        store.clear_all().unwrap();
    }

    #[tokio::test]
    async fn test_meme_reaction_both_backends() {
        let mut db = test_db().await;
        let meme = seed_meme(&mut db).await;

        let user = identity("u1");
        let updated = react_to_meme(&mut db, &meme.id, ReactionKind::Like, Reactor::User(&user))
            .await
            .unwrap();
        assert_eq!(updated.likes, 1);

        let mut store = device_store("meme-react");
        let updated = react_to_meme(
            &mut db,
            &meme.id,
            ReactionKind::Like,
            Reactor::Device(&mut store),
        )
        .await
        .unwrap();
        assert_eq!(updated.likes, 2);

        // Anonymous switch moves the device set and both counters.
        let updated = react_to_meme(
            &mut db,
            &meme.id,
            ReactionKind::Dislike,
            Reactor::Device(&mut store),
        )
        .await
        .unwrap();
        assert_eq!((updated.likes, updated.dislikes), (1, 1));
        assert!(store.disliked_ids().contains(meme.id.as_str()));

        store.clear_all().unwrap();
    }
}
