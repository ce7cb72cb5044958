use log::trace;
use serde::{Deserialize, Serialize};
use stackmeme_record::{MemeRecord, ReactionKind};
use stackmeme_ref::IdentityRef;
use std::collections::HashSet;
use std::io;
use std::path::PathBuf;
use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("Failed to read device reactions, cause: {0}")]
    ReadStore(#[source] io::Error),
    #[error("Failed to write device reactions, cause: {0}")]
    WriteStore(#[source] io::Error),
    #[error("Json error, cause: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Reaction store is scoped to target {expected}, got {got}")]
    TargetMismatch { expected: String, got: String },
}

/// The single active reaction an identity holds against one target.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReactionState {
    #[default]
    None,
    Liked,
    Disliked,
}

impl ReactionState {
    pub fn active(kind: ReactionKind) -> ReactionState {
        match kind {
            ReactionKind::Like => ReactionState::Liked,
            ReactionKind::Dislike => ReactionState::Disliked,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReactionCounts {
    pub likes: u32,
    pub dislikes: u32,
}

impl ReactionCounts {
    pub fn new(likes: u32, dislikes: u32) -> ReactionCounts {
        ReactionCounts { likes, dislikes }
    }

    fn bump(&mut self, kind: ReactionKind) {
        match kind {
            ReactionKind::Like => self.likes += 1,
            ReactionKind::Dislike => self.dislikes += 1,
        }
    }

    // Counters are never allowed below zero, whatever the stored state
    // claimed.
    fn drop_floored(&mut self, kind: ReactionKind) {
        match kind {
            ReactionKind::Like => self.likes = self.likes.saturating_sub(1),
            ReactionKind::Dislike => self.dislikes = self.dislikes.saturating_sub(1),
        }
    }
}

/// One active reaction per identity, switching allowed, re-clicking toggles
/// off. Pure counter arithmetic; how `state` was obtained is the store's
/// business.
pub fn reconcile(
    counts: ReactionCounts,
    state: ReactionState,
    requested: ReactionKind,
) -> (ReactionCounts, ReactionState) {
    let mut next = counts;
    if state == ReactionState::active(requested) {
        next.drop_floored(requested);
        (next, ReactionState::None)
    } else {
        next.bump(requested);
        if state != ReactionState::None {
            next.drop_floored(requested.opposite());
        }
        (next, ReactionState::active(requested))
    }
}

/// Where an identity's current reaction against a target is read from and
/// written to. Injected per acting identity: device-local sets for anonymous
/// visitors, identity lists on the target for authenticated users.
pub trait ReactionStateStore {
    fn state(&self, target_id: &str) -> Result<ReactionState, Error>;
    fn set_state(&mut self, target_id: &str, next: ReactionState) -> Result<(), Error>;
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct DeviceData {
    liked: HashSet<String>,
    disliked: HashSet<String>,
}

/// Device-local reaction sets for anonymous visitors, persisted as a JSON
/// file so they survive across sessions. Target ids only; nothing here is
/// ever transmitted as identity data.
pub struct DeviceReactions {
    path: PathBuf,
    data: DeviceData,
}

impl DeviceReactions {
    pub fn open(path: PathBuf) -> Result<DeviceReactions, Error> {
        let data = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => DeviceData::default(),
            Err(err) => return Err(Error::ReadStore(err)),
        };
        Ok(DeviceReactions { path, data })
    }

    fn save(&self) -> Result<(), Error> {
        let bytes = serde_json::to_vec(&self.data)?;
        std::fs::write(&self.path, bytes).map_err(Error::WriteStore)?;
        Ok(())
    }

    pub fn liked_ids(&self) -> &HashSet<String> {
        &self.data.liked
    }

    pub fn disliked_ids(&self) -> &HashSet<String> {
        &self.data.disliked
    }

    pub fn set_liked_ids(&mut self, ids: HashSet<String>) -> Result<(), Error> {
        self.data.liked = ids;
        self.save()
    }

    pub fn set_disliked_ids(&mut self, ids: HashSet<String>) -> Result<(), Error> {
        self.data.disliked = ids;
        self.save()
    }

    pub fn clear_all(&mut self) -> Result<(), Error> {
        self.data = DeviceData::default();
        self.save()
    }
}

impl ReactionStateStore for DeviceReactions {
    fn state(&self, target_id: &str) -> Result<ReactionState, Error> {
        if self.data.liked.contains(target_id) {
            Ok(ReactionState::Liked)
        } else if self.data.disliked.contains(target_id) {
            Ok(ReactionState::Disliked)
        } else {
            Ok(ReactionState::None)
        }
    }

    // An id present in "liked" must never also sit in "disliked"; removing
    // from both before re-inserting keeps that true no matter what state the
    // file was in.
    fn set_state(&mut self, target_id: &str, next: ReactionState) -> Result<(), Error> {
        self.data.liked.remove(target_id);
        self.data.disliked.remove(target_id);
        match next {
            ReactionState::Liked => {
                self.data.liked.insert(target_id.to_string());
            }
            ReactionState::Disliked => {
                self.data.disliked.insert(target_id.to_string());
            }
            ReactionState::None => {}
        }
        trace!("Device reaction for {} -> {:?}", target_id, next);
        self.save()
    }
}

/// Authenticated backend: reaction state is membership of the identity in the
/// target's like/dislike id lists. The store is scoped to one target; the
/// updated lists are handed back to the caller for persistence.
pub struct IdentityLists {
    identity: IdentityRef,
    target_id: String,
    pub likes: Vec<IdentityRef>,
    pub dislikes: Vec<IdentityRef>,
}

impl IdentityLists {
    pub fn new(
        identity: IdentityRef,
        target_id: String,
        likes: Vec<IdentityRef>,
        dislikes: Vec<IdentityRef>,
    ) -> IdentityLists {
        IdentityLists {
            identity,
            target_id,
            likes,
            dislikes,
        }
    }

    pub fn for_meme(identity: IdentityRef, meme: &MemeRecord) -> IdentityLists {
        IdentityLists::new(
            identity,
            meme.id.to_string(),
            meme.user_likes.clone(),
            meme.user_dislikes.clone(),
        )
    }

    fn check_target(&self, target_id: &str) -> Result<(), Error> {
        if self.target_id == target_id {
            Ok(())
        } else {
            Err(Error::TargetMismatch {
                expected: self.target_id.clone(),
                got: target_id.to_string(),
            })
        }
    }
}

impl ReactionStateStore for IdentityLists {
    fn state(&self, target_id: &str) -> Result<ReactionState, Error> {
        self.check_target(target_id)?;
        if self.likes.contains(&self.identity) {
            Ok(ReactionState::Liked)
        } else if self.dislikes.contains(&self.identity) {
            Ok(ReactionState::Disliked)
        } else {
            Ok(ReactionState::None)
        }
    }

    fn set_state(&mut self, target_id: &str, next: ReactionState) -> Result<(), Error> {
        self.check_target(target_id)?;
        self.likes.retain(|id| id != &self.identity);
        self.dislikes.retain(|id| id != &self.identity);
        match next {
            ReactionState::Liked => self.likes.push(self.identity.clone()),
            ReactionState::Disliked => self.dislikes.push(self.identity.clone()),
            ReactionState::None => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconcile_fresh_like() {
        let (counts, state) = reconcile(
            ReactionCounts::default(),
            ReactionState::None,
            ReactionKind::Like,
        );
        assert_eq!(counts, ReactionCounts::new(1, 0));
        assert_eq!(state, ReactionState::Liked);
    }

    #[test]
    fn test_reconcile_toggle_off() {
        let (counts, state) = reconcile(
            ReactionCounts::new(1, 0),
            ReactionState::Liked,
            ReactionKind::Like,
        );
        assert_eq!(counts, ReactionCounts::new(0, 0));
        assert_eq!(state, ReactionState::None);
    }

    #[test]
    fn test_reconcile_switch() {
        let (counts, state) = reconcile(
            ReactionCounts::new(3, 2),
            ReactionState::Liked,
            ReactionKind::Dislike,
        );
        assert_eq!(counts, ReactionCounts::new(2, 3));
        assert_eq!(state, ReactionState::Disliked);
    }

    #[test]
    fn test_reconcile_never_negative() {
        // Stored state can disagree with counters that are already zero.
        let (counts, _) = reconcile(
            ReactionCounts::new(0, 0),
            ReactionState::Liked,
            ReactionKind::Like,
        );
        assert_eq!(counts, ReactionCounts::new(0, 0));
        let (counts, _) = reconcile(
            ReactionCounts::new(0, 0),
            ReactionState::Disliked,
            ReactionKind::Like,
        );
        assert_eq!(counts, ReactionCounts::new(1, 0));
    }

    #[test]
    fn test_reconcile_walk() {
        // like -> like again -> dislike, per the observed UI behavior.
        let start = ReactionCounts::default();
        let (counts, state) = reconcile(start, ReactionState::None, ReactionKind::Like);
        assert_eq!((counts.likes, counts.dislikes), (1, 0));
        let (counts, state) = reconcile(counts, state, ReactionKind::Like);
        assert_eq!((counts.likes, counts.dislikes), (0, 0));
        assert_eq!(state, ReactionState::None);
        let (counts, state) = reconcile(counts, state, ReactionKind::Dislike);
        assert_eq!((counts.likes, counts.dislikes), (0, 1));
        assert_eq!(state, ReactionState::Disliked);
    }

    fn temp_store(name: &str) -> DeviceReactions {
        let path = std::env::temp_dir().join(format!(
            "stackmeme-reactions-{}-{}.json",
            name,
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        DeviceReactions::open(path).unwrap()
    }

    #[test]
    fn test_device_store_round_trip() {
        let mut store = temp_store("round-trip");
        assert_eq!(store.state("m1").unwrap(), ReactionState::None);

        store.set_state("m1", ReactionState::Liked).unwrap();
        assert_eq!(store.state("m1").unwrap(), ReactionState::Liked);

        // Durable across re-open.
        let reopened = DeviceReactions::open(store.path.clone()).unwrap();
        assert_eq!(reopened.state("m1").unwrap(), ReactionState::Liked);

        store.clear_all().unwrap();
    }

    #[test]
    fn test_device_store_mutual_exclusion() {
        let mut store = temp_store("exclusion");
        store.set_state("m1", ReactionState::Liked).unwrap();
        store.set_state("m1", ReactionState::Disliked).unwrap();
        assert!(!store.liked_ids().contains("m1"));
        assert!(store.disliked_ids().contains("m1"));

        store.set_state("m1", ReactionState::None).unwrap();
        assert!(!store.liked_ids().contains("m1"));
        assert!(!store.disliked_ids().contains("m1"));

        store.clear_all().unwrap();
    }

    fn identity(s: &str) -> IdentityRef {
        IdentityRef::from_string(s.to_string()).unwrap()
    }

    #[test]
    fn test_identity_lists_state() {
        let lists = IdentityLists::new(
            identity("u1"),
            "m1".to_string(),
            vec![identity("u2"), identity("u1")],
            vec![identity("u3")],
        );
        assert_eq!(lists.state("m1").unwrap(), ReactionState::Liked);
        assert!(lists.state("m2").is_err());
    }

    #[test]
    fn test_identity_lists_switch() {
        let mut lists = IdentityLists::new(
            identity("u1"),
            "m1".to_string(),
            vec![identity("u1")],
            Vec::new(),
        );
        lists.set_state("m1", ReactionState::Disliked).unwrap();
        assert!(lists.likes.is_empty());
        assert_eq!(lists.dislikes, vec![identity("u1")]);
        assert_eq!(lists.state("m1").unwrap(), ReactionState::Disliked);
    }
}
