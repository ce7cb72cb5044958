use itertools::Itertools;
use log::trace;
use stackmeme_record::CommentRecord;
use stackmeme_ref::CommentRef;
use std::collections::{HashMap, HashSet};
use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("Parent comment not found: {0}")]
    ParentNotFound(CommentRef),
}

/// A forest of threaded comments, indexed by comment id.
///
/// Nodes hold parent pointers and ordered child lists, so a single comment
/// anywhere in the forest can be inserted, patched, or removed without
/// rebuilding the whole thing. The nested shape used for rendering is a
/// derived projection, see [`Forest::threaded`].
pub struct Forest {
    nodes: HashMap<CommentRef, Node>,
    roots: Vec<CommentRef>,
}

struct Node {
    record: CommentRecord,
    parent: Option<CommentRef>,
    children: Vec<CommentRef>,
}

/// Nested view of one comment and its replies, in creation order.
#[derive(Clone, Debug)]
pub struct ThreadedComment {
    pub record: CommentRecord,
    pub replies: Vec<ThreadedComment>,
}

/// Scalar fields that can be merged into an existing node.
#[derive(Clone, Debug, Default)]
pub struct CommentPatch {
    pub likes: Option<u32>,
    pub dislikes: Option<u32>,
    pub replies_count: Option<u32>,
}

impl Forest {
    /// Builds a forest from comments in ascending creation-time order.
    ///
    /// Comments with no parent become roots, keeping input order. Every other
    /// comment is appended to its parent's reply list if the parent is in the
    /// set. Orphans (missing parent, self-referential parent, or any comment
    /// only reachable through an orphan) are dropped without error; callers
    /// depend on this.
    pub fn build(records: Vec<CommentRecord>) -> Forest {
        let mut nodes: HashMap<CommentRef, Node> = HashMap::new();
        let mut roots: Vec<CommentRef> = Vec::new();

        // Sibling order follows input order, so collect the attachment links
        // before the records move into the index.
        let links = records
            .iter()
            .filter_map(|record| {
                record
                    .parent_id
                    .clone()
                    .map(|parent_id| (record.id.clone(), parent_id))
            })
            .collect_vec();

        for record in records {
            if record.parent_id.is_none() {
                roots.push(record.id.clone());
            }
            nodes.insert(
                record.id.clone(),
                Node {
                    record,
                    parent: None,
                    children: Vec::new(),
                },
            );
        }

        for (id, parent_id) in links {
            // A comment claiming itself as parent counts as an orphan.
            if parent_id == id {
                continue;
            }
            if nodes.contains_key(&parent_id) {
                if let Some(parent) = nodes.get_mut(&parent_id) {
                    parent.children.push(id.clone());
                }
                if let Some(child) = nodes.get_mut(&id) {
                    child.parent = Some(parent_id);
                }
            }
        }

        let mut forest = Forest { nodes, roots };
        forest.prune_unreachable();
        forest
    }

    // Orphans may themselves carry attached replies; everything not reachable
    // from a root is invisible and gets dropped from the index.
    fn prune_unreachable(&mut self) {
        let mut reachable: HashSet<CommentRef> = HashSet::new();
        let mut stack: Vec<CommentRef> = self.roots.clone();
        while let Some(id) = stack.pop() {
            if let Some(node) = self.nodes.get(&id) {
                stack.extend(node.children.iter().cloned());
            }
            reachable.insert(id);
        }
        if reachable.len() < self.nodes.len() {
            trace!(
                "Dropping {} orphaned comment(s) from thread",
                self.nodes.len() - reachable.len()
            );
        }
        self.nodes.retain(|id, _| reachable.contains(id));
    }

    /// Appends a top-level comment. No-op if the id is already present.
    pub fn push_root(&mut self, record: CommentRecord) {
        if self.nodes.contains_key(&record.id) {
            return;
        }
        self.roots.push(record.id.clone());
        self.nodes.insert(
            record.id.clone(),
            Node {
                record,
                parent: None,
                children: Vec::new(),
            },
        );
    }

    /// Appends a reply under `parent_id` and bumps its reply counter.
    ///
    /// Fails with [`Error::ParentNotFound`], leaving the forest unchanged,
    /// when the parent is absent. No-op if the reply id is already present.
    pub fn insert_reply(&mut self, parent_id: &CommentRef, record: CommentRecord) -> Result<(), Error> {
        if self.nodes.contains_key(&record.id) {
            return Ok(());
        }
        let parent = self
            .nodes
            .get_mut(parent_id)
            .ok_or_else(|| Error::ParentNotFound(parent_id.clone()))?;
        parent.children.push(record.id.clone());
        parent.record.replies_count += 1;
        self.nodes.insert(
            record.id.clone(),
            Node {
                record,
                parent: Some(parent_id.clone()),
                children: Vec::new(),
            },
        );
        Ok(())
    }

    /// Merges scalar fields into the node with `id`. Silent no-op when the id
    /// is absent; reply lists are never touched.
    pub fn update(&mut self, id: &CommentRef, patch: CommentPatch) {
        if let Some(node) = self.nodes.get_mut(id) {
            if let Some(likes) = patch.likes {
                node.record.likes = likes;
            }
            if let Some(dislikes) = patch.dislikes {
                node.record.dislikes = dislikes;
            }
            if let Some(replies_count) = patch.replies_count {
                node.record.replies_count = replies_count;
            }
        }
    }

    /// Removes the node with `id` and its entire subtree, wherever it sits.
    /// Silent no-op when the id is absent.
    pub fn remove(&mut self, id: &CommentRef) {
        let parent = match self.nodes.get(id) {
            Some(node) => node.parent.clone(),
            None => return,
        };
        match parent {
            Some(parent_id) => {
                if let Some(parent) = self.nodes.get_mut(&parent_id) {
                    parent.children.retain(|child| child != id);
                }
            }
            None => self.roots.retain(|root| root != id),
        }

        let mut stack = vec![id.clone()];
        while let Some(next) = stack.pop() {
            if let Some(node) = self.nodes.remove(&next) {
                stack.extend(node.children);
            }
        }
    }

    pub fn contains(&self, id: &CommentRef) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn get(&self, id: &CommentRef) -> Option<&CommentRecord> {
        self.nodes.get(id).map(|node| &node.record)
    }

    /// Total number of visible comments, including replies at every depth.
    pub fn count_all(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nested projection of the whole forest, for rendering.
    pub fn threaded(&self) -> Vec<ThreadedComment> {
        self.roots
            .iter()
            .filter_map(|id| self.thread_from(id))
            .collect()
    }

    fn thread_from(&self, id: &CommentRef) -> Option<ThreadedComment> {
        let node = self.nodes.get(id)?;
        Some(ThreadedComment {
            record: node.record.clone(),
            replies: node
                .children
                .iter()
                .filter_map(|child| self.thread_from(child))
                .collect(),
        })
    }

    /// Flattens the forest back to records, parents before children, siblings
    /// in creation order. Feeding the result back to [`Forest::build`]
    /// reproduces the same forest.
    pub fn records(&self) -> Vec<CommentRecord> {
        let mut out = Vec::with_capacity(self.nodes.len());
        for root in &self.roots {
            self.flatten_from(root, &mut out);
        }
        out
    }

    fn flatten_from(&self, id: &CommentRef, out: &mut Vec<CommentRecord>) {
        if let Some(node) = self.nodes.get(id) {
            out.push(node.record.clone());
            for child in &node.children {
                self.flatten_from(child, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn comment(id: &str, parent: Option<&str>, minute: i64) -> CommentRecord {
        CommentRecord {
            id: CommentRef::from_string(id.to_string()).unwrap(),
            meme_id: "m1".to_string().try_into().unwrap(),
            text: format!("comment {}", id),
            author: None,
            author_id: None,
            parent_id: parent.map(|p| CommentRef::from_string(p.to_string()).unwrap()),
            depth: 0,
            likes: 0,
            dislikes: 0,
            replies_count: 0,
            is_anonymous: true,
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + Duration::minutes(minute),
        }
    }

    fn id(s: &str) -> CommentRef {
        CommentRef::from_string(s.to_string()).unwrap()
    }

    #[test]
    fn test_empty_input() {
        let forest = Forest::build(Vec::new());
        assert!(forest.is_empty());
        assert_eq!(forest.count_all(), 0);
        assert!(forest.threaded().is_empty());
    }

    #[test]
    fn test_orphan_dropped() {
        // "c" claims a parent that is not in the set; it must disappear.
        let forest = Forest::build(vec![
            comment("a", None, 0),
            comment("b", Some("a"), 1),
            comment("c", Some("x"), 2),
        ]);
        assert_eq!(forest.count_all(), 2);
        let threaded = forest.threaded();
        assert_eq!(threaded.len(), 1);
        assert_eq!(threaded[0].record.id, id("a"));
        assert_eq!(threaded[0].replies.len(), 1);
        assert_eq!(threaded[0].replies[0].record.id, id("b"));
    }

    #[test]
    fn test_self_parent_dropped() {
        let forest = Forest::build(vec![comment("a", None, 0), comment("b", Some("b"), 1)]);
        assert_eq!(forest.count_all(), 1);
        assert!(!forest.contains(&id("b")));
    }

    #[test]
    fn test_orphan_chain_dropped() {
        // "b" replies to "a", but "a" is itself an orphan; neither is visible.
        let forest = Forest::build(vec![
            comment("root", None, 0),
            comment("a", Some("missing"), 1),
            comment("b", Some("a"), 2),
        ]);
        assert_eq!(forest.count_all(), 1);
        assert!(!forest.contains(&id("a")));
        assert!(!forest.contains(&id("b")));
    }

    #[test]
    fn test_sibling_order_is_creation_order() {
        let forest = Forest::build(vec![
            comment("a", None, 0),
            comment("r1", Some("a"), 1),
            comment("b", None, 2),
            comment("r2", Some("a"), 3),
            comment("r3", Some("a"), 4),
        ]);
        let threaded = forest.threaded();
        assert_eq!(threaded[0].record.id, id("a"));
        assert_eq!(threaded[1].record.id, id("b"));
        let replies: Vec<_> = threaded[0]
            .replies
            .iter()
            .map(|r| r.record.id.clone())
            .collect();
        assert_eq!(replies, vec![id("r1"), id("r2"), id("r3")]);
    }

    #[test]
    fn test_count_is_input_minus_orphans() {
        let records = vec![
            comment("a", None, 0),
            comment("b", Some("a"), 1),
            comment("c", Some("b"), 2),
            comment("d", Some("gone"), 3),
            comment("e", Some("d"), 4),
        ];
        let len = records.len();
        let forest = Forest::build(records);
        assert_eq!(forest.count_all(), len - 2);
    }

    #[test]
    fn test_build_idempotent_over_flattening() {
        let forest = Forest::build(vec![
            comment("a", None, 0),
            comment("b", Some("a"), 1),
            comment("c", Some("b"), 2),
            comment("d", None, 3),
            comment("e", Some("a"), 4),
        ]);
        let rebuilt = Forest::build(forest.records());
        assert_eq!(rebuilt.count_all(), forest.count_all());
        let flatten = |f: &Forest| {
            f.records()
                .into_iter()
                .map(|r| (r.id, r.parent_id))
                .collect::<Vec<_>>()
        };
        assert_eq!(flatten(&rebuilt), flatten(&forest));
    }

    #[test]
    fn test_insert_reply_deep() {
        let mut forest = Forest::build(vec![comment("a", None, 0), comment("b", Some("a"), 1)]);
        forest
            .insert_reply(&id("b"), comment("c", Some("b"), 2))
            .unwrap();
        assert_eq!(forest.count_all(), 3);
        assert_eq!(forest.get(&id("b")).unwrap().replies_count, 1);
        let threaded = forest.threaded();
        assert_eq!(threaded[0].replies[0].replies[0].record.id, id("c"));
    }

    #[test]
    fn test_insert_reply_parent_missing() {
        let mut forest = Forest::build(vec![comment("a", None, 0)]);
        let err = forest
            .insert_reply(&id("nope"), comment("c", Some("nope"), 1))
            .unwrap_err();
        assert!(matches!(err, Error::ParentNotFound(_)));
        assert_eq!(forest.count_all(), 1);
    }

    #[test]
    fn test_insert_then_remove_restores_structure() {
        let mut forest = Forest::build(vec![comment("a", None, 0), comment("b", Some("a"), 1)]);
        let before: Vec<_> = forest.records().into_iter().map(|r| r.id).collect();
        forest
            .insert_reply(&id("b"), comment("c", Some("b"), 2))
            .unwrap();
        forest.remove(&id("c"));
        let after: Vec<_> = forest.records().into_iter().map(|r| r.id).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_update_merges_counts_only() {
        let mut forest = Forest::build(vec![comment("a", None, 0), comment("b", Some("a"), 1)]);
        forest.update(
            &id("b"),
            CommentPatch {
                likes: Some(4),
                dislikes: Some(1),
                ..Default::default()
            },
        );
        let b = forest.get(&id("b")).unwrap();
        assert_eq!(b.likes, 4);
        assert_eq!(b.dislikes, 1);
        // Missing id is a silent no-op.
        forest.update(&id("ghost"), CommentPatch::default());
        assert_eq!(forest.count_all(), 2);
    }

    #[test]
    fn test_remove_nested_subtree() {
        let mut forest = Forest::build(vec![
            comment("a", None, 0),
            comment("b", Some("a"), 1),
            comment("c", Some("b"), 2),
            comment("d", Some("c"), 3),
            comment("e", None, 4),
        ]);
        forest.remove(&id("b"));
        assert_eq!(forest.count_all(), 2);
        assert!(forest.contains(&id("a")));
        assert!(forest.contains(&id("e")));
        assert!(!forest.contains(&id("c")));
        assert!(!forest.contains(&id("d")));
        // Absent id is a silent no-op.
        forest.remove(&id("b"));
        assert_eq!(forest.count_all(), 2);
    }

    #[test]
    fn test_remove_root() {
        let mut forest = Forest::build(vec![
            comment("a", None, 0),
            comment("b", Some("a"), 1),
            comment("e", None, 2),
        ]);
        forest.remove(&id("a"));
        assert_eq!(forest.count_all(), 1);
        let threaded = forest.threaded();
        assert_eq!(threaded.len(), 1);
        assert_eq!(threaded[0].record.id, id("e"));
    }

    #[test]
    fn test_push_root_duplicate_guard() {
        let mut forest = Forest::build(vec![comment("a", None, 0)]);
        forest.push_root(comment("b", None, 1));
        forest.push_root(comment("b", None, 1));
        assert_eq!(forest.count_all(), 2);
    }
}
