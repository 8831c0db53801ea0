use std::collections::{HashMap, HashSet};

use crate::api::{Comment, CommentId};

/// A comment along with its replies, oldest first
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommentNode {
    pub comment: Comment,
    pub replies: Vec<CommentNode>,
}

impl CommentNode {
    /// Number of comments in this thread, self included
    pub fn len(&self) -> usize {
        let mut res = 0;
        let mut todo = vec![self];
        while let Some(n) = todo.pop() {
            res += 1;
            todo.extend(n.replies.iter());
        }
        res
    }
}

impl Drop for CommentNode {
    fn drop(&mut self) {
        // threads can be arbitrarily deep
        let mut todo = std::mem::take(&mut self.replies);
        while let Some(mut n) = todo.pop() {
            todo.append(&mut n.replies);
        }
    }
}

/// Builds the reply tree of a flat list of comments
///
/// Only comments whose ancestor chain resolves to a top-level comment of
/// `comments` make it into the tree: a missing parent (or a parent cycle)
/// prunes the whole subthread. Siblings are sorted by creation date, ties
/// keeping the input order.
pub fn build_comment_tree(comments: &[Comment]) -> Vec<CommentNode> {
    // Arena of the comments, first occurrence of an id wins
    let mut index = HashMap::with_capacity(comments.len());
    let mut arena = Vec::with_capacity(comments.len());
    for c in comments {
        if index.contains_key(&c.id) {
            tracing::warn!(comment=?c.id, "ignoring duplicate comment id");
            continue;
        }
        index.insert(&c.id, arena.len());
        arena.push(c);
    }
    let parent_of = |i: usize| -> Option<Option<usize>> {
        match &arena[i].parent_id {
            None => Some(None),
            Some(p) => index.get(p).map(|p| Some(*p)),
        }
    };

    // Grow the set of comments attached to a root until a fixed point is reached
    let mut attached = vec![false; arena.len()];
    let mut changed = true;
    while changed {
        changed = false;
        for i in 0..arena.len() {
            if attached[i] {
                continue;
            }
            let now_attached = match parent_of(i) {
                Some(None) => true,
                Some(Some(p)) => attached[p],
                None => false,
            };
            if now_attached {
                attached[i] = true;
                changed = true;
            }
        }
    }

    let mut roots = Vec::new();
    let mut children = vec![Vec::new(); arena.len()];
    for i in (0..arena.len()).filter(|i| attached[*i]) {
        match parent_of(i) {
            Some(Some(p)) => children[p].push(i),
            _ => roots.push(i),
        }
    }
    let by_date = |list: &mut Vec<usize>| list.sort_by_key(|i| arena[*i].created_at);
    by_date(&mut roots);
    children.iter_mut().for_each(by_date);

    // Parents come before their children in a breadth-first walk, so building
    // the nodes in reverse order always finds the replies ready
    let mut order = roots.clone();
    let mut cursor = 0;
    while cursor < order.len() {
        let parent = order[cursor];
        order.extend(children[parent].iter().copied());
        cursor += 1;
    }
    let mut built: Vec<Option<CommentNode>> = vec![None; arena.len()];
    for &i in order.iter().rev() {
        let replies = children[i]
            .iter()
            .filter_map(|c| built[*c].take())
            .collect();
        built[i] = Some(CommentNode {
            comment: arena[i].clone(),
            replies,
        });
    }
    roots.into_iter().filter_map(|i| built[i].take()).collect()
}

/// Removes `id` and every comment transitively replying to it
pub fn prune_comment_thread(comments: &[Comment], id: &CommentId) -> Vec<Comment> {
    let mut removed = HashSet::new();
    removed.insert(id);
    let mut added = true;
    while added {
        added = false;
        for c in comments {
            if removed.contains(&c.id) {
                continue;
            }
            if let Some(parent) = &c.parent_id {
                if removed.contains(parent) {
                    removed.insert(&c.id);
                    added = true;
                }
            }
        }
    }
    comments
        .iter()
        .filter(|c| !removed.contains(&c.id))
        .cloned()
        .collect()
}
