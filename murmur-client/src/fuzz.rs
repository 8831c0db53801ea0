#![cfg(test)]

use std::collections::{HashMap, HashSet};

use bolero::generator::{bolero_generator, TypeGenerator};
use murmur_mock_server::{Endpoint, Failure};

use crate::{
    api::{Comment, CommentId, NewComment, PostId},
    build_comment_tree,
    client::tests::{harness, post},
    comment::tests::comment,
    prune_comment_thread, CacheKey, CommentNode,
};

/// `(id, parent, minute)` triples, ids and parents drawn from a small range so that links actually happen
fn comments_from(raw: &[(u8, Option<u8>, u8)]) -> Vec<Comment> {
    raw.iter()
        .map(|(id, parent, minute)| {
            let parent = parent.map(|p| (p % 32).to_string());
            comment(&(id % 32).to_string(), parent.as_deref(), *minute as i64)
        })
        .collect()
}

/// Ids whose ancestor chain reaches a top-level comment, computed the slow way
fn rooted_ids(comments: &[Comment]) -> HashSet<CommentId> {
    let mut first = HashMap::new();
    for c in comments {
        first.entry(c.id.clone()).or_insert(c);
    }
    let mut res = HashSet::new();
    for c in first.values() {
        let mut seen = HashSet::new();
        let mut cur = *c;
        loop {
            if !seen.insert(cur.id.clone()) {
                break;
            }
            match &cur.parent_id {
                None => {
                    res.insert(c.id.clone());
                    break;
                }
                Some(p) => match first.get(p) {
                    Some(parent) => cur = *parent,
                    None => break,
                },
            }
        }
    }
    res
}

fn flatten(tree: &[CommentNode]) -> Vec<(&Comment, Option<&CommentId>)> {
    let mut res = Vec::new();
    let mut todo = tree.iter().map(|n| (n, None)).collect::<Vec<_>>();
    while let Some((n, parent)) = todo.pop() {
        res.push((&n.comment, parent));
        todo.extend(n.replies.iter().map(|r| (r, Some(&n.comment.id))));
    }
    res
}

#[test]
fn tree_holds_exactly_the_rooted_comments() {
    bolero::check!()
        .with_type::<Vec<(u8, Option<u8>, u8)>>()
        .cloned()
        .for_each(|raw| {
            let comments = comments_from(&raw);
            let tree = build_comment_tree(&comments);
            let flat = flatten(&tree);

            let shown = flat.iter().map(|(c, _)| c.id.clone()).collect::<HashSet<_>>();
            assert_eq!(shown.len(), flat.len(), "a comment is shown twice");
            assert_eq!(shown, rooted_ids(&comments));
            for (c, parent) in flat.iter() {
                assert_eq!(c.parent_id.as_ref(), *parent);
            }

            let mut levels = vec![tree.as_slice()];
            while let Some(level) = levels.pop() {
                assert!(level
                    .windows(2)
                    .all(|w| w[0].comment.created_at <= w[1].comment.created_at));
                levels.extend(level.iter().map(|n| n.replies.as_slice()));
            }
        })
}

#[test]
fn pruning_removes_exactly_the_descendants() {
    bolero::check!()
        .with_type::<(Vec<(u8, Option<u8>, u8)>, u8)>()
        .cloned()
        .for_each(|(raw, target)| {
            let comments = comments_from(&raw);
            let target = CommentId((target % 32).to_string());
            let left = prune_comment_thread(&comments, &target);

            let left_ids = left.iter().map(|c| &c.id).collect::<HashSet<_>>();
            assert!(!left_ids.contains(&target));
            for c in left.iter() {
                if let Some(p) = &c.parent_id {
                    assert!(*p != target, "a reply to the deleted comment survived");
                }
            }
            // pruning is closed: whatever replies to a removed comment is removed too
            let removed = comments
                .iter()
                .filter(|c| !left_ids.contains(&c.id))
                .map(|c| &c.id)
                .collect::<HashSet<_>>();
            for c in left.iter() {
                if let Some(p) = &c.parent_id {
                    assert!(!removed.contains(p));
                }
            }
            // and nothing unrelated goes away
            for r in removed.iter() {
                assert!(
                    **r == target
                        || comments.iter().any(|c| c.id == **r
                            && c.parent_id.as_ref().map_or(false, |p| removed.contains(p))),
                    "{r} was removed without descending from {target}"
                );
            }
        })
}

#[derive(Clone, Debug, bolero::generator::TypeGenerator)]
enum FuzzOp {
    Create { parent: Option<u8>, fail: bool },
    Edit { target: u8, fail: bool },
    Delete { target: u8, fail: bool },
    Reload,
}

fn pick(comments: &[Comment], n: u8) -> Option<CommentId> {
    match comments.len() {
        0 => None,
        len => Some(comments[n as usize % len].id.clone()),
    }
}

#[test]
fn cache_follows_the_server() {
    bolero::check!()
        .with_generator(bolero::generator::gen_with::<Vec<FuzzOp>>().len(1..40usize))
        .cloned()
        .for_each(|ops| {
            let mut h = harness(20);
            let p = PostId(String::from("p"));
            h.remote.server().borrow_mut().test_insert_post(post("p", 0));
            h.pool.run_until(h.client.load_comments(&p)).unwrap();
            let key = CacheKey::Comments(p.clone());

            for op in ops {
                let cached = h.client.cache().peek(&key);
                let current = cached
                    .as_ref()
                    .and_then(|v| v.as_comments().cloned())
                    .unwrap_or_default();
                let (endpoint, fail, target) = match &op {
                    FuzzOp::Create { parent, fail } => (
                        Endpoint::CreateComment,
                        *fail,
                        parent.and_then(|n| pick(&current, n)),
                    ),
                    FuzzOp::Edit { target, fail } => match pick(&current, *target) {
                        None => continue,
                        t => (Endpoint::UpdateComment, *fail, t),
                    },
                    FuzzOp::Delete { target, fail } => match pick(&current, *target) {
                        None => continue,
                        t => (Endpoint::DeleteComment, *fail, t),
                    },
                    FuzzOp::Reload => (Endpoint::ListComments, false, None),
                };
                if fail {
                    h.remote
                        .fail_next(endpoint, Failure::Transport(String::from("flaky")));
                }
                let res = match (op, target) {
                    (FuzzOp::Create { .. }, parent_id) => {
                        let comment = NewComment {
                            content: String::from("fuzzed"),
                            parent_id,
                            ..NewComment::default()
                        };
                        h.pool
                            .run_until(h.client.create_comment(&p, comment))
                            .map(|_| ())
                    }
                    (FuzzOp::Edit { .. }, Some(id)) => h
                        .pool
                        .run_until(h.client.update_comment(&p, &id, String::from("edited")))
                        .map(|_| ()),
                    (FuzzOp::Delete { .. }, Some(id)) => {
                        h.pool.run_until(h.client.delete_comment(&p, &id))
                    }
                    (FuzzOp::Edit { .. } | FuzzOp::Delete { .. }, None) => continue,
                    (FuzzOp::Reload, _) => {
                        h.pool.run_until(h.client.load_comments(&p)).map(|_| ())
                    }
                };
                match res {
                    Err(_) => {
                        assert!(fail);
                        assert_eq!(h.client.cache().peek(&key), cached, "rollback is exact");
                    }
                    Ok(()) => {
                        assert!(!fail);
                        let server = h.remote.server().borrow().test_comments(&p);
                        assert_eq!(
                            build_comment_tree(&h.client.comments(&p).unwrap_or_default()),
                            build_comment_tree(&server),
                        );
                    }
                }
                h.pool.run_until_stalled();
            }
        })
}
