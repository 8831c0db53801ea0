use async_trait::async_trait;
use chrono::Utc;

use super::{edit_comments, Mutation, MutationContext};
use crate::{
    api::{Comment, CommentId, CommentPatch, NewComment, PostId, Remote, RemoteError},
    cache::{CacheKey, ResourceCache},
    prune_comment_thread,
};

/// Swaps comment `id` for `confirmed`, keeping a single copy of `confirmed`
fn replace_comment(comments: &mut Vec<Comment>, id: &CommentId, confirmed: &Comment) {
    let mut seen = false;
    comments.retain_mut(|c| {
        if c.id == *id || c.id == confirmed.id {
            if seen {
                return false;
            }
            seen = true;
            *c = confirmed.clone();
        }
        true
    });
}

/// Posts a comment, or a reply when `comment.parent_id` is set
#[derive(Clone, Debug)]
pub struct CreateComment {
    pub post: PostId,
    pub comment: NewComment,
}

#[async_trait(?Send)]
impl Mutation for CreateComment {
    type Output = Comment;

    fn describe(&self) -> String {
        format!("comment on post {}", self.post)
    }

    fn touched_keys(&self) -> Vec<CacheKey> {
        vec![CacheKey::Comments(self.post.clone())]
    }

    fn temp_id_prefix(&self) -> Option<&'static str> {
        Some("optimistic-comment")
    }

    fn apply_optimistic(&self, cache: &ResourceCache, ctx: &MutationContext) {
        let placeholder = Comment {
            id: CommentId(ctx.temp_id().unwrap_or_default().to_string()),
            content: self.comment.content.clone(),
            author_name: self.comment.author_name.clone().unwrap_or_default(),
            author_avatar: self.comment.author_avatar.clone().unwrap_or_default(),
            parent_id: self.comment.parent_id.clone(),
            created_at: self.comment.created_at.unwrap_or_else(Utc::now),
        };
        edit_comments(cache, &self.post, true, |c| c.push(placeholder));
    }

    async fn send(&self, remote: &dyn Remote) -> Result<Comment, RemoteError> {
        remote.create_comment(&self.post, &self.comment).await
    }

    fn reconcile(&self, cache: &ResourceCache, ctx: &MutationContext, output: &Comment) {
        if let Some(temp) = ctx.temp_id() {
            let temp = CommentId(temp.to_string());
            edit_comments(cache, &self.post, false, |c| {
                replace_comment(c, &temp, output)
            });
        }
    }
}

/// Changes the content of a comment; nothing else about it can change
#[derive(Clone, Debug)]
pub struct UpdateComment {
    pub post: PostId,
    pub id: CommentId,
    pub content: String,
}

#[async_trait(?Send)]
impl Mutation for UpdateComment {
    type Output = Comment;

    fn describe(&self) -> String {
        format!("edit comment {} of post {}", self.id, self.post)
    }

    fn touched_keys(&self) -> Vec<CacheKey> {
        vec![CacheKey::Comments(self.post.clone())]
    }

    fn apply_optimistic(&self, cache: &ResourceCache, _ctx: &MutationContext) {
        edit_comments(cache, &self.post, false, |comments| {
            for c in comments.iter_mut().filter(|c| c.id == self.id) {
                c.content = self.content.clone();
            }
        });
    }

    async fn send(&self, remote: &dyn Remote) -> Result<Comment, RemoteError> {
        let patch = CommentPatch {
            content: self.content.clone(),
        };
        remote.update_comment(&self.post, &self.id, &patch).await
    }

    fn reconcile(&self, cache: &ResourceCache, _ctx: &MutationContext, output: &Comment) {
        edit_comments(cache, &self.post, false, |c| {
            replace_comment(c, &self.id, output)
        });
    }
}

/// Deletes a comment along with every reply below it
#[derive(Clone, Debug)]
pub struct DeleteComment {
    pub post: PostId,
    pub id: CommentId,
}

#[async_trait(?Send)]
impl Mutation for DeleteComment {
    type Output = ();

    fn describe(&self) -> String {
        format!("delete comment {} of post {}", self.id, self.post)
    }

    fn touched_keys(&self) -> Vec<CacheKey> {
        vec![CacheKey::Comments(self.post.clone())]
    }

    fn apply_optimistic(&self, cache: &ResourceCache, _ctx: &MutationContext) {
        edit_comments(cache, &self.post, false, |c| {
            *c = prune_comment_thread(c, &self.id)
        });
    }

    async fn send(&self, remote: &dyn Remote) -> Result<(), RemoteError> {
        remote.delete_comment(&self.post, &self.id).await
    }

    fn reconcile(&self, _cache: &ResourceCache, _ctx: &MutationContext, _output: &()) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comment::tests::comment;

    #[test]
    fn replacing_keeps_one_copy() {
        let mut list = vec![
            comment("tmp", None, 1),
            comment("9", None, 1),
            comment("a", None, 2),
        ];
        let confirmed = comment("9", None, 1);
        replace_comment(&mut list, &CommentId(String::from("tmp")), &confirmed);
        assert_eq!(list, vec![comment("9", None, 1), comment("a", None, 2)]);
        let once = list.clone();
        replace_comment(&mut list, &CommentId(String::from("tmp")), &confirmed);
        assert_eq!(list, once);
    }
}
