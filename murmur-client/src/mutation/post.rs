use async_trait::async_trait;
use chrono::Utc;

use super::{edit_post, edit_posts, Mutation, MutationContext};
use crate::{
    api::{NewPost, Post, PostId, PostPatch, Remote, RemoteError},
    cache::{CacheKey, CacheValue, ResourceCache},
};

/// Publishes a post, showing it on top of the first page right away
#[derive(Clone, Debug)]
pub struct CreatePost {
    pub post: NewPost,
}

impl CreatePost {
    /// What the post is expected to look like once the server accepts it
    fn placeholder(&self, id: PostId) -> Post {
        Post {
            id,
            title: self.post.title.clone().unwrap_or_default(),
            content: self.post.content.clone().unwrap_or_default(),
            author_name: self.post.author_name.clone().unwrap_or_default(),
            author_avatar: self.post.author_avatar.clone().unwrap_or_default(),
            created_at: self.post.created_at.unwrap_or_else(Utc::now),
        }
    }
}

#[async_trait(?Send)]
impl Mutation for CreatePost {
    type Output = Post;

    fn describe(&self) -> String {
        String::from("create post")
    }

    fn touched_keys(&self) -> Vec<CacheKey> {
        vec![CacheKey::Posts]
    }

    fn temp_id_prefix(&self) -> Option<&'static str> {
        Some("optimistic-post")
    }

    fn apply_optimistic(&self, cache: &ResourceCache, ctx: &MutationContext) {
        let id = PostId(ctx.temp_id().unwrap_or_default().to_string());
        let post = self.placeholder(id);
        edit_posts(cache, true, |p| p.prepend(post));
    }

    async fn send(&self, remote: &dyn Remote) -> Result<Post, RemoteError> {
        remote.create_post(&self.post).await
    }

    fn reconcile(&self, cache: &ResourceCache, ctx: &MutationContext, output: &Post) {
        if let Some(temp) = ctx.temp_id() {
            edit_posts(cache, false, |p| p.replace(&PostId(temp.to_string()), output));
        }
        cache.write(
            CacheKey::Post(output.id.clone()),
            CacheValue::Post(output.clone().into()),
        );
    }
}

#[derive(Clone, Debug)]
pub struct UpdatePost {
    pub id: PostId,
    pub patch: PostPatch,
}

#[async_trait(?Send)]
impl Mutation for UpdatePost {
    type Output = Post;

    fn describe(&self) -> String {
        format!("update post {}", self.id)
    }

    fn touched_keys(&self) -> Vec<CacheKey> {
        vec![CacheKey::Posts, CacheKey::Post(self.id.clone())]
    }

    fn apply_optimistic(&self, cache: &ResourceCache, _ctx: &MutationContext) {
        edit_posts(cache, false, |p| p.update(&self.id, |post| post.apply(&self.patch)));
        edit_post(cache, &self.id, |post| post.apply(&self.patch));
    }

    async fn send(&self, remote: &dyn Remote) -> Result<Post, RemoteError> {
        remote.update_post(&self.id, &self.patch).await
    }

    fn reconcile(&self, cache: &ResourceCache, _ctx: &MutationContext, output: &Post) {
        edit_posts(cache, false, |p| p.replace(&self.id, output));
        cache.write(
            CacheKey::Post(output.id.clone()),
            CacheValue::Post(output.clone().into()),
        );
    }
}

#[derive(Clone, Debug)]
pub struct DeletePost {
    pub id: PostId,
}

#[async_trait(?Send)]
impl Mutation for DeletePost {
    type Output = ();

    fn describe(&self) -> String {
        format!("delete post {}", self.id)
    }

    fn touched_keys(&self) -> Vec<CacheKey> {
        vec![CacheKey::Posts, CacheKey::Post(self.id.clone())]
    }

    fn apply_optimistic(&self, cache: &ResourceCache, _ctx: &MutationContext) {
        edit_posts(cache, false, |p| p.remove(&self.id));
        cache.remove(&CacheKey::Post(self.id.clone()));
    }

    async fn send(&self, remote: &dyn Remote) -> Result<(), RemoteError> {
        remote.delete_post(&self.id).await
    }

    fn reconcile(&self, _cache: &ResourceCache, _ctx: &MutationContext, _output: &()) {}
}
