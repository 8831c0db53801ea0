use std::{rc::Rc, sync::Arc};

use chrono::Utc;
use futures::task::LocalSpawn;

use crate::{
    api::{
        Comment, CommentId, NewComment, NewPost, PageRequest, Post, PostId, PostPatch, Remote,
        RemoteError,
    },
    build_comment_tree,
    cache::{CacheKey, CacheValue, Fetcher, ResourceCache},
    error::normalize,
    fetch::{with_retries, RemoteFetcher},
    mutation::{
        CreateComment, CreatePost, DeleteComment, DeletePost, Orchestrator, UpdateComment,
        UpdatePost,
    },
    CommentNode, NormalizedError, PostPages, TempIdSource,
};

/// Who new posts and comments are attributed to when the caller does not say
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Author {
    pub name: String,
    pub avatar: String,
}

impl Default for Author {
    fn default() -> Author {
        Author {
            name: String::from("Anonymous"),
            avatar: String::from("https://i.pravatar.cc/150?img=6"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Number of posts per page
    pub page_size: usize,
    /// Extra attempts given to failed reads, mutations are never retried
    pub refetch_retries: u32,
    pub default_author: Author,
}

impl Default for ClientConfig {
    fn default() -> ClientConfig {
        ClientConfig {
            page_size: 20,
            refetch_retries: 2,
            default_author: Author::default(),
        }
    }
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|s| !s.is_empty())
}

/// Everything a posts & comments UI reads and does
pub struct Client {
    config: ClientConfig,
    cache: ResourceCache,
    remote: Rc<dyn Remote>,
    fetcher: Rc<RemoteFetcher>,
    orchestrator: Orchestrator,
}

impl Client {
    pub fn new(
        remote: Rc<dyn Remote>,
        spawner: Rc<dyn LocalSpawn>,
        ids: Rc<dyn TempIdSource>,
        config: ClientConfig,
    ) -> Client {
        let cache = ResourceCache::new(config.page_size);
        let fetcher = Rc::new(RemoteFetcher::new(remote.clone(), config.page_size));
        cache.register_fetcher(fetcher.clone(), spawner, config.refetch_retries);
        let orchestrator = Orchestrator::new(cache.clone(), remote.clone(), ids);
        Client {
            config,
            cache,
            remote,
            fetcher,
            orchestrator,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn cache(&self) -> &ResourceCache {
        &self.cache
    }

    /// Entry point for driving a mutation step by step
    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Cancels pending fetches and forgets everything cached
    pub fn teardown(&self) {
        self.cache.teardown();
    }

    /// Loads the page following the accumulated ones
    ///
    /// Returns whether more pages remain. Once a short page came in, this
    /// returns `Ok(false)` without asking the remote anything.
    pub async fn fetch_next_posts(&self) -> Result<bool, NormalizedError> {
        let key = CacheKey::Posts;
        self.cache.wait_released(&key).await;
        let current = self
            .cache
            .peek(&key)
            .and_then(|v| v.as_posts().cloned())
            .unwrap_or_else(|| Arc::new(PostPages::new(self.config.page_size)));
        let page = match current.next_cursor() {
            Some(page) => page,
            None => return Ok(false),
        };
        let req = PageRequest {
            page,
            limit: current.limit(),
        };
        tracing::debug!(page, limit = req.limit, "fetching next posts page");
        let ticket = self.cache.begin_fetch(&key);
        let posts = match with_retries(self.config.refetch_retries, &key, || {
            self.remote.list_posts(req)
        })
        .await
        {
            Ok(posts) => posts,
            Err(err) => {
                self.cache.abandon_fetch(ticket);
                return Err(normalize(err));
            }
        };
        let mut pages = PostPages::clone(&current);
        if let Err(err) = pages.push_page(page, posts) {
            self.cache.abandon_fetch(ticket);
            return Err(normalize(RemoteError::Other(err.into())));
        }
        let has_more = pages.has_more();
        if !self
            .cache
            .complete_partial_fetch(ticket, CacheValue::Posts(Arc::new(pages)))
        {
            return Ok(self.has_more_posts());
        }
        Ok(has_more)
    }

    /// Fetches `key` right now, storing the result unless a mutation took the key meanwhile
    async fn load(&self, key: CacheKey) -> Result<Option<CacheValue>, NormalizedError> {
        self.cache.wait_released(&key).await;
        let ticket = self.cache.begin_fetch(&key);
        let res = with_retries(self.config.refetch_retries, &key, || {
            self.fetcher.fetch(&key, None)
        })
        .await;
        match res {
            Ok(value) => {
                if self.cache.complete_fetch(ticket, value.clone()) {
                    Ok(Some(value))
                } else {
                    Ok(self.cache.peek(&key))
                }
            }
            Err(err) => {
                self.cache.abandon_fetch(ticket);
                Err(normalize(err))
            }
        }
    }

    /// Loads one post, `Ok(None)` meaning the post does not exist (anymore)
    pub async fn load_post(&self, id: &PostId) -> Result<Option<Arc<Post>>, NormalizedError> {
        let key = CacheKey::Post(id.clone());
        match self.load(key.clone()).await {
            Ok(v) => Ok(v.and_then(|v| v.as_post().cloned())),
            Err(err) if err.is_not_found() => {
                tracing::debug!(post = %id, "post not found");
                self.cache.remove(&key);
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    pub async fn load_comments(&self, post: &PostId) -> Result<Arc<Vec<Comment>>, NormalizedError> {
        let v = self.load(CacheKey::Comments(post.clone())).await?;
        Ok(v.and_then(|v| v.as_comments().cloned())
            .unwrap_or_default())
    }

    pub fn posts(&self) -> Option<Arc<PostPages>> {
        self.cache.posts()
    }

    /// Whether [`fetch_next_posts`](Client::fetch_next_posts) may still bring something
    pub fn has_more_posts(&self) -> bool {
        self.cache
            .peek(&CacheKey::Posts)
            .and_then(|v| v.as_posts().map(|p| p.has_more()))
            .unwrap_or(true)
    }

    pub fn post(&self, id: &PostId) -> Option<Arc<Post>> {
        self.cache.post(id)
    }

    pub fn comments(&self, post: &PostId) -> Option<Arc<Vec<Comment>>> {
        self.cache.comments(post)
    }

    pub fn comment_tree(&self, post: &PostId) -> Vec<CommentNode> {
        self.comments(post)
            .map(|c| build_comment_tree(&c))
            .unwrap_or_default()
    }

    pub async fn create_post(&self, post: NewPost) -> Result<Post, NormalizedError> {
        let author = &self.config.default_author;
        let post = NewPost {
            author_name: non_empty(post.author_name).or_else(|| Some(author.name.clone())),
            author_avatar: non_empty(post.author_avatar).or_else(|| Some(author.avatar.clone())),
            created_at: post.created_at.or_else(|| Some(Utc::now())),
            ..post
        };
        self.orchestrator.run(CreatePost { post }).await
    }

    pub async fn update_post(&self, id: &PostId, patch: PostPatch) -> Result<Post, NormalizedError> {
        self.orchestrator
            .run(UpdatePost {
                id: id.clone(),
                patch,
            })
            .await
    }

    pub async fn delete_post(&self, id: &PostId) -> Result<(), NormalizedError> {
        self.orchestrator.run(DeletePost { id: id.clone() }).await
    }

    /// Fills in the author and date of `comment` when missing
    pub fn comment_mutation(&self, post: &PostId, comment: NewComment) -> CreateComment {
        let author = &self.config.default_author;
        CreateComment {
            post: post.clone(),
            comment: NewComment {
                author_name: non_empty(comment.author_name).or_else(|| Some(author.name.clone())),
                author_avatar: non_empty(comment.author_avatar)
                    .or_else(|| Some(author.avatar.clone())),
                created_at: comment.created_at.or_else(|| Some(Utc::now())),
                parent_id: comment.parent_id.filter(|p| !p.0.is_empty()),
                ..comment
            },
        }
    }

    pub async fn create_comment(
        &self,
        post: &PostId,
        comment: NewComment,
    ) -> Result<Comment, NormalizedError> {
        self.orchestrator
            .run(self.comment_mutation(post, comment))
            .await
    }

    pub async fn update_comment(
        &self,
        post: &PostId,
        id: &CommentId,
        content: String,
    ) -> Result<Comment, NormalizedError> {
        self.orchestrator
            .run(UpdateComment {
                post: post.clone(),
                id: id.clone(),
                content,
            })
            .await
    }

    /// Deletes a comment, and with it the whole thread of replies below it
    pub async fn delete_comment(&self, post: &PostId, id: &CommentId) -> Result<(), NormalizedError> {
        self.orchestrator
            .run(DeleteComment {
                post: post.clone(),
                id: id.clone(),
            })
            .await
    }
}
