use std::{
    cell::RefCell,
    collections::{HashMap, VecDeque},
    rc::Rc,
};

use async_trait::async_trait;
use chrono::Utc;
use futures::{
    channel::oneshot,
    future::{FutureExt, Shared},
};
use murmur_api::{
    Comment, CommentId, CommentPatch, Error, NewComment, NewPost, PageRequest, Post, PostId,
    PostPatch, Remote, RemoteError,
};

const DEFAULT_AUTHOR: &str = "Anonymous";

/// In-memory stand-in for the posts service
pub struct MockServer {
    next_id: u64,
    posts: Vec<Post>,
    comments: HashMap<PostId, Vec<Comment>>,
}

impl Default for MockServer {
    fn default() -> MockServer {
        MockServer::new()
    }
}

impl MockServer {
    pub fn new() -> MockServer {
        MockServer {
            next_id: 1,
            posts: Vec::new(),
            comments: HashMap::new(),
        }
    }

    fn fresh_id(&mut self) -> String {
        let id = self.next_id;
        self.next_id += 1;
        id.to_string()
    }

    /// Seed a post as-is, bypassing validation
    pub fn test_insert_post(&mut self, p: Post) {
        self.comments.entry(p.id.clone()).or_insert_with(Vec::new);
        self.posts.push(p);
    }

    /// Seed a comment as-is, bypassing validation
    pub fn test_insert_comment(&mut self, post: &PostId, c: Comment) {
        self.comments.entry(post.clone()).or_insert_with(Vec::new).push(c);
    }

    pub fn test_comments(&self, post: &PostId) -> Vec<Comment> {
        self.comments.get(post).cloned().unwrap_or_default()
    }

    pub fn test_num_posts(&self) -> usize {
        self.posts.len()
    }

    pub fn list_posts(&self, page: PageRequest) -> Result<Vec<Post>, Error> {
        if page.page == 0 || page.limit == 0 {
            return Err(Error::InvalidRequest(String::from(
                "page and limit must be positive",
            )));
        }
        let mut sorted = self.posts.clone();
        sorted.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sorted
            .into_iter()
            .skip((page.page as usize - 1) * page.limit)
            .take(page.limit)
            .collect())
    }

    pub fn get_post(&self, id: &PostId) -> Result<Post, Error> {
        self.posts
            .iter()
            .find(|p| p.id == *id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("post {id}")))
    }

    pub fn create_post(&mut self, p: NewPost) -> Result<Post, Error> {
        let post = Post {
            id: PostId(self.fresh_id()),
            title: p.title.unwrap_or_default(),
            content: p.content.unwrap_or_default(),
            author_name: p.author_name.unwrap_or_else(|| String::from(DEFAULT_AUTHOR)),
            author_avatar: p.author_avatar.unwrap_or_default(),
            created_at: p.created_at.unwrap_or_else(Utc::now),
        };
        self.test_insert_post(post.clone());
        Ok(post)
    }

    pub fn update_post(&mut self, id: &PostId, patch: PostPatch) -> Result<Post, Error> {
        let post = self
            .posts
            .iter_mut()
            .find(|p| p.id == *id)
            .ok_or_else(|| Error::NotFound(format!("post {id}")))?;
        post.apply(&patch);
        Ok(post.clone())
    }

    pub fn delete_post(&mut self, id: &PostId) -> Result<(), Error> {
        let idx = self
            .posts
            .iter()
            .position(|p| p.id == *id)
            .ok_or_else(|| Error::NotFound(format!("post {id}")))?;
        self.posts.remove(idx);
        self.comments.remove(id);
        Ok(())
    }

    pub fn list_comments(&self, post: &PostId) -> Result<Vec<Comment>, Error> {
        self.comments
            .get(post)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("post {post}")))
    }

    pub fn create_comment(&mut self, post: &PostId, c: NewComment) -> Result<Comment, Error> {
        if c.content.trim().is_empty() {
            return Err(Error::InvalidRequest(String::from(
                "comment content must not be empty",
            )));
        }
        if !self.comments.contains_key(post) {
            return Err(Error::NotFound(format!("post {post}")));
        }
        let comment = Comment {
            id: CommentId(self.fresh_id()),
            content: c.content,
            author_name: c.author_name.unwrap_or_else(|| String::from(DEFAULT_AUTHOR)),
            author_avatar: c.author_avatar.unwrap_or_default(),
            parent_id: c.parent_id,
            created_at: c.created_at.unwrap_or_else(Utc::now),
        };
        self.test_insert_comment(post, comment.clone());
        Ok(comment)
    }

    pub fn update_comment(
        &mut self,
        post: &PostId,
        id: &CommentId,
        patch: CommentPatch,
    ) -> Result<Comment, Error> {
        let comment = self
            .comments
            .get_mut(post)
            .and_then(|comments| comments.iter_mut().find(|c| c.id == *id))
            .ok_or_else(|| Error::NotFound(format!("comment {id}")))?;
        comment.content = patch.content;
        Ok(comment.clone())
    }

    /// Only removes the comment itself: replies are left dangling, like the real service does
    pub fn delete_comment(&mut self, post: &PostId, id: &CommentId) -> Result<(), Error> {
        let comments = self
            .comments
            .get_mut(post)
            .ok_or_else(|| Error::NotFound(format!("post {post}")))?;
        let idx = comments
            .iter()
            .position(|c| c.id == *id)
            .ok_or_else(|| Error::NotFound(format!("comment {id}")))?;
        comments.remove(idx);
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Endpoint {
    ListPosts,
    GetPost,
    CreatePost,
    UpdatePost,
    DeletePost,
    ListComments,
    CreateComment,
    UpdateComment,
    DeleteComment,
}

/// A failure to inject in place of the next answer of an endpoint
#[derive(Clone, Debug)]
pub enum Failure {
    Api(Error),
    Transport(String),
}

impl From<Failure> for RemoteError {
    fn from(f: Failure) -> RemoteError {
        match f {
            Failure::Api(e) => RemoteError::from(e),
            Failure::Transport(msg) => RemoteError::transport(msg),
        }
    }
}

/// Keeps every request to a [`MockRemote`] pending until released or dropped
pub struct Hold(oneshot::Sender<()>);

impl Hold {
    pub fn release(self) {
        let _ = self.0.send(());
    }
}

#[derive(Default)]
struct Control {
    requests: Vec<String>,
    failures: HashMap<Endpoint, VecDeque<Failure>>,
    gate: Option<Shared<oneshot::Receiver<()>>>,
}

/// [`Remote`] implementation answering from a shared [`MockServer`]
#[derive(Clone)]
pub struct MockRemote {
    server: Rc<RefCell<MockServer>>,
    control: Rc<RefCell<Control>>,
}

impl MockRemote {
    pub fn new(server: MockServer) -> MockRemote {
        MockRemote {
            server: Rc::new(RefCell::new(server)),
            control: Rc::new(RefCell::new(Control::default())),
        }
    }

    pub fn server(&self) -> &RefCell<MockServer> {
        &self.server
    }

    /// Every request received so far, as `METHOD path`
    pub fn requests(&self) -> Vec<String> {
        self.control.borrow().requests.clone()
    }

    pub fn fail_next(&self, endpoint: Endpoint, failure: Failure) {
        self.control
            .borrow_mut()
            .failures
            .entry(endpoint)
            .or_insert_with(VecDeque::new)
            .push_back(failure);
    }

    pub fn hold(&self) -> Hold {
        let (sender, receiver) = oneshot::channel();
        self.control.borrow_mut().gate = Some(receiver.shared());
        Hold(sender)
    }

    async fn enter(&self, endpoint: Endpoint, request: String) -> Result<(), RemoteError> {
        tracing::trace!(%request, "mock server received request");
        let gate = {
            let mut control = self.control.borrow_mut();
            control.requests.push(request);
            control.gate.clone()
        };
        if let Some(gate) = gate {
            // a released gate stays resolved, so later requests go straight through
            let _ = gate.await;
        }
        let failure = self
            .control
            .borrow_mut()
            .failures
            .get_mut(&endpoint)
            .and_then(|f| f.pop_front());
        match failure {
            Some(f) => Err(f.into()),
            None => Ok(()),
        }
    }
}

#[async_trait(?Send)]
impl Remote for MockRemote {
    async fn list_posts(&self, page: PageRequest) -> Result<Vec<Post>, RemoteError> {
        self.enter(
            Endpoint::ListPosts,
            format!("GET /post?{}", page.query_string()),
        )
        .await?;
        Ok(self.server.borrow().list_posts(page)?)
    }

    async fn get_post(&self, id: &PostId) -> Result<Post, RemoteError> {
        self.enter(Endpoint::GetPost, format!("GET /post/{id}")).await?;
        Ok(self.server.borrow().get_post(id)?)
    }

    async fn create_post(&self, post: &NewPost) -> Result<Post, RemoteError> {
        self.enter(Endpoint::CreatePost, String::from("POST /post"))
            .await?;
        Ok(self.server.borrow_mut().create_post(post.clone())?)
    }

    async fn update_post(&self, id: &PostId, patch: &PostPatch) -> Result<Post, RemoteError> {
        self.enter(Endpoint::UpdatePost, format!("PUT /post/{id}"))
            .await?;
        Ok(self.server.borrow_mut().update_post(id, patch.clone())?)
    }

    async fn delete_post(&self, id: &PostId) -> Result<(), RemoteError> {
        self.enter(Endpoint::DeletePost, format!("DELETE /post/{id}"))
            .await?;
        Ok(self.server.borrow_mut().delete_post(id)?)
    }

    async fn list_comments(&self, post: &PostId) -> Result<Vec<Comment>, RemoteError> {
        self.enter(Endpoint::ListComments, format!("GET /post/{post}/comment"))
            .await?;
        Ok(self.server.borrow().list_comments(post)?)
    }

    async fn create_comment(
        &self,
        post: &PostId,
        comment: &NewComment,
    ) -> Result<Comment, RemoteError> {
        self.enter(Endpoint::CreateComment, format!("POST /post/{post}/comment"))
            .await?;
        Ok(self
            .server
            .borrow_mut()
            .create_comment(post, comment.clone())?)
    }

    async fn update_comment(
        &self,
        post: &PostId,
        comment: &CommentId,
        patch: &CommentPatch,
    ) -> Result<Comment, RemoteError> {
        self.enter(
            Endpoint::UpdateComment,
            format!("PUT /post/{post}/comment/{comment}"),
        )
        .await?;
        Ok(self
            .server
            .borrow_mut()
            .update_comment(post, comment, patch.clone())?)
    }

    async fn delete_comment(&self, post: &PostId, comment: &CommentId) -> Result<(), RemoteError> {
        self.enter(
            Endpoint::DeleteComment,
            format!("DELETE /post/{post}/comment/{comment}"),
        )
        .await?;
        Ok(self.server.borrow_mut().delete_comment(post, comment)?)
    }
}
