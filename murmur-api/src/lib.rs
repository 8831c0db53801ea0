use async_trait::async_trait;
use chrono::Utc;

mod comment;
pub use comment::{Comment, CommentId, CommentPatch, NewComment};

mod error;
pub use error::Error;

mod post;
pub use post::{NewPost, Post, PostId, PostPatch};

mod remote;
pub use remote::RemoteError;

pub type Time = chrono::DateTime<Utc>;

/// One page of the posts collection, as understood by `GET /post`
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PageRequest {
    /// 1-based page number
    pub page: u32,
    pub limit: usize,
}

impl PageRequest {
    pub fn query_string(&self) -> String {
        format!(
            "limit={}&page={}&sortBy=createdAt&order=desc",
            self.limit, self.page
        )
    }
}

/// The remote service holding the authoritative posts and comments
///
/// Every method maps onto one HTTP endpoint. Implementations are expected to
/// run on a single-threaded executor, hence the futures are not `Send`.
#[async_trait(?Send)]
pub trait Remote {
    /// `GET /post?limit=L&page=P&sortBy=createdAt&order=desc`
    async fn list_posts(&self, page: PageRequest) -> Result<Vec<Post>, RemoteError>;

    /// `GET /post/{id}`
    async fn get_post(&self, id: &PostId) -> Result<Post, RemoteError>;

    /// `POST /post`
    async fn create_post(&self, post: &NewPost) -> Result<Post, RemoteError>;

    /// `PUT /post/{id}`
    async fn update_post(&self, id: &PostId, patch: &PostPatch) -> Result<Post, RemoteError>;

    /// `DELETE /post/{id}`
    async fn delete_post(&self, id: &PostId) -> Result<(), RemoteError>;

    /// `GET /post/{post}/comment`
    async fn list_comments(&self, post: &PostId) -> Result<Vec<Comment>, RemoteError>;

    /// `POST /post/{post}/comment`
    async fn create_comment(
        &self,
        post: &PostId,
        comment: &NewComment,
    ) -> Result<Comment, RemoteError>;

    /// `PUT /post/{post}/comment/{comment}`
    async fn update_comment(
        &self,
        post: &PostId,
        comment: &CommentId,
        patch: &CommentPatch,
    ) -> Result<Comment, RemoteError>;

    /// `DELETE /post/{post}/comment/{comment}`
    async fn delete_comment(&self, post: &PostId, comment: &CommentId) -> Result<(), RemoteError>;
}
