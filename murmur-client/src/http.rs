use anyhow::Context;
use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::api::{
    Comment, CommentId, CommentPatch, NewComment, NewPost, PageRequest, Post, PostId, PostPatch,
    Remote, RemoteError,
};

/// [`Remote`] speaking JSON over HTTP to the real service
#[derive(Clone, Debug)]
pub struct HttpRemote {
    client: reqwest::Client,
    host: String,
}

fn transport_error(e: reqwest::Error) -> RemoteError {
    let code = if e.is_timeout() {
        Some(String::from("timeout"))
    } else if e.is_connect() {
        Some(String::from("connect"))
    } else {
        None
    };
    RemoteError::Transport {
        code,
        message: e.to_string(),
    }
}

impl HttpRemote {
    pub fn new(host: impl Into<String>) -> HttpRemote {
        HttpRemote::with_client(reqwest::Client::new(), host)
    }

    pub fn with_client(client: reqwest::Client, host: impl Into<String>) -> HttpRemote {
        let host = host.into().trim_end_matches('/').to_string();
        HttpRemote { client, host }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.host, path)
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response, RemoteError> {
        let resp = req.send().await.map_err(transport_error)?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp
            .bytes()
            .await
            .ok()
            .and_then(|b| serde_json::from_slice(&b).ok());
        tracing::debug!(status = status.as_u16(), ?body, "request failed");
        Err(RemoteError::Status {
            status: status.as_u16(),
            body,
        })
    }

    async fn json<T: DeserializeOwned>(
        &self,
        req: reqwest::RequestBuilder,
        what: &str,
    ) -> Result<T, RemoteError> {
        let bytes = self
            .send(req)
            .await?
            .bytes()
            .await
            .map_err(transport_error)?;
        Ok(serde_json::from_slice(&bytes).with_context(|| format!("decoding {what}"))?)
    }
}

#[async_trait(?Send)]
impl Remote for HttpRemote {
    async fn list_posts(&self, page: PageRequest) -> Result<Vec<Post>, RemoteError> {
        let url = self.url(&format!("post?{}", page.query_string()));
        self.json(self.client.get(url), "posts page").await
    }

    async fn get_post(&self, id: &PostId) -> Result<Post, RemoteError> {
        let url = self.url(&format!("post/{id}"));
        self.json(self.client.get(url), "post").await
    }

    async fn create_post(&self, post: &NewPost) -> Result<Post, RemoteError> {
        let req = self.client.post(self.url("post")).json(post);
        self.json(req, "created post").await
    }

    async fn update_post(&self, id: &PostId, patch: &PostPatch) -> Result<Post, RemoteError> {
        let req = self.client.put(self.url(&format!("post/{id}"))).json(patch);
        self.json(req, "updated post").await
    }

    async fn delete_post(&self, id: &PostId) -> Result<(), RemoteError> {
        let url = self.url(&format!("post/{id}"));
        self.send(self.client.delete(url)).await?;
        Ok(())
    }

    async fn list_comments(&self, post: &PostId) -> Result<Vec<Comment>, RemoteError> {
        let url = self.url(&format!("post/{post}/comment"));
        self.json(self.client.get(url), "comments").await
    }

    async fn create_comment(
        &self,
        post: &PostId,
        comment: &NewComment,
    ) -> Result<Comment, RemoteError> {
        let req = self
            .client
            .post(self.url(&format!("post/{post}/comment")))
            .json(comment);
        self.json(req, "created comment").await
    }

    async fn update_comment(
        &self,
        post: &PostId,
        comment: &CommentId,
        patch: &CommentPatch,
    ) -> Result<Comment, RemoteError> {
        let req = self
            .client
            .put(self.url(&format!("post/{post}/comment/{comment}")))
            .json(patch);
        self.json(req, "updated comment").await
    }

    async fn delete_comment(&self, post: &PostId, comment: &CommentId) -> Result<(), RemoteError> {
        let url = self.url(&format!("post/{post}/comment/{comment}"));
        self.send(self.client.delete(url)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_ignore_trailing_slashes() {
        let remote = HttpRemote::new("https://example.com/api/");
        assert_eq!(remote.url("post/3"), "https://example.com/api/post/3");
        let page = PageRequest { page: 2, limit: 10 };
        assert_eq!(
            remote.url(&format!("post?{}", page.query_string())),
            "https://example.com/api/post?limit=10&page=2&sortBy=createdAt&order=desc"
        );
    }
}
