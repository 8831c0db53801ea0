use crate::{
    api::{Comment, CommentId, NewComment, PostId},
    Client, NormalizedError,
};

/// Interaction state of one rendered comment: its reply box, edit mode and delete dialog
#[derive(Clone, Debug)]
pub struct CommentItem {
    post: PostId,
    comment: CommentId,
    reply_open: bool,
    reply_error: Option<NormalizedError>,
    editing: bool,
    edit_error: Option<NormalizedError>,
    delete_open: bool,
    delete_error: Option<NormalizedError>,
}

impl CommentItem {
    pub fn new(post: PostId, comment: CommentId) -> CommentItem {
        CommentItem {
            post,
            comment,
            reply_open: false,
            reply_error: None,
            editing: false,
            edit_error: None,
            delete_open: false,
            delete_error: None,
        }
    }

    pub fn comment(&self) -> &CommentId {
        &self.comment
    }

    pub fn reply_open(&self) -> bool {
        self.reply_open
    }

    pub fn reply_error(&self) -> Option<&str> {
        self.reply_error.as_ref().map(|e| e.message.as_str())
    }

    pub fn editing(&self) -> bool {
        self.editing
    }

    pub fn edit_error(&self) -> Option<&str> {
        self.edit_error.as_ref().map(|e| e.message.as_str())
    }

    pub fn delete_open(&self) -> bool {
        self.delete_open
    }

    pub fn delete_error(&self) -> Option<&str> {
        self.delete_error.as_ref().map(|e| e.message.as_str())
    }

    pub fn open_reply(&mut self) {
        self.reply_open = true;
    }

    pub fn cancel_reply(&mut self) {
        self.reply_open = false;
        self.reply_error = None;
    }

    /// Posts `content` as a reply, closing the reply box if the server accepts it
    pub async fn submit_reply(&mut self, client: &Client, content: String) -> Option<Comment> {
        self.reply_error = None;
        let reply = NewComment {
            content,
            parent_id: Some(self.comment.clone()),
            ..NewComment::default()
        };
        match client.create_comment(&self.post, reply).await {
            Ok(c) => {
                self.reply_open = false;
                Some(c)
            }
            Err(e) => {
                self.reply_error = Some(e);
                None
            }
        }
    }

    pub fn start_edit(&mut self) {
        self.editing = true;
    }

    pub fn cancel_edit(&mut self) {
        self.editing = false;
        self.edit_error = None;
    }

    pub async fn save_edit(&mut self, client: &Client, content: String) -> Option<Comment> {
        self.edit_error = None;
        match client.update_comment(&self.post, &self.comment, content).await {
            Ok(c) => {
                self.editing = false;
                Some(c)
            }
            Err(e) => {
                self.edit_error = Some(e);
                None
            }
        }
    }

    pub fn open_delete(&mut self) {
        self.delete_error = None;
        self.delete_open = true;
    }

    pub fn cancel_delete(&mut self) {
        self.delete_open = false;
        self.delete_error = None;
    }

    /// Returns whether the comment, and its replies, are gone
    pub async fn confirm_delete(&mut self, client: &Client) -> bool {
        match client.delete_comment(&self.post, &self.comment).await {
            Ok(()) => {
                self.delete_open = false;
                self.delete_error = None;
                true
            }
            Err(e) => {
                self.delete_error = Some(e);
                false
            }
        }
    }
}
