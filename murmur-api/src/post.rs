use std::fmt;

use crate::Time;

#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize)]
#[serde(transparent)]
pub struct PostId(pub String);

impl PostId {
    pub fn stub() -> PostId {
        PostId(String::from("stub-post"))
    }
}

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: PostId,
    pub title: String,
    pub content: String,
    #[serde(rename = "name")]
    pub author_name: String,
    #[serde(rename = "avatar")]
    pub author_avatar: String,
    pub created_at: Time,
}

impl Post {
    /// Overwrites the fields set in `patch`, leaving the others untouched
    pub fn apply(&mut self, patch: &PostPatch) {
        if let Some(title) = &patch.title {
            self.title = title.clone();
        }
        if let Some(content) = &patch.content {
            self.content = content.clone();
        }
        if let Some(name) = &patch.author_name {
            self.author_name = name.clone();
        }
        if let Some(avatar) = &patch.author_avatar {
            self.author_avatar = avatar.clone();
        }
    }
}

/// Body of `POST /post`
#[derive(Clone, Debug, Default, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPost {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, rename = "name", skip_serializing_if = "Option::is_none")]
    pub author_name: Option<String>,
    #[serde(default, rename = "avatar", skip_serializing_if = "Option::is_none")]
    pub author_avatar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Time>,
}

/// Body of `PUT /post/{id}`
#[derive(Clone, Debug, Default, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, rename = "name", skip_serializing_if = "Option::is_none")]
    pub author_name: Option<String>,
    #[serde(default, rename = "avatar", skip_serializing_if = "Option::is_none")]
    pub author_avatar: Option<String>,
}
