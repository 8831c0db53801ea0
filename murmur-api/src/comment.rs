use std::fmt;

use crate::Time;

#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize)]
#[serde(transparent)]
pub struct CommentId(pub String);

impl fmt::Display for CommentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reads a parent id, an empty one meaning a top-level comment
fn parent_or_top_level<'de, D>(d: D) -> Result<Option<CommentId>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let parent = <Option<CommentId> as serde::Deserialize>::deserialize(d)?;
    Ok(parent.filter(|p| !p.0.is_empty()))
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: CommentId,
    pub content: String,
    #[serde(rename = "name")]
    pub author_name: String,
    #[serde(rename = "avatar")]
    pub author_avatar: String,

    /// Comment this one replies to, `None` for top-level comments
    #[serde(default, deserialize_with = "parent_or_top_level")]
    pub parent_id: Option<CommentId>,

    pub created_at: Time,
}

/// Body of `POST /post/{post}/comment`
#[derive(Clone, Debug, Default, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewComment {
    pub content: String,
    #[serde(default, rename = "name", skip_serializing_if = "Option::is_none")]
    pub author_name: Option<String>,
    #[serde(default, rename = "avatar", skip_serializing_if = "Option::is_none")]
    pub author_avatar: Option<String>,
    #[serde(default, deserialize_with = "parent_or_top_level")]
    pub parent_id: Option<CommentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Time>,
}

/// Body of `PUT /post/{post}/comment/{comment}`: only the content can change
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CommentPatch {
    pub content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_level_comments_send_a_null_parent() {
        let body = serde_json::to_value(NewComment {
            content: String::from("first"),
            ..NewComment::default()
        })
        .expect("serializing comment");
        assert_eq!(
            body,
            serde_json::json!({ "content": "first", "parentId": null })
        );
    }

    #[test]
    fn missing_parent_parses_as_top_level() {
        let c: Comment = serde_json::from_value(serde_json::json!({
            "id": "3",
            "content": "hi",
            "name": "bo",
            "avatar": "",
            "createdAt": "2024-03-01T10:00:00Z",
        }))
        .expect("parsing comment");
        assert_eq!(c.parent_id, None);
    }

    #[test]
    fn empty_parent_parses_as_top_level() {
        let c: Comment = serde_json::from_value(serde_json::json!({
            "id": "4",
            "content": "hi",
            "name": "bo",
            "avatar": "",
            "parentId": "",
            "createdAt": "2024-03-01T10:00:00Z",
        }))
        .expect("parsing comment");
        assert_eq!(c.parent_id, None);

        let c: Comment = serde_json::from_value(serde_json::json!({
            "id": "5",
            "content": "hi",
            "name": "bo",
            "avatar": "",
            "parentId": "4",
            "createdAt": "2024-03-01T10:00:00Z",
        }))
        .expect("parsing reply");
        assert_eq!(c.parent_id, Some(CommentId(String::from("4"))));
    }
}
