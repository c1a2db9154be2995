//! # Data models
//!
//! Two kinds of types live here:
//!
//! - The engine-level [`Post`], the unit the similarity engine indexes. It is
//!   serializable so the corpus snapshot can be persisted and reloaded
//!   bit-for-bit across process restarts.
//! - Diesel row structs mapping the application's SQLite schema (see
//!   `crate::schema`): the live `posts` table plus the change-data-capture
//!   tables `post_changes` and `deleted_posts`, and the social `follows`
//!   table used by the user-similarity aggregator.
//!
//! ## Diesel expectations
//!
//! The CDC tables are owned by the upstream application; this crate only
//! reads them and flips their `processed` flag. `post_changes` rows carry a
//! `change_type` of `"INSERT"` or `"UPDATE"`; deletions are logged separately
//! in `deleted_posts`.

use diesel::prelude::*;
use serde::{Deserialize, Serialize};

/// A single indexed post.
///
/// Identity is the opaque `id` (a UUID string in practice). Caption and body
/// are both optional upstream; [`Post::text`] treats missing fields as empty
/// strings, never null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    /// Opaque post identifier.
    pub id: String,
    /// Short caption, if any.
    pub caption: Option<String>,
    /// Long-form body, if any.
    pub body: Option<String>,
}

impl Post {
    /// Construct a post from its parts.
    pub fn new(
        id: impl Into<String>,
        caption: Option<String>,
        body: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            caption,
            body,
        }
    }

    /// The text both encoders consume: `caption + " " + body`, with missing
    /// fields treated as empty strings.
    pub fn text(&self) -> String {
        format!(
            "{} {}",
            self.caption.as_deref().unwrap_or(""),
            self.body.as_deref().unwrap_or("")
        )
    }
}

/// A row of the live `posts` table.
///
/// ### Table
/// - `posts`
#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = crate::schema::posts)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct PostRow {
    /// Opaque post identifier (UUID string).
    pub id: String,
    /// Short caption, if any.
    pub caption: Option<String>,
    /// Long-form body, if any.
    pub body: Option<String>,
    /// Identifier of the owning user.
    pub user_id: String,
}

impl From<PostRow> for Post {
    fn from(row: PostRow) -> Self {
        Post {
            id: row.id,
            caption: row.caption,
            body: row.body,
        }
    }
}

/// One unprocessed insert/update event from the `post_changes` CDC table.
///
/// ### Table
/// - `post_changes`
///
/// ### Notes
/// - `change_type` is `"INSERT"` or `"UPDATE"`.
/// - `processed` is owned by the upstream store; the engine never derives it,
///   it only requests it be set after a successful phase.
#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = crate::schema::post_changes)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct PostChangeRow {
    /// Auto-increment primary key of the change log entry.
    pub id: i32,
    /// Identifier of the changed post.
    pub post_id: String,
    /// Caption at the time of the change.
    pub caption: Option<String>,
    /// Body at the time of the change.
    pub body: Option<String>,
    /// `"INSERT"` or `"UPDATE"`.
    pub change_type: String,
    /// Whether the engine has already consumed this event.
    pub processed: bool,
}

impl From<PostChangeRow> for Post {
    fn from(row: PostChangeRow) -> Self {
        Post {
            id: row.post_id,
            caption: row.caption,
            body: row.body,
        }
    }
}

/// One unprocessed deletion event from the `deleted_posts` CDC table.
///
/// ### Table
/// - `deleted_posts`
#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = crate::schema::deleted_posts)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct DeletedPostRow {
    /// Auto-increment primary key of the deletion log entry.
    pub id: i32,
    /// Identifier of the deleted post.
    pub post_id: String,
    /// Whether the engine has already consumed this event.
    pub processed: bool,
}

/// A follower → followed edge from the `follows` table.
///
/// ### Table
/// - `follows`
#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = crate::schema::follows)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct FollowRow {
    /// Auto-increment primary key.
    pub id: i32,
    /// The user doing the following.
    pub follower_id: String,
    /// The user being followed.
    pub followed_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_joins_caption_and_body() {
        let post = Post::new("p1", Some("paris museums".into()), Some("the louvre".into()));
        assert_eq!(post.text(), "paris museums the louvre");
    }

    #[test]
    fn text_treats_missing_fields_as_empty() {
        let post = Post::new("p2", None, Some("tokyo temples".into()));
        assert_eq!(post.text(), " tokyo temples");

        let empty = Post::new("p3", None, None);
        assert_eq!(empty.text(), " ");
    }
}
