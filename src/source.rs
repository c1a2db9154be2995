//! # Upstream change source
//!
//! The engine never watches the application database directly; the upstream
//! store records every post mutation in two change-data-capture tables
//! (`post_changes` for inserts/updates, `deleted_posts` for deletions), each
//! row carrying a `processed` flag the engine flips after a successful phase.
//!
//! [`ChangeSource`] is the narrow contract the change processor consumes;
//! [`DieselChangeSource`] implements it against SQLite via Diesel. Keeping
//! the trait small means tests can drive the processor with an in-memory
//! fake and never touch a database.
//!
//! Membership lookups used by the user-similarity aggregator (post → owning
//! user, user → followed users) and the full-corpus fetch used by
//! initialization live on [`DieselChangeSource`] directly; they are not part
//! of the incremental contract.

use diesel::prelude::*;
use std::collections::{HashMap, HashSet};
use tracing::info;

use crate::error::EngineResult;
use crate::models::{DeletedPostRow, FollowRow, Post, PostChangeRow, PostRow};

/// Contract the change processor consumes each pass.
///
/// Every call may fail independently; failures surface as
/// [`EngineError::UpstreamFetch`](crate::error::EngineError::UpstreamFetch)
/// and cause the affected phase to be skipped and retried on the next pass.
pub trait ChangeSource {
    /// Unprocessed `INSERT` events, oldest first.
    fn fetch_unprocessed_inserted(&mut self) -> EngineResult<Vec<Post>>;

    /// Unprocessed `UPDATE` events, oldest first.
    fn fetch_unprocessed_updated(&mut self) -> EngineResult<Vec<Post>>;

    /// IDs of unprocessed deletions.
    fn fetch_unprocessed_deleted(&mut self) -> EngineResult<Vec<String>>;

    /// Mark insert/update events for the given post IDs as processed.
    fn mark_processed(&mut self, ids: &[String]) -> EngineResult<()>;

    /// Mark deletion events for the given post IDs as processed.
    ///
    /// Distinct from [`mark_processed`](Self::mark_processed) because
    /// deletions live in a separate upstream change log.
    fn mark_deletions_processed(&mut self, ids: &[String]) -> EngineResult<()>;
}

/// Diesel/SQLite implementation of the upstream contract.
pub struct DieselChangeSource {
    connection: SqliteConnection,
}

impl DieselChangeSource {
    /// Connect to the application database.
    ///
    /// # Errors
    /// Returns `EngineError::UpstreamFetch` if the connection cannot be
    /// established.
    pub fn connect(database_url: &str) -> EngineResult<Self> {
        let connection = SqliteConnection::establish(database_url)?;
        Ok(Self { connection })
    }

    /// Wrap an existing connection (used by tests).
    pub fn from_connection(connection: SqliteConnection) -> Self {
        Self { connection }
    }

    /// Fetch the full live corpus, row order as stored.
    ///
    /// Used by full initialization only; incremental passes never need it.
    pub fn fetch_all_posts(&mut self) -> EngineResult<Vec<Post>> {
        use crate::schema::posts::dsl::*;
        let rows: Vec<PostRow> = posts.select(PostRow::as_select()).load(&mut self.connection)?;
        Ok(rows.into_iter().map(Post::from).collect())
    }

    /// Map each live post ID to its owning user ID.
    pub fn post_user_mapping(&mut self) -> EngineResult<HashMap<String, String>> {
        use crate::schema::posts::dsl::*;
        let rows: Vec<(String, String)> =
            posts.select((id, user_id)).load(&mut self.connection)?;
        Ok(rows.into_iter().collect())
    }

    /// Map each user ID to the set of user IDs they already follow.
    pub fn user_followings_map(&mut self) -> EngineResult<HashMap<String, HashSet<String>>> {
        use crate::schema::follows::dsl::*;
        let rows: Vec<FollowRow> = follows
            .select(FollowRow::as_select())
            .load(&mut self.connection)?;
        let mut map: HashMap<String, HashSet<String>> = HashMap::new();
        for row in rows {
            map.entry(row.follower_id).or_default().insert(row.followed_id);
        }
        Ok(map)
    }

    /// Delete CDC rows that have already been consumed.
    ///
    /// Runs on its own cadence so the change tables stay small; the engine
    /// only ever reads `processed = false` rows, so timing is not critical.
    pub fn prune_processed(&mut self) -> EngineResult<()> {
        let changes = diesel::delete(
            crate::schema::post_changes::table
                .filter(crate::schema::post_changes::processed.eq(true)),
        )
        .execute(&mut self.connection)?;
        let deletions = diesel::delete(
            crate::schema::deleted_posts::table
                .filter(crate::schema::deleted_posts::processed.eq(true)),
        )
        .execute(&mut self.connection)?;
        info!(changes, deletions, "pruned processed CDC rows");
        Ok(())
    }

    fn fetch_changes(&mut self, kind: &str) -> EngineResult<Vec<Post>> {
        use crate::schema::post_changes::dsl::*;
        let rows: Vec<PostChangeRow> = post_changes
            .filter(change_type.eq(kind).and(processed.eq(false)))
            .order(id.asc())
            .select(PostChangeRow::as_select())
            .load(&mut self.connection)?;
        Ok(rows.into_iter().map(Post::from).collect())
    }
}

impl ChangeSource for DieselChangeSource {
    fn fetch_unprocessed_inserted(&mut self) -> EngineResult<Vec<Post>> {
        self.fetch_changes("INSERT")
    }

    fn fetch_unprocessed_updated(&mut self) -> EngineResult<Vec<Post>> {
        self.fetch_changes("UPDATE")
    }

    fn fetch_unprocessed_deleted(&mut self) -> EngineResult<Vec<String>> {
        use crate::schema::deleted_posts::dsl::*;
        let rows: Vec<DeletedPostRow> = deleted_posts
            .filter(processed.eq(false))
            .order(id.asc())
            .select(DeletedPostRow::as_select())
            .load(&mut self.connection)?;
        Ok(rows.into_iter().map(|r| r.post_id).collect())
    }

    fn mark_processed(&mut self, ids: &[String]) -> EngineResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        use crate::schema::post_changes::dsl::*;
        let n = diesel::update(post_changes.filter(post_id.eq_any(ids)))
            .set(processed.eq(true))
            .execute(&mut self.connection)?;
        info!(rows = n, "marked insert/update events processed");
        Ok(())
    }

    fn mark_deletions_processed(&mut self, ids: &[String]) -> EngineResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        use crate::schema::deleted_posts::dsl::*;
        let n = diesel::update(deleted_posts.filter(post_id.eq_any(ids)))
            .set(processed.eq(true))
            .execute(&mut self.connection)?;
        info!(rows = n, "marked deletion events processed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use diesel::sql_query;

    fn memory_source() -> DieselChangeSource {
        let mut conn = SqliteConnection::establish(":memory:").unwrap();
        for ddl in [
            "CREATE TABLE posts (id TEXT PRIMARY KEY, caption TEXT, body TEXT, user_id TEXT NOT NULL)",
            "CREATE TABLE post_changes (id INTEGER PRIMARY KEY AUTOINCREMENT, post_id TEXT NOT NULL, \
             caption TEXT, body TEXT, change_type TEXT NOT NULL, processed BOOLEAN NOT NULL DEFAULT 0)",
            "CREATE TABLE deleted_posts (id INTEGER PRIMARY KEY AUTOINCREMENT, post_id TEXT NOT NULL, \
             processed BOOLEAN NOT NULL DEFAULT 0)",
            "CREATE TABLE follows (id INTEGER PRIMARY KEY AUTOINCREMENT, follower_id TEXT NOT NULL, \
             followed_id TEXT NOT NULL)",
        ] {
            sql_query(ddl).execute(&mut conn).unwrap();
        }
        DieselChangeSource::from_connection(conn)
    }

    fn exec(source: &mut DieselChangeSource, sql: &str) {
        sql_query(sql).execute(&mut source.connection).unwrap();
    }

    #[test]
    fn fetches_only_unprocessed_events_of_the_right_kind() {
        let mut source = memory_source();
        exec(
            &mut source,
            "INSERT INTO post_changes (post_id, caption, body, change_type, processed) VALUES \
             ('a', 'paris', 'museums', 'INSERT', 0), \
             ('b', 'paris', 'food', 'UPDATE', 0), \
             ('c', 'tokyo', 'temples', 'INSERT', 1)",
        );

        let inserted = source.fetch_unprocessed_inserted().unwrap();
        assert_eq!(inserted.len(), 1);
        assert_eq!(inserted[0].id, "a");
        assert_eq!(inserted[0].text(), "paris museums");

        let updated = source.fetch_unprocessed_updated().unwrap();
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0].id, "b");
    }

    #[test]
    fn mark_processed_hides_events_from_the_next_pass() {
        let mut source = memory_source();
        exec(
            &mut source,
            "INSERT INTO post_changes (post_id, change_type, processed) VALUES \
             ('a', 'INSERT', 0), ('b', 'INSERT', 0)",
        );
        exec(
            &mut source,
            "INSERT INTO deleted_posts (post_id, processed) VALUES ('z', 0)",
        );

        source.mark_processed(&["a".to_string()]).unwrap();
        let remaining = source.fetch_unprocessed_inserted().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, "b");

        source.mark_deletions_processed(&["z".to_string()]).unwrap();
        assert!(source.fetch_unprocessed_deleted().unwrap().is_empty());
    }

    #[test]
    fn prune_removes_only_processed_rows() {
        let mut source = memory_source();
        exec(
            &mut source,
            "INSERT INTO post_changes (post_id, change_type, processed) VALUES \
             ('a', 'INSERT', 1), ('b', 'UPDATE', 0)",
        );
        source.prune_processed().unwrap();
        assert_eq!(source.fetch_unprocessed_updated().unwrap().len(), 1);

        let rows: Vec<PostChangeRow> = crate::schema::post_changes::table
            .select(PostChangeRow::as_select())
            .load(&mut source.connection)
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].post_id, "b");
    }

    #[test]
    fn membership_maps_group_by_user() {
        let mut source = memory_source();
        exec(
            &mut source,
            "INSERT INTO posts (id, caption, body, user_id) VALUES \
             ('p1', 'x', 'y', 'u1'), ('p2', 'x', 'y', 'u1'), ('p3', 'x', 'y', 'u2')",
        );
        exec(
            &mut source,
            "INSERT INTO follows (follower_id, followed_id) VALUES ('u1', 'u2')",
        );

        let owners = source.post_user_mapping().unwrap();
        assert_eq!(owners.get("p1"), Some(&"u1".to_string()));
        assert_eq!(owners.get("p3"), Some(&"u2".to_string()));

        let followings = source.user_followings_map().unwrap();
        assert!(followings.get("u1").unwrap().contains("u2"));
        assert!(followings.get("u2").is_none());
    }
}
