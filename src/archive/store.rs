//! Channel cursor and message storage (SQLite).
//!
//! The store is the only component that touches the database. Message inserts
//! and the matching cursor advance always commit together in one transaction.

use crate::archive::types::{Channel, Message, Position, QueryLimit};
use crate::error::StoreError;
use sqlx::{Row as _, SqlitePool};

pub type StoreResult<T> = std::result::Result<T, StoreError>;

trait StorageContext<T> {
    fn storage(self, operation: &'static str) -> StoreResult<T>;
}

impl<T> StorageContext<T> for std::result::Result<T, sqlx::Error> {
    fn storage(self, operation: &'static str) -> StoreResult<T> {
        self.map_err(|source| StoreError::Storage { operation, source })
    }
}

#[derive(Debug, Clone)]
pub struct ArchiveStore {
    pool: SqlitePool,
}

impl ArchiveStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Register a channel, or rename it if it already exists. The cursor of an
    /// existing channel is never touched here.
    pub async fn register_channel(
        &self,
        channel_id: &str,
        display_name: &str,
    ) -> StoreResult<Channel> {
        sqlx::query(
            r#"
            INSERT INTO channels (channel_id, display_name)
            VALUES (?, ?)
            ON CONFLICT(channel_id) DO UPDATE SET
                display_name = excluded.display_name,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(channel_id)
        .bind(display_name)
        .execute(&self.pool)
        .await
        .storage("register channel")?;

        tracing::info!(channel_id, display_name, "channel registered");

        self.get_channel(channel_id)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                channel_id: channel_id.to_string(),
            })
    }

    pub async fn get_channel(&self, channel_id: &str) -> StoreResult<Option<Channel>> {
        let row = sqlx::query(
            "SELECT channel_id, display_name, cursor, registered_at, updated_at FROM channels WHERE channel_id = ?",
        )
        .bind(channel_id)
        .fetch_optional(&self.pool)
        .await
        .storage("fetch channel")?;

        row.map(channel_from_row).transpose()
    }

    pub async fn list_channels(&self) -> StoreResult<Vec<Channel>> {
        let rows = sqlx::query(
            "SELECT channel_id, display_name, cursor, registered_at, updated_at FROM channels ORDER BY channel_id",
        )
        .fetch_all(&self.pool)
        .await
        .storage("list channels")?;

        rows.into_iter().map(channel_from_row).collect()
    }

    pub async fn get_cursor(&self, channel_id: &str) -> StoreResult<Option<Position>> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT cursor FROM channels WHERE channel_id = ?")
                .bind(channel_id)
                .fetch_optional(&self.pool)
                .await
                .storage("read cursor")?;

        match row {
            Some((cursor,)) => Ok(cursor.map(Position::new)),
            None => Err(StoreError::NotFound {
                channel_id: channel_id.to_string(),
            }),
        }
    }

    /// Insert a page of messages and move the channel cursor to `new_cursor`,
    /// atomically. Already stored `(channel_id, message_id)` pairs are skipped.
    /// The cursor only ever moves forward. Returns the number of new rows.
    pub async fn upsert_messages_and_advance_cursor(
        &self,
        channel_id: &str,
        messages: &[Message],
        new_cursor: &Position,
    ) -> StoreResult<u64> {
        if let Some(stray) = messages.iter().find(|message| message.channel_id != channel_id) {
            return Err(StoreError::ChannelMismatch {
                expected: channel_id.to_string(),
                found: stray.channel_id.clone(),
                message_id: stray.message_id.clone(),
            });
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .storage("open archive transaction")?;

        let current: Option<(Option<String>,)> =
            sqlx::query_as("SELECT cursor FROM channels WHERE channel_id = ?")
                .bind(channel_id)
                .fetch_optional(&mut *tx)
                .await
                .storage("read cursor")?;

        // Dropping tx on any early return rolls the batch back.
        let Some((current,)) = current else {
            return Err(StoreError::NotFound {
                channel_id: channel_id.to_string(),
            });
        };
        let current = current.map(Position::new);

        let mut inserted = 0;
        for message in messages {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO messages (message_id, channel_id, position, sort_key, author, body)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&message.message_id)
            .bind(channel_id)
            .bind(message.position.as_str())
            .bind(message.position.sort_key())
            .bind(&message.author)
            .bind(&message.body)
            .execute(&mut *tx)
            .await
            .storage("insert message")?;

            inserted += result.rows_affected();
        }

        let advance = current.as_ref().is_none_or(|current| new_cursor > current);
        if advance {
            sqlx::query(
                "UPDATE channels SET cursor = ?, updated_at = CURRENT_TIMESTAMP WHERE channel_id = ?",
            )
            .bind(new_cursor.as_str())
            .bind(channel_id)
            .execute(&mut *tx)
            .await
            .storage("advance cursor")?;
        }

        tx.commit().await.storage("commit archive transaction")?;

        tracing::debug!(
            channel_id,
            inserted,
            staged = messages.len(),
            cursor = %new_cursor,
            advanced = advance,
            "page applied"
        );

        Ok(inserted)
    }

    /// Messages of a channel ordered by position, ties broken by message id.
    pub async fn query_messages(
        &self,
        channel_id: &str,
        limit: QueryLimit,
        offset: u64,
    ) -> StoreResult<Vec<Message>> {
        let rows = sqlx::query(
            r#"
            SELECT message_id, channel_id, position, author, body
            FROM messages
            WHERE channel_id = ?
            ORDER BY sort_key ASC, position ASC, message_id ASC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(channel_id)
        .bind(limit.as_sql())
        .bind(i64::try_from(offset).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .storage("query messages")?;

        rows.into_iter().map(message_from_row).collect()
    }

    pub async fn message_count(&self, channel_id: &str) -> StoreResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE channel_id = ?")
            .bind(channel_id)
            .fetch_one(&self.pool)
            .await
            .storage("count messages")?;

        Ok(count.max(0) as u64)
    }
}

fn channel_from_row(row: sqlx::sqlite::SqliteRow) -> StoreResult<Channel> {
    Ok(Channel {
        channel_id: row.try_get("channel_id").storage("read channel_id")?,
        display_name: row
            .try_get("display_name")
            .storage("read display_name")?,
        cursor: row
            .try_get::<Option<String>, _>("cursor")
            .storage("read cursor")?
            .map(Position::new),
        registered_at: row
            .try_get::<chrono::NaiveDateTime, _>("registered_at")
            .map(|value| value.and_utc())
            .storage("read registered_at")?,
        updated_at: row
            .try_get::<chrono::NaiveDateTime, _>("updated_at")
            .map(|value| value.and_utc())
            .storage("read updated_at")?,
    })
}

fn message_from_row(row: sqlx::sqlite::SqliteRow) -> StoreResult<Message> {
    Ok(Message {
        message_id: row.try_get("message_id").storage("read message_id")?,
        channel_id: row.try_get("channel_id").storage("read channel_id")?,
        position: Position::new(
            row.try_get::<String, _>("position")
                .storage("read position")?,
        ),
        author: row.try_get("author").storage("read author")?,
        body: row.try_get("body").storage("read body")?,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::Db;

    pub(crate) async fn setup_store() -> ArchiveStore {
        let db = Db::connect_in_memory()
            .await
            .expect("in-memory sqlite should connect and migrate");
        ArchiveStore::new(db.sqlite)
    }

    pub(crate) fn message(channel_id: &str, message_id: &str, position: &str) -> Message {
        Message {
            message_id: message_id.to_string(),
            channel_id: channel_id.to_string(),
            position: Position::new(position),
            author: Some("U123".to_string()),
            body: format!("body of {message_id}"),
        }
    }

    /// Make every cursor advance of `channel_id` abort inside its transaction.
    pub(crate) async fn fail_cursor_advance(store: &ArchiveStore, channel_id: &str) {
        sqlx::query(&format!(
            r#"
            CREATE TRIGGER fail_cursor_advance BEFORE UPDATE OF cursor ON channels
            WHEN NEW.channel_id = '{channel_id}'
            BEGIN
                SELECT RAISE(ABORT, 'injected storage fault');
            END
            "#
        ))
        .execute(&store.pool)
        .await
        .expect("fault trigger should be created");
    }

    pub(crate) async fn clear_cursor_fault(store: &ArchiveStore) {
        sqlx::query("DROP TRIGGER fail_cursor_advance")
            .execute(&store.pool)
            .await
            .expect("fault trigger should be dropped");
    }

    #[tokio::test]
    async fn reregistering_keeps_cursor_and_updates_name() {
        let store = setup_store().await;
        store
            .register_channel("C1", "general")
            .await
            .expect("register should succeed");
        store
            .upsert_messages_and_advance_cursor("C1", &[message("C1", "m1", "100")], &"100".into())
            .await
            .expect("upsert should succeed");

        let renamed = store
            .register_channel("C1", "general-renamed")
            .await
            .expect("re-register should succeed");

        assert_eq!(renamed.display_name, "general-renamed");
        assert_eq!(renamed.cursor, Some(Position::new("100")));
    }

    #[tokio::test]
    async fn cursor_of_unregistered_channel_is_not_found() {
        let store = setup_store().await;
        let error = store
            .get_cursor("missing")
            .await
            .expect_err("unregistered channel must fail");
        assert!(error.is_not_found());

        let fresh = store.register_channel("C1", "general").await.expect("register");
        assert!(fresh.cursor.is_none());
        assert_eq!(store.get_cursor("C1").await.expect("cursor"), None);
    }

    #[tokio::test]
    async fn duplicate_messages_are_ignored() {
        let store = setup_store().await;
        store.register_channel("C1", "general").await.expect("register");

        let page = vec![message("C1", "m1", "10"), message("C1", "m2", "20")];
        let first = store
            .upsert_messages_and_advance_cursor("C1", &page, &"20".into())
            .await
            .expect("first upsert");
        let overlap = vec![message("C1", "m2", "20"), message("C1", "m3", "30")];
        let second = store
            .upsert_messages_and_advance_cursor("C1", &overlap, &"30".into())
            .await
            .expect("second upsert");

        assert_eq!(first, 2);
        assert_eq!(second, 1);
        assert_eq!(store.message_count("C1").await.expect("count"), 3);
        assert_eq!(
            store.get_cursor("C1").await.expect("cursor"),
            Some(Position::new("30"))
        );
    }

    #[tokio::test]
    async fn cursor_never_moves_backwards() {
        let store = setup_store().await;
        store.register_channel("C1", "general").await.expect("register");
        store
            .upsert_messages_and_advance_cursor("C1", &[message("C1", "m2", "200")], &"200".into())
            .await
            .expect("upsert");

        let inserted = store
            .upsert_messages_and_advance_cursor("C1", &[message("C1", "m1", "100")], &"100".into())
            .await
            .expect("stale upsert still stores messages");

        assert_eq!(inserted, 1);
        assert_eq!(
            store.get_cursor("C1").await.expect("cursor"),
            Some(Position::new("200"))
        );
    }

    #[tokio::test]
    async fn fault_before_cursor_advance_rolls_back_whole_page() {
        let store = setup_store().await;
        store.register_channel("C1", "general").await.expect("register");

        fail_cursor_advance(&store, "C1").await;

        let page = vec![message("C1", "m1", "10"), message("C1", "m2", "20")];
        let error = store
            .upsert_messages_and_advance_cursor("C1", &page, &"20".into())
            .await
            .expect_err("injected fault must surface");
        assert!(matches!(error, StoreError::Storage { .. }));
        assert_eq!(store.message_count("C1").await.expect("count"), 0);
        assert_eq!(store.get_cursor("C1").await.expect("cursor"), None);

        clear_cursor_fault(&store).await;

        let retried = store
            .upsert_messages_and_advance_cursor("C1", &page, &"20".into())
            .await
            .expect("retry should succeed");
        let repeated = store
            .upsert_messages_and_advance_cursor("C1", &page, &"20".into())
            .await
            .expect("repeat should be a no-op");

        assert_eq!(retried, 2);
        assert_eq!(repeated, 0);
        assert_eq!(store.message_count("C1").await.expect("count"), 2);
        assert_eq!(
            store.get_cursor("C1").await.expect("cursor"),
            Some(Position::new("20"))
        );
    }

    #[tokio::test]
    async fn mismatched_channel_rejects_batch() {
        let store = setup_store().await;
        store.register_channel("C1", "general").await.expect("register");

        let page = vec![message("C1", "m1", "10"), message("C2", "m2", "20")];
        let error = store
            .upsert_messages_and_advance_cursor("C1", &page, &"20".into())
            .await
            .expect_err("foreign message must be rejected");

        assert!(matches!(error, StoreError::ChannelMismatch { .. }));
        assert_eq!(store.message_count("C1").await.expect("count"), 0);
    }

    #[tokio::test]
    async fn upsert_into_unregistered_channel_is_not_found() {
        let store = setup_store().await;
        let error = store
            .upsert_messages_and_advance_cursor("C9", &[message("C9", "m1", "1")], &"1".into())
            .await
            .expect_err("unregistered channel must fail");
        assert!(error.is_not_found());
    }

    #[tokio::test]
    async fn query_orders_by_position_then_message_id() {
        let store = setup_store().await;
        store.register_channel("C1", "general").await.expect("register");

        store
            .upsert_messages_and_advance_cursor(
                "C1",
                &[message("C1", "late", "1000.5"), message("C1", "b", "999.9")],
                &"1000.5".into(),
            )
            .await
            .expect("first page");
        store
            .upsert_messages_and_advance_cursor(
                "C1",
                &[message("C1", "a", "999.9"), message("C1", "early", "15")],
                &"999.9".into(),
            )
            .await
            .expect("second page");

        let all = store
            .query_messages("C1", QueryLimit::Unbounded, 0)
            .await
            .expect("query");
        let ids: Vec<&str> = all.iter().map(|m| m.message_id.as_str()).collect();
        assert_eq!(ids, vec!["early", "a", "b", "late"]);

        let window = store
            .query_messages("C1", QueryLimit::Bounded(2), 1)
            .await
            .expect("windowed query");
        let ids: Vec<&str> = window.iter().map(|m| m.message_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
