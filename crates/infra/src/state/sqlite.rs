//! SQLite-backed state store.
//!
//! All mutations go through a pool with a single connection, so the store is
//! the only writer even when several futures share it. Timestamps are stored as
//! second-precision RFC 3339 UTC text, which makes lexical comparison in SQL
//! chronological.
//!
//! Status changes are validated against [`ItemStatus::can_transition_to`]
//! inside a transaction; a rejected transition is a [`StoreError::Integrity`].

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{FromRow, Row, Sqlite, Transaction};
use tracing::{debug, instrument};
use uuid::Uuid;

use voice_inbox_core::error::truncate_error;
use voice_inbox_core::{InboxError, ItemStatus, MessageId};

use super::types::{
    map_sqlx_error, ItemOutputs, ItemRecord, NewItem, RunCounts, RunRecord, StatusSummary,
    StoreError,
};

pub const KEY_LAST_SEEN_MESSAGE_ID: &str = "last_seen_message_id";
pub const KEY_SCHEMA_VERSION: &str = "schema_version";
pub const KEY_LAST_HEALTH_CHECK_AT: &str = "last_health_check_at";

const SCHEMA_VERSION: &str = "2";

const ITEM_COLUMNS: &str = "message_id, channel_id, author_id, attachment_id, attachment_url, \
     attachment_filename, content_type, message_text, audio_path, transcript_path, status, \
     attempts, next_retry_at, last_error, journal_path, discord_jump_url, created_at, updated_at";

const RETRY_DUE_PREDICATE: &str = "status IN ('failed', 'reaction_pending') AND ( \
     (status = 'reaction_pending' AND (next_retry_at IS NULL OR next_retry_at <= ?1)) \
     OR (status = 'failed' AND next_retry_at IS NOT NULL AND next_retry_at <= ?1))";

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS messages (
        message_id TEXT PRIMARY KEY,
        channel_id TEXT NOT NULL,
        author_id TEXT NOT NULL,
        attachment_id TEXT NOT NULL,
        attachment_url TEXT NOT NULL,
        attachment_filename TEXT,
        content_type TEXT,
        message_text TEXT,
        audio_path TEXT,
        transcript_path TEXT,
        status TEXT NOT NULL,
        attempts INTEGER NOT NULL DEFAULT 0,
        next_retry_at TEXT,
        last_error TEXT,
        journal_path TEXT,
        discord_jump_url TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS runs (
        run_id TEXT PRIMARY KEY,
        command TEXT NOT NULL,
        started_at TEXT NOT NULL,
        finished_at TEXT,
        processed_count INTEGER NOT NULL DEFAULT 0,
        success_count INTEGER NOT NULL DEFAULT 0,
        failed_count INTEGER NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS kv (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_messages_status_retry ON messages (status, next_retry_at)",
    "CREATE INDEX IF NOT EXISTS idx_messages_status_updated ON messages (status, updated_at)",
];

/// Format a timestamp the way every column stores it.
pub fn format_timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_timestamp(raw: &str, field: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Integrity(format!("invalid {field} timestamp {raw:?}: {e}")))
}

fn integrity(err: InboxError) -> StoreError {
    match err {
        InboxError::Integrity(msg) => StoreError::Integrity(msg),
        other => StoreError::Integrity(other.to_string()),
    }
}

fn count(value: i64, field: &str) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::Integrity(format!("invalid {field}: {value}")))
}

#[derive(Debug, FromRow)]
struct ItemRow {
    message_id: String,
    channel_id: String,
    author_id: String,
    attachment_id: String,
    attachment_url: String,
    attachment_filename: Option<String>,
    content_type: Option<String>,
    message_text: Option<String>,
    audio_path: Option<String>,
    transcript_path: Option<String>,
    status: String,
    attempts: i64,
    next_retry_at: Option<String>,
    last_error: Option<String>,
    journal_path: Option<String>,
    discord_jump_url: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<ItemRow> for ItemRecord {
    type Error = StoreError;

    fn try_from(row: ItemRow) -> Result<Self, Self::Error> {
        let status = ItemStatus::from_str(&row.status).map_err(integrity)?;
        let next_retry_at = row
            .next_retry_at
            .as_deref()
            .map(|raw| parse_timestamp(raw, "next_retry_at"))
            .transpose()?;
        if status.is_done() && next_retry_at.is_some() {
            return Err(StoreError::Integrity(format!(
                "done message {} has a scheduled retry",
                row.message_id
            )));
        }

        Ok(ItemRecord {
            message_id: MessageId::new(row.message_id),
            channel_id: row.channel_id,
            author_id: row.author_id,
            attachment_id: row.attachment_id,
            attachment_url: row.attachment_url,
            attachment_filename: row.attachment_filename.unwrap_or_default(),
            content_type: row.content_type.unwrap_or_default(),
            message_text: row.message_text,
            audio_path: row.audio_path,
            transcript_path: row.transcript_path,
            status,
            attempts: count(row.attempts, "attempts")?,
            next_retry_at,
            last_error: row.last_error,
            journal_path: row.journal_path,
            jump_url: row.discord_jump_url,
            created_at: parse_timestamp(&row.created_at, "created_at")?,
            updated_at: parse_timestamp(&row.updated_at, "updated_at")?,
        })
    }
}

#[derive(Debug, FromRow)]
struct RunRow {
    run_id: String,
    command: String,
    started_at: String,
    finished_at: Option<String>,
    processed_count: i64,
    success_count: i64,
    failed_count: i64,
}

impl TryFrom<RunRow> for RunRecord {
    type Error = StoreError;

    fn try_from(row: RunRow) -> Result<Self, Self::Error> {
        Ok(RunRecord {
            started_at: parse_timestamp(&row.started_at, "started_at")?,
            finished_at: row
                .finished_at
                .as_deref()
                .map(|raw| parse_timestamp(raw, "finished_at"))
                .transpose()?,
            processed: count(row.processed_count, "processed_count")?,
            succeeded: count(row.success_count, "success_count")?,
            failed: count(row.failed_count, "failed_count")?,
            run_id: row.run_id,
            command: row.command,
        })
    }
}

fn into_records(rows: Vec<ItemRow>) -> Result<Vec<ItemRecord>, StoreError> {
    rows.into_iter().map(ItemRecord::try_from).collect()
}

/// Durable per-item state, run audit trail and key-value scalars.
#[derive(Debug, Clone)]
pub struct StateStore {
    pool: SqlitePool,
}

impl StateStore {
    /// Open (creating if needed) the database at `path` and ensure the schema.
    #[instrument(skip_all, fields(path = %path.display()), err)]
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Io(format!("{}: {e}", parent.display())))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| map_sqlx_error("open", e))?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Private in-memory database, used by tests.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| map_sqlx_error("open_in_memory", e))?;

        // The database lives as long as its only connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| map_sqlx_error("open_in_memory", e))?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        for stmt in SCHEMA {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("init_schema", e))?;
        }

        // Version 1 databases predate the message text column.
        let columns: Vec<String> = sqlx::query("SELECT name FROM pragma_table_info('messages')")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("init_schema", e))?
            .iter()
            .map(|row| row.try_get::<String, _>("name"))
            .collect::<Result<_, _>>()
            .map_err(|e| map_sqlx_error("init_schema", e))?;
        if !columns.iter().any(|c| c == "message_text") {
            debug!("migrating messages table: adding message_text");
            sqlx::query("ALTER TABLE messages ADD COLUMN message_text TEXT")
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("init_schema", e))?;
        }

        self.set_kv(KEY_SCHEMA_VERSION, SCHEMA_VERSION, Utc::now())
            .await
    }

    // ---------------------------------------------------------------------
    // Runs
    // ---------------------------------------------------------------------

    /// Create a run record and return its id.
    pub async fn begin_run(&self, command: &str, now: DateTime<Utc>) -> Result<String, StoreError> {
        let run_id = Uuid::now_v7().to_string();
        sqlx::query("INSERT INTO runs (run_id, command, started_at) VALUES (?1, ?2, ?3)")
            .bind(&run_id)
            .bind(command)
            .bind(format_timestamp(now))
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("begin_run", e))?;
        Ok(run_id)
    }

    /// Finalize a run. A run can be finalized only once.
    pub async fn finish_run(
        &self,
        run_id: &str,
        now: DateTime<Utc>,
        counts: RunCounts,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE runs
            SET finished_at = ?1, processed_count = ?2, success_count = ?3, failed_count = ?4
            WHERE run_id = ?5 AND finished_at IS NULL
            "#,
        )
        .bind(format_timestamp(now))
        .bind(i64::from(counts.processed))
        .bind(i64::from(counts.succeeded))
        .bind(i64::from(counts.failed))
        .bind(run_id)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("finish_run", e))?;

        if result.rows_affected() == 0 {
            return match self.get_run(run_id).await? {
                Some(_) => Err(StoreError::Integrity(format!("run {run_id} is already finalized"))),
                None => Err(StoreError::NotFound(format!("run {run_id}"))),
            };
        }
        Ok(())
    }

    pub async fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>, StoreError> {
        sqlx::query_as::<_, RunRow>(
            r#"
            SELECT run_id, command, started_at, finished_at,
                   processed_count, success_count, failed_count
            FROM runs WHERE run_id = ?1
            "#,
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_run", e))?
        .map(RunRecord::try_from)
        .transpose()
    }

    /// Most recent runs first.
    pub async fn recent_runs(&self, limit: u32) -> Result<Vec<RunRecord>, StoreError> {
        sqlx::query_as::<_, RunRow>(
            r#"
            SELECT run_id, command, started_at, finished_at,
                   processed_count, success_count, failed_count
            FROM runs
            ORDER BY started_at DESC, run_id DESC
            LIMIT ?1
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("recent_runs", e))?
        .into_iter()
        .map(RunRecord::try_from)
        .collect()
    }

    // ---------------------------------------------------------------------
    // Key-value scalars and the cursor
    // ---------------------------------------------------------------------

    pub async fn set_kv(&self, key: &str, value: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        upsert_kv(&self.pool, key, value, now).await
    }

    pub async fn get_kv(&self, key: &str) -> Result<Option<String>, StoreError> {
        sqlx::query_scalar::<_, String>("SELECT value FROM kv WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_kv", e))
    }

    pub async fn last_seen_message_id(&self) -> Result<Option<MessageId>, StoreError> {
        Ok(self
            .get_kv(KEY_LAST_SEEN_MESSAGE_ID)
            .await?
            .filter(|v| !v.trim().is_empty())
            .map(MessageId::new))
    }

    /// Move the cursor forward to `id`. Older or equal ids are ignored.
    ///
    /// Returns whether the cursor moved.
    pub async fn advance_cursor(&self, id: &MessageId, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut tx = self.begin("advance_cursor").await?;
        let current = sqlx::query_scalar::<_, String>("SELECT value FROM kv WHERE key = ?1")
            .bind(KEY_LAST_SEEN_MESSAGE_ID)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("advance_cursor", e))?
            .filter(|v| !v.trim().is_empty())
            .map(MessageId::new);

        if current.as_ref().is_some_and(|cur| cur >= id) {
            return Ok(false);
        }

        upsert_kv(&mut *tx, KEY_LAST_SEEN_MESSAGE_ID, id.as_str(), now).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("advance_cursor", e))?;
        debug!(cursor = %id, "cursor advanced");
        Ok(true)
    }

    /// Record a successful health check; doubles as a write probe.
    pub async fn record_health_check(&self, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.set_kv(KEY_LAST_HEALTH_CHECK_AT, &format_timestamp(now), now)
            .await
    }

    // ---------------------------------------------------------------------
    // Item records
    // ---------------------------------------------------------------------

    pub async fn get_item(&self, id: &MessageId) -> Result<Option<ItemRecord>, StoreError> {
        let sql = format!("SELECT {ITEM_COLUMNS} FROM messages WHERE message_id = ?1");
        sqlx::query_as::<_, ItemRow>(&sql)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_item", e))?
            .map(ItemRecord::try_from)
            .transpose()
    }

    /// Create the record as `pending`, or refresh metadata of an existing
    /// non-done record while keeping its status and attempts.
    #[instrument(skip_all, fields(message_id = %item.message_id), err)]
    pub async fn upsert_pending(&self, item: &NewItem, now: DateTime<Utc>) -> Result<(), StoreError> {
        let mut tx = self.begin("upsert_pending").await?;
        if let Some((status, _)) = current_state(&mut tx, &item.message_id).await? {
            if status.is_done() {
                return Err(StoreError::Integrity(format!(
                    "message {} is already done",
                    item.message_id
                )));
            }
        }

        let now = format_timestamp(now);
        sqlx::query(
            r#"
            INSERT INTO messages (
                message_id, channel_id, author_id, attachment_id, attachment_url,
                attachment_filename, content_type, message_text, discord_jump_url,
                status, attempts, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 'pending', 0, ?10, ?10)
            ON CONFLICT (message_id) DO UPDATE SET
                channel_id = excluded.channel_id,
                author_id = excluded.author_id,
                attachment_id = excluded.attachment_id,
                attachment_url = excluded.attachment_url,
                attachment_filename = excluded.attachment_filename,
                content_type = excluded.content_type,
                message_text = excluded.message_text,
                discord_jump_url = COALESCE(excluded.discord_jump_url, messages.discord_jump_url),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(item.message_id.as_str())
        .bind(&item.channel_id)
        .bind(&item.author_id)
        .bind(&item.attachment_id)
        .bind(&item.attachment_url)
        .bind(&item.attachment_filename)
        .bind(&item.content_type)
        .bind(&item.message_text)
        .bind(non_empty(&item.jump_url))
        .bind(&now)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("upsert_pending", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("upsert_pending", e))
    }

    /// Transition to `done`, clearing the retry schedule and last error.
    #[instrument(skip(self, outputs), err)]
    pub async fn mark_done(
        &self,
        id: &MessageId,
        outputs: &ItemOutputs,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tx = self.begin("mark_done").await?;
        expect_transition(&mut tx, id, ItemStatus::Done, None).await?;

        sqlx::query(
            r#"
            UPDATE messages SET
                status = 'done',
                journal_path = ?1,
                audio_path = ?2,
                transcript_path = ?3,
                discord_jump_url = ?4,
                last_error = NULL,
                next_retry_at = NULL,
                updated_at = ?5
            WHERE message_id = ?6
            "#,
        )
        .bind(non_empty(&outputs.journal_path))
        .bind(non_empty(&outputs.audio_path))
        .bind(non_empty(&outputs.transcript_path))
        .bind(non_empty(&outputs.jump_url))
        .bind(format_timestamp(now))
        .bind(id.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("mark_done", e))?;

        tx.commit().await.map_err(|e| map_sqlx_error("mark_done", e))
    }

    /// Transition to `reaction_pending`, keeping the produced paths.
    #[instrument(skip(self, error, outputs), err)]
    pub async fn mark_reaction_pending(
        &self,
        id: &MessageId,
        error: &str,
        attempts: u32,
        next_retry_at: DateTime<Utc>,
        outputs: &ItemOutputs,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tx = self.begin("mark_reaction_pending").await?;
        expect_transition(&mut tx, id, ItemStatus::ReactionPending, Some(attempts)).await?;

        sqlx::query(
            r#"
            UPDATE messages SET
                status = 'reaction_pending',
                attempts = ?1,
                journal_path = ?2,
                audio_path = ?3,
                transcript_path = ?4,
                discord_jump_url = ?5,
                last_error = ?6,
                next_retry_at = ?7,
                updated_at = ?8
            WHERE message_id = ?9
            "#,
        )
        .bind(i64::from(attempts))
        .bind(non_empty(&outputs.journal_path))
        .bind(non_empty(&outputs.audio_path))
        .bind(non_empty(&outputs.transcript_path))
        .bind(non_empty(&outputs.jump_url))
        .bind(truncate_error(error))
        .bind(format_timestamp(next_retry_at))
        .bind(format_timestamp(now))
        .bind(id.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("mark_reaction_pending", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("mark_reaction_pending", e))
    }

    /// Transition to `failed`. A `None` retry time marks the failure permanent.
    #[instrument(skip(self, error), err)]
    pub async fn mark_failed(
        &self,
        id: &MessageId,
        error: &str,
        attempts: u32,
        next_retry_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tx = self.begin("mark_failed").await?;
        expect_transition(&mut tx, id, ItemStatus::Failed, Some(attempts)).await?;

        sqlx::query(
            r#"
            UPDATE messages SET
                status = 'failed',
                attempts = ?1,
                last_error = ?2,
                next_retry_at = ?3,
                updated_at = ?4
            WHERE message_id = ?5
            "#,
        )
        .bind(i64::from(attempts))
        .bind(truncate_error(error))
        .bind(next_retry_at.map(format_timestamp))
        .bind(format_timestamp(now))
        .bind(id.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("mark_failed", e))?;

        tx.commit().await.map_err(|e| map_sqlx_error("mark_failed", e))
    }

    /// Records due for retry, oldest-updated first.
    pub async fn list_retry_candidates(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<ItemRecord>, StoreError> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM messages WHERE {RETRY_DUE_PREDICATE} \
             ORDER BY updated_at ASC, length(message_id) ASC, message_id ASC LIMIT ?2"
        );
        let rows = sqlx::query_as::<_, ItemRow>(&sql)
            .bind(format_timestamp(now))
            .bind(i64::from(limit.max(1)))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_retry_candidates", e))?;
        into_records(rows)
    }

    pub async fn list_done_with_audio_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<ItemRecord>, StoreError> {
        self.list_done_with_path_before("audio_path", cutoff, limit)
            .await
    }

    pub async fn list_done_with_transcript_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<ItemRecord>, StoreError> {
        self.list_done_with_path_before("transcript_path", cutoff, limit)
            .await
    }

    async fn list_done_with_path_before(
        &self,
        column: &'static str,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<ItemRecord>, StoreError> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM messages \
             WHERE status = 'done' AND {column} IS NOT NULL AND {column} != '' AND updated_at < ?1 \
             ORDER BY updated_at ASC, length(message_id) ASC, message_id ASC LIMIT ?2"
        );
        let rows = sqlx::query_as::<_, ItemRow>(&sql)
            .bind(format_timestamp(cutoff))
            .bind(i64::from(limit.max(1)))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_done_with_path_before", e))?;
        into_records(rows)
    }

    pub async fn clear_audio_path(&self, id: &MessageId, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.clear_path("audio_path", id, now).await
    }

    pub async fn clear_transcript_path(
        &self,
        id: &MessageId,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.clear_path("transcript_path", id, now).await
    }

    async fn clear_path(
        &self,
        column: &'static str,
        id: &MessageId,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let sql = format!("UPDATE messages SET {column} = NULL, updated_at = ?1 WHERE message_id = ?2");
        let result = sqlx::query(&sql)
            .bind(format_timestamp(now))
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("clear_path", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("message {id}")));
        }
        Ok(())
    }

    /// Counts by status plus retry/permanent-failure totals and the scalars.
    pub async fn summary(
        &self,
        now: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<StatusSummary, StoreError> {
        let mut summary = StatusSummary::default();

        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM messages GROUP BY status")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("summary", e))?;
        for row in rows {
            let status: String = row.try_get("status").map_err(|e| map_sqlx_error("summary", e))?;
            let n: i64 = row.try_get("n").map_err(|e| map_sqlx_error("summary", e))?;
            let n = u64::try_from(n).unwrap_or_default();
            summary.total += n;
            summary.by_status.insert(status, n);
        }

        let sql = format!("SELECT COUNT(*) FROM messages WHERE {RETRY_DUE_PREDICATE}");
        let retry_due: i64 = sqlx::query_scalar(&sql)
            .bind(format_timestamp(now))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("summary", e))?;
        summary.retry_due = u64::try_from(retry_due).unwrap_or_default();

        let permanent: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE status = 'failed' AND attempts >= ?1")
                .bind(i64::from(max_attempts))
                .fetch_one(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("summary", e))?;
        summary.permanent_failed = u64::try_from(permanent).unwrap_or_default();

        summary.last_seen_message_id = self.get_kv(KEY_LAST_SEEN_MESSAGE_ID).await?;
        summary.last_health_check_at = self.get_kv(KEY_LAST_HEALTH_CHECK_AT).await?;
        Ok(summary)
    }

    async fn begin(&self, operation: &str) -> Result<Transaction<'static, Sqlite>, StoreError> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error(operation, e))
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

async fn upsert_kv<'e, E>(executor: E, key: &str, value: &str, now: DateTime<Utc>) -> Result<(), StoreError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
        ON CONFLICT (key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
        "#,
    )
    .bind(key)
    .bind(value)
    .bind(format_timestamp(now))
    .execute(executor)
    .await
    .map_err(|e| map_sqlx_error("set_kv", e))?;
    Ok(())
}

async fn current_state(
    tx: &mut Transaction<'static, Sqlite>,
    id: &MessageId,
) -> Result<Option<(ItemStatus, u32)>, StoreError> {
    let row = sqlx::query("SELECT status, attempts FROM messages WHERE message_id = ?1")
        .bind(id.as_str())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("current_state", e))?;

    let Some(row) = row else {
        return Ok(None);
    };
    let status: String = row
        .try_get("status")
        .map_err(|e| map_sqlx_error("current_state", e))?;
    let attempts: i64 = row
        .try_get("attempts")
        .map_err(|e| map_sqlx_error("current_state", e))?;
    Ok(Some((
        ItemStatus::from_str(&status).map_err(integrity)?,
        count(attempts, "attempts")?,
    )))
}

/// Validate a status change and, for failure transitions, that attempts never decrease.
async fn expect_transition(
    tx: &mut Transaction<'static, Sqlite>,
    id: &MessageId,
    next: ItemStatus,
    attempts: Option<u32>,
) -> Result<(), StoreError> {
    let (status, current_attempts) = current_state(tx, id)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("message {id}")))?;
    status.check_transition(next).map_err(integrity)?;

    if let Some(attempts) = attempts {
        if attempts < current_attempts {
            return Err(StoreError::Integrity(format!(
                "attempts for message {id} would decrease from {current_attempts} to {attempts}"
            )));
        }
    }
    Ok(())
}
