use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use tracing::{debug, info};

use super::conversation_repository::{
    BoxFuture, ConversationRepository, ensure_persistable, ensure_tag_name,
};
use super::error::{RepositoryError, RepositoryResult};
use crate::models::{
    ConversationId, ConversationSummary, Message, MessageId, NewMessage, Role, Tag, TagId,
};

/// Migrations applied in order. Each entry is (version, sql).
/// Append new versions only; existing databases depend on the old entries.
const MIGRATIONS: &[(i64, &str)] = &[
    (
        1,
        "CREATE TABLE IF NOT EXISTS conversations (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            title      TEXT    NOT NULL DEFAULT '',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS messages (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            conversation_id INTEGER NOT NULL REFERENCES conversations (id) ON DELETE CASCADE,
            role            TEXT    NOT NULL,
            content         TEXT    NOT NULL,
            timestamp       INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages (conversation_id, id);
        CREATE INDEX IF NOT EXISTS idx_conversations_updated_at
            ON conversations (updated_at DESC);",
    ),
    (
        2,
        "CREATE TABLE IF NOT EXISTS tags (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            name       TEXT    NOT NULL UNIQUE,
            created_at INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS conversation_tags (
            conversation_id INTEGER NOT NULL REFERENCES conversations (id) ON DELETE CASCADE,
            tag_id          INTEGER NOT NULL REFERENCES tags (id) ON DELETE CASCADE,
            PRIMARY KEY (conversation_id, tag_id)
        );
        CREATE INDEX IF NOT EXISTS idx_conversation_tags_tag
            ON conversation_tags (tag_id);
        ALTER TABLE messages ADD COLUMN tokens INTEGER NOT NULL DEFAULT 0;
        UPDATE messages SET tokens = (LENGTH(content) + 3) / 4;",
    ),
];

const SUMMARY_COLUMNS: &str = "c.id, c.title, c.created_at,
    (SELECT COUNT(*) FROM messages m WHERE m.conversation_id = c.id) AS message_count";

/// SQLite-backed repository for conversations.
///
/// Uses WAL journal mode for concurrent reads during background saves.
/// `SqlitePool` is internally reference-counted and cheap to clone.
#[derive(Clone)]
pub struct ConversationSqliteRepository {
    pool: SqlitePool,
}

impl ConversationSqliteRepository {
    /// Open (or create) the database at the platform-specific config path.
    pub async fn new() -> RepositoryResult<Self> {
        Self::open(&Self::default_path()?).await
    }

    /// Open (or create) the database at `path`.
    pub async fn open(path: &Path) -> RepositoryResult<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Self::run_migrations(&pool).await?;

        info!(path = %path.display(), "Opened SQLite conversation database");

        Ok(Self { pool })
    }

    /// Private in-memory database. A single connection that never idles out,
    /// since every connection to `:memory:` sees its own database.
    pub async fn in_memory() -> RepositoryResult<Self> {
        let options = SqliteConnectOptions::new()
            .in_memory(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Self::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    pub fn default_path() -> RepositoryResult<PathBuf> {
        dirs::config_dir()
            .ok_or_else(|| RepositoryError::InitializationError {
                message: "Cannot find config directory".into(),
            })
            .map(|p| p.join("chatline").join("conversations.db"))
    }

    /// Create the schema_version table if absent, then apply any pending migrations.
    async fn run_migrations(pool: &SqlitePool) -> RepositoryResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER NOT NULL
            )",
        )
        .execute(pool)
        .await?;

        sqlx::query("INSERT INTO schema_version (version) SELECT 0 WHERE NOT EXISTS (SELECT 1 FROM schema_version)")
            .execute(pool)
            .await?;

        let current: i64 = sqlx::query_scalar("SELECT version FROM schema_version")
            .fetch_one(pool)
            .await?;

        for (version, sql) in MIGRATIONS {
            if *version > current {
                info!(version, "Applying schema migration");
                // One statement per query call.
                for statement in sql.split(';') {
                    let trimmed = statement.trim();
                    if !trimmed.is_empty() {
                        sqlx::query(trimmed).execute(pool).await?;
                    }
                }
                sqlx::query("UPDATE schema_version SET version = ?")
                    .bind(version)
                    .execute(pool)
                    .await?;
            }
        }

        Ok(())
    }
}

fn from_millis(millis: i64) -> RepositoryResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| RepositoryError::InvalidData {
        message: format!("Timestamp out of range: {millis}"),
    })
}

fn summary_from_row(row: &SqliteRow) -> RepositoryResult<ConversationSummary> {
    let count: i64 = row.try_get("message_count")?;
    Ok(ConversationSummary {
        id: ConversationId(row.try_get("id")?),
        title: row.try_get("title")?,
        created_at: from_millis(row.try_get("created_at")?)?,
        message_count: usize::try_from(count).unwrap_or_default(),
    })
}

fn tag_from_row(row: &SqliteRow) -> RepositoryResult<Tag> {
    Ok(Tag {
        id: TagId(row.try_get("id")?),
        name: row.try_get("name")?,
    })
}

fn message_from_row(row: &SqliteRow) -> RepositoryResult<Message> {
    let tokens: i64 = row.try_get("tokens")?;
    let role: String = row.try_get("role")?;
    let role = Role::parse(&role).ok_or_else(|| RepositoryError::InvalidData {
        message: format!("Unknown message role: {role}"),
    })?;
    Ok(Message {
        id: Some(MessageId(row.try_get("id")?)),
        role,
        content: row.try_get("content")?,
        timestamp: from_millis(row.try_get("timestamp")?)?,
        tokens: usize::try_from(tokens).unwrap_or_default(),
    })
}

async fn ensure_conversation_exists(
    pool: &SqlitePool,
    conversation_id: ConversationId,
) -> RepositoryResult<()> {
    let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM conversations WHERE id = ?")
        .bind(conversation_id.0)
        .fetch_optional(pool)
        .await?;
    match exists {
        Some(_) => Ok(()),
        None => Err(RepositoryError::conversation_not_found(conversation_id.0)),
    }
}

/// Escape LIKE wildcards so user input matches literally (used with `ESCAPE '\'`).
fn like_pattern(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len() + 2);
    escaped.push('%');
    for ch in query.to_lowercase().chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

impl ConversationRepository for ConversationSqliteRepository {
    fn create_conversation(
        &self,
        title: &str,
    ) -> BoxFuture<'static, RepositoryResult<ConversationSummary>> {
        let pool = self.pool.clone();
        let title = title.to_string();
        Box::pin(async move {
            let now = Utc::now();
            let id: i64 = sqlx::query_scalar(
                "INSERT INTO conversations (title, created_at, updated_at)
                 VALUES (?1, ?2, ?2)
                 RETURNING id",
            )
            .bind(&title)
            .bind(now.timestamp_millis())
            .fetch_one(&pool)
            .await?;

            debug!(conv_id = id, "Conversation created");
            Ok(ConversationSummary {
                id: ConversationId(id),
                title,
                created_at: from_millis(now.timestamp_millis())?,
                message_count: 0,
            })
        })
    }

    fn append_message(
        &self,
        conversation_id: ConversationId,
        message: NewMessage,
    ) -> BoxFuture<'static, RepositoryResult<Message>> {
        let pool = self.pool.clone();
        Box::pin(async move {
            ensure_persistable(&message)?;
            let role = message.role.as_api_str().unwrap_or_default();

            let mut tx = pool.begin().await?;
            let touched = sqlx::query("UPDATE conversations SET updated_at = ? WHERE id = ?")
                .bind(Utc::now().timestamp_millis())
                .bind(conversation_id.0)
                .execute(&mut *tx)
                .await?
                .rows_affected();
            if touched == 0 {
                return Err(RepositoryError::conversation_not_found(conversation_id.0));
            }

            let id: i64 = sqlx::query_scalar(
                "INSERT INTO messages (conversation_id, role, content, timestamp, tokens)
                 VALUES (?, ?, ?, ?, ?)
                 RETURNING id",
            )
            .bind(conversation_id.0)
            .bind(role)
            .bind(&message.content)
            .bind(message.timestamp.timestamp_millis())
            .bind(i64::try_from(message.tokens).unwrap_or(i64::MAX))
            .fetch_one(&mut *tx)
            .await?;
            tx.commit().await?;

            // Round-trip through millis so the returned value equals what a reload yields.
            let timestamp = from_millis(message.timestamp.timestamp_millis())?;
            Ok(Message {
                id: Some(MessageId(id)),
                role: message.role,
                content: message.content,
                timestamp,
                tokens: message.tokens,
            })
        })
    }

    fn load_messages(
        &self,
        conversation_id: ConversationId,
    ) -> BoxFuture<'static, RepositoryResult<Vec<Message>>> {
        let pool = self.pool.clone();
        Box::pin(async move {
            ensure_conversation_exists(&pool, conversation_id).await?;

            let rows = sqlx::query(
                "SELECT id, role, content, timestamp, tokens
                 FROM messages
                 WHERE conversation_id = ?
                 ORDER BY id ASC",
            )
            .bind(conversation_id.0)
            .fetch_all(&pool)
            .await?;

            rows.iter().map(message_from_row).collect()
        })
    }

    fn delete_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> BoxFuture<'static, RepositoryResult<()>> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let deleted = sqlx::query("DELETE FROM conversations WHERE id = ?")
                .bind(conversation_id.0)
                .execute(&pool)
                .await?
                .rows_affected();
            if deleted == 0 {
                return Err(RepositoryError::conversation_not_found(conversation_id.0));
            }
            Ok(())
        })
    }

    fn search(&self, query: &str) -> BoxFuture<'static, RepositoryResult<Vec<ConversationSummary>>> {
        let pool = self.pool.clone();
        let query = query.trim().to_string();
        Box::pin(async move {
            let pattern = like_pattern(&query);
            let sql = format!(
                "SELECT {SUMMARY_COLUMNS}
                 FROM conversations c
                 WHERE LOWER(c.title) LIKE ?1 ESCAPE '\\'
                    OR EXISTS (
                        SELECT 1 FROM messages m
                        WHERE m.conversation_id = c.id
                          AND LOWER(m.content) LIKE ?1 ESCAPE '\\'
                    )
                 ORDER BY c.updated_at DESC, c.id DESC"
            );
            let rows = sqlx::query(&sql).bind(pattern).fetch_all(&pool).await?;
            rows.iter().map(summary_from_row).collect()
        })
    }

    fn list_conversations(&self) -> BoxFuture<'static, RepositoryResult<Vec<ConversationSummary>>> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let sql = format!(
                "SELECT {SUMMARY_COLUMNS}
                 FROM conversations c
                 ORDER BY c.updated_at DESC, c.id DESC"
            );
            let rows = sqlx::query(&sql).fetch_all(&pool).await?;
            rows.iter().map(summary_from_row).collect()
        })
    }

    fn get_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> BoxFuture<'static, RepositoryResult<Option<ConversationSummary>>> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let sql = format!("SELECT {SUMMARY_COLUMNS} FROM conversations c WHERE c.id = ?");
            let row = sqlx::query(&sql)
                .bind(conversation_id.0)
                .fetch_optional(&pool)
                .await?;
            row.as_ref().map(summary_from_row).transpose()
        })
    }

    fn rename_conversation(
        &self,
        conversation_id: ConversationId,
        title: &str,
    ) -> BoxFuture<'static, RepositoryResult<()>> {
        let pool = self.pool.clone();
        let title = title.to_string();
        Box::pin(async move {
            let updated = sqlx::query("UPDATE conversations SET title = ? WHERE id = ?")
                .bind(&title)
                .bind(conversation_id.0)
                .execute(&pool)
                .await?
                .rows_affected();
            if updated == 0 {
                return Err(RepositoryError::conversation_not_found(conversation_id.0));
            }
            Ok(())
        })
    }

    fn conversation_token_total(
        &self,
        conversation_id: ConversationId,
    ) -> BoxFuture<'static, RepositoryResult<usize>> {
        let pool = self.pool.clone();
        Box::pin(async move {
            ensure_conversation_exists(&pool, conversation_id).await?;
            let total: i64 = sqlx::query_scalar(
                "SELECT COALESCE(SUM(tokens), 0) FROM messages WHERE conversation_id = ?",
            )
            .bind(conversation_id.0)
            .fetch_one(&pool)
            .await?;
            Ok(usize::try_from(total).unwrap_or_default())
        })
    }

    fn create_tag(&self, name: &str) -> BoxFuture<'static, RepositoryResult<Tag>> {
        let pool = self.pool.clone();
        let name = ensure_tag_name(name);
        Box::pin(async move {
            let name = name?;
            sqlx::query(
                "INSERT INTO tags (name, created_at) VALUES (?, ?)
                 ON CONFLICT (name) DO NOTHING",
            )
            .bind(&name)
            .bind(Utc::now().timestamp_millis())
            .execute(&pool)
            .await?;

            let id: i64 = sqlx::query_scalar("SELECT id FROM tags WHERE name = ?")
                .bind(&name)
                .fetch_one(&pool)
                .await?;
            debug!(tag_id = id, name = %name, "Tag ready");
            Ok(Tag { id: TagId(id), name })
        })
    }

    fn delete_tag(&self, tag_id: TagId) -> BoxFuture<'static, RepositoryResult<()>> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let deleted = sqlx::query("DELETE FROM tags WHERE id = ?")
                .bind(tag_id.0)
                .execute(&pool)
                .await?
                .rows_affected();
            if deleted == 0 {
                return Err(RepositoryError::tag_not_found(tag_id.0));
            }
            Ok(())
        })
    }

    fn list_tags(&self) -> BoxFuture<'static, RepositoryResult<Vec<Tag>>> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let rows = sqlx::query("SELECT id, name FROM tags ORDER BY name ASC")
                .fetch_all(&pool)
                .await?;
            rows.iter().map(tag_from_row).collect()
        })
    }

    fn tag_conversation(
        &self,
        conversation_id: ConversationId,
        tag_id: TagId,
    ) -> BoxFuture<'static, RepositoryResult<()>> {
        let pool = self.pool.clone();
        Box::pin(async move {
            ensure_conversation_exists(&pool, conversation_id).await?;
            let tag: Option<i64> = sqlx::query_scalar("SELECT id FROM tags WHERE id = ?")
                .bind(tag_id.0)
                .fetch_optional(&pool)
                .await?;
            if tag.is_none() {
                return Err(RepositoryError::tag_not_found(tag_id.0));
            }

            sqlx::query(
                "INSERT OR IGNORE INTO conversation_tags (conversation_id, tag_id)
                 VALUES (?, ?)",
            )
            .bind(conversation_id.0)
            .bind(tag_id.0)
            .execute(&pool)
            .await?;
            Ok(())
        })
    }

    fn untag_conversation(
        &self,
        conversation_id: ConversationId,
        tag_id: TagId,
    ) -> BoxFuture<'static, RepositoryResult<()>> {
        let pool = self.pool.clone();
        Box::pin(async move {
            sqlx::query("DELETE FROM conversation_tags WHERE conversation_id = ? AND tag_id = ?")
                .bind(conversation_id.0)
                .bind(tag_id.0)
                .execute(&pool)
                .await?;
            Ok(())
        })
    }

    fn conversation_tags(
        &self,
        conversation_id: ConversationId,
    ) -> BoxFuture<'static, RepositoryResult<Vec<Tag>>> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let rows = sqlx::query(
                "SELECT t.id, t.name
                 FROM tags t
                 JOIN conversation_tags ct ON ct.tag_id = t.id
                 WHERE ct.conversation_id = ?
                 ORDER BY t.name ASC",
            )
            .bind(conversation_id.0)
            .fetch_all(&pool)
            .await?;
            rows.iter().map(tag_from_row).collect()
        })
    }

    fn conversations_with_tag(
        &self,
        tag_id: TagId,
    ) -> BoxFuture<'static, RepositoryResult<Vec<ConversationSummary>>> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let sql = format!(
                "SELECT {SUMMARY_COLUMNS}
                 FROM conversations c
                 JOIN conversation_tags ct ON ct.conversation_id = c.id
                 WHERE ct.tag_id = ?
                 ORDER BY c.updated_at DESC, c.id DESC"
            );
            let rows = sqlx::query(&sql).bind(tag_id.0).fetch_all(&pool).await?;
            rows.iter().map(summary_from_row).collect()
        })
    }
}
