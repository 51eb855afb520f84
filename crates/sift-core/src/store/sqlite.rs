//! SQLite-backed triage store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::error::{SiftError, SiftResult};
use crate::traits::{TaskRecord, TriageStore};
use crate::types::{ExtractedTask, Message, PriorityLabel, StoredMessage, TrainingSample};

/// SQLite-backed store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a store at the given path.
    pub fn new(path: impl AsRef<Path>) -> SiftResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> SiftResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> SiftResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| SiftError::database("connection mutex poisoned"))
    }

    fn init_schema(&self) -> SiftResult<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                package_origin TEXT NOT NULL,
                title TEXT,
                body TEXT,
                observed_at TEXT NOT NULL,
                priority TEXT NOT NULL,
                user_priority TEXT,
                processed INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_messages_pending
                ON messages(priority, processed, observed_at);

            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                message_id TEXT NOT NULL,
                title TEXT NOT NULL,
                due_at TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY (message_id) REFERENCES messages(id)
            );

            CREATE INDEX IF NOT EXISTS idx_tasks_message ON tasks(message_id);

            CREATE TABLE IF NOT EXISTS training_samples (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                text TEXT NOT NULL,
                label TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
        "#,
        )?;
        Ok(())
    }

    fn parse_time(value: &str) -> SiftResult<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(value)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| SiftError::parse(e.to_string()))
    }

    fn parse_label(value: &str) -> SiftResult<PriorityLabel> {
        PriorityLabel::from_label(value)
            .ok_or_else(|| SiftError::parse(format!("unknown priority label '{}'", value)))
    }

    fn row_to_message(row: MessageRow) -> SiftResult<StoredMessage> {
        Ok(StoredMessage {
            message: Message {
                id: row.id,
                package_origin: row.package_origin,
                title: row.title,
                body: row.body,
                observed_at: Self::parse_time(&row.observed_at)?,
            },
            priority: Self::parse_label(&row.priority)?,
            user_priority: row
                .user_priority
                .as_deref()
                .map(Self::parse_label)
                .transpose()?,
            processed: row.processed != 0,
        })
    }

    fn read_message_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
        Ok(MessageRow {
            id: row.get(0)?,
            package_origin: row.get(1)?,
            title: row.get(2)?,
            body: row.get(3)?,
            observed_at: row.get(4)?,
            priority: row.get(5)?,
            user_priority: row.get(6)?,
            processed: row.get(7)?,
        })
    }
}

struct MessageRow {
    id: String,
    package_origin: String,
    title: Option<String>,
    body: Option<String>,
    observed_at: String,
    priority: String,
    user_priority: Option<String>,
    processed: i64,
}

const MESSAGE_COLUMNS: &str =
    "id, package_origin, title, body, observed_at, priority, user_priority, processed";

#[async_trait]
impl TriageStore for SqliteStore {
    async fn save_message(&self, message: &Message, priority: PriorityLabel) -> SiftResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO messages
                (id, package_origin, title, body, observed_at, priority, processed)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)
             ON CONFLICT(id) DO UPDATE SET
                package_origin = excluded.package_origin,
                title = excluded.title,
                body = excluded.body,
                observed_at = excluded.observed_at,
                priority = excluded.priority
             WHERE messages.processed = 0",
            params![
                message.id,
                message.package_origin,
                message.title,
                message.body,
                message.observed_at.to_rfc3339(),
                priority.to_string(),
            ],
        )?;
        Ok(())
    }

    async fn get_message(&self, id: &str) -> SiftResult<Option<StoredMessage>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS),
                params![id],
                Self::read_message_row,
            )
            .optional()?;
        row.map(Self::row_to_message).transpose()
    }

    async fn mark_processed(&self, ids: &[String]) -> SiftResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare("UPDATE messages SET processed = 1 WHERE id = ?1")?;
            for id in ids {
                stmt.execute(params![id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    async fn is_processed(&self, id: &str) -> SiftResult<bool> {
        let conn = self.conn()?;
        let processed: Option<i64> = conn
            .query_row(
                "SELECT processed FROM messages WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(processed.unwrap_or(0) != 0)
    }

    async fn save_task(&self, message_id: &str, task: &ExtractedTask) -> SiftResult<TaskRecord> {
        let record = TaskRecord::new(message_id, task);
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO tasks (id, message_id, title, due_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.id.to_string(),
                record.message_id,
                record.title,
                record.due_at.map(|d| d.to_rfc3339()),
                record.created_at.to_rfc3339(),
            ],
        )?;
        Ok(record)
    }

    async fn tasks_for(&self, message_id: &str) -> SiftResult<Vec<TaskRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, message_id, title, due_at, created_at
             FROM tasks WHERE message_id = ?1 ORDER BY created_at",
        )?;
        let rows = stmt
            .query_map(params![message_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, message_id, title, due_at, created_at)| {
                Ok(TaskRecord {
                    id: Uuid::parse_str(&id).map_err(|e| SiftError::parse(e.to_string()))?,
                    message_id,
                    title,
                    due_at: due_at.as_deref().map(Self::parse_time).transpose()?,
                    created_at: Self::parse_time(&created_at)?,
                })
            })
            .collect()
    }

    async fn append_training_sample(&self, text: &str, label: PriorityLabel) -> SiftResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO training_samples (text, label, created_at) VALUES (?1, ?2, ?3)",
            params![text, label.to_string(), Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    async fn training_samples(&self) -> SiftResult<Vec<TrainingSample>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT text, label FROM training_samples ORDER BY id")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|(text, label)| Ok(TrainingSample::new(text, Self::parse_label(&label)?)))
            .collect()
    }

    async fn set_user_priority(&self, id: &str, label: PriorityLabel) -> SiftResult<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE messages SET user_priority = ?1 WHERE id = ?2",
            params![label.to_string(), id],
        )?;
        if updated == 0 {
            return Err(SiftError::not_found(id));
        }
        Ok(())
    }

    async fn pending_medium(&self, limit: usize) -> SiftResult<Vec<StoredMessage>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM messages
             WHERE priority = ?1 AND processed = 0
             ORDER BY observed_at LIMIT ?2",
            MESSAGE_COLUMNS
        ))?;
        let rows = stmt
            .query_map(
                params![PriorityLabel::Medium.to_string(), limit as i64],
                Self::read_message_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(Self::row_to_message).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: &str) -> Message {
        Message::new(id, "com.example").with_body("取件码 8-2-1103")
    }

    #[tokio::test]
    async fn test_save_and_get_message() {
        let store = SqliteStore::in_memory().unwrap();
        store.save_message(&message("m1"), PriorityLabel::Medium).await.unwrap();

        let stored = store.get_message("m1").await.unwrap().unwrap();
        assert_eq!(stored.message.body.as_deref(), Some("取件码 8-2-1103"));
        assert_eq!(stored.priority, PriorityLabel::Medium);
        assert!(!stored.processed);
        assert!(store.get_message("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_message_keeps_first_record() {
        let store = SqliteStore::in_memory().unwrap();
        store.save_message(&message("m1"), PriorityLabel::Medium).await.unwrap();
        store.mark_processed(&["m1".to_string()]).await.unwrap();
        store.save_message(&message("m1"), PriorityLabel::High).await.unwrap();

        let stored = store.get_message("m1").await.unwrap().unwrap();
        assert_eq!(stored.priority, PriorityLabel::Medium);
        assert!(stored.processed);
    }

    #[tokio::test]
    async fn test_resave_replaces_unprocessed_content() {
        let store = SqliteStore::in_memory().unwrap();
        store.save_message(&message("m1"), PriorityLabel::Medium).await.unwrap();
        store.set_user_priority("m1", PriorityLabel::Low).await.unwrap();
        let replacement = Message::new("m1", "com.example").with_body("验证码 222222");
        store.save_message(&replacement, PriorityLabel::High).await.unwrap();

        let stored = store.get_message("m1").await.unwrap().unwrap();
        assert_eq!(stored.message.body.as_deref(), Some("验证码 222222"));
        assert_eq!(stored.priority, PriorityLabel::High);
        assert_eq!(stored.user_priority, Some(PriorityLabel::Low));
        assert!(!stored.processed);
    }

    #[tokio::test]
    async fn test_pending_medium_excludes_processed() {
        let store = SqliteStore::in_memory().unwrap();
        store.save_message(&message("a"), PriorityLabel::Medium).await.unwrap();
        store.save_message(&message("b"), PriorityLabel::Medium).await.unwrap();
        store.save_message(&message("c"), PriorityLabel::High).await.unwrap();
        store.mark_processed(&["a".to_string()]).await.unwrap();

        let pending = store.pending_medium(10).await.unwrap();
        let ids: Vec<_> = pending.iter().map(|m| m.message.id.as_str()).collect();
        assert_eq!(ids, vec!["b"]);
        assert!(store.is_processed("a").await.unwrap());
        assert!(!store.is_processed("b").await.unwrap());
    }

    #[tokio::test]
    async fn test_tasks_round_trip() {
        let store = SqliteStore::in_memory().unwrap();
        store.save_message(&message("m1"), PriorityLabel::High).await.unwrap();
        let due = Utc::now();
        let task = ExtractedTask::new("取快递", Some(due)).unwrap();
        let saved = store.save_task("m1", &task).await.unwrap();

        let tasks = store.tasks_for("m1").await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, saved.id);
        assert_eq!(tasks[0].title, "取快递");
        assert_eq!(
            tasks[0].due_at.map(|d| d.timestamp()),
            Some(due.timestamp())
        );
    }

    #[tokio::test]
    async fn test_user_priority_and_samples() {
        let store = SqliteStore::in_memory().unwrap();
        store.save_message(&message("m1"), PriorityLabel::Low).await.unwrap();
        store.set_user_priority("m1", PriorityLabel::High).await.unwrap();
        store.append_training_sample("取件码 8-2-1103", PriorityLabel::High).await.unwrap();

        let stored = store.get_message("m1").await.unwrap().unwrap();
        assert_eq!(stored.priority, PriorityLabel::Low);
        assert_eq!(stored.user_priority, Some(PriorityLabel::High));

        let samples = store.training_samples().await.unwrap();
        assert_eq!(samples, vec![TrainingSample::new("取件码 8-2-1103", PriorityLabel::High)]);

        assert!(matches!(
            store.set_user_priority("nope", PriorityLabel::Low).await,
            Err(SiftError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_file_backed_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("sift.db");
        {
            let store = SqliteStore::new(&path).unwrap();
            store.save_message(&message("m1"), PriorityLabel::High).await.unwrap();
        }
        let reopened = SqliteStore::new(&path).unwrap();
        assert!(reopened.get_message("m1").await.unwrap().is_some());
    }
}
