//! Append-only message log.

use async_trait::async_trait;
use tracing::instrument;

use parlor_core::{Message, MessageStore, StoreError};

use crate::database::{db_err, Database};

/// Message persistence over the `messages` table.
///
/// Rows are returned in insertion order (`id`), which is the hub's
/// acceptance order. Timestamps have one-second resolution and are not a
/// reliable tie-breaker.
#[derive(Clone)]
pub struct MessageRepo {
    db: Database,
}

impl MessageRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip_all, fields(username = message.username()))]
    pub fn insert(&self, message: &Message) -> Result<i64, StoreError> {
        self.db.with_conn(|conn| {
            let _ = conn
                .execute(
                    "INSERT INTO messages (username, message, timestamp) VALUES (?1, ?2, ?3)",
                    rusqlite::params![message.username(), message.body(), message.timestamp()],
                )
                .map_err(db_err)?;
            Ok(conn.last_insert_rowid())
        })
    }

    #[instrument(skip(self))]
    pub fn all(&self) -> Result<Vec<Message>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT username, message, timestamp FROM messages ORDER BY id")
                .map_err(db_err)?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(Message::from_parts(
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })
                .map_err(db_err)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(db_err)?;
            Ok(rows)
        })
    }

    pub fn count(&self) -> Result<u64, StoreError> {
        self.db.with_conn(|conn| {
            let n: i64 = conn
                .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))
                .map_err(db_err)?;
            Ok(u64::try_from(n).unwrap_or_default())
        })
    }
}

#[async_trait]
impl MessageStore for MessageRepo {
    async fn append(&self, message: &Message) -> Result<(), StoreError> {
        let repo = self.clone();
        let message = message.clone();
        tokio::task::spawn_blocking(move || repo.insert(&message).map(|_| ()))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
    }

    async fn list_ordered(&self) -> Result<Vec<Message>, StoreError> {
        let repo = self.clone();
        tokio::task::spawn_blocking(move || repo.all())
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> MessageRepo {
        MessageRepo::new(Database::in_memory().unwrap())
    }

    #[test]
    fn insert_and_read_back() {
        let repo = repo();
        let msg = Message::from_parts("alice", "hi", "2024-01-01 00:00:00");
        let id = repo.insert(&msg).unwrap();
        assert!(id > 0);

        let all = repo.all().unwrap();
        assert_eq!(all, vec![msg]);
        assert_eq!(repo.count().unwrap(), 1);
    }

    #[test]
    fn order_follows_insertion_not_timestamp() {
        let repo = repo();
        // Same second, then an earlier clock reading: insertion order wins.
        let first = Message::from_parts("a", "one", "2024-01-01 00:00:05");
        let second = Message::from_parts("b", "two", "2024-01-01 00:00:05");
        let third = Message::from_parts("c", "three", "2024-01-01 00:00:04");
        for m in [&first, &second, &third] {
            let _ = repo.insert(m).unwrap();
        }

        let bodies: Vec<String> = repo.all().unwrap().iter().map(|m| m.body().to_string()).collect();
        assert_eq!(bodies, vec!["one", "two", "three"]);
    }

    #[test]
    fn empty_log() {
        let repo = repo();
        assert!(repo.all().unwrap().is_empty());
        assert_eq!(repo.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn trait_methods_round_trip() {
        let repo = repo();
        let store: &dyn MessageStore = &repo;
        store
            .append(&Message::from_parts("dave", "yo", "2024-03-03 03:03:03"))
            .await
            .unwrap();
        let listed = store.list_ordered().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].username(), "dave");
    }

    #[tokio::test]
    async fn concurrent_appends_all_persist() {
        let repo = repo();
        let mut handles = Vec::new();
        for i in 0..20 {
            let repo = repo.clone();
            handles.push(tokio::spawn(async move {
                repo.append(&Message::from_parts("u", format!("m{i}"), "2024-01-01 00:00:00"))
                    .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(repo.count().unwrap(), 20);
    }

    #[test]
    fn survives_reopen_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat.db");
        {
            let repo = MessageRepo::new(Database::open(&path).unwrap());
            let _ = repo
                .insert(&Message::from_parts("alice", "persisted", "2024-01-01 00:00:00"))
                .unwrap();
        }
        let repo = MessageRepo::new(Database::open(&path).unwrap());
        assert_eq!(repo.all().unwrap()[0].body(), "persisted");
    }
}
