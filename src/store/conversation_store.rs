//! SQLite-backed conversation and message store.

use std::path::Path;
use std::str::FromStr;

use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};

use crate::store::errors::{StorageError, StoreResult};
use crate::store::types::{
    Conversation, ConversationId, Message, MessageId, MessageRole, now_timestamp,
};

/// Trait for conversation storage.
///
/// All operations are synchronous; the store is driven by one user action at
/// a time and needs no writer coordination.
pub trait ConversationStore: Send {
    /// Create a conversation and return its identifier.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn create(&self, title: &str, model: &str) -> StoreResult<ConversationId>;

    /// Get a conversation by ID.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn get(&self, id: ConversationId) -> StoreResult<Option<Conversation>>;

    /// List all conversations, most recent first.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn list(&self) -> StoreResult<Vec<Conversation>>;

    /// Load the messages of a conversation in insertion order.
    ///
    /// # Errors
    /// Returns an error if storage access fails or a stored role is invalid.
    fn get_messages(&self, id: ConversationId) -> StoreResult<Vec<Message>>;

    /// Append a message to a conversation.
    ///
    /// # Errors
    /// Returns [`StorageError::NotFound`] for an unknown conversation.
    fn append_message(&self, id: ConversationId, role: MessageRole, content: &str)
    -> StoreResult<()>;

    /// Change the title of a conversation.
    ///
    /// # Errors
    /// Returns [`StorageError::NotFound`] for an unknown conversation.
    fn rename(&self, id: ConversationId, title: &str) -> StoreResult<()>;

    /// Change the model of a conversation that has no messages yet.
    ///
    /// # Errors
    /// Returns [`StorageError::ModelLocked`] once the conversation owns a message.
    fn update_model(&self, id: ConversationId, model: &str) -> StoreResult<()>;

    /// Delete a conversation and all of its messages.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn delete(&self, id: ConversationId) -> StoreResult<()>;

    /// Check whether a conversation owns no messages.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn is_empty(&self, id: ConversationId) -> StoreResult<bool>;

    /// Count conversations created on the given calendar day.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn count_created_on(&self, date: NaiveDate) -> StoreResult<u32>;

    /// Delete every conversation that owns no messages.
    ///
    /// Returns the number of conversations removed.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn delete_empty(&self) -> StoreResult<usize>;

    /// Delete the conversation if it has no messages.
    ///
    /// Returns `true` when the conversation was discarded.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn delete_if_empty(&self, id: ConversationId) -> StoreResult<bool> {
        if self.is_empty(id)? {
            self.delete(id)?;
            return Ok(true);
        }
        Ok(false)
    }
}

/// `SQLite` implementation of the conversation store.
pub struct SqliteConversationStore {
    conn: Connection,
}

impl SqliteConversationStore {
    /// Open (or create) the database file and prepare the schema.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    /// Returns an error if the schema cannot be created.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// Wrap an existing connection, creating or upgrading the schema.
    ///
    /// # Errors
    /// Returns an error if the schema cannot be created or migrated.
    pub fn from_connection(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS conversations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT,
                timestamp TEXT,
                model TEXT
            );",
        )?;

        // Databases written by older releases have no model column.
        if !has_column(&conn, "conversations", "model")? {
            conn.execute_batch("ALTER TABLE conversations ADD COLUMN model TEXT")?;
        }

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id INTEGER,
                role TEXT,
                content TEXT,
                timestamp TEXT,
                FOREIGN KEY (conversation_id) REFERENCES conversations(id)
            );
            CREATE INDEX IF NOT EXISTS idx_messages_conversation
                ON messages (conversation_id, id);",
        )?;

        Ok(Self { conn })
    }
}

fn has_column(conn: &Connection, table: &str, column: &str) -> StoreResult<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, rusqlite::Error>>()?;
    Ok(names.iter().any(|name| name == column))
}

fn conversation_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get(0)?,
        title: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
        model: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        timestamp: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
    })
}

impl ConversationStore for SqliteConversationStore {
    fn create(&self, title: &str, model: &str) -> StoreResult<ConversationId> {
        self.conn.execute(
            "INSERT INTO conversations (title, model, timestamp) VALUES (?1, ?2, ?3)",
            rusqlite::params![title, model, now_timestamp()],
        )?;
        Ok(ConversationId(self.conn.last_insert_rowid()))
    }

    fn get(&self, id: ConversationId) -> StoreResult<Option<Conversation>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, title, model, timestamp FROM conversations WHERE id = ?1",
                rusqlite::params![id],
                conversation_from_row,
            )
            .optional()?;
        Ok(row)
    }

    fn list(&self) -> StoreResult<Vec<Conversation>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, title, model, timestamp
             FROM conversations
             ORDER BY timestamp DESC, id DESC",
        )?;
        let rows = stmt
            .query_map([], conversation_from_row)?
            .collect::<Result<Vec<_>, rusqlite::Error>>()?;
        Ok(rows)
    }

    fn get_messages(&self, id: ConversationId) -> StoreResult<Vec<Message>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, role, content, timestamp
             FROM messages
             WHERE conversation_id = ?1
             ORDER BY id",
        )?;
        let rows = stmt
            .query_map(rusqlite::params![id], |row| {
                let message_id: MessageId = row.get(0)?;
                let role: Option<String> = row.get(1)?;
                let content: Option<String> = row.get(2)?;
                let timestamp: Option<String> = row.get(3)?;
                Ok((message_id, role, content, timestamp))
            })?
            .collect::<Result<Vec<_>, rusqlite::Error>>()?;

        let mut messages = Vec::with_capacity(rows.len());
        for (message_id, role, content, timestamp) in rows {
            let role = role.unwrap_or_default();
            let role = MessageRole::from_str(&role).map_err(StorageError::InvalidRole)?;
            messages.push(Message {
                id: message_id,
                conversation_id: id,
                role,
                content: content.unwrap_or_default(),
                timestamp: timestamp.unwrap_or_default(),
            });
        }

        Ok(messages)
    }

    fn append_message(
        &self,
        id: ConversationId,
        role: MessageRole,
        content: &str,
    ) -> StoreResult<()> {
        let inserted = self.conn.execute(
            "INSERT INTO messages (conversation_id, role, content, timestamp)
             SELECT ?1, ?2, ?3, ?4
             WHERE EXISTS (SELECT 1 FROM conversations WHERE id = ?1)",
            rusqlite::params![id, role.as_str(), content, now_timestamp()],
        )?;
        if inserted == 0 {
            return Err(StorageError::NotFound(id));
        }
        Ok(())
    }

    fn rename(&self, id: ConversationId, title: &str) -> StoreResult<()> {
        let updated = self.conn.execute(
            "UPDATE conversations SET title = ?1 WHERE id = ?2",
            rusqlite::params![title, id],
        )?;
        if updated == 0 {
            return Err(StorageError::NotFound(id));
        }
        Ok(())
    }

    fn update_model(&self, id: ConversationId, model: &str) -> StoreResult<()> {
        let current = self.get(id)?.ok_or(StorageError::NotFound(id))?;
        if current.model == model {
            return Ok(());
        }

        let updated = self.conn.execute(
            "UPDATE conversations SET model = ?1
             WHERE id = ?2
               AND NOT EXISTS (SELECT 1 FROM messages WHERE conversation_id = ?2)",
            rusqlite::params![model, id],
        )?;
        if updated == 0 {
            return Err(StorageError::ModelLocked {
                id,
                model: current.model,
            });
        }
        Ok(())
    }

    fn delete(&self, id: ConversationId) -> StoreResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM messages WHERE conversation_id = ?1",
            rusqlite::params![id],
        )?;
        tx.execute(
            "DELETE FROM conversations WHERE id = ?1",
            rusqlite::params![id],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn is_empty(&self, id: ConversationId) -> StoreResult<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
            rusqlite::params![id],
            |row| row.get(0),
        )?;
        Ok(count == 0)
    }

    fn count_created_on(&self, date: NaiveDate) -> StoreResult<u32> {
        let day = date.format("%Y-%m-%d").to_string();
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM conversations WHERE substr(timestamp, 1, 10) = ?1",
            rusqlite::params![day],
            |row| row.get(0),
        )?;
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    fn delete_empty(&self) -> StoreResult<usize> {
        let removed = self.conn.execute(
            "DELETE FROM conversations
             WHERE NOT EXISTS (
                 SELECT 1 FROM messages WHERE messages.conversation_id = conversations.id
             )",
            [],
        )?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Local;

    use super::*;

    fn store() -> SqliteConversationStore {
        SqliteConversationStore::open_in_memory().unwrap()
    }

    #[test]
    fn test_create_then_list_most_recent_first() {
        let store = store();
        let first = store.create("First", "gpt-4").unwrap();
        let second = store.create("Second", "claude-3-sonnet-20240229").unwrap();

        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, second);
        assert_eq!(listed[1].id, first);
        assert_eq!(listed.iter().filter(|c| c.id == second).count(), 1);
        assert_eq!(listed[0].title, "Second");
        assert_eq!(listed[0].model, "claude-3-sonnet-20240229");
    }

    #[test]
    fn test_ids_are_monotonic_after_delete() {
        let store = store();
        let first = store.create("a", "gpt-4").unwrap();
        store.delete(first).unwrap();
        let second = store.create("b", "gpt-4").unwrap();
        assert!(second > first);
    }

    #[test]
    fn test_messages_read_back_in_insertion_order() {
        let store = store();
        let id = store.create("Chat", "gpt-4").unwrap();
        let contents = ["one", "two", "three", "four", "five"];
        for (i, content) in contents.iter().enumerate() {
            let role = if i % 2 == 0 {
                MessageRole::User
            } else {
                MessageRole::Assistant
            };
            store.append_message(id, role, content).unwrap();
        }

        let messages = store.get_messages(id).unwrap();
        assert_eq!(messages.len(), contents.len());
        for (i, message) in messages.iter().enumerate() {
            assert_eq!(message.content, contents[i]);
            assert_eq!(message.conversation_id, id);
        }
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[1].role, MessageRole::Assistant);
    }

    #[test]
    fn test_is_empty_flips_after_first_append() {
        let store = store();
        let id = store.create("Chat", "gpt-4").unwrap();
        assert!(store.is_empty(id).unwrap());

        store.append_message(id, MessageRole::User, "hi").unwrap();
        assert!(!store.is_empty(id).unwrap());
    }

    #[test]
    fn test_rename_changes_only_title() {
        let store = store();
        let id = store.create("Old", "gpt-4").unwrap();
        let before = store.get(id).unwrap().unwrap();

        store.rename(id, "New").unwrap();
        let after = store.get(id).unwrap().unwrap();

        assert_eq!(after.title, "New");
        assert_eq!(after.model, before.model);
        assert_eq!(after.timestamp, before.timestamp);
        assert_eq!(after.id, before.id);
    }

    #[test]
    fn test_rename_unknown_conversation_fails() {
        let store = store();
        let err = store.rename(ConversationId(99), "x").unwrap_err();
        assert!(matches!(err, StorageError::NotFound(ConversationId(99))));
    }

    #[test]
    fn test_delete_cascades_to_messages() {
        let store = store();
        let id = store.create("Chat", "gpt-4").unwrap();
        store.append_message(id, MessageRole::User, "hi").unwrap();
        store
            .append_message(id, MessageRole::Assistant, "hello")
            .unwrap();

        store.delete(id).unwrap();

        assert!(store.get_messages(id).unwrap().is_empty());
        assert!(store.get(id).unwrap().is_none());
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_delete_unknown_conversation_is_noop() {
        let store = store();
        store.delete(ConversationId(7)).unwrap();
    }

    #[test]
    fn test_append_to_unknown_conversation_fails() {
        let store = store();
        let err = store
            .append_message(ConversationId(3), MessageRole::User, "hi")
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[test]
    fn test_update_model_only_while_empty() {
        let store = store();
        let id = store.create("Chat", "gpt-4").unwrap();

        store.update_model(id, "gpt-3.5-turbo").unwrap();
        assert_eq!(store.get(id).unwrap().unwrap().model, "gpt-3.5-turbo");

        store.append_message(id, MessageRole::User, "hi").unwrap();
        let err = store
            .update_model(id, "claude-3-sonnet-20240229")
            .unwrap_err();
        match err {
            StorageError::ModelLocked { id: locked, model } => {
                assert_eq!(locked, id);
                assert_eq!(model, "gpt-3.5-turbo");
            }
            other => panic!("unexpected error: {other}"),
        }

        // Re-selecting the bound model is accepted.
        store.update_model(id, "gpt-3.5-turbo").unwrap();
        assert_eq!(store.get(id).unwrap().unwrap().model, "gpt-3.5-turbo");
    }

    #[test]
    fn test_delete_if_empty() {
        let store = store();
        let empty = store.create("Empty", "gpt-4").unwrap();
        let busy = store.create("Busy", "gpt-4").unwrap();
        store.append_message(busy, MessageRole::User, "hi").unwrap();

        assert!(store.delete_if_empty(empty).unwrap());
        assert!(!store.delete_if_empty(busy).unwrap());
        assert!(store.get(empty).unwrap().is_none());
        assert!(store.get(busy).unwrap().is_some());
    }

    #[test]
    fn test_delete_empty_keeps_conversations_with_messages() {
        let store = store();
        let empty = store.create("Empty", "gpt-4").unwrap();
        let busy = store.create("Busy", "gpt-4").unwrap();
        store.append_message(busy, MessageRole::User, "hi").unwrap();

        assert_eq!(store.delete_empty().unwrap(), 1);
        assert!(store.get(empty).unwrap().is_none());
        assert_eq!(store.get_messages(busy).unwrap().len(), 1);
        assert_eq!(store.delete_empty().unwrap(), 0);
    }

    #[test]
    fn test_count_created_on_today() {
        let store = store();
        let today = Local::now().date_naive();
        assert_eq!(store.count_created_on(today).unwrap(), 0);

        store.create("a", "gpt-4").unwrap();
        store.create("b", "gpt-4").unwrap();
        assert_eq!(store.count_created_on(today).unwrap(), 2);

        let long_ago = NaiveDate::from_ymd_opt(2001, 1, 1).unwrap();
        assert_eq!(store.count_created_on(long_ago).unwrap(), 0);
    }

    #[test]
    fn test_legacy_schema_gains_model_column() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE conversations (id INTEGER PRIMARY KEY, title TEXT, timestamp TEXT);
             INSERT INTO conversations (title, timestamp) VALUES ('Legacy', '2024-01-02T03:04:05.000001');",
        )
        .unwrap();

        let store = SqliteConversationStore::from_connection(conn).unwrap();
        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].title, "Legacy");
        assert_eq!(listed[0].model, "");

        store.update_model(listed[0].id, "gpt-4").unwrap();
        assert_eq!(store.get(listed[0].id).unwrap().unwrap().model, "gpt-4");
    }

    #[test]
    fn test_invalid_stored_role_is_reported() {
        let store = store();
        let id = store.create("Chat", "gpt-4").unwrap();
        store
            .conn
            .execute(
                "INSERT INTO messages (conversation_id, role, content, timestamp) VALUES (?1, 'system', 'x', '')",
                rusqlite::params![id],
            )
            .unwrap();

        let err = store.get_messages(id).unwrap_err();
        assert!(matches!(err, StorageError::InvalidRole(role) if role == "system"));
    }
}
