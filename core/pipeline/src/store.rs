use chrono::Utc;
use rusqlite::{params, Connection, Row};
use std::path::Path;
use tracing::{debug, info};
use transcript_analyzer_schemas::{
    generate_conversation_id, AnalysisKind, Conversation, ConversationId,
};

use crate::error::StoreError;

/// The narrow contract the orchestrator needs from the persistence backend.
///
/// Each call is atomic on its own; no cross-call consistency is assumed. An
/// update that targets a concurrently deleted row succeeds as a no-op.
pub trait ConversationStore: Send {
    /// All conversations, newest ordinal first.
    fn list(&self) -> Result<Vec<Conversation>, StoreError>;

    /// Insert a new conversation; the store assigns id, the next
    /// conversation_number, and timestamps.
    fn insert(
        &self,
        raw_transcript: &str,
        name: &str,
        conversation_date: &str,
    ) -> Result<Conversation, StoreError>;

    /// Overwrite the raw analysis text for one kind.
    fn update_analysis(
        &self,
        id: &ConversationId,
        kind: AnalysisKind,
        value: &str,
    ) -> Result<(), StoreError>;

    fn delete(&self, id: &ConversationId) -> Result<(), StoreError>;
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open the database at `path` and initialize the schema.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;

        let store = Self { conn };
        store.init_schema()?;

        info!("Conversation store initialized");
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                conversation_number INTEGER NOT NULL,
                name TEXT NOT NULL,
                conversation_date TEXT NOT NULL,
                raw_transcript TEXT NOT NULL,
                memory_analysis TEXT,
                language_analysis TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_conversations_number
             ON conversations(conversation_number DESC)",
            [],
        )?;

        debug!("Conversation schema initialized");
        Ok(())
    }

    fn row_to_conversation(row: &Row) -> rusqlite::Result<Conversation> {
        Ok(Conversation {
            id: ConversationId(row.get(0)?),
            conversation_number: row.get(1)?,
            name: row.get(2)?,
            conversation_date: row.get(3)?,
            raw_transcript: row.get(4)?,
            memory_analysis: row.get(5)?,
            language_analysis: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }
}

impl ConversationStore for SqliteStore {
    fn list(&self) -> Result<Vec<Conversation>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, conversation_number, name, conversation_date, raw_transcript,
                    memory_analysis, language_analysis, created_at, updated_at
             FROM conversations
             ORDER BY conversation_number DESC",
        )?;

        let conversations = stmt
            .query_map([], |row| Self::row_to_conversation(row))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(conversations)
    }

    fn insert(
        &self,
        raw_transcript: &str,
        name: &str,
        conversation_date: &str,
    ) -> Result<Conversation, StoreError> {
        let next_number: i64 = self.conn.query_row(
            "SELECT COALESCE(MAX(conversation_number), 0) + 1 FROM conversations",
            [],
            |row| row.get(0),
        )?;

        let id = generate_conversation_id();
        let now = Utc::now().to_rfc3339();

        self.conn.execute(
            "INSERT INTO conversations (id, conversation_number, name, conversation_date,
                                        raw_transcript, memory_analysis, language_analysis,
                                        created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, NULL, NULL, ?6, ?6)",
            params![id.0, next_number, name, conversation_date, raw_transcript, now],
        )?;

        debug!("Inserted conversation #{}: {}", next_number, id);

        Ok(Conversation {
            id,
            conversation_number: next_number,
            name: name.to_string(),
            conversation_date: conversation_date.to_string(),
            raw_transcript: raw_transcript.to_string(),
            memory_analysis: None,
            language_analysis: None,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    fn update_analysis(
        &self,
        id: &ConversationId,
        kind: AnalysisKind,
        value: &str,
    ) -> Result<(), StoreError> {
        // field_name comes from a fixed two-value enum, safe to splice.
        let query = format!(
            "UPDATE conversations SET {} = ?1, updated_at = ?2 WHERE id = ?3",
            kind.field_name()
        );

        let updated = self
            .conn
            .execute(&query, params![value, Utc::now().to_rfc3339(), id.0])?;

        // Zero rows means the conversation was deleted mid-run; tolerated.
        if updated == 0 {
            debug!("Analysis update targeted missing conversation {}", id);
        }

        Ok(())
    }

    fn delete(&self, id: &ConversationId) -> Result<(), StoreError> {
        self.conn
            .execute("DELETE FROM conversations WHERE id = ?1", params![id.0])?;
        debug!("Deleted conversation {}", id);
        Ok(())
    }
}
