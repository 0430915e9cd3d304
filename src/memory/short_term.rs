//! 短期记忆：按会话保存最近的对话消息
//!
//! Reporter 在聊天模式下取最近若干条注入 prompt，并在每次回答后写回（user, assistant）。
//! 两个实现：进程内（ConversationMemory 按会话分桶）与 SQLite（rusqlite，跨重启保留）。

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use rusqlite::{params, Connection};

use crate::memory::{ConversationMemory, Message, Role};

/// 短期记忆接口
pub trait ShortTermMemory: Send + Sync {
    /// 最近 limit 条消息，按时间正序（最旧在前）
    fn get_recent(&self, limit: usize, session_id: &str) -> Vec<Message>;

    fn save(&self, role: Role, content: &str, session_id: &str) -> anyhow::Result<()>;
}

/// 进程内实现
#[derive(Debug)]
pub struct InMemoryShortTerm {
    max_turns: usize,
    sessions: Mutex<HashMap<String, ConversationMemory>>,
}

impl InMemoryShortTerm {
    pub fn new(max_turns: usize) -> Self {
        Self {
            max_turns,
            sessions: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryShortTerm {
    fn default() -> Self {
        Self::new(20)
    }
}

impl ShortTermMemory for InMemoryShortTerm {
    fn get_recent(&self, limit: usize, session_id: &str) -> Vec<Message> {
        let sessions = self
            .sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        sessions
            .get(session_id)
            .map(|mem| mem.recent(limit).to_vec())
            .unwrap_or_default()
    }

    fn save(&self, role: Role, content: &str, session_id: &str) -> anyhow::Result<()> {
        let mut sessions = self
            .sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| ConversationMemory::new(self.max_turns))
            .push(Message {
                role,
                content: content.to_string(),
            });
        Ok(())
    }
}

/// SQLite 实现：单表 messages(id, session_id, role, content, created_at)
#[derive(Clone)]
pub struct SqliteShortTerm {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteShortTerm {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open short-term memory at {}", path.display()))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> anyhow::Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id, id);",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn query_recent(&self, limit: usize, session_id: &str) -> anyhow::Result<Vec<Message>> {
        let conn = self
            .conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut stmt = conn.prepare(
            "SELECT role, content FROM messages WHERE session_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![session_id, limit as i64], |row| {
            let role: String = row.get(0)?;
            let content: String = row.get(1)?;
            Ok(Message {
                role: Role::parse(&role),
                content,
            })
        })?;
        let mut messages = rows.collect::<Result<Vec<_>, _>>()?;
        messages.reverse();
        Ok(messages)
    }
}

impl ShortTermMemory for SqliteShortTerm {
    fn get_recent(&self, limit: usize, session_id: &str) -> Vec<Message> {
        match self.query_recent(limit, session_id) {
            Ok(messages) => messages,
            Err(e) => {
                tracing::warn!(session = %session_id, "Failed to read short-term memory: {}", e);
                Vec::new()
            }
        }
    }

    fn save(&self, role: Role, content: &str, session_id: &str) -> anyhow::Result<()> {
        let conn = self
            .conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        conn.execute(
            "INSERT INTO messages (session_id, role, content, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                session_id,
                role.as_str(),
                content,
                chrono::Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }
}
