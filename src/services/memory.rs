//! Chat memory
//!
//! Short-term conversational context per thread. Durable when the store is
//! configured (chat_messages table); a bounded in-process buffer otherwise.
//! Writes are fired off the critical path and never block or fail the
//! pipeline: if the store is down, log and continue.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sqlx::SqlitePool;
use uuid::Uuid;

/// Turns kept per thread in the in-process fallback.
const FALLBACK_TURNS_PER_THREAD: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryRole {
    User,
    Assistant,
    System,
}

impl MemoryRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }

    fn parse_role(s: &str) -> Self {
        match s {
            "assistant" => Self::Assistant,
            "system" => Self::System,
            _ => Self::User,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MemoryTurn {
    pub role: MemoryRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

pub struct ChatMemory {
    pool: Option<SqlitePool>,
    fallback: DashMap<String, Vec<MemoryTurn>>,
}

impl ChatMemory {
    pub fn new(pool: Option<SqlitePool>) -> Self {
        Self { pool, fallback: DashMap::new() }
    }

    pub fn is_persistent(&self) -> bool {
        self.pool.is_some()
    }

    /// Fire-and-forget append. The write happens on a spawned task so the
    /// pipeline's critical path never waits on the store.
    pub fn append(
        self: &Arc<Self>,
        thread_id: &str,
        role: MemoryRole,
        content: &str,
        metadata: Option<serde_json::Value>,
    ) {
        let this = Arc::clone(self);
        let thread_id = thread_id.to_string();
        let content = content.to_string();
        tokio::spawn(async move {
            this.append_inner(&thread_id, role, &content, metadata).await;
        });
    }

    async fn append_inner(
        &self,
        thread_id: &str,
        role: MemoryRole,
        content: &str,
        metadata: Option<serde_json::Value>,
    ) {
        if let Some(pool) = &self.pool {
            let result = sqlx::query(
                "INSERT INTO chat_messages (id, thread_id, role, content, metadata, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(thread_id)
            .bind(role.as_str())
            .bind(content)
            .bind(metadata.map(|m| m.to_string()))
            .bind(Utc::now())
            .execute(pool)
            .await;

            if let Err(e) = result {
                tracing::warn!("chat memory write failed (continuing): {}", e);
            }
            return;
        }

        let mut turns = self.fallback.entry(thread_id.to_string()).or_default();
        turns.push(MemoryTurn { role, content: content.to_string(), created_at: Utc::now() });
        let overflow = turns.len().saturating_sub(FALLBACK_TURNS_PER_THREAD);
        if overflow > 0 {
            turns.drain(..overflow);
        }
    }

    /// Most recent turns, oldest first.
    pub async fn read(&self, thread_id: &str, max_messages: usize) -> Vec<MemoryTurn> {
        if let Some(pool) = &self.pool {
            let rows: Result<Vec<(String, String, DateTime<Utc>)>, sqlx::Error> = sqlx::query_as(
                "SELECT role, content, created_at FROM chat_messages \
                 WHERE thread_id = ?1 ORDER BY created_at DESC LIMIT ?2",
            )
            .bind(thread_id)
            .bind(max_messages as i64)
            .fetch_all(pool)
            .await;

            return match rows {
                Ok(mut rows) => {
                    rows.reverse();
                    rows.into_iter()
                        .map(|(role, content, created_at)| MemoryTurn {
                            role: MemoryRole::parse_role(&role),
                            content,
                            created_at,
                        })
                        .collect()
                },
                Err(e) => {
                    tracing::warn!("chat memory read failed (continuing without context): {}", e);
                    Vec::new()
                },
            };
        }

        self.fallback
            .get(thread_id)
            .map(|turns| {
                let skip = turns.len().saturating_sub(max_messages);
                turns[skip..].to_vec()
            })
            .unwrap_or_default()
    }

    /// Short plain-text transcript for prompt inclusion.
    pub async fn render_context(&self, thread_id: &str, max_messages: usize) -> String {
        let turns = self.read(thread_id, max_messages).await;
        let mut out = String::new();
        for turn in turns {
            out.push_str(turn.role.as_str());
            out.push_str(": ");
            out.push_str(&crate::utils::text::truncate_chars(&turn.content, 200));
            out.push('\n');
        }
        out
    }

    /// True when the last assistant turn was a clarification prompt.
    pub async fn last_turn_was_clarification(&self, thread_id: &str) -> bool {
        self.read(thread_id, 2)
            .await
            .iter()
            .rev()
            .find(|t| t.role == MemoryRole::Assistant)
            .is_some_and(|t| t.content.starts_with("¿Puedes darme más detalle?"))
    }
}
