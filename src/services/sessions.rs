use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::info;

use crate::models::types::{SessionId, Turn};
use crate::services::conversation::Conversation;
use crate::traits::chat_api::ChatApi;

/// State of one browser connection: the remote conversation context and the
/// transcript shown in the chat view.
pub struct ChatSession {
    id: SessionId,
    pub conversation: Conversation,
    transcript: Vec<Turn>,
    created_at: DateTime<Utc>,
    last_active: Instant,
}

/// Serializable view of a session for the HTTP API.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
    pub transcript: Vec<Turn>,
    pub context_messages: usize,
}

impl ChatSession {
    pub fn new(id: SessionId, conversation: Conversation) -> Self {
        Self {
            id,
            conversation,
            transcript: Vec::new(),
            created_at: Utc::now(),
            last_active: Instant::now(),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn transcript(&self) -> &[Turn] {
        &self.transcript
    }

    pub fn push_turn(&mut self, turn: Turn) {
        self.transcript.push(turn);
        self.touch();
    }

    /// Empties the visible transcript. The remote context is reset only when
    /// `reset_context` is set.
    pub fn clear(&mut self, reset_context: bool) {
        self.transcript.clear();
        if reset_context {
            self.conversation.reset();
        }
        self.touch();
    }

    pub fn touch(&mut self) {
        self.last_active = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_active.elapsed()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id.clone(),
            created_at: self.created_at,
            transcript: self.transcript.clone(),
            context_messages: self.conversation.len(),
        }
    }
}

pub type SessionHandle = Arc<Mutex<ChatSession>>;

/// Registry of live chat sessions, one per browser connection.
pub struct SessionManager {
    chat_api: Arc<dyn ChatApi>,
    temperature: Option<f32>,
    clear_resets_context: bool,
    sessions: DashMap<SessionId, SessionHandle>,
}

impl SessionManager {
    pub fn new(chat_api: Arc<dyn ChatApi>, temperature: Option<f32>, clear_resets_context: bool) -> Self {
        Self { chat_api, temperature, clear_resets_context, sessions: DashMap::new() }
    }

    pub fn create(&self) -> SessionId {
        let id = SessionId::generate();
        let conversation = Conversation::new(Arc::clone(&self.chat_api), self.temperature);
        let session = ChatSession::new(id.clone(), conversation);
        self.sessions.insert(id.clone(), Arc::new(Mutex::new(session)));
        info!(session = %id, active = self.sessions.len(), "session created");
        id
    }

    pub fn get(&self, id: &SessionId) -> Option<SessionHandle> {
        self.sessions.get(id).map(|s| Arc::clone(s.value()))
    }

    pub fn remove(&self, id: &SessionId) -> bool {
        let removed = self.sessions.remove(id).is_some();
        if removed {
            info!(session = %id, active = self.sessions.len(), "session closed");
        }
        removed
    }

    pub fn clear_resets_context(&self) -> bool {
        self.clear_resets_context
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Drops sessions idle for at least `idle_timeout`. Sessions with a turn in
    /// flight are locked and therefore kept.
    pub fn evict_idle(&self, idle_timeout: Duration) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, session| match session.try_lock() {
            Ok(s) => s.idle_for() < idle_timeout,
            Err(_) => true,
        });
        let evicted = before.saturating_sub(self.sessions.len());
        if evicted > 0 {
            info!(evicted, active = self.sessions.len(), "idle sessions evicted");
        }
        evicted
    }
}
