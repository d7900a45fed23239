//! Conversation context store.
//!
//! Keeps, per session id, the last few question/answer turns, the active
//! subject used to anchor follow-up questions, and any facts extracted from
//! grounded answers.
//!
//! # Concurrency
//!
//! Each session lives behind its own `tokio::sync::Mutex`. The pipeline
//! holds a session's guard for the whole request, so two requests for the
//! same session run one after the other while different sessions proceed
//! independently.
//!
//! # Expiry
//!
//! A session idle for longer than the configured timeout (measured from
//! its last mutation) is dropped by a lazy sweep that runs on every store
//! access. Sessions that are currently locked, or that another request is
//! about to lock, are never swept.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::models::{Facts, Turn};

/// Exclusive access to one session's context for the duration of a request.
pub type SessionGuard = OwnedMutexGuard<SessionContext>;

#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session_id: String,
    turns: VecDeque<Turn>,
    max_turns: usize,
    pub active_subject: Option<String>,
    pub facts: Facts,
    pub last_updated: DateTime<Utc>,
}

impl SessionContext {
    pub(crate) fn new(session_id: &str, max_turns: usize) -> Self {
        Self {
            session_id: session_id.to_string(),
            turns: VecDeque::with_capacity(max_turns + 1),
            max_turns,
            active_subject: None,
            facts: Facts::new(),
            last_updated: Utc::now(),
        }
    }

    fn touch(&mut self) {
        self.last_updated = Utc::now();
    }

    /// Append a turn, evicting the oldest beyond the window.
    pub fn add_turn(&mut self, question: &str, answer: Option<&str>) {
        self.turns.push_back(Turn {
            question: question.to_string(),
            answer: answer.map(str::to_string),
        });
        while self.turns.len() > self.max_turns {
            self.turns.pop_front();
        }
        self.touch();
    }

    pub fn previous_question(&self) -> Option<&str> {
        self.turns.back().map(|t| t.question.as_str())
    }

    /// Turns, most recent first.
    pub fn history(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter().rev()
    }

    pub fn turn_count(&self) -> usize {
        self.turns.len()
    }

    pub fn set_active_subject(&mut self, subject: impl Into<String>) {
        self.active_subject = Some(subject.into());
        self.touch();
    }

    pub fn record_fact(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.facts.insert(key.into(), value.into());
        self.touch();
    }

    /// Forget everything about the conversation so far.
    pub fn clear(&mut self) {
        self.turns.clear();
        self.active_subject = None;
        self.facts.clear();
        self.touch();
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty() && self.active_subject.is_none() && self.facts.is_empty()
    }

    /// `Q1:`/`A1:` lines, most recent first, answers cut to 100 chars.
    pub fn summary(&self) -> String {
        let mut lines = Vec::new();
        for (i, turn) in self.history().enumerate() {
            let position = i + 1;
            lines.push(format!("Q{}: {}", position, turn.question));
            if let Some(answer) = &turn.answer {
                let cut: String = answer.chars().take(100).collect();
                lines.push(format!("A{}: {}...", position, cut));
            }
        }
        lines.join("\n")
    }

    fn is_expired(&self, now: DateTime<Utc>, idle_timeout: Duration) -> bool {
        let idle = now.signed_duration_since(self.last_updated);
        idle.to_std().map(|d| d > idle_timeout).unwrap_or(false)
    }
}

pub struct ContextStore {
    sessions: Mutex<HashMap<String, Arc<AsyncMutex<SessionContext>>>>,
    max_turns: usize,
    idle_timeout: Duration,
}

impl ContextStore {
    pub fn new(max_turns: usize, idle_timeout: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            max_turns: max_turns.max(1),
            idle_timeout,
        }
    }

    /// Lock a session, creating an empty context if none exists.
    pub async fn lock(&self, session_id: &str) -> SessionGuard {
        let entry = {
            let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
            self.sweep_locked(&mut sessions, Utc::now());
            sessions
                .entry(session_id.to_string())
                .or_insert_with(|| {
                    Arc::new(AsyncMutex::new(SessionContext::new(
                        session_id,
                        self.max_turns,
                    )))
                })
                .clone()
        };
        entry.lock_owned().await
    }

    /// A copy of the session's context, or `None` if it does not exist or
    /// has expired.
    pub async fn get(&self, session_id: &str) -> Option<SessionContext> {
        let entry = {
            let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
            self.sweep_locked(&mut sessions, Utc::now());
            sessions.get(session_id).cloned()
        }?;
        let ctx = entry.lock().await;
        Some(ctx.clone())
    }

    pub async fn active_subject(&self, session_id: &str) -> Option<String> {
        self.get(session_id).await.and_then(|c| c.active_subject)
    }

    /// Drop expired and empty sessions. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        self.sweep_locked(&mut sessions, Utc::now())
    }

    pub fn session_count(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    fn sweep_locked(
        &self,
        sessions: &mut HashMap<String, Arc<AsyncMutex<SessionContext>>>,
        now: DateTime<Utc>,
    ) -> usize {
        let before = sessions.len();
        sessions.retain(|id, entry| {
            // Someone else holds (or is about to take) this session.
            if Arc::strong_count(entry) > 1 {
                return true;
            }
            let Ok(ctx) = entry.try_lock() else {
                return true;
            };
            let keep = !ctx.is_empty() && !ctx.is_expired(now, self.idle_timeout);
            if !keep {
                tracing::debug!(session = %id, "dropping idle session context");
            }
            keep
        });
        before - sessions.len()
    }
}
