use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::model::query::{Intent, QueryEntity, TemporalFilter};

/// In-memory conversational session, owned exclusively by the conversation
/// manager — never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub patient_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn new(patient_id: String, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            patient_id,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// One question/answer pair within a session's sliding window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub query: String,
    pub response_summary: String,
    pub timestamp: DateTime<Utc>,
}

/// Bounded context carried between turns: the last 5 turns plus the
/// inherited entities/temporal-filter/intent a follow-up can fall back on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationContext {
    pub turns: Vec<ConversationTurn>,
    pub last_entities: Vec<QueryEntity>,
    pub last_temporal_filter: Option<TemporalFilter>,
    pub last_intent: Option<Intent>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationContext {
    pub const MAX_TURNS: usize = 5;

    /// Appends a turn, evicting the oldest entry once the window would
    /// exceed `MAX_TURNS`.
    pub fn push_turn(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
        while self.turns.len() > Self::MAX_TURNS {
            self.turns.remove(0);
        }
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(n: usize) -> ConversationTurn {
        ConversationTurn {
            query: format!("query {n}"),
            response_summary: format!("answer {n}"),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn window_caps_at_five_evicting_oldest() {
        let mut ctx = ConversationContext::default();
        for n in 0..6 {
            ctx.push_turn(turn(n));
        }
        assert_eq!(ctx.turns.len(), 5);
        assert_eq!(ctx.turns.first().unwrap().query, "query 1");
        assert_eq!(ctx.turns.last().unwrap().query, "query 5");
    }

    #[test]
    fn session_expires_after_ttl() {
        let session = Session::new("p1".into(), Duration::minutes(30));
        assert!(!session.is_expired(session.created_at));
        assert!(session.is_expired(session.created_at + Duration::minutes(31)));
    }
}
