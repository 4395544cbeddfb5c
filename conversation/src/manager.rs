//! In-memory session lifecycle and follow-up resolution. Sessions are never
//! persisted — losing them on restart only costs conversational context,
//! not clinical data.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, instrument, warn};

use common::error::AppError;
use common::model::query::{Intent, QueryEntity, StructuredQuery, TemporalFilter};
use common::storage::types::session::{ConversationContext, ConversationTurn, Session};

use crate::followup::is_follow_up;
use crate::query_compiler;

struct SessionEntry {
    session: Session,
    context: Mutex<ConversationContext>,
}

/// Owns every live session and serializes concurrent `update_context` calls
/// against the same session via its per-entry mutex, while letting unrelated
/// sessions proceed independently.
pub struct ConversationManager {
    sessions: RwLock<HashMap<String, Arc<SessionEntry>>>,
    ttl: Duration,
}

impl ConversationManager {
    pub fn new(ttl_minutes: i64) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl: Duration::minutes(ttl_minutes),
        }
    }

    #[instrument(level = "info", skip(self), fields(patient_id = %patient_id))]
    pub async fn create_session(&self, patient_id: String) -> Session {
        let session = Session::new(patient_id, self.ttl);
        let entry = Arc::new(SessionEntry {
            session: session.clone(),
            context: Mutex::new(ConversationContext::default()),
        });
        self.sessions.write().await.insert(session.session_id.clone(), entry);
        info!(session_id = %session.session_id, "session created");
        session
    }

    /// Compiles `query_text` into a `StructuredQuery`, inheriting entities,
    /// temporal filter, and intent from the session's context when the new
    /// question reads as a follow-up and doesn't supply its own.
    #[instrument(level = "info", skip(self, query_text), fields(session_id = %session_id))]
    pub async fn resolve_follow_up(&self, session_id: &str, query_text: &str) -> Result<StructuredQuery, AppError> {
        let entry = self.entry_for(session_id).await?;
        let context = entry.context.lock().await;

        let mut compiled = query_compiler::compile(&entry.session.patient_id, query_text, 1);
        if is_follow_up(query_text) {
            if compiled.entities.is_empty() {
                compiled.entities = context.last_entities.clone();
            }
            if compiled.temporal_filter.is_none() {
                compiled.temporal_filter = context.last_temporal_filter.clone();
            }
            if matches!(compiled.intent, Intent::General) {
                if let Some(inherited) = context.last_intent {
                    compiled.intent = inherited;
                }
            }
        }
        Ok(compiled)
    }

    /// Appends the turn and refreshes the inheritable context fields. Fails
    /// with `NotFound` when the session has expired or never existed.
    #[instrument(level = "info", skip(self, response_summary), fields(session_id = %session_id))]
    pub async fn update_context(
        &self,
        session_id: &str,
        query: &StructuredQuery,
        response_summary: String,
    ) -> Result<(), AppError> {
        let entry = self.entry_for(session_id).await?;
        let mut context = entry.context.lock().await;

        context.push_turn(ConversationTurn {
            query: query.original_query.clone(),
            response_summary,
            timestamp: Utc::now(),
        });
        if !query.entities.is_empty() {
            context.last_entities = query.entities.clone();
        }
        if query.temporal_filter.is_some() {
            context.last_temporal_filter = query.temporal_filter.clone();
        }
        context.last_intent = Some(query.intent);
        Ok(())
    }

    async fn entry_for(&self, session_id: &str) -> Result<Arc<SessionEntry>, AppError> {
        let sessions = self.sessions.read().await;
        let entry = sessions
            .get(session_id)
            .ok_or_else(|| AppError::NotFound(format!("session {session_id} not found")))?;
        if entry.session.is_expired(Utc::now()) {
            return Err(AppError::NotFound(format!("session {session_id} expired")));
        }
        Ok(entry.clone())
    }

    /// Removes every expired session and reports how many were evicted.
    /// Idempotent: a second call with nothing new to expire returns 0.
    #[instrument(level = "info", skip(self))]
    pub async fn cleanup_expired_sessions(&self) -> usize {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, entry| !entry.session.is_expired(now));
        let removed = before - sessions.len();
        if removed > 0 {
            warn!(removed, "evicted expired sessions");
        }
        removed
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

/// Snapshot of the entities/temporal filter/intent a follow-up can inherit,
/// exposed for callers that need to inspect context without mutating it.
pub async fn context_snapshot(
    manager: &ConversationManager,
    session_id: &str,
) -> Result<(Vec<QueryEntity>, Option<TemporalFilter>, Option<Intent>), AppError> {
    let entry = manager.entry_for(session_id).await?;
    let context = entry.context.lock().await;
    Ok((
        context.last_entities.clone(),
        context.last_temporal_filter.clone(),
        context.last_intent,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_resolve_follow_up_inherits_entities() {
        let manager = ConversationManager::new(30);
        let session = manager.create_session("patient-1".to_string()).await;

        let first = manager
            .resolve_follow_up(&session.session_id, "What medications is the patient on?")
            .await
            .unwrap();
        manager
            .update_context(&session.session_id, &first, "Metformin 500mg".to_string())
            .await
            .unwrap();

        let follow_up = manager
            .resolve_follow_up(&session.session_id, "What about last month?")
            .await
            .unwrap();
        assert_eq!(follow_up.intent, Intent::RetrieveMedications);
    }

    #[tokio::test]
    async fn update_context_on_unknown_session_is_not_found() {
        let manager = ConversationManager::new(30);
        let query = query_compiler::compile("p1", "hello", 1);
        let err = manager
            .update_context("missing-session", &query, "summary".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn expired_session_is_rejected() {
        let manager = ConversationManager::new(-1);
        let session = manager.create_session("patient-1".to_string()).await;
        let err = manager.resolve_follow_up(&session.session_id, "hi").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn cleanup_is_idempotent() {
        let manager = ConversationManager::new(-1);
        manager.create_session("patient-1".to_string()).await;
        assert_eq!(manager.cleanup_expired_sessions().await, 1);
        assert_eq!(manager.cleanup_expired_sessions().await, 0);
    }
}
