//! `ResolutionService`: the facade over sessions and the resolver pipeline.
//!
//! Errors never escape the facade. Every entry point returns a [`Response`]
//! carrying the knowledge (when there is any) together with the warnings and
//! errors of the request.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info, info_span};

use crate::choices::root_variant_choices;
use crate::config::ResolutionConfig;
use crate::error::{ResolutionError, ResolutionResult};
use crate::knowledge::{Decision, Knowledge};
use crate::knowledge_base::KnowledgeBase;
use crate::resolver::{Pipeline, ResolutionContext};
use crate::rules_events::RulesAndEventsHandler;
use crate::session::{Metadata, SessionCache, SessionId, SessionState};

/// Outcome of a service call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Session the call addressed; `None` only if `init` failed.
    pub session_id: Option<SessionId>,
    /// Session knowledge after the call; `None` if there is no session.
    pub knowledge: Option<Knowledge>,
    /// Non-fatal findings of the call, such as emptied choices.
    pub warnings: Vec<String>,
    /// Errors of the call; a failed call leaves the session unchanged.
    pub errors: Vec<ResolutionError>,
}

impl Response {
    fn failure(session_id: Option<SessionId>, err: ResolutionError) -> Self {
        Self {
            session_id,
            knowledge: None,
            warnings: Vec::new(),
            errors: vec![err],
        }
    }

    /// Returns true if the call raised no error.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// First error of the call, if any.
    #[must_use]
    pub fn error(&self) -> Option<&ResolutionError> {
        self.errors.first()
    }

    /// Converts into a `Result`, failing with the first error.
    pub fn into_result(self) -> ResolutionResult<(SessionId, Knowledge)> {
        if let Some(err) = self.errors.into_iter().next() {
            return Err(err);
        }
        match (self.session_id, self.knowledge) {
            (Some(id), Some(knowledge)) => Ok((id, knowledge)),
            _ => Err(ResolutionError::internal("response carries no knowledge")),
        }
    }
}

fn log_failure(session_id: &SessionId, err: &ResolutionError) {
    if err.is_knowledge_base_defect() {
        error!(session_id = %session_id, error = %err, "knowledge base defect during resolution");
    } else {
        info!(session_id = %session_id, error = %err, "decision rejected");
    }
}

/// Session-scoped resolution over a shared, read-only knowledge base.
pub struct ResolutionService {
    kb: Arc<dyn KnowledgeBase>,
    config: ResolutionConfig,
    sessions: SessionCache,
    pipeline: Pipeline,
    initial: Pipeline,
}

impl ResolutionService {
    /// Creates a service with the standard pipeline.
    #[must_use]
    pub fn new(kb: Arc<dyn KnowledgeBase>, config: ResolutionConfig) -> Self {
        let config = config.normalized();
        let sessions = SessionCache::new(config.max_sessions, config.session_stripes);
        Self {
            kb,
            config,
            sessions,
            pipeline: Pipeline::standard(),
            initial: Pipeline::initial(),
        }
    }

    /// Effective, normalized configuration.
    #[must_use]
    pub fn config(&self) -> &ResolutionConfig {
        &self.config
    }

    /// The knowledge base sessions resolve against.
    #[must_use]
    pub fn knowledge_base(&self) -> &dyn KnowledgeBase {
        self.kb.as_ref()
    }

    /// Creates a session seeded from the root purposes.
    ///
    /// Single-candidate purposes are completed and events evaluated before
    /// the session is stored. If that fails no session is created.
    pub fn init(&self, metadata: Metadata) -> Response {
        let id = SessionId::new();
        let span = info_span!("init", session_id = %id, client = ?metadata.client);
        let _guard = span.enter();

        match self.create_session(id, metadata) {
            Ok((knowledge, warnings)) => Response {
                session_id: Some(id),
                knowledge: Some(knowledge),
                warnings,
                errors: Vec::new(),
            },
            Err(err) => {
                log_failure(&id, &err);
                Response::failure(None, err)
            }
        }
    }

    fn create_session(&self, id: SessionId, metadata: Metadata) -> ResolutionResult<(Knowledge, Vec<String>)> {
        let kb = self.kb.as_ref();
        let mut handler = RulesAndEventsHandler::from_knowledge_base(kb, self.config.max_events, self.config.max_rules);
        let seed = Knowledge {
            root_choices: root_variant_choices(kb)?,
            ..Knowledge::default()
        };

        let mut ctx = ResolutionContext::new(kb, &mut handler, &metadata, &self.config);
        let knowledge = self.initial.run(seed, None, &mut ctx)?;
        let warnings = ctx.into_warnings();

        let mut state = SessionState::new(
            id,
            metadata,
            knowledge.clone(),
            handler,
            self.config.max_session_messages,
        );
        state.record(warnings.clone(), Vec::new());
        self.sessions.insert(state)?;
        info!(entities = knowledge.entity_count(), choices = knowledge.choices.len(), "session created");
        Ok((knowledge, warnings))
    }

    /// Applies `decision` to the session.
    ///
    /// The session's knowledge and handler are replaced only if the whole
    /// pipeline succeeds; otherwise the response carries the error and the
    /// unchanged knowledge.
    pub fn select(&self, session_id: &SessionId, decision: &Decision, metadata: &Metadata) -> Response {
        let span = info_span!("select", session_id = %session_id, client = ?metadata.client);
        let _guard = span.enter();

        let handle = match self.sessions.get(session_id) {
            Ok(handle) => handle,
            Err(err) => return Response::failure(Some(*session_id), err),
        };
        let Ok(mut state) = handle.write() else {
            return Response::failure(
                Some(*session_id),
                ResolutionError::internal(format!("poisoned lock: session {session_id}")),
            );
        };

        let mut handler = state.handler.clone();
        let mut ctx = ResolutionContext::new(self.kb.as_ref(), &mut handler, metadata, &self.config);
        let outcome = self.pipeline.run(state.knowledge.clone(), Some(decision), &mut ctx);
        let warnings = ctx.into_warnings();

        state.metadata.merge(metadata);
        match outcome {
            Ok(knowledge) => {
                state.knowledge = knowledge;
                state.handler = handler;
                state.record(warnings, Vec::new());
            }
            Err(err) => {
                log_failure(session_id, &err);
                // warnings of a failed run describe state that was discarded
                state.record(Vec::new(), vec![err]);
            }
        }

        Response {
            session_id: Some(*session_id),
            knowledge: Some(state.knowledge.clone()),
            warnings: state.warnings.clone(),
            errors: state.errors.clone(),
        }
    }

    /// Returns the session's knowledge and the outcome of its last request.
    pub fn current(&self, session_id: &SessionId) -> Response {
        let handle = match self.sessions.get(session_id) {
            Ok(handle) => handle,
            Err(err) => return Response::failure(Some(*session_id), err),
        };
        let Ok(state) = handle.read() else {
            return Response::failure(
                Some(*session_id),
                ResolutionError::internal(format!("poisoned lock: session {session_id}")),
            );
        };
        Response {
            session_id: Some(*session_id),
            knowledge: Some(state.knowledge.clone()),
            warnings: state.warnings.clone(),
            errors: state.errors.clone(),
        }
    }

    /// Drops a session. Returns false if it was not cached.
    pub fn close(&self, session_id: &SessionId) -> ResolutionResult<bool> {
        let removed = self.sessions.remove(session_id)?;
        if removed {
            info!(session_id = %session_id, "session closed");
        }
        Ok(removed)
    }

    /// Number of cached sessions.
    pub fn session_count(&self) -> ResolutionResult<usize> {
        self.sessions.len()
    }

    /// Runs `f` against a session's state under its read lock.
    pub fn with_session<T>(&self, session_id: &SessionId, f: impl FnOnce(&SessionState) -> T) -> ResolutionResult<T> {
        let handle = self.sessions.get(session_id)?;
        let state = handle
            .read()
            .map_err(|_| ResolutionError::internal(format!("poisoned lock: session {session_id}")))?;
        Ok(f(&state))
    }
}
