//! Session state and the striped session cache.
//!
//! Each session lives behind its own `RwLock`: `select` holds the write
//! lock for the whole load-resolve-store sequence, `current` takes a read
//! lock. The map from id to session is split into stripes, each guarded by
//! a `Mutex` and bounded independently, so unrelated sessions never contend
//! on one global lock.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::{ResolutionError, ResolutionResult};
use crate::knowledge::Knowledge;
use crate::rules_events::RulesAndEventsHandler;

/// Unique session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generates a new random session id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing uuid.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// The underlying uuid.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Parses the hyphenated textual form.
    ///
    /// # Errors
    /// `UnknownSession` if `s` is not a UUID, since no session can have that id.
    pub fn parse(s: &str) -> ResolutionResult<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| ResolutionError::UnknownSession {
                session_id: s.to_string(),
            })
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Request-scoped caller information.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Metadata {
    /// Calling client, if known.
    pub client: Option<String>,
    pub locale: Option<String>,
    /// Free-form attributes.
    pub attributes: BTreeMap<String, String>,
}

impl Metadata {
    #[must_use]
    pub fn with_client(mut self, client: impl Into<String>) -> Self {
        self.client = Some(client.into());
        self
    }

    #[must_use]
    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Overlays `other`: set fields replace, attributes are merged.
    pub fn merge(&mut self, other: &Self) {
        if other.client.is_some() {
            self.client.clone_from(&other.client);
        }
        if other.locale.is_some() {
            self.locale.clone_from(&other.locale);
        }
        self.attributes
            .extend(other.attributes.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
}

/// Severity of a session [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageLevel {
    Warning,
    Error,
}

/// A warning or error recorded on a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub level: MessageLevel,
    pub text: String,
    pub at: DateTime<Utc>,
}

/// Durable per-session resolution context.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub id: SessionId,
    pub metadata: Metadata,
    pub knowledge: Knowledge,
    pub handler: RulesAndEventsHandler,
    /// Warnings of the last request.
    pub warnings: Vec<String>,
    /// Errors of the last request.
    pub errors: Vec<ResolutionError>,
    /// Bounded history of every warning and error, oldest first.
    pub messages: VecDeque<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    max_messages: usize,
}

impl SessionState {
    /// Creates a session that keeps at most `max_messages` history entries.
    #[must_use]
    pub fn new(
        id: SessionId,
        metadata: Metadata,
        knowledge: Knowledge,
        handler: RulesAndEventsHandler,
        max_messages: usize,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            metadata,
            knowledge,
            handler,
            warnings: Vec::new(),
            errors: Vec::new(),
            messages: VecDeque::new(),
            created_at: now,
            updated_at: now,
            max_messages: max_messages.max(1),
        }
    }

    /// Replaces the last request's outcome and appends it to the history.
    pub fn record(&mut self, warnings: Vec<String>, errors: Vec<ResolutionError>) {
        let now = Utc::now();
        let entries = warnings
            .iter()
            .map(|w| (MessageLevel::Warning, w.clone()))
            .chain(errors.iter().map(|e| (MessageLevel::Error, e.to_string())));
        for (level, text) in entries {
            if self.messages.len() == self.max_messages {
                self.messages.pop_front();
            }
            self.messages.push_back(Message { level, text, at: now });
        }
        self.warnings = warnings;
        self.errors = errors;
        self.updated_at = now;
    }
}

/// Shared handle to one session.
pub type SessionHandle = Arc<RwLock<SessionState>>;

fn lock_err(context: &str) -> ResolutionError {
    ResolutionError::internal(format!("poisoned lock: {context}"))
}

#[derive(Debug, Default)]
struct Stripe {
    sessions: HashMap<SessionId, (SessionHandle, u64)>,
    // touch tick -> session
    lru: BTreeMap<u64, SessionId>,
    clock: u64,
}

impl Stripe {
    fn touch(&mut self, id: &SessionId) -> Option<SessionHandle> {
        self.clock += 1;
        let now = self.clock;
        let entry = self.sessions.get_mut(id)?;
        self.lru.remove(&entry.1);
        entry.1 = now;
        self.lru.insert(now, *id);
        Some(Arc::clone(&entry.0))
    }
}

/// Capacity-bounded map from [`SessionId`] to [`SessionState`].
///
/// When a stripe is full, inserting evicts its least recently used session.
#[derive(Debug)]
pub struct SessionCache {
    stripes: Vec<Mutex<Stripe>>,
    stripe_capacity: usize,
}

impl SessionCache {
    /// Creates a cache for roughly `max_sessions` sessions over `stripes` stripes.
    #[must_use]
    pub fn new(max_sessions: usize, stripes: usize) -> Self {
        let stripes = stripes.max(1);
        let stripe_capacity = max_sessions.max(1).div_ceil(stripes);
        Self {
            stripes: (0..stripes).map(|_| Mutex::new(Stripe::default())).collect(),
            stripe_capacity,
        }
    }

    fn stripe(&self, id: &SessionId) -> &Mutex<Stripe> {
        let n = self.stripes.len() as u128;
        // bounded by stripes.len()
        #[allow(clippy::cast_possible_truncation)]
        let index = (id.as_uuid().as_u128() % n) as usize;
        &self.stripes[index]
    }

    /// Inserts a session, returning the id of an evicted session if any.
    pub fn insert(&self, state: SessionState) -> ResolutionResult<Option<SessionId>> {
        let id = state.id;
        let mut stripe = self.stripe(&id).lock().map_err(|_| lock_err("session.insert"))?;

        let mut evicted = None;
        if !stripe.sessions.contains_key(&id) && stripe.sessions.len() >= self.stripe_capacity {
            if let Some((_, victim)) = stripe.lru.pop_first() {
                stripe.sessions.remove(&victim);
                info!(session_id = %victim, "evicted least recently used session");
                evicted = Some(victim);
            }
        }

        stripe.clock += 1;
        let now = stripe.clock;
        if let Some((_, old)) = stripe.sessions.insert(id, (Arc::new(RwLock::new(state)), now)) {
            stripe.lru.remove(&old);
        }
        stripe.lru.insert(now, id);
        Ok(evicted)
    }

    /// Looks up a session and marks it recently used.
    pub fn get(&self, id: &SessionId) -> ResolutionResult<SessionHandle> {
        let mut stripe = self.stripe(id).lock().map_err(|_| lock_err("session.get"))?;
        stripe.touch(id).ok_or_else(|| ResolutionError::UnknownSession {
            session_id: id.to_string(),
        })
    }

    /// Removes a session. Returns false if it was not cached.
    pub fn remove(&self, id: &SessionId) -> ResolutionResult<bool> {
        let mut stripe = self.stripe(id).lock().map_err(|_| lock_err("session.remove"))?;
        let Some((_, touched)) = stripe.sessions.remove(id) else {
            return Ok(false);
        };
        stripe.lru.remove(&touched);
        Ok(true)
    }

    #[must_use]
    pub fn contains(&self, id: &SessionId) -> bool {
        self.stripe(id)
            .lock()
            .is_ok_and(|stripe| stripe.sessions.contains_key(id))
    }

    /// Number of cached sessions.
    pub fn len(&self) -> ResolutionResult<usize> {
        let mut total = 0;
        for stripe in &self.stripes {
            total += stripe.lock().map_err(|_| lock_err("session.len"))?.sessions.len();
        }
        Ok(total)
    }

    pub fn is_empty(&self) -> ResolutionResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Upper bound on cached sessions.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.stripe_capacity * self.stripes.len()
    }
}
