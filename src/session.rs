//! Per-user authentication state carried across requests.
//!
//! A browser holds only an opaque session id in a cookie. Handlers receive
//! the resolved [`SessionContext`] as an extractor argument instead of
//! consulting any process-wide flag.

use actix_web::{dev::Payload, web, FromRequest, HttpRequest};
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::future::{ready, Ready};
use std::sync::{Arc, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::error::AppError;

pub const SESSION_COOKIE: &str = "dropout_session";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SessionState {
    pub username: String,
    pub logged_in_at: DateTime<Utc>,
    #[serde(skip)]
    pub last_seen: DateTime<Utc>,
}

impl SessionState {
    fn is_expired(&self, ttl: &SessionTtl, now: DateTime<Utc>) -> bool {
        now - self.last_seen >= ttl.idle || now - self.logged_in_at >= ttl.absolute
    }
}

/// How long a session survives without requests (`idle`) and in total
/// (`absolute`), whichever runs out first.
#[derive(Debug, Clone, Copy)]
pub struct SessionTtl {
    pub idle: TimeDelta,
    pub absolute: TimeDelta,
}

impl Default for SessionTtl {
    fn default() -> Self {
        Self {
            idle: TimeDelta::minutes(30),
            absolute: TimeDelta::hours(12),
        }
    }
}

#[derive(Clone, Default)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<Uuid, SessionState>>>,
    ttl: SessionTtl,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(ttl: SessionTtl) -> Self {
        Self {
            sessions: Arc::default(),
            ttl,
        }
    }

    pub fn login(&self, username: &str) -> Uuid {
        self.login_at(username, Utc::now())
    }

    /// Looks up a live session and refreshes its idle timer. Expired
    /// sessions are dropped and reported as absent.
    pub fn get(&self, id: &Uuid) -> Option<SessionState> {
        self.get_at(id, Utc::now())
    }

    pub fn logout(&self, id: &Uuid) -> bool {
        self.sessions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(id)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn login_at(&self, username: &str, now: DateTime<Utc>) -> Uuid {
        let id = Uuid::new_v4();
        let state = SessionState {
            username: username.to_string(),
            logged_in_at: now,
            last_seen: now,
        };
        let mut sessions = self
            .sessions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired(&self.ttl, now));
        let pruned = before - sessions.len();
        if pruned > 0 {
            debug!(pruned, "expired sessions removed");
        }
        sessions.insert(id, state);
        id
    }

    fn get_at(&self, id: &Uuid, now: DateTime<Utc>) -> Option<SessionState> {
        let mut sessions = self
            .sessions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let expired = sessions.get(id)?.is_expired(&self.ttl, now);
        if expired {
            if let Some(state) = sessions.remove(id) {
                debug!(username = %state.username, "session expired");
            }
            return None;
        }
        let state = sessions.get_mut(id)?;
        state.last_seen = now;
        Some(state.clone())
    }
}

/// The session resolved for the current request; anonymous when the cookie
/// is missing, malformed or refers to an ended or expired session.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    id: Option<Uuid>,
    state: Option<SessionState>,
}

impl SessionContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn id(&self) -> Option<Uuid> {
        self.id
    }

    pub fn state(&self) -> Option<&SessionState> {
        self.state.as_ref()
    }

    pub fn username(&self) -> Option<&str> {
        self.state.as_ref().map(|s| s.username.as_str())
    }

    pub fn is_logged_in(&self) -> bool {
        self.state.is_some()
    }

    pub fn require_login(&self, message: &'static str) -> Result<&str, AppError> {
        self.username().ok_or(AppError::Unauthorized(message))
    }

    fn resolve(req: &HttpRequest) -> Self {
        let Some(store) = req.app_data::<web::Data<SessionStore>>() else {
            return Self::anonymous();
        };
        let Some(id) = req
            .cookie(SESSION_COOKIE)
            .and_then(|c| Uuid::parse_str(c.value()).ok())
        else {
            return Self::anonymous();
        };

        match store.get(&id) {
            Some(state) => SessionContext {
                id: Some(id),
                state: Some(state),
            },
            None => Self::anonymous(),
        }
    }
}

impl FromRequest for SessionContext {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(Ok(SessionContext::resolve(req)))
    }
}
