//! 会话存储
//!
//! Sessions bind an access token to a subject id and a small claim bag. The
//! store is consumed through [`SessionStore`]; the service ships an
//! in-process implementation and a client for an external session service.

mod memory;
mod remote;

pub use memory::MemorySessionStore;
pub use remote::RemoteSessionStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use super::actor::RequestContext;

const SUBJECT_PREFIX: &str = "charon:user:";

/// Subject of a session, `charon:user:<id>` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubjectId(pub i64);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed subject id {0:?}")]
pub struct SubjectIdError(String);

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", SUBJECT_PREFIX, self.0)
    }
}

impl FromStr for SubjectId {
    type Err = SubjectIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix(SUBJECT_PREFIX)
            .filter(|id| !id.starts_with('+'))
            .and_then(|id| id.parse::<i64>().ok())
            .map(SubjectId)
            .ok_or_else(|| SubjectIdError(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub subject_id: String,
    #[serde(default)]
    pub bag: HashMap<String, String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expire_at: DateTime<Utc>,
}

impl Session {
    pub fn subject(&self) -> Result<SubjectId, SubjectIdError> {
        self.subject_id.parse()
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not found")]
    NotFound,

    #[error("invalid session request: {0}")]
    InvalidArgument(String),

    #[error("session service unreachable: {0}")]
    Transport(String),

    #[error("session service failure: {0}")]
    Internal(String),
}

pub type SessionResult<T> = Result<T, SessionError>;

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn start(
        &self,
        subject_id: &str,
        bag: HashMap<String, String>,
        refresh_token: Option<&str>,
    ) -> SessionResult<Session>;

    async fn get(&self, access_token: &str) -> SessionResult<Session>;

    /// Session named by the request metadata.
    async fn context(&self, ctx: &RequestContext) -> SessionResult<Session> {
        match ctx.access_token.as_deref() {
            Some(token) if !token.is_empty() => self.get(token).await,
            _ => Err(SessionError::InvalidArgument(
                "missing access token in request metadata".to_string(),
            )),
        }
    }

    /// Removes every session matching all given selectors and returns the
    /// count. At least one selector is required; nothing removed is
    /// [`SessionError::NotFound`].
    async fn delete(
        &self,
        subject_id: Option<&str>,
        refresh_token: Option<&str>,
    ) -> SessionResult<u64>;

    async fn exists(&self, access_token: &str) -> SessionResult<bool>;

    async fn abandon(&self, access_token: &str) -> SessionResult<()>;
}
