use async_trait::async_trait;
use chrono::{Duration, Utc};
use dashmap::DashMap;
use rand::RngCore;
use std::collections::HashMap;

use super::{Session, SessionError, SessionResult, SessionStore};

/// In-process session store with TTL expiry.
pub struct MemorySessionStore {
    sessions: DashMap<String, Session>,
    ttl: Duration,
}

impl MemorySessionStore {
    pub fn new(ttl: std::time::Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl: Duration::from_std(ttl).unwrap_or_else(|_| Duration::weeks(52)),
        }
    }

    fn generate_token() -> String {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        hex::encode(bytes)
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn start(
        &self,
        subject_id: &str,
        bag: HashMap<String, String>,
        refresh_token: Option<&str>,
    ) -> SessionResult<Session> {
        if subject_id.is_empty() {
            return Err(SessionError::InvalidArgument("empty subject id".to_string()));
        }

        let now = Utc::now();
        self.sessions.retain(|_, session| session.expire_at > now);

        let session = Session {
            access_token: Self::generate_token(),
            subject_id: subject_id.to_string(),
            bag,
            refresh_token: refresh_token.map(str::to_string),
            expire_at: now + self.ttl,
        };
        self.sessions
            .insert(session.access_token.clone(), session.clone());

        Ok(session)
    }

    async fn get(&self, access_token: &str) -> SessionResult<Session> {
        if access_token.is_empty() {
            return Err(SessionError::InvalidArgument("empty access token".to_string()));
        }

        let session = self
            .sessions
            .get(access_token)
            .map(|entry| entry.value().clone())
            .ok_or(SessionError::NotFound)?;

        if session.expire_at <= Utc::now() {
            self.sessions.remove(access_token);
            return Err(SessionError::NotFound);
        }
        Ok(session)
    }

    async fn delete(
        &self,
        subject_id: Option<&str>,
        refresh_token: Option<&str>,
    ) -> SessionResult<u64> {
        if subject_id.is_none() && refresh_token.is_none() {
            return Err(SessionError::InvalidArgument(
                "subject id or refresh token is required".to_string(),
            ));
        }

        let mut removed = 0;
        self.sessions.retain(|_, session| {
            let hit = subject_id.map_or(true, |s| session.subject_id == s)
                && refresh_token.map_or(true, |t| session.refresh_token.as_deref() == Some(t));
            if hit {
                removed += 1;
            }
            !hit
        });

        if removed == 0 {
            return Err(SessionError::NotFound);
        }
        Ok(removed)
    }

    async fn exists(&self, access_token: &str) -> SessionResult<bool> {
        match self.get(access_token).await {
            Ok(_) => Ok(true),
            Err(SessionError::NotFound) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn abandon(&self, access_token: &str) -> SessionResult<()> {
        if access_token.is_empty() {
            return Err(SessionError::InvalidArgument("empty access token".to_string()));
        }
        self.sessions
            .remove(access_token)
            .map(|_| ())
            .ok_or(SessionError::NotFound)
    }
}
