//! Session cache keyed by user id.
//!
//! A session is what makes a refresh token redeemable: logging out or letting
//! the TTL lapse revokes every token issued for the user, whatever their
//! signatures say. Snapshots are stored in postcard's binary encoding.
use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{Role, User};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session cache unavailable: {0}")]
    Backend(#[from] redis::RedisError),
    #[error("malformed session snapshot: {0}")]
    Codec(#[from] postcard::Error),
}

/// What the cache remembers about a logged-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: Uuid,
    pub username: String,
    pub email: Option<String>,
    pub roles: Vec<Role>,
    pub verified: bool,
}

impl From<&User> for SessionSnapshot {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            roles: user.roles.clone(),
            verified: user.verified,
        }
    }
}

impl SessionSnapshot {
    pub fn encode(&self) -> Result<Vec<u8>, SessionError> {
        Ok(postcard::to_allocvec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, SessionError> {
        Ok(postcard::from_bytes(bytes)?)
    }
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Writes (or overwrites) the session and restarts its TTL.
    async fn put(&self, snapshot: &SessionSnapshot, ttl: Duration) -> Result<(), SessionError>;
    async fn get(&self, user_id: Uuid) -> Result<Option<SessionSnapshot>, SessionError>;
    async fn remove(&self, user_id: Uuid) -> Result<(), SessionError>;
}

#[derive(Clone)]
pub struct RedisSessionStore {
    conn: ConnectionManager,
}

impl RedisSessionStore {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn put(&self, snapshot: &SessionSnapshot, ttl: Duration) -> Result<(), SessionError> {
        let bytes = snapshot.encode()?;
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(snapshot.id.to_string(), bytes, ttl.as_secs().max(1))
            .await?;
        Ok(())
    }

    async fn get(&self, user_id: Uuid) -> Result<Option<SessionSnapshot>, SessionError> {
        let mut conn = self.conn.clone();
        let bytes: Option<Vec<u8>> = conn.get(user_id.to_string()).await?;
        bytes.map(|bytes| SessionSnapshot::decode(&bytes)).transpose()
    }

    async fn remove(&self, user_id: Uuid) -> Result<(), SessionError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(user_id.to_string()).await?;
        Ok(())
    }
}

/// Process-local session cache for tests and single-node development.
#[derive(Default)]
pub struct InMemorySessionStore {
    entries: RwLock<HashMap<Uuid, (Vec<u8>, Instant)>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn put(&self, snapshot: &SessionSnapshot, ttl: Duration) -> Result<(), SessionError> {
        let bytes = snapshot.encode()?;
        self.entries
            .write()
            .await
            .insert(snapshot.id, (bytes, Instant::now() + ttl));
        Ok(())
    }

    async fn get(&self, user_id: Uuid) -> Result<Option<SessionSnapshot>, SessionError> {
        let mut entries = self.entries.write().await;
        match entries.get(&user_id) {
            Some((_, expires_at)) if *expires_at <= Instant::now() => {
                entries.remove(&user_id);
                Ok(None)
            }
            Some((bytes, _)) => Ok(Some(SessionSnapshot::decode(bytes)?)),
            None => Ok(None),
        }
    }

    async fn remove(&self, user_id: Uuid) -> Result<(), SessionError> {
        self.entries.write().await.remove(&user_id);
        Ok(())
    }
}
