use super::token::{RestorePreviewToken, RestoreTokenStore, TokenLookup, TokenStoreError};
use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Redis configuration for the shared token store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisTokenStoreConfig {
    pub redis_url: String,
    pub key_prefix: String,
    /// How long an expired token stays readable so lookups can report it as
    /// expired rather than unknown.
    pub expired_grace_secs: u64,
}

impl Default for RedisTokenStoreConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379/0".to_string(),
            key_prefix: "platform-backup:restore-token:".to_string(),
            expired_grace_secs: 3600,
        }
    }
}

/// Token store shared by every engine instance. Keys carry a native TTL of
/// `expires_at + expired_grace_secs`; `take` is a single GETDEL.
#[derive(Clone)]
pub struct RedisTokenStore {
    connection: ConnectionManager,
    config: RedisTokenStoreConfig,
}

impl RedisTokenStore {
    pub async fn new(config: RedisTokenStoreConfig) -> Result<Self, TokenStoreError> {
        let client = Client::open(config.redis_url.as_str())?;
        let connection = ConnectionManager::new(client).await?;
        Ok(Self { connection, config })
    }

    fn key(&self, token: &str) -> String {
        format!("{}{}", self.config.key_prefix, token)
    }

    fn ttl_millis(&self, token: &RestorePreviewToken) -> u64 {
        let remaining = (token.expires_at - Utc::now()).num_milliseconds().max(0) as u64;
        remaining + self.config.expired_grace_secs * 1000 + 1
    }

    fn classify(&self, raw: Option<String>) -> Result<TokenLookup, TokenStoreError> {
        match raw {
            Some(json) => {
                let token: RestorePreviewToken = serde_json::from_str(&json)?;
                if token.is_expired() {
                    Ok(TokenLookup::Expired(token))
                } else {
                    Ok(TokenLookup::Found(token))
                }
            }
            None => Ok(TokenLookup::Missing),
        }
    }
}

#[async_trait]
impl RestoreTokenStore for RedisTokenStore {
    async fn save(&self, token: &RestorePreviewToken) -> Result<(), TokenStoreError> {
        let json = serde_json::to_string(token)?;
        let mut conn = self.connection.clone();
        let _: () = conn.pset_ex(self.key(&token.token), json, self.ttl_millis(token)).await?;
        Ok(())
    }

    async fn get(&self, token: &str) -> Result<TokenLookup, TokenStoreError> {
        let mut conn = self.connection.clone();
        let raw: Option<String> = conn.get(self.key(token)).await?;
        let lookup = self.classify(raw)?;
        if matches!(lookup, TokenLookup::Expired(_)) {
            debug!("Purging expired restore token");
            let _: i64 = conn.del(self.key(token)).await?;
        }
        Ok(lookup)
    }

    async fn approve(
        &self,
        token: &str,
        approved_by: &str,
        reason: Option<&str>,
    ) -> Result<TokenLookup, TokenStoreError> {
        let mut current = match self.get(token).await? {
            TokenLookup::Found(current) => current,
            other => return Ok(other),
        };
        current.record_approval(approved_by, reason, Utc::now());

        // XX: never resurrect a token taken concurrently; KEEPTTL: keep expiry
        let json = serde_json::to_string(&current)?;
        let mut conn = self.connection.clone();
        let updated: Option<String> = redis::cmd("SET")
            .arg(self.key(token))
            .arg(json)
            .arg("XX")
            .arg("KEEPTTL")
            .query_async(&mut conn)
            .await?;

        match updated {
            Some(_) => Ok(TokenLookup::Found(current)),
            None => Ok(TokenLookup::Missing),
        }
    }

    async fn take(&self, token: &str) -> Result<TokenLookup, TokenStoreError> {
        let mut conn = self.connection.clone();
        let raw: Option<String> = conn.get_del(self.key(token)).await?;
        self.classify(raw)
    }

    async fn delete(&self, token: &str) -> Result<bool, TokenStoreError> {
        let mut conn = self.connection.clone();
        let removed: i64 = conn.del(self.key(token)).await?;
        Ok(removed > 0)
    }
}
