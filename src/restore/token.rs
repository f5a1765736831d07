//! Restore preview tokens and the stores that hold them.
//!
//! A token is issued by every preview, may be approved once, and is consumed
//! by a successful apply. Expiry is checked lazily whenever a token is looked
//! up; an expired token is purged on that lookup and reported as
//! [`TokenLookup::Expired`] so callers can tell it apart from an unknown one.

use super::validation::ComponentValidation;
use crate::codec::MetadataMap;
use crate::error::{BackupError, ErrorCode, Stage};
use crate::integrity::IntegrityReport;
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Preview results carried by a token into the apply phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenMetadata {
    pub can_proceed: bool,
    /// Storage context resolved at preview time; apply reads from here
    pub storage_provider_id: String,
    pub destination: Option<String>,
    pub validations: Vec<ComponentValidation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<IntegrityReport>,
    #[serde(default)]
    pub extra: MetadataMap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestorePreviewToken {
    pub token: String,
    pub backup_id: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub requested_by: String,
    pub requires_approval: bool,
    pub approved_at: Option<DateTime<Utc>>,
    pub approved_by: Option<String>,
    pub approval_reason: Option<String>,
    pub metadata: TokenMetadata,
}

impl RestorePreviewToken {
    pub fn issue(
        backup_id: impl Into<String>,
        requested_by: impl Into<String>,
        ttl: chrono::Duration,
        requires_approval: bool,
        metadata: TokenMetadata,
    ) -> Self {
        let issued_at = Utc::now();
        Self {
            token: generate_token(),
            backup_id: backup_id.into(),
            issued_at,
            expires_at: issued_at + ttl,
            requested_by: requested_by.into(),
            requires_approval,
            approved_at: None,
            approved_by: None,
            approval_reason: None,
            metadata,
        }
    }

    /// A token is expired from `expires_at` onwards.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_approved(&self) -> bool {
        self.approved_at.is_some()
    }

    /// Time left before expiry, `None` once expired.
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<std::time::Duration> {
        (self.expires_at - now).to_std().ok().filter(|d| !d.is_zero())
    }

    pub(crate) fn record_approval(&mut self, approved_by: &str, reason: Option<&str>, at: DateTime<Utc>) {
        self.approved_at = Some(at);
        self.approved_by = Some(approved_by.to_string());
        self.approval_reason = reason.map(str::to_string);
    }
}

/// 256 random bits, URL-safe base64.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenLookup {
    Found(RestorePreviewToken),
    /// Was present but past expiry; it has been purged.
    Expired(RestorePreviewToken),
    Missing,
}

#[derive(Debug, Error)]
pub enum TokenStoreError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl From<TokenStoreError> for BackupError {
    fn from(err: TokenStoreError) -> Self {
        BackupError::new(ErrorCode::DependencyUnavailable, "Restore token store is unavailable")
            .with_stage(Stage::Apply)
            .with_cause(err)
    }
}

#[async_trait]
pub trait RestoreTokenStore: Send + Sync {
    /// Insert or replace a token.
    async fn save(&self, token: &RestorePreviewToken) -> Result<(), TokenStoreError>;

    async fn get(&self, token: &str) -> Result<TokenLookup, TokenStoreError>;

    /// Record approval on an unexpired token.
    async fn approve(
        &self,
        token: &str,
        approved_by: &str,
        reason: Option<&str>,
    ) -> Result<TokenLookup, TokenStoreError>;

    /// Atomically remove and return the token. Of two concurrent takes at most
    /// one sees `Found`.
    async fn take(&self, token: &str) -> Result<TokenLookup, TokenStoreError>;

    /// Put a taken token back, unless it expired in the meantime.
    async fn reinstate(&self, token: RestorePreviewToken) -> Result<bool, TokenStoreError> {
        if token.is_expired() {
            return Ok(false);
        }
        self.save(&token).await?;
        Ok(true)
    }

    async fn delete(&self, token: &str) -> Result<bool, TokenStoreError>;
}

/// Single-process token store
#[derive(Clone, Default)]
pub struct InMemoryTokenStore {
    tokens: Arc<DashMap<String, RestorePreviewToken>>,
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tokens currently held, including expired ones not yet looked up.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl RestoreTokenStore for InMemoryTokenStore {
    async fn save(&self, token: &RestorePreviewToken) -> Result<(), TokenStoreError> {
        self.tokens.insert(token.token.clone(), token.clone());
        Ok(())
    }

    async fn get(&self, token: &str) -> Result<TokenLookup, TokenStoreError> {
        match self.tokens.entry(token.to_string()) {
            Entry::Occupied(entry) if entry.get().is_expired() => Ok(TokenLookup::Expired(entry.remove())),
            Entry::Occupied(entry) => Ok(TokenLookup::Found(entry.get().clone())),
            Entry::Vacant(_) => Ok(TokenLookup::Missing),
        }
    }

    async fn approve(
        &self,
        token: &str,
        approved_by: &str,
        reason: Option<&str>,
    ) -> Result<TokenLookup, TokenStoreError> {
        let now = Utc::now();
        match self.tokens.entry(token.to_string()) {
            Entry::Occupied(entry) if entry.get().is_expired_at(now) => Ok(TokenLookup::Expired(entry.remove())),
            Entry::Occupied(mut entry) => {
                entry.get_mut().record_approval(approved_by, reason, now);
                Ok(TokenLookup::Found(entry.get().clone()))
            }
            Entry::Vacant(_) => Ok(TokenLookup::Missing),
        }
    }

    async fn take(&self, token: &str) -> Result<TokenLookup, TokenStoreError> {
        match self.tokens.remove(token) {
            Some((_, taken)) if taken.is_expired() => Ok(TokenLookup::Expired(taken)),
            Some((_, taken)) => Ok(TokenLookup::Found(taken)),
            None => Ok(TokenLookup::Missing),
        }
    }

    async fn delete(&self, token: &str) -> Result<bool, TokenStoreError> {
        Ok(self.tokens.remove(token).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_token(ttl: chrono::Duration) -> RestorePreviewToken {
        RestorePreviewToken::issue(
            "b1",
            "operator",
            ttl,
            true,
            TokenMetadata {
                can_proceed: true,
                storage_provider_id: "mem".into(),
                destination: None,
                validations: Vec::new(),
                integrity: None,
                extra: MetadataMap::new(),
            },
        )
    }

    #[test]
    fn test_tokens_are_unique_and_url_safe() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_zero_ttl_is_immediately_expired() {
        let token = sample_token(chrono::Duration::zero());
        assert!(token.is_expired());
        assert!(token.remaining(Utc::now()).is_none());
    }

    #[tokio::test]
    async fn test_expired_token_is_purged_on_lookup() {
        let store = InMemoryTokenStore::new();
        let token = sample_token(chrono::Duration::zero());
        store.save(&token).await.unwrap();
        assert_eq!(store.len(), 1);

        assert!(matches!(store.get(&token.token).await.unwrap(), TokenLookup::Expired(_)));
        assert!(store.is_empty());
        assert_eq!(store.get(&token.token).await.unwrap(), TokenLookup::Missing);
    }

    #[tokio::test]
    async fn test_approve_and_take_once() {
        let store = InMemoryTokenStore::new();
        let token = sample_token(chrono::Duration::minutes(5));
        store.save(&token).await.unwrap();

        match store.approve(&token.token, "lead", Some("planned")).await.unwrap() {
            TokenLookup::Found(approved) => {
                assert!(approved.is_approved());
                assert_eq!(approved.approved_by.as_deref(), Some("lead"));
                assert_eq!(approved.approval_reason.as_deref(), Some("planned"));
            }
            other => panic!("unexpected lookup {:?}", other),
        }

        let taken = store.take(&token.token).await.unwrap();
        assert!(matches!(taken, TokenLookup::Found(ref t) if t.is_approved()));
        assert_eq!(store.take(&token.token).await.unwrap(), TokenLookup::Missing);

        if let TokenLookup::Found(t) = taken {
            assert!(store.reinstate(t).await.unwrap());
        }
        assert!(matches!(store.get(&token.token).await.unwrap(), TokenLookup::Found(_)));
    }

    #[tokio::test]
    async fn test_concurrent_takes_yield_one_winner() {
        let store = InMemoryTokenStore::new();
        let token = sample_token(chrono::Duration::minutes(5));
        store.save(&token).await.unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                let key = token.token.clone();
                tokio::spawn(async move { store.take(&key).await.unwrap() })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), TokenLookup::Found(_)) {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
