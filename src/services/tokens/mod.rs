/*!
 * # Access Token Authority
 *
 * Owns the lifecycle of the opaque tokens that open a family's gallery and
 * gate checkout: minting, validation, rate limiting, blacklisting and
 * rotation.
 *
 * Validation runs these checks in order and stops at the first rejection:
 *
 * 1. format (empty or shorter than the configured minimum)
 * 2. blacklist
 * 3. rate limit (requests per window, then accumulated failed lookups)
 * 4. lookup (unknown tokens count as failed attempts)
 * 5. expiry
 *
 * All abuse state lives in the injected [`SecurityStore`]. Raw tokens never
 * reach the logs; every log line uses [`mask_token`].
 */

pub mod generator;
pub mod repository;

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::TokenSecurityConfig;
use crate::entities::subject;
use crate::errors::ServiceError;
use crate::services::security_store::{SecurityStore, SecurityStoreError};

pub use generator::{generate_secure_token, mask_token, MIN_TOKEN_LENGTH, SAFE_ALPHABET};
pub use repository::{SeaOrmSubjectRepository, SubjectTokenRepository};

const DAY_MILLIS: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Token length {requested} is below the minimum of {minimum}")]
    TooShort { requested: usize, minimum: usize },

    #[error("Token rejected: {0}")]
    Rejected(TokenRejection),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Store(#[from] SecurityStoreError),
}

/// Why a token failed validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TokenRejection {
    InvalidFormat,
    Blacklisted,
    RateLimited,
    NotFound,
    Expired,
    SystemError,
}

impl TokenRejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidFormat => "invalid-format",
            Self::Blacklisted => "blacklisted",
            Self::RateLimited => "rate-limited",
            Self::NotFound => "not-found",
            Self::Expired => "expired",
            Self::SystemError => "system-error",
        }
    }
}

impl fmt::Display for TokenRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of [`TokenAuthority::validate_token`]; rejections are values, not errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenValidation {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<TokenRejection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_days: Option<i64>,
}

impl TokenValidation {
    fn rejected(reason: TokenRejection) -> Self {
        Self {
            valid: false,
            subject_id: None,
            event_id: None,
            reason: Some(reason),
            remaining_days: None,
        }
    }

    fn accepted(subject: &subject::Model, remaining_days: i64) -> Self {
        Self {
            valid: true,
            subject_id: Some(subject.id),
            event_id: Some(subject.event_id),
            reason: None,
            remaining_days: Some(remaining_days),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlacklistReason {
    Rotated,
    TooManyFailedAttempts,
    Compromised,
    Manual(String),
}

impl BlacklistReason {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Rotated => "rotated",
            Self::TooManyFailedAttempts => "too-many-failed-attempts",
            Self::Compromised => "compromised",
            Self::Manual(reason) => reason.as_str(),
        }
    }
}

/// Value stored under a blacklist key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlacklistEntry {
    pub reason: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedSubject {
    pub subject_id: Uuid,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RotatedToken {
    pub new_token: String,
    pub old_token: String,
    pub subject_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpiringToken {
    pub subject_id: Uuid,
    pub token: String,
    pub name: String,
    pub expires_at: DateTime<Utc>,
    pub days_remaining: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenMetrics {
    pub total_tokens: u64,
    pub active_tokens: u64,
    pub expiring_soon: u64,
    pub blacklisted_tokens: u64,
    pub failed_validations: u64,
}

/// Generates, validates, rate-limits, blacklists and rotates access tokens.
///
/// Construct once and share it through an `Arc`.
pub struct TokenAuthority {
    config: TokenSecurityConfig,
    repository: Arc<dyn SubjectTokenRepository>,
    store: Arc<dyn SecurityStore>,
}

impl TokenAuthority {
    pub fn new(
        config: TokenSecurityConfig,
        repository: Arc<dyn SubjectTokenRepository>,
        store: Arc<dyn SecurityStore>,
    ) -> Self {
        Self {
            config,
            repository,
            store,
        }
    }

    pub fn config(&self) -> &TokenSecurityConfig {
        &self.config
    }

    /// Mints a token of `length` characters, enforcing the configured minimum.
    pub fn generate_token(&self, length: usize) -> Result<String, TokenError> {
        generator::generate_with_min_length(length, self.config.min_length)
    }

    fn blacklist_prefix(&self) -> String {
        format!("{}:bl:", self.config.namespace)
    }

    fn blacklist_key(&self, token: &str) -> String {
        format!("{}{}", self.blacklist_prefix(), token)
    }

    fn rate_key(&self, token: &str) -> String {
        format!("{}:rl:{}", self.config.namespace, token)
    }

    fn failed_key(&self, token: &str) -> String {
        format!("{}:fail:{}", self.config.namespace, token)
    }

    fn failed_validations_key(&self) -> String {
        format!("{}:metric:failed_validations", self.config.namespace)
    }

    /// Creates a subject record bound to a freshly minted token.
    #[instrument(skip(self, name))]
    pub async fn create_subject_with_token(
        &self,
        event_id: Uuid,
        name: &str,
        expires_in_days: Option<i64>,
    ) -> Result<CreatedSubject, TokenError> {
        let token = self.generate_token(self.config.default_length)?;
        let now = Utc::now();
        let expires_at =
            now + chrono::Duration::days(expires_in_days.unwrap_or(self.config.default_expiry_days));

        let subject = self
            .repository
            .insert_subject(subject::Model {
                id: Uuid::new_v4(),
                event_id,
                name: name.to_string(),
                access_token: token.clone(),
                token_expires_at: expires_at,
                created_at: now,
                updated_at: now,
            })
            .await?;

        info!(
            subject_id = %subject.id,
            %event_id,
            token = %mask_token(&token),
            %expires_at,
            "Created subject with access token"
        );

        Ok(CreatedSubject {
            subject_id: subject.id,
            token,
            expires_at,
        })
    }

    /// Validates `token`. Never fails: infrastructure errors become `system-error`.
    #[instrument(skip_all, fields(token = %mask_token(token)))]
    pub async fn validate_token(&self, token: &str) -> TokenValidation {
        let validation = match self.check_token(token).await {
            Ok(validation) => validation,
            Err(err) => {
                error!(error = %err, error_debug = ?err, "Token validation hit a system error");
                TokenValidation::rejected(TokenRejection::SystemError)
            }
        };

        if let Some(reason) = validation.reason {
            counter!("tokens.validation.failed", 1, "reason" => reason.as_str());
            if let Err(err) = self.store.increment(&self.failed_validations_key(), None).await {
                warn!(error = %err, "Could not record failed validation metric");
            }
            debug!(%reason, "Token rejected");
        }

        validation
    }

    async fn check_token(&self, token: &str) -> Result<TokenValidation, TokenError> {
        if token.is_empty() || token.chars().count() < self.config.min_length {
            return Ok(TokenValidation::rejected(TokenRejection::InvalidFormat));
        }

        if self.is_blacklisted(token).await? {
            return Ok(TokenValidation::rejected(TokenRejection::Blacklisted));
        }

        let window = self.config.rate_limit_window();
        let requests = self.store.increment(&self.rate_key(token), Some(window)).await?;
        if requests > i64::from(self.config.max_requests_per_window) {
            warn!(requests, "Token exceeded request rate");
            return Ok(TokenValidation::rejected(TokenRejection::RateLimited));
        }

        if self.failed_attempts(token).await? >= i64::from(self.config.max_failed_attempts) {
            self.blacklist_token(token, BlacklistReason::TooManyFailedAttempts)
                .await?;
            return Ok(TokenValidation::rejected(TokenRejection::RateLimited));
        }

        let Some(subject) = self.repository.find_by_token(token).await? else {
            self.record_failed_attempt(token).await?;
            return Ok(TokenValidation::rejected(TokenRejection::NotFound));
        };

        let now = Utc::now();
        if subject.token_expires_at <= now {
            return Ok(TokenValidation::rejected(TokenRejection::Expired));
        }

        self.store.delete(&self.failed_key(token)).await?;

        let remaining = (subject.token_expires_at - now).num_milliseconds();
        let remaining_days = (remaining + DAY_MILLIS - 1) / DAY_MILLIS;
        Ok(TokenValidation::accepted(&subject, remaining_days))
    }

    async fn failed_attempts(&self, token: &str) -> Result<i64, TokenError> {
        let key = self.failed_key(token);
        Ok(match self.store.get(&key).await? {
            Some(raw) => raw.parse::<i64>().map_err(|_| SecurityStoreError::CorruptCounter {
                key,
                value: raw.clone(),
            })?,
            None => 0,
        })
    }

    async fn record_failed_attempt(&self, token: &str) -> Result<(), TokenError> {
        let window = self.config.rate_limit_window();
        let failed = self
            .store
            .increment(&self.failed_key(token), Some(window))
            .await?;
        if failed >= i64::from(self.config.max_failed_attempts) {
            warn!(failed, "Failed attempt threshold reached");
            self.blacklist_token(token, BlacklistReason::TooManyFailedAttempts)
                .await?;
        }
        Ok(())
    }

    /// Whether a live blacklist entry exists for `token`.
    pub async fn is_blacklisted(&self, token: &str) -> Result<bool, TokenError> {
        Ok(self.store.get(&self.blacklist_key(token)).await?.is_some())
    }

    /// Blacklists `token` for the configured TTL. Repeated calls refresh the entry.
    #[instrument(skip_all, fields(token = %mask_token(token), reason = reason.as_str()))]
    pub async fn blacklist_token(
        &self,
        token: &str,
        reason: BlacklistReason,
    ) -> Result<(), TokenError> {
        let ttl = self.config.blacklist_ttl();
        let entry = BlacklistEntry {
            reason: reason.as_str().to_string(),
            expires_at: Utc::now() + to_chrono(ttl),
        };
        let value = serde_json::to_string(&entry).map_err(ServiceError::from)?;
        self.store
            .set(&self.blacklist_key(token), &value, Some(ttl))
            .await?;

        counter!("tokens.blacklisted", 1);
        warn!(expires_at = %entry.expires_at, "Token blacklisted");
        Ok(())
    }

    /// Replaces a valid token with a new one and blacklists the old value.
    #[instrument(skip_all, fields(token = %mask_token(current_token)))]
    pub async fn rotate_token(&self, current_token: &str) -> Result<RotatedToken, TokenError> {
        let validation = self.validate_token(current_token).await;
        let (Some(subject_id), true) = (validation.subject_id, validation.valid) else {
            return Err(TokenError::Rejected(
                validation.reason.unwrap_or(TokenRejection::NotFound),
            ));
        };

        let new_token = self.generate_token(self.config.default_length)?;
        let expires_at = Utc::now() + chrono::Duration::days(self.config.default_expiry_days);
        self.repository
            .replace_token(subject_id, &new_token, expires_at)
            .await?;
        // From here on the subject holds only the new token.
        if let Err(err) = self
            .blacklist_token(current_token, BlacklistReason::Rotated)
            .await
        {
            error!(
                %subject_id,
                error = %err,
                "Could not blacklist rotated token"
            );
        }

        counter!("tokens.rotated", 1);
        info!(
            %subject_id,
            new_token = %mask_token(&new_token),
            %expires_at,
            "Rotated access token"
        );

        Ok(RotatedToken {
            new_token,
            old_token: current_token.to_string(),
            subject_id,
            expires_at,
        })
    }

    /// Tokens still valid but expiring within `threshold_days` (default from config).
    pub async fn get_tokens_expiring_soon(
        &self,
        threshold_days: Option<i64>,
    ) -> Result<Vec<ExpiringToken>, TokenError> {
        let now = Utc::now();
        let days = threshold_days.unwrap_or(self.config.expiring_soon_days);
        let subjects = self
            .repository
            .list_expiring_between(now, now + chrono::Duration::days(days))
            .await?;

        Ok(subjects
            .into_iter()
            .map(|subject| {
                let remaining = (subject.token_expires_at - now).num_milliseconds();
                ExpiringToken {
                    subject_id: subject.id,
                    token: subject.access_token,
                    name: subject.name,
                    expires_at: subject.token_expires_at,
                    days_remaining: (remaining + DAY_MILLIS - 1) / DAY_MILLIS,
                }
            })
            .collect())
    }

    pub async fn get_token_metrics(&self) -> Result<TokenMetrics, TokenError> {
        let now = Utc::now();
        let expiring_soon = self
            .repository
            .list_expiring_between(
                now,
                now + chrono::Duration::days(self.config.expiring_soon_days),
            )
            .await?
            .len() as u64;
        let failed_validations = self
            .store
            .get(&self.failed_validations_key())
            .await?
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(0);

        Ok(TokenMetrics {
            total_tokens: self.repository.count_all().await?,
            active_tokens: self.repository.count_active(now).await?,
            expiring_soon,
            blacklisted_tokens: self.store.count_prefix(&self.blacklist_prefix()).await?,
            failed_validations,
        })
    }

    /// Removes expired blacklist entries and stale counters. Returns how many
    /// blacklist entries were dropped.
    pub async fn cleanup_expired_blacklist(&self) -> Result<u64, TokenError> {
        let removed = self.store.purge_expired(&self.blacklist_prefix()).await?;
        let ns = &self.config.namespace;
        self.store.purge_expired(&format!("{}:rl:", ns)).await?;
        self.store.purge_expired(&format!("{}:fail:", ns)).await?;
        if removed > 0 {
            info!(removed, "Cleaned up expired blacklist entries");
        }
        Ok(removed)
    }
}

fn to_chrono(ttl: Duration) -> chrono::Duration {
    chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(1))
}

/// Runs [`TokenAuthority::cleanup_expired_blacklist`] every `interval` for the
/// lifetime of the process.
pub fn spawn_blacklist_sweeper(authority: Arc<TokenAuthority>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            if let Err(err) = authority.cleanup_expired_blacklist().await {
                error!(error = %err, "Blacklist cleanup failed");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_reasons_serialize_kebab_case() {
        assert_eq!(
            serde_json::to_value(TokenRejection::InvalidFormat).unwrap(),
            "invalid-format"
        );
        assert_eq!(
            serde_json::to_value(TokenRejection::SystemError).unwrap(),
            "system-error"
        );
        assert_eq!(TokenRejection::RateLimited.to_string(), "rate-limited");
    }

    #[test]
    fn manual_reason_passes_through() {
        assert_eq!(BlacklistReason::Manual("leaked".into()).as_str(), "leaked");
        assert_eq!(
            BlacklistReason::TooManyFailedAttempts.as_str(),
            "too-many-failed-attempts"
        );
    }
}
