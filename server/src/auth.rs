use crate::error::{ChatError, ChatResult};
use crate::model::User;
use anyhow::Result;
use argon2::password_hash::{
    rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
};
use argon2::Argon2;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use parking_lot::Mutex;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    path::Path,
    sync::Arc,
    time::{Duration as StdDuration, Instant},
};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

/// Hash a password using argon2id.
pub fn hash_password(pass: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(pass.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!(e))?
        .to_string();
    Ok(hash)
}

/// Verify a password against an encoded hash.
pub fn verify_password(pass: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(pass.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Claims stored within issued JWTs.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct Claims {
    pub sub: Uuid,
    pub exp: usize,
    pub kind: TokenKind,
    pub jti: Uuid,
}

/// Issue a token of the given kind for a user, valid for the provided duration.
pub fn issue_token(secret: &[u8], user: Uuid, kind: TokenKind, valid_for: Duration) -> Result<String> {
    let exp = (OffsetDateTime::now_utc() + valid_for).unix_timestamp() as usize;
    let claims = Claims {
        sub: user,
        exp,
        kind,
        jti: Uuid::new_v4(),
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret),
    )?;
    Ok(token)
}

/// Verify a token and its kind, returning the claims if valid.
pub fn verify_token(secret: &[u8], token: &str, kind: TokenKind) -> Result<Claims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    let data = decode::<Claims>(token, &DecodingKey::from_secret(secret), &validation)?;
    // jsonwebtoken allows a leeway on exp; tokens past their expiry are rejected outright
    if data.claims.exp < OffsetDateTime::now_utc().unix_timestamp() as usize {
        anyhow::bail!("expired");
    }
    if data.claims.kind != kind {
        anyhow::bail!("wrong_token_kind");
    }
    Ok(data.claims)
}

/// Resolve the token signing secret: configured value, then the persisted
/// file, otherwise a fresh random secret written to the file.
pub async fn load_or_create_secret(path: &Path, configured: Option<&str>) -> Result<Vec<u8>> {
    if let Some(secret) = configured {
        return Ok(secret.as_bytes().to_vec());
    }
    if let Ok(bytes) = tokio::fs::read(path).await {
        let text = String::from_utf8_lossy(&bytes);
        return Ok(STANDARD.decode(text.trim())?);
    }
    let mut secret = vec![0u8; 32];
    rand::thread_rng().fill_bytes(&mut secret);
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    tokio::fs::write(path, STANDARD.encode(&secret)).await?;
    tracing::info!(path = %path.display(), "generated token signing secret");
    Ok(secret)
}

/// Decides whether an existing session blocks a new login.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPolicy {
    pub single_session: bool,
}

impl SessionPolicy {
    /// A stored refresh token only counts while it still verifies.
    pub fn has_active_session(secret: &[u8], user: &User) -> bool {
        user.refresh_token
            .as_deref()
            .map(|t| verify_token(secret, t, TokenKind::Refresh).is_ok())
            .unwrap_or(false)
    }

    pub fn admit(&self, secret: &[u8], user: &User) -> ChatResult<()> {
        if self.single_session && Self::has_active_session(secret, user) {
            return Err(ChatError::conflict(
                "You are already logged in. A login attempt notification has been sent to your email.",
            ));
        }
        Ok(())
    }
}

/// Simple in-memory login rate limiter.
#[derive(Clone)]
pub struct LoginRateLimiter {
    inner: Arc<Mutex<HashMap<String, Vec<Instant>>>>,
    max: usize,
    window: StdDuration,
}

impl LoginRateLimiter {
    pub fn new(max: usize, window: StdDuration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            max,
            window,
        }
    }

    /// Returns true if the attempt is allowed, false if rate limited.
    ///
    /// Keys whose attempts have all left the window are dropped.
    pub fn check(&self, key: &str) -> bool {
        let mut guard = self.inner.lock();
        let now = Instant::now();
        let window = self.window;
        guard.retain(|_, hits| {
            hits.retain(|t| now.duration_since(*t) < window);
            !hits.is_empty()
        });
        let entry = guard.entry(key.to_lowercase()).or_default();
        if entry.len() >= self.max {
            return false;
        }
        entry.push(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_with_token(token: Option<String>) -> User {
        User {
            id: Uuid::new_v4(),
            username: "alice".into(),
            email: "alice@example.com".into(),
            password_hash: String::new(),
            name: "Alice".into(),
            bio: String::new(),
            avatar_url: None,
            last_seen: None,
            refresh_token: token,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn hash_and_verify() {
        let hash = hash_password("secret").unwrap();
        assert!(verify_password("secret", &hash));
        assert!(!verify_password("bad", &hash));
        assert!(!verify_password("secret", "not-a-hash"));
    }

    #[test]
    fn token_issue_and_verify() {
        let secret = b"secret";
        let id = Uuid::new_v4();
        let token = issue_token(secret, id, TokenKind::Access, Duration::seconds(60)).unwrap();
        let claims = verify_token(secret, &token, TokenKind::Access).unwrap();
        assert_eq!(claims.sub, id);
        assert!(verify_token(b"other", &token, TokenKind::Access).is_err());
    }

    #[test]
    fn token_kind_is_enforced() {
        let secret = b"secret";
        let token =
            issue_token(secret, Uuid::new_v4(), TokenKind::Refresh, Duration::days(1)).unwrap();
        assert!(verify_token(secret, &token, TokenKind::Access).is_err());
        assert!(verify_token(secret, &token, TokenKind::Refresh).is_ok());
    }

    #[test]
    fn token_expiry() {
        let secret = b"secret";
        let token =
            issue_token(secret, Uuid::new_v4(), TokenKind::Access, Duration::seconds(-10)).unwrap();
        assert!(verify_token(secret, &token, TokenKind::Access).is_err());
    }

    #[test]
    fn session_policy_blocks_only_live_sessions() {
        let secret = b"secret";
        let policy = SessionPolicy {
            single_session: true,
        };
        assert!(policy.admit(secret, &user_with_token(None)).is_ok());

        let live =
            issue_token(secret, Uuid::new_v4(), TokenKind::Refresh, Duration::days(1)).unwrap();
        let err = policy.admit(secret, &user_with_token(Some(live.clone()))).unwrap_err();
        assert!(matches!(err, ChatError::Conflict(_)));

        let stale =
            issue_token(secret, Uuid::new_v4(), TokenKind::Refresh, Duration::seconds(-10)).unwrap();
        assert!(policy.admit(secret, &user_with_token(Some(stale))).is_ok());

        let relaxed = SessionPolicy {
            single_session: false,
        };
        assert!(relaxed.admit(secret, &user_with_token(Some(live))).is_ok());
    }

    #[test]
    fn rate_limiter_blocks() {
        let limiter = LoginRateLimiter::new(2, StdDuration::from_secs(60));
        assert!(limiter.check("a@x.io"));
        assert!(limiter.check("A@x.io"));
        assert!(!limiter.check("a@x.io"));
        assert!(limiter.check("b@x.io"));
    }

    #[test]
    fn rate_limiter_forgets_idle_keys() {
        let limiter = LoginRateLimiter::new(1, StdDuration::from_millis(20));
        assert!(limiter.check("a@x.io"));
        assert!(!limiter.check("a@x.io"));
        std::thread::sleep(StdDuration::from_millis(40));
        assert!(limiter.check("b@x.io"));
        assert_eq!(limiter.inner.lock().len(), 1);
        assert!(limiter.check("a@x.io"));
    }

    #[tokio::test]
    async fn secret_is_generated_once_and_reused() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("jwt.secret");
        let first = load_or_create_secret(&path, None).await.unwrap();
        assert_eq!(first.len(), 32);
        let second = load_or_create_secret(&path, None).await.unwrap();
        assert_eq!(first, second);
        let configured = load_or_create_secret(&path, Some("fixed")).await.unwrap();
        assert_eq!(configured, b"fixed".to_vec());
    }
}
