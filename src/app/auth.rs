use anyhow::{anyhow, Result};
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use pasetors::claims::{Claims, ClaimsValidationRules};
use pasetors::keys::SymmetricKey;
use pasetors::token::UntrustedToken;
use pasetors::{local, version4::V4, Local};
use sha2::{Digest, Sha256};
use sqlx::Row;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::domain::user::User;
use crate::infra::db::Db;

const TOKEN_ISSUER: &str = "penora";

/// The two paseto token flavors. Each is encrypted with its own key so an
/// access token can never be replayed as a refresh token or vice versa.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    fn type_claim(self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Refresh => "refresh",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthSession {
    pub user_id: Uuid,
}

#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub access_expires_at: OffsetDateTime,
    pub refresh_expires_at: OffsetDateTime,
}

struct IssuedTokens {
    refresh_id: Uuid,
    pair: TokenPair,
}

#[derive(Clone)]
pub struct AuthService {
    db: Db,
    access_key: [u8; 32],
    refresh_key: [u8; 32],
    access_ttl_minutes: u64,
    refresh_ttl_days: u64,
}

impl AuthService {
    pub fn new(
        db: Db,
        access_key: [u8; 32],
        refresh_key: [u8; 32],
        access_ttl_minutes: u64,
        refresh_ttl_days: u64,
    ) -> Self {
        Self {
            db,
            access_key,
            refresh_key,
            access_ttl_minutes,
            refresh_ttl_days,
        }
    }

    fn key_for(&self, kind: TokenKind) -> [u8; 32] {
        match kind {
            TokenKind::Access => self.access_key,
            TokenKind::Refresh => self.refresh_key,
        }
    }

    fn ttl_for(&self, kind: TokenKind) -> Duration {
        match kind {
            TokenKind::Access => Duration::minutes(self.access_ttl_minutes as i64),
            TokenKind::Refresh => Duration::days(self.refresh_ttl_days as i64),
        }
    }

    pub async fn signup(&self, email: String, name: String, password: String) -> Result<User> {
        let password_hash = hash_password(&password)?;
        let row = sqlx::query(
            "INSERT INTO users (email, name, password_hash) \
             VALUES ($1, $2, $3) \
             RETURNING id, email, name, avatar_url, created_at",
        )
        .bind(email)
        .bind(name)
        .bind(password_hash)
        .fetch_one(self.db.pool())
        .await?;

        Ok(read_user(&row))
    }

    /// None on unknown email or wrong password; the handler collapses both
    /// into the same 401 so login probing learns nothing.
    pub async fn login(&self, email: &str, password: &str) -> Result<Option<TokenPair>> {
        let row = sqlx::query("SELECT id, password_hash FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(self.db.pool())
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let user_id: Uuid = row.get("id");
        let password_hash: String = row.get("password_hash");
        if password_hash.is_empty() || !verify_password(password, &password_hash)? {
            return Ok(None);
        }

        Ok(Some(self.issue_token_pair(user_id).await?))
    }

    /// Rotate a refresh token: revoke the presented one and record which
    /// token replaced it, in one transaction with the new pair's insert.
    pub async fn refresh(&self, refresh_token: &str) -> Result<Option<TokenPair>> {
        let Some((user_id, refresh_id)) = self.decode_refresh(refresh_token)? else {
            return Ok(None);
        };

        let mut tx = self.db.pool().begin().await?;
        let live: Option<Uuid> = sqlx::query_scalar(
            "SELECT id \
             FROM refresh_tokens \
             WHERE id = $1 \
               AND user_id = $2 \
               AND token_hash = $3 \
               AND revoked_at IS NULL \
               AND expires_at > now()",
        )
        .bind(refresh_id)
        .bind(user_id)
        .bind(hash_token(refresh_token))
        .fetch_optional(&mut *tx)
        .await?;

        if live.is_none() {
            tx.rollback().await?;
            return Ok(None);
        }

        let issued = self.issue_token_pair_with_tx(user_id, &mut tx).await?;
        sqlx::query(
            "UPDATE refresh_tokens \
             SET revoked_at = now(), replaced_by = $1 \
             WHERE id = $2 AND revoked_at IS NULL",
        )
        .bind(issued.refresh_id)
        .bind(refresh_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(issued.pair))
    }

    pub async fn revoke_refresh_token(&self, refresh_token: &str) -> Result<bool> {
        let Some((user_id, refresh_id)) = self.decode_refresh(refresh_token)? else {
            return Ok(false);
        };

        let result = sqlx::query(
            "UPDATE refresh_tokens \
             SET revoked_at = now() \
             WHERE id = $1 AND user_id = $2 AND token_hash = $3 AND revoked_at IS NULL",
        )
        .bind(refresh_id)
        .bind(user_id)
        .bind(hash_token(refresh_token))
        .execute(self.db.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn authenticate_access_token(&self, token: &str) -> Result<Option<AuthSession>> {
        let Some(claims) = self.decode(TokenKind::Access, token)? else {
            return Ok(None);
        };
        let user_id = claim_uuid(&claims, "sub")?;
        Ok(Some(AuthSession { user_id }))
    }

    pub async fn get_current_user(&self, user_id: Uuid) -> Result<Option<User>> {
        let row = sqlx::query(
            "SELECT id, email, name, avatar_url, created_at \
             FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.as_ref().map(read_user))
    }

    pub async fn issue_token_pair(&self, user_id: Uuid) -> Result<TokenPair> {
        let mut tx = self.db.pool().begin().await?;
        let issued = self.issue_token_pair_with_tx(user_id, &mut tx).await?;
        tx.commit().await?;
        Ok(issued.pair)
    }

    async fn issue_token_pair_with_tx(
        &self,
        user_id: Uuid,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    ) -> Result<IssuedTokens> {
        let (access_token, access_expires_at) =
            self.encrypt(TokenKind::Access, user_id, None)?;

        let refresh_id = Uuid::new_v4();
        let (refresh_token, refresh_expires_at) =
            self.encrypt(TokenKind::Refresh, user_id, Some(refresh_id))?;

        // Only a hash hits the table; a leaked table row cannot be replayed.
        sqlx::query(
            "INSERT INTO refresh_tokens (id, user_id, token_hash, expires_at) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(refresh_id)
        .bind(user_id)
        .bind(hash_token(&refresh_token))
        .bind(refresh_expires_at)
        .execute(&mut **tx)
        .await?;

        Ok(IssuedTokens {
            refresh_id,
            pair: TokenPair {
                access_token,
                refresh_token,
                access_expires_at,
                refresh_expires_at,
            },
        })
    }

    fn encrypt(
        &self,
        kind: TokenKind,
        user_id: Uuid,
        token_id: Option<Uuid>,
    ) -> Result<(String, OffsetDateTime)> {
        let ttl = self.ttl_for(kind);
        let mut claims = Claims::new_expires_in(&std::time::Duration::from_secs(
            ttl.whole_seconds() as u64,
        ))?;
        claims.issuer(TOKEN_ISSUER)?;
        claims.audience(TOKEN_ISSUER)?;
        claims.subject(&user_id.to_string())?;
        claims.add_additional("typ", kind.type_claim())?;
        if let Some(token_id) = token_id {
            claims.token_identifier(&token_id.to_string())?;
        }

        let key = SymmetricKey::<V4>::from(&self.key_for(kind))?;
        let token = local::encrypt(&key, &claims, None, None)?;
        Ok((token, OffsetDateTime::now_utc() + ttl))
    }

    /// None for anything that fails to decrypt, fails validation, or is of
    /// the wrong kind; tampering and expiry are indistinguishable on purpose.
    fn decode(&self, kind: TokenKind, token: &str) -> Result<Option<Claims>> {
        let key = SymmetricKey::<V4>::from(&self.key_for(kind))?;
        let mut rules = ClaimsValidationRules::new();
        rules.validate_issuer_with(TOKEN_ISSUER);
        rules.validate_audience_with(TOKEN_ISSUER);

        let Ok(untrusted) = UntrustedToken::<Local, V4>::try_from(token) else {
            return Ok(None);
        };
        let Ok(trusted) = local::decrypt(&key, &untrusted, &rules, None, None) else {
            return Ok(None);
        };

        let claims = trusted.payload_claims().cloned();
        Ok(claims.filter(|claims| {
            claims
                .get_claim("typ")
                .and_then(|value| value.as_str())
                .map(|value| value == kind.type_claim())
                .unwrap_or(false)
        }))
    }

    fn decode_refresh(&self, token: &str) -> Result<Option<(Uuid, Uuid)>> {
        let Some(claims) = self.decode(TokenKind::Refresh, token)? else {
            return Ok(None);
        };
        let user_id = claim_uuid(&claims, "sub")?;
        let refresh_id = claim_uuid(&claims, "jti")?;
        Ok(Some((user_id, refresh_id)))
    }
}

fn read_user(row: &sqlx::postgres::PgRow) -> User {
    User {
        id: row.get("id"),
        email: row.get("email"),
        name: row.get("name"),
        avatar_url: row.get("avatar_url"),
        created_at: row.get("created_at"),
    }
}

fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut argon2::password_hash::rand_core::OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|err| anyhow!("failed to hash password: {}", err))?;
    Ok(hash.to_string())
}

fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(hash)
        .map_err(|err| anyhow!("failed to parse password hash: {}", err))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

fn claim_uuid(claims: &Claims, name: &str) -> Result<Uuid> {
    let value = claims
        .get_claim(name)
        .and_then(|value| value.as_str())
        .ok_or_else(|| anyhow!("missing {} claim", name))?;
    Ok(Uuid::parse_str(value)?)
}
