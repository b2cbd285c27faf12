//! Database repository for password reset tokens.

use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use tracing::instrument;
use uuid::Uuid;

use crate::{
    auth::password,
    db::{
        errors::{DbError, Result},
        models::password_reset_tokens::PasswordResetToken,
    },
    types::{UserId, abbrev_uuid},
};

const TOKEN_COLUMNS: &str = "id, user_id, token_hash, expires_at, created_at, used_at";

pub struct PasswordResetTokens<'c> {
    db: &'c mut PgConnection,
}

impl<'c> PasswordResetTokens<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Issue a new token for a user.
    ///
    /// Returns the raw secret alongside the stored row; the secret is never persisted and must be
    /// delivered to the user straight away.
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn create_for_user(&mut self, user_id: UserId, valid_for: std::time::Duration) -> Result<(String, PasswordResetToken)> {
        let raw_token = password::generate_reset_token();
        let token_hash =
            password::hash_string_blocking(raw_token.clone()).await.map_err(|e| DbError::Other(anyhow::anyhow!(e)))?;
        let valid_for = chrono::Duration::from_std(valid_for).unwrap_or_else(|_| chrono::Duration::hours(1));
        let expires_at = Utc::now() + valid_for;

        let token = sqlx::query_as::<_, PasswordResetToken>(&format!(
            "INSERT INTO password_reset_tokens (user_id, token_hash, expires_at) VALUES ($1, $2, $3) RETURNING {TOKEN_COLUMNS}"
        ))
        .bind(user_id)
        .bind(&token_hash)
        .bind(expires_at)
        .fetch_one(&mut *self.db)
        .await?;

        Ok((raw_token, token))
    }

    #[instrument(skip(self), err)]
    pub async fn get_by_id(&mut self, id: Uuid) -> Result<Option<PasswordResetToken>> {
        let token =
            sqlx::query_as::<_, PasswordResetToken>(&format!("SELECT {TOKEN_COLUMNS} FROM password_reset_tokens WHERE id = $1"))
                .bind(id)
                .fetch_optional(&mut *self.db)
                .await?;
        Ok(token)
    }

    /// Look up a token and check it is unused, unexpired and matches the raw secret.
    #[instrument(skip(self, raw_token), err)]
    pub async fn find_valid_token_by_id(&mut self, token_id: Uuid, raw_token: &str) -> Result<Option<PasswordResetToken>> {
        self.find_valid_token_at(token_id, raw_token, Utc::now()).await
    }

    async fn find_valid_token_at(&mut self, token_id: Uuid, raw_token: &str, now: DateTime<Utc>) -> Result<Option<PasswordResetToken>> {
        let Some(token) = self.get_by_id(token_id).await? else {
            return Ok(None);
        };
        if !token.is_usable(now) {
            return Ok(None);
        }

        match password::verify_string_blocking(raw_token.to_string(), token.token_hash.clone()).await {
            Ok(true) => Ok(Some(token)),
            Ok(false) => Ok(None),
            Err(e) => {
                tracing::error!("Token verification error for token {}: {:?}", token_id, e);
                Ok(None)
            }
        }
    }

    /// Mark every outstanding token of a user as used.
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn invalidate_for_user(&mut self, user_id: UserId) -> Result<u64> {
        let result = sqlx::query("UPDATE password_reset_tokens SET used_at = NOW() WHERE user_id = $1 AND used_at IS NULL")
            .bind(user_id)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::handlers::{Repository, Users};
    use crate::db::models::users::UserCreateDBRequest;
    use sqlx::PgPool;
    use std::time::Duration;

    async fn user(pool: &PgPool) -> UserId {
        let mut conn = pool.acquire().await.unwrap();
        Users::new(&mut conn)
            .create(&UserCreateDBRequest {
                username: "reset@school.test".to_string(),
                email: "reset@school.test".to_string(),
                is_student: true,
                auth_source: "native".to_string(),
                ..Default::default()
            })
            .await
            .unwrap()
            .id
    }

    #[sqlx::test]
    async fn test_token_lifecycle(pool: PgPool) {
        let user_id = user(&pool).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut tokens = PasswordResetTokens::new(&mut conn);

        let (raw, token) = tokens.create_for_user(user_id, Duration::from_secs(3600)).await.unwrap();
        assert_ne!(raw, token.token_hash);

        assert!(tokens.find_valid_token_by_id(token.id, &raw).await.unwrap().is_some());
        assert!(tokens.find_valid_token_by_id(token.id, "wrong-secret").await.unwrap().is_none());
        assert!(tokens.find_valid_token_by_id(Uuid::new_v4(), &raw).await.unwrap().is_none());

        assert_eq!(tokens.invalidate_for_user(user_id).await.unwrap(), 1);
        assert!(tokens.find_valid_token_by_id(token.id, &raw).await.unwrap().is_none());
    }

    #[sqlx::test]
    async fn test_expired_token_is_rejected(pool: PgPool) {
        let user_id = user(&pool).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut tokens = PasswordResetTokens::new(&mut conn);

        let (raw, token) = tokens.create_for_user(user_id, Duration::from_secs(60)).await.unwrap();
        let later = Utc::now() + chrono::Duration::minutes(5);
        assert!(tokens.find_valid_token_at(token.id, &raw, later).await.unwrap().is_none());
    }
}
