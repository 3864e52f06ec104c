use crate::error::Result;
use crate::models::CredentialRecord;
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

const CREDENTIAL_COLUMNS: &str = r#"
    u.id AS user_id,
    u.email,
    u.first_name,
    u.password_hash,
    u.email_verified,
    u.is_banned,
    u.ban_reason,
    u.mfa_enabled,
    u.mfa_secret,
    COALESCE(u.mfa_backup_codes, '{}') AS mfa_backup_codes,
    u.email_mfa_enabled,
    u.notification_mfa_enabled,
    (SELECT COUNT(*) FROM security_keys k WHERE k.user_id = u.id) AS security_key_count,
    u.last_login_at,
    u.last_login_ip
"#;

/// Durable credential storage seam.
///
/// The orchestrator only reads through this trait; the sole writes are the
/// last-login stamp, backup-code consumption and password changes.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<CredentialRecord>>;

    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<CredentialRecord>>;

    /// Stamp a successful login with its source address
    async fn record_login(&self, user_id: Uuid, ip: &str) -> Result<()>;

    /// Remove the backup code at `index` (0-based) from the user's list,
    /// but only while that slot still holds `code_hash`. Must be atomic so
    /// one code can never be spent twice; returns whether a code was
    /// actually removed.
    async fn consume_backup_code(&self, user_id: Uuid, index: usize, code_hash: &str)
        -> Result<bool>;

    async fn update_password_hash(&self, user_id: Uuid, password_hash: &str) -> Result<()>;
}

/// Postgres-backed [`CredentialStore`]
#[derive(Clone)]
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<CredentialRecord>> {
        let query = format!(
            "SELECT {} FROM users u WHERE lower(u.email) = $1 AND u.deleted_at IS NULL",
            CREDENTIAL_COLUMNS
        );
        let record = sqlx::query_as::<_, CredentialRecord>(&query)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<CredentialRecord>> {
        let query = format!(
            "SELECT {} FROM users u WHERE u.id = $1 AND u.deleted_at IS NULL",
            CREDENTIAL_COLUMNS
        );
        let record = sqlx::query_as::<_, CredentialRecord>(&query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn record_login(&self, user_id: Uuid, ip: &str) -> Result<()> {
        sqlx::query("UPDATE users SET last_login_at = NOW(), last_login_ip = $2 WHERE id = $1")
            .bind(user_id)
            .bind(ip)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn consume_backup_code(
        &self,
        user_id: Uuid,
        index: usize,
        code_hash: &str,
    ) -> Result<bool> {
        // Single-statement splice keeps the removal atomic; Postgres arrays
        // are 1-based so $2 is the count of elements kept before the splice.
        // The slot must still hold the matched hash, so two spends racing on
        // the same code cannot both succeed.
        let index = index as i32;
        let result = sqlx::query(
            r#"
            UPDATE users
            SET mfa_backup_codes = mfa_backup_codes[1:$2] || mfa_backup_codes[$2 + 2:],
                updated_at = NOW()
            WHERE id = $1
              AND cardinality(mfa_backup_codes) > $2
              AND mfa_backup_codes[$2 + 1] = $3
            "#,
        )
        .bind(user_id)
        .bind(index)
        .bind(code_hash)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_password_hash(&self, user_id: Uuid, password_hash: &str) -> Result<()> {
        sqlx::query("UPDATE users SET password_hash = $2, updated_at = NOW() WHERE id = $1")
            .bind(user_id)
            .bind(password_hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
