use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};

use super::models::{ApiKeyRecord, User};
use super::{ApiKeyRepository, UserRepository};
use crate::error::AppResult;

pub type DbPool = Pool<Postgres>;

pub async fn create_pool(database_url: &str) -> AppResult<DbPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Postgres-backed repository.
pub struct PostgresRepository {
    pool: DbPool,
}

impl PostgresRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PostgresRepository {
    async fn get_user(&self, id: &str) -> AppResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, password_hash, created_at, updated_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn create_user(&self, user: User) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, username, password_hash, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&user.id)
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl ApiKeyRepository for PostgresRepository {
    async fn get_by_hash(&self, key_hash: &str) -> AppResult<Option<ApiKeyRecord>> {
        let record = sqlx::query_as::<_, ApiKeyRecord>(
            r#"
            SELECT id, user_id, key_hash, prefix, name, scopes,
                   created_at, expires_at, is_active
            FROM api_keys
            WHERE key_hash = $1
            "#,
        )
        .bind(key_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn list_by_user(&self, user_id: &str) -> AppResult<Vec<ApiKeyRecord>> {
        let records = sqlx::query_as::<_, ApiKeyRecord>(
            r#"
            SELECT id, user_id, key_hash, prefix, name, scopes,
                   created_at, expires_at, is_active
            FROM api_keys
            WHERE user_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn create_api_key(&self, record: ApiKeyRecord) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO api_keys (id, user_id, key_hash, prefix, name, scopes,
                                  created_at, expires_at, is_active)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(record.id)
        .bind(&record.user_id)
        .bind(&record.key_hash)
        .bind(&record.prefix)
        .bind(&record.name)
        .bind(&record.scopes)
        .bind(record.created_at)
        .bind(record.expires_at)
        .bind(record.is_active)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn invalidate_all(&self, user_id: &str) -> AppResult<()> {
        sqlx::query("UPDATE api_keys SET is_active = FALSE WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
