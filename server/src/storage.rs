//! Database storage layer for Callwire Server

use chrono::{Duration, Utc};
use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};
use std::path::Path;

use crate::crypto;
use crate::models::*;

pub const IN_MEMORY: &str = ":memory:";

pub struct Storage {
    pool: Pool<Sqlite>,
}

impl Storage {
    pub async fn new(database_path: &str) -> anyhow::Result<Self> {
        let pool = if database_path == IN_MEMORY {
            // Every connection to :memory: is its own database, so keep exactly one alive.
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect("sqlite::memory:")
                .await?
        } else {
            if let Some(parent) = Path::new(database_path).parent() {
                tokio::fs::create_dir_all(parent).await?;
            }

            SqlitePoolOptions::new()
                .max_connections(10)
                .connect(&format!("sqlite:{}?mode=rwc", database_path))
                .await?
        };

        let storage = Self { pool };
        storage.initialize_schema().await?;

        Ok(storage)
    }

    async fn initialize_schema(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                user_id TEXT PRIMARY KEY,
                display_name TEXT,
                avatar TEXT,
                created_at INTEGER NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1
            );

            CREATE TABLE IF NOT EXISTS sessions (
                token_hash TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                is_valid INTEGER NOT NULL DEFAULT 1,
                FOREIGN KEY (user_id) REFERENCES users(user_id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS notifications (
                id TEXT PRIMARY KEY,
                recipient TEXT NOT NULL,
                sender TEXT NOT NULL,
                message TEXT NOT NULL,
                kind TEXT NOT NULL,
                link TEXT,
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                delivered INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);
            CREATE INDEX IF NOT EXISTS idx_notifications_recipient ON notifications(recipient, delivered);
            CREATE INDEX IF NOT EXISTS idx_notifications_expires ON notifications(expires_at);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ========================================================================
    // User Operations
    // ========================================================================

    pub async fn create_user(
        &self,
        user_id: &str,
        display_name: Option<&str>,
        avatar: Option<&str>,
    ) -> anyhow::Result<User> {
        let created_at = Utc::now().timestamp();

        sqlx::query(
            "INSERT INTO users (user_id, display_name, avatar, created_at, is_active)
             VALUES (?, ?, ?, ?, 1)",
        )
        .bind(user_id)
        .bind(display_name)
        .bind(avatar)
        .bind(created_at)
        .execute(&self.pool)
        .await?;

        Ok(User {
            user_id: user_id.to_string(),
            display_name: display_name.map(str::to_string),
            avatar: avatar.map(str::to_string),
            created_at,
            is_active: true,
        })
    }

    pub async fn get_user(&self, user_id: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT user_id, display_name, avatar, created_at, is_active
             FROM users WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    pub async fn update_user_profile(
        &self,
        user_id: &str,
        display_name: Option<&str>,
        avatar: Option<&str>,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE users SET
                display_name = COALESCE(?, display_name),
                avatar = COALESCE(?, avatar)
             WHERE user_id = ?",
        )
        .bind(display_name)
        .bind(avatar)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn deactivate_user(&self, user_id: &str) -> anyhow::Result<()> {
        sqlx::query("UPDATE users SET is_active = 0 WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        sqlx::query("UPDATE sessions SET is_valid = 0 WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn list_users(&self) -> anyhow::Result<Vec<User>> {
        let users = sqlx::query_as::<_, User>(
            "SELECT user_id, display_name, avatar, created_at, is_active
             FROM users ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(users)
    }

    // ========================================================================
    // Session Operations
    // ========================================================================

    /// Issues a new session token for `user_id`; returns it with its expiry.
    pub async fn create_session(&self, user_id: &str, ttl_hours: i64) -> anyhow::Result<(String, i64)> {
        let token = crypto::generate_session_token()?;
        let now = Utc::now();
        let expires_at = (now + Duration::hours(ttl_hours)).timestamp();

        sqlx::query(
            "INSERT INTO sessions (token_hash, user_id, created_at, expires_at, is_valid)
             VALUES (?, ?, ?, ?, 1)",
        )
        .bind(crypto::hash_token(&token))
        .bind(user_id)
        .bind(now.timestamp())
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok((token, expires_at))
    }

    /// Resolves a token to its active user, if the session is still valid.
    pub async fn validate_session(&self, token: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT u.user_id, u.display_name, u.avatar, u.created_at, u.is_active
             FROM sessions s JOIN users u ON u.user_id = s.user_id
             WHERE s.token_hash = ? AND s.is_valid = 1 AND s.expires_at > ? AND u.is_active = 1",
        )
        .bind(crypto::hash_token(token))
        .bind(Utc::now().timestamp())
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    // ========================================================================
    // Notification Operations
    // ========================================================================

    pub async fn store_notification(
        &self,
        recipient: &str,
        sender: &str,
        request: &CreateNotificationRequest,
        ttl_hours: i64,
    ) -> anyhow::Result<NotificationRecord> {
        let now = Utc::now();
        let record = NotificationRecord {
            id: uuid::Uuid::new_v4().to_string(),
            recipient: recipient.to_string(),
            sender: sender.to_string(),
            message: request.message.clone(),
            kind: request.kind.clone(),
            link: request.link.clone(),
            created_at: now.timestamp(),
            expires_at: (now + Duration::hours(ttl_hours)).timestamp(),
            delivered: false,
        };

        sqlx::query(
            "INSERT INTO notifications
             (id, recipient, sender, message, kind, link, created_at, expires_at, delivered)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0)",
        )
        .bind(&record.id)
        .bind(&record.recipient)
        .bind(&record.sender)
        .bind(&record.message)
        .bind(&record.kind)
        .bind(&record.link)
        .bind(record.created_at)
        .bind(record.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(record)
    }

    pub async fn pending_notifications(&self, recipient: &str) -> anyhow::Result<Vec<NotificationRecord>> {
        let records = sqlx::query_as::<_, NotificationRecord>(
            "SELECT id, recipient, sender, message, kind, link, created_at, expires_at, delivered
             FROM notifications
             WHERE recipient = ? AND delivered = 0 AND expires_at > ?
             ORDER BY created_at ASC, rowid ASC",
        )
        .bind(recipient)
        .bind(Utc::now().timestamp())
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Marks the recipient's own notifications delivered; returns how many
    /// changed.
    pub async fn acknowledge_notifications(&self, recipient: &str, ids: &[String]) -> anyhow::Result<u64> {
        let mut acknowledged = 0;
        for id in ids {
            let result = sqlx::query(
                "UPDATE notifications SET delivered = 1
                 WHERE id = ? AND recipient = ? AND delivered = 0",
            )
            .bind(id)
            .bind(recipient)
            .execute(&self.pool)
            .await?;
            acknowledged += result.rows_affected();
        }

        Ok(acknowledged)
    }

    pub async fn count_pending_notifications(&self) -> anyhow::Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM notifications WHERE delivered = 0")
            .fetch_one(&self.pool)
            .await?;

        Ok(count.0)
    }

    // ========================================================================
    // Cleanup Operations
    // ========================================================================

    /// Removes expired notifications and dead sessions; returns
    /// (notifications, sessions) removed.
    pub async fn cleanup_expired(&self) -> anyhow::Result<(u64, u64)> {
        let now = Utc::now().timestamp();

        let notifications = sqlx::query("DELETE FROM notifications WHERE expires_at <= ?")
            .bind(now)
            .execute(&self.pool)
            .await?;

        let sessions = sqlx::query("DELETE FROM sessions WHERE expires_at <= ? OR is_valid = 0")
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok((notifications.rows_affected(), sessions.rows_affected()))
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    pub async fn get_stats(&self, online_users: usize) -> anyhow::Result<ServerStats> {
        let total_users: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;

        let active_users: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE is_active = 1")
            .fetch_one(&self.pool)
            .await?;

        Ok(ServerStats {
            total_users: total_users.0,
            active_users: active_users.0,
            online_users,
            pending_notifications: self.count_pending_notifications().await?,
        })
    }
}
