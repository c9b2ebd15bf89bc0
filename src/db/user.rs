//! Users: the minimum needed for feed attachment and unread overlays.

use serde::Serialize;

use super::DbPool;
use crate::{FeedcoreError, Result};

/// A user of the aggregator.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct User {
    pub login: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

/// Data for creating a user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub login: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

impl NewUser {
    pub fn new(login: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            first_name: String::new(),
            last_name: String::new(),
            email: String::new(),
        }
    }

    pub fn with_name(mut self, first: impl Into<String>, last: impl Into<String>) -> Self {
        self.first_name = first.into();
        self.last_name = last.into();
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = email.into();
        self
    }
}

/// Repository for user operations.
pub struct UserRepository<'a> {
    pool: &'a DbPool,
}

impl<'a> UserRepository<'a> {
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Create a new user.
    pub async fn create(&self, user: &NewUser) -> Result<User> {
        if user.login.trim().is_empty() {
            return Err(FeedcoreError::Validation("login is empty".to_string()));
        }

        sqlx::query(
            "INSERT INTO users (login, first_name, last_name, email) VALUES (?, ?, ?, ?)",
        )
        .bind(&user.login)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.email)
        .execute(self.pool)
        .await?;

        self.get(&user.login)
            .await?
            .ok_or_else(|| FeedcoreError::NotFound("user".to_string()))
    }

    /// Get a user by login.
    pub async fn get(&self, login: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT login, first_name, last_name, email FROM users WHERE login = ?",
        )
        .bind(login)
        .fetch_optional(self.pool)
        .await?;
        Ok(user)
    }

    /// List all users.
    pub async fn all(&self) -> Result<Vec<User>> {
        let users = sqlx::query_as::<_, User>(
            "SELECT login, first_name, last_name, email FROM users ORDER BY login",
        )
        .fetch_all(self.pool)
        .await?;
        Ok(users)
    }

    /// Delete a user. Attachments and overlays cascade.
    pub async fn delete(&self, login: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM users WHERE login = ?")
            .bind(login)
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
