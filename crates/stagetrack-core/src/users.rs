//! User account management and credential verification.

use std::sync::Arc;

use chrono::Utc;
use regex::Regex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::user::{User, UserRequest, UserResponse};
use crate::error::{Result, TrackError};
use crate::ports::UserStore;

const MIN_PASSWORD_LEN: usize = 6;

pub struct UserService {
    users: Arc<dyn UserStore>,
    email_format: Regex,
}

impl UserService {
    pub fn new(users: Arc<dyn UserStore>) -> Self {
        Self {
            users,
            email_format: Regex::new(r"^[a-zA-Z0-9._%+\-]+@[a-zA-Z0-9.\-]+\.[a-zA-Z]{2,}$")
                .expect("email regex is valid"),
        }
    }

    pub async fn list(&self, limit: i64, offset: i64) -> Result<(Vec<UserResponse>, i64)> {
        let limit = if limit <= 0 { 50 } else { limit };
        let (users, total) = self.users.list(limit, offset.max(0)).await?;
        Ok((users.into_iter().map(UserResponse::from).collect(), total))
    }

    pub async fn get(&self, id: &str) -> Result<UserResponse> {
        Ok(self.users.get(id).await?.into())
    }

    /// Raw entity lookup for callers that need the current role.
    pub async fn get_entity(&self, id: &str) -> Result<User> {
        self.users.get(id).await
    }

    pub async fn create(&self, req: UserRequest) -> Result<UserResponse> {
        self.validate(&req)?;
        let password = req
            .password
            .as_deref()
            .ok_or_else(|| TrackError::InvalidInput("password is required".into()))?;
        if password.len() < MIN_PASSWORD_LEN {
            return Err(TrackError::InvalidInput(format!(
                "password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }

        if self.users.find_by_email(&req.email).await?.is_some() {
            return Err(TrackError::Conflict(format!(
                "user with email {} already exists",
                req.email
            )));
        }

        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4().to_string(),
            name: req.name,
            email: req.email,
            password_hash: hash_password(password)?,
            role: req.role,
            created_at: now,
            updated_at: now,
        };
        self.users.insert(&user).await?;
        info!(user_id = %user.id, role = %user.role, "user created");
        Ok(user.into())
    }

    pub async fn update(&self, id: &str, req: UserRequest) -> Result<UserResponse> {
        self.validate(&req)?;
        let existing = self.users.get(id).await?;

        if req.email != existing.email {
            if let Some(other) = self.users.find_by_email(&req.email).await? {
                if other.id != id {
                    return Err(TrackError::Conflict(format!(
                        "user with email {} already exists",
                        req.email
                    )));
                }
            }
        }

        let password_hash = match req.password.as_deref() {
            Some(password) if !password.is_empty() => {
                if password.len() < MIN_PASSWORD_LEN {
                    return Err(TrackError::InvalidInput(format!(
                        "password must be at least {MIN_PASSWORD_LEN} characters"
                    )));
                }
                hash_password(password)?
            }
            _ => existing.password_hash.clone(),
        };

        let user = User {
            id: existing.id.clone(),
            name: req.name,
            email: req.email,
            password_hash,
            role: req.role,
            created_at: existing.created_at,
            updated_at: Utc::now(),
        };
        let stored = self.users.update(id, &user).await?;
        info!(user_id = %id, role = %stored.role, "user updated");
        Ok(stored.into())
    }

    /// Hard removal (users, unlike clients, are not deactivated).
    pub async fn delete(&self, id: &str) -> Result<()> {
        self.users.delete(id).await?;
        info!(user_id = %id, "user deleted");
        Ok(())
    }

    /// Verify credentials. Both unknown email and wrong password report
    /// the same unauthenticated error.
    pub async fn login(&self, email: &str, password: &str) -> Result<User> {
        let invalid = || TrackError::Unauthenticated("invalid email or password".into());

        let user = self.users.find_by_email(email).await?.ok_or_else(invalid)?;
        let valid = bcrypt::verify(password, &user.password_hash)
            .map_err(|e| TrackError::Internal(anyhow::anyhow!("bcrypt verify: {e}")))?;
        if !valid {
            warn!(email = %email, "login rejected");
            return Err(invalid());
        }
        info!(user_id = %user.id, "user logged in");
        Ok(user)
    }

    fn validate(&self, req: &UserRequest) -> Result<()> {
        if req.name.is_empty() {
            return Err(TrackError::InvalidInput("name: cannot be blank".into()));
        }
        if req.email.is_empty() {
            return Err(TrackError::InvalidInput("email: cannot be blank".into()));
        }
        if !self.email_format.is_match(&req.email) {
            return Err(TrackError::InvalidInput("email: invalid format".into()));
        }
        Ok(())
    }
}

fn hash_password(password: &str) -> Result<String> {
    bcrypt::hash(password, bcrypt::DEFAULT_COST)
        .map_err(|e| TrackError::Internal(anyhow::anyhow!("bcrypt hash: {e}")))
}
