//! Role-based authorization.
//!
//! One capability table maps each protected operation to the roles
//! permitted to perform it; every protected handler consults the single
//! [`require`] guard. Finer rules that depend on the request payload
//! (role changes on user update) live in the handler, on top of this
//! table.

use stagetrack_core::domain::user::Role;
use stagetrack_core::error::{Result, TrackError};

use crate::middleware::jwt::Claims;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    ListClients,
    GetClient,
    TransitionClient,
    DeleteClient,
    ListUsers,
    GetUser,
    CreateUser,
    UpdateUser,
    DeleteUser,
    ListMetrics,
    CalculateMetrics,
}

impl Operation {
    /// The capability table. Part of the external contract.
    pub fn required_roles(&self) -> &'static [Role] {
        use Role::*;
        match self {
            Self::ListClients
            | Self::GetClient
            | Self::TransitionClient
            | Self::ListUsers
            | Self::GetUser
            | Self::ListMetrics
            | Self::CalculateMetrics => &[Admin, Manager],
            Self::DeleteClient | Self::CreateUser => &[SuperUser, Admin],
            // Role changes are gated further inside the handler.
            Self::UpdateUser => &[SuperUser, Admin],
            Self::DeleteUser => &[SuperUser],
        }
    }
}

/// Reject the request unless the principal's role is in the operation's
/// capability row.
pub fn require(claims: &Claims, operation: Operation) -> Result<()> {
    if operation.required_roles().contains(&claims.role) {
        Ok(())
    } else {
        Err(TrackError::Forbidden("insufficient permissions".into()))
    }
}
