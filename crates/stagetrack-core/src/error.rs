use thiserror::Error;

use crate::domain::metric::MetricType;

#[derive(Debug, Error)]
pub enum TrackError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid transition from '{from}' via '{direction}': {reason}")]
    InvalidTransition {
        from: String,
        direction: String,
        reason: String,
    },

    #[error("invalid direction: {0}")]
    InvalidDirection(String),

    #[error("invalid role: {0}")]
    InvalidRole(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("cancelled")]
    Cancelled,

    #[error("timed out after {0} seconds")]
    Timeout(u64),

    #[error("{} metric computation(s) failed: {}", .0.len(), format_failed(.0))]
    Calculation(Vec<MetricType>),

    #[error("internal: {0}")]
    Internal(#[from] anyhow::Error),
}

fn format_failed(failed: &[MetricType]) -> String {
    failed
        .iter()
        .map(|t| t.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl TrackError {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::Conflict(_) => 409,
            Self::InvalidTransition { .. }
            | Self::InvalidDirection(_)
            | Self::InvalidRole(_)
            | Self::InvalidInput(_) => 400,
            Self::Unauthenticated(_) => 401,
            Self::Forbidden(_) => 403,
            Self::Cancelled | Self::Timeout(_) | Self::Calculation(_) | Self::Internal(_) => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, TrackError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_not_found() {
        assert_eq!(TrackError::NotFound("x".into()).http_status(), 404);
    }

    #[test]
    fn http_status_conflict() {
        assert_eq!(TrackError::Conflict("email".into()).http_status(), 409);
    }

    #[test]
    fn http_status_invalid_transition() {
        let err = TrackError::InvalidTransition {
            from: "a".into(),
            direction: "next".into(),
            reason: "no successor".into(),
        };
        assert_eq!(err.http_status(), 400);
    }

    #[test]
    fn http_status_auth_kinds() {
        assert_eq!(TrackError::Unauthenticated("no token".into()).http_status(), 401);
        assert_eq!(TrackError::Forbidden("role".into()).http_status(), 403);
    }

    #[test]
    fn calculation_error_lists_failed_types() {
        let err = TrackError::Calculation(vec![MetricType::Conversion, MetricType::Dropout]);
        let msg = err.to_string();
        assert!(msg.contains("2 metric computation(s) failed"));
        assert!(msg.contains("conversion"));
        assert!(msg.contains("dropout"));
    }
}
