//! Client entity and its embedded contracts.
//!
//! Optional attributes are modeled as `Option` rather than sentinel
//! strings. `registration_date` is `Option` only because a row read from
//! a partially migrated store may lack it; once set by `create` it is
//! never overwritten.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Mobile application status reported for a client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppStatus {
    Installed,
    NotInstalled,
    #[default]
    Unknown,
}

impl AppStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Installed => "installed",
            Self::NotInstalled => "not_installed",
            Self::Unknown => "unknown",
        }
    }
}

impl std::str::FromStr for AppStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "installed" => Ok(Self::Installed),
            "not_installed" => Ok(Self::NotInstalled),
            "unknown" | "" => Ok(Self::Unknown),
            other => Err(format!("unknown app status: {other}")),
        }
    }
}

/// Auto-payment flag on a contract.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoPayment {
    Enabled,
    #[default]
    Disabled,
}

/// A contract embedded in a client record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    /// Unique within the owning client. Assigned on write when absent.
    pub id: String,
    pub number: Option<String>,
    pub status: Option<String>,
    pub concluded_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub amount: Option<f64>,
    pub payment_frequency: Option<String>,
    #[serde(default)]
    pub auto_payment: AutoPayment,
}

/// A client progressing through the onboarding stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    pub id: String,
    pub name: Option<String>,
    pub email: Option<String>,
    /// Always a node id of the loaded stage graph.
    pub current_stage: String,
    /// Set once on create, preserved by every later mutation.
    pub registration_date: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
    pub is_active: bool,
    pub source: Option<String>,
    pub channel: Option<String>,
    #[serde(default)]
    pub app: AppStatus,
    pub last_login: Option<DateTime<Utc>>,
    #[serde(default)]
    pub contracts: Vec<Contract>,
}

/// Incoming payload for client create and update operations.
///
/// `stage` is a transition direction: a literal node id, `"next"`, or
/// `"prev"` (on create, only a node id resolves).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ClientRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub stage: String,
    pub is_active: Option<bool>,
    pub source: Option<String>,
    pub channel: Option<String>,
    pub app: Option<AppStatus>,
    pub last_login: Option<DateTime<Utc>>,
    #[serde(default)]
    pub contracts: Vec<Contract>,
}

/// Filter set for client list and count queries. All fields conjunctive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientFilters {
    pub id: Option<String>,
    pub stage: Option<String>,
    pub source: Option<String>,
    pub channel: Option<String>,
    pub app: Option<AppStatus>,
    pub is_active: Option<bool>,
    pub updated_after: Option<DateTime<Utc>>,
    pub updated_before: Option<DateTime<Utc>>,
    pub last_login_after: Option<DateTime<Utc>>,
}

impl ClientFilters {
    pub fn stage(stage: impl Into<String>) -> Self {
        Self {
            stage: Some(stage.into()),
            ..Self::default()
        }
    }

    pub fn active() -> Self {
        Self {
            is_active: Some(true),
            ..Self::default()
        }
    }

    /// Window filter on `last_updated`: `start <= last_updated <= end`.
    pub fn updated_within(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            updated_after: Some(start),
            updated_before: Some(end),
            ..Self::default()
        }
    }

    pub fn matches(&self, client: &Client) -> bool {
        if let Some(id) = &self.id {
            if &client.id != id {
                return false;
            }
        }
        if let Some(stage) = &self.stage {
            if &client.current_stage != stage {
                return false;
            }
        }
        if let Some(source) = &self.source {
            if client.source.as_deref() != Some(source.as_str()) {
                return false;
            }
        }
        if let Some(channel) = &self.channel {
            if client.channel.as_deref() != Some(channel.as_str()) {
                return false;
            }
        }
        if let Some(app) = &self.app {
            if &client.app != app {
                return false;
            }
        }
        if let Some(active) = self.is_active {
            if client.is_active != active {
                return false;
            }
        }
        if let Some(after) = self.updated_after {
            if client.last_updated < after {
                return false;
            }
        }
        if let Some(before) = self.updated_before {
            if client.last_updated > before {
                return false;
            }
        }
        if let Some(after) = self.last_login_after {
            match client.last_login {
                Some(login) if login >= after => {}
                _ => return false,
            }
        }
        true
    }
}
