//! Facades over the two remote services the provisioner talks to.
//!
//! - [`DeploymentApi`]: the deployment platform that runs the dashboard+server job
//! - [`DashboardSession`]: one authenticated session against the dashboard
//! - [`SessionFactory`]: opens dashboard sessions for a given set of credentials
//!
//! Facades never retry. Any non-success response surfaces as an error carrying
//! the raw response body.

pub mod dashboard;
pub mod papi;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::config_file::JobConfig;
use crate::error::{EntityKind, Result, TestbedError};
use crate::lifecycle::approve_batch;

pub use dashboard::{HttpDashboard, HttpSessionFactory};
pub use papi::{OidcAgent, PapiClient, StaticToken, TokenSource};

/// Approval state the dashboard uses for "approved"
pub const APPROVED: i64 = 100;

pub const ROLE_ORG_ADMIN: &str = "org_admin";
pub const ROLE_PROJECT_ADMIN: &str = "project_admin";

/// Identifier of a deployed job on the platform
pub type JobId = String;

/// Named endpoints of a deployed job (`dashboard`, `server-jupyter`, ...)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Endpoints(BTreeMap<String, String>);

impl Endpoints {
    pub const DASHBOARD: &'static str = "dashboard";
    pub const SERVER_JUPYTER: &'static str = "server-jupyter";

    pub fn get(&self, name: &str) -> Result<&str> {
        self.0.get(name).map(String::as_str).ok_or_else(|| {
            TestbedError::remote(
                "job endpoints",
                200,
                format!("job reports no '{name}' endpoint"),
            )
        })
    }

    pub fn dashboard(&self) -> Result<&str> {
        self.get(Self::DASHBOARD)
    }
}

impl FromIterator<(String, String)> for Endpoints {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Login credentials for one dashboard session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

/// Expanded user template, ready to be registered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub email: String,
    pub name: String,
    pub password: String,
    pub organization: String,
    pub role: String,
}

/// Client resources as the dashboard stores them
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capacity {
    #[serde(default)]
    pub num_of_gpus: u32,
    #[serde(rename = "mem_per_gpu_in_GiB", default)]
    pub mem_per_gpu_in_gib: u32,
}

/// Expanded client template, ready to be registered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRecord {
    pub name: String,
    pub organization: String,
    #[serde(default)]
    pub capacity: Option<Capacity>,
    /// Shortcut overriding `capacity.num_of_gpus`
    #[serde(default)]
    pub num_of_gpus: Option<u32>,
    /// Shortcut overriding `capacity.mem_per_gpu_in_GiB`
    #[serde(default)]
    pub mem_per_gpu_in_gib: Option<u32>,
}

impl ClientRecord {
    /// Capacity sent to the dashboard: zero defaults, then `capacity`, then the shortcuts
    pub fn effective_capacity(&self) -> Capacity {
        let mut capacity = self.capacity.unwrap_or_default();
        if let Some(gpus) = self.num_of_gpus.filter(|n| *n > 0) {
            capacity.num_of_gpus = gpus;
        }
        if let Some(mem) = self.mem_per_gpu_in_gib.filter(|n| *n > 0) {
            capacity.mem_per_gpu_in_gib = mem;
        }
        capacity
    }
}

/// User as reported by the dashboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub organization: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub approval_state: i64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Client (site) as reported by the dashboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Client {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub organization: String,
    #[serde(default)]
    pub approval_state: i64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Entity whose approval the dashboard reports back
pub trait Approvable {
    const KIND: EntityKind;

    fn approval_state(&self) -> i64;

    /// Name used in logs and errors
    fn label(&self) -> &str;

    fn is_approved(&self) -> bool {
        self.approval_state() == APPROVED
    }
}

impl Approvable for User {
    const KIND: EntityKind = EntityKind::User;

    fn approval_state(&self) -> i64 {
        self.approval_state
    }

    fn label(&self) -> &str {
        &self.email
    }
}

impl Approvable for Client {
    const KIND: EntityKind = EntityKind::Client;

    fn approval_state(&self) -> i64 {
        self.approval_state
    }

    fn label(&self) -> &str {
        &self.name
    }
}

/// Deployment platform operations used by the `job` command and the scenario setup
pub trait DeploymentApi {
    /// Deploy the dashboard+server stack; fails unless the platform reports success
    fn deploy(&self, job: &JobConfig) -> Result<JobId>;

    /// Fetch the job's endpoints. Never cached.
    fn get_job_endpoints(&self, job_id: &str) -> Result<Endpoints>;
}

/// One authenticated dashboard session.
///
/// The batch methods are built on the single-entity primitives. Approval
/// batches verify the server-reported state after every call, push each
/// verified entity into the caller's sink and stop at the first mismatch.
pub trait DashboardSession {
    fn base_url(&self) -> &str;

    /// Authenticate and return a fresh access token
    fn login(&self) -> Result<String>;

    /// User this session is logged in as, once login succeeded
    fn current_user(&self) -> Option<User>;

    fn create_user(&self, record: &UserRecord) -> Result<User>;

    /// Set the user's approval state; returns the user as the server now reports it
    fn approve_user(&self, user: &User) -> Result<User>;

    fn create_client(&self, record: &ClientRecord) -> Result<Client>;

    /// Set the client's approval state; returns the client as the server now reports it
    fn approve_client(&self, client: &Client) -> Result<Client>;

    fn get_users(&self) -> Result<Vec<User>>;

    /// All clients visible to this session, optionally restricted to one organization
    fn get_clients(&self, org: Option<&str>) -> Result<Vec<Client>>;

    /// Download the console bundle of the logged-in user into `dir`
    fn download_flare_console(&self, pin: &str, dir: &Path) -> Result<PathBuf>;

    /// Download a client's startup kit into `dir`
    fn download_client_startup_kit(
        &self,
        client_id: i64,
        pin: &str,
        dir: &Path,
    ) -> Result<PathBuf>;

    fn create_users(&self, records: &[UserRecord]) -> Result<Vec<User>> {
        let mut users = Vec::with_capacity(records.len());
        for record in records {
            let user = self.create_user(record)?;
            tracing::info!("user {} registered in dashboard", user.email);
            users.push(user);
        }
        Ok(users)
    }

    fn approve_users(&self, users: &[User], approved: &mut Vec<User>) -> Result<()> {
        approve_batch(users, approved, |u| self.approve_user(u))
    }

    fn create_clients(&self, records: &[ClientRecord]) -> Result<Vec<Client>> {
        let mut clients = Vec::with_capacity(records.len());
        for record in records {
            let client = self.create_client(record)?;
            tracing::info!("client {} added in dashboard", client.name);
            clients.push(client);
        }
        Ok(clients)
    }

    fn approve_clients(&self, clients: &[Client], approved: &mut Vec<Client>) -> Result<()> {
        approve_batch(clients, approved, |c| self.approve_client(c))
    }
}

/// Opens authenticated dashboard sessions
pub trait SessionFactory {
    type Session: DashboardSession;

    /// Open a session and log in immediately
    fn open(&self, credentials: &Credentials) -> Result<Self::Session>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_effective_capacity_defaults() {
        let record: ClientRecord =
            serde_json::from_value(json!({"name": "c1", "organization": "o"})).unwrap();
        assert_eq!(record.effective_capacity(), Capacity::default());
    }

    #[test]
    fn test_effective_capacity_shortcuts_win() {
        let record: ClientRecord = serde_json::from_value(json!({
            "name": "c1",
            "organization": "o",
            "capacity": {"num_of_gpus": 1, "mem_per_gpu_in_GiB": 8},
            "num_of_gpus": 2,
        }))
        .unwrap();
        assert_eq!(
            record.effective_capacity(),
            Capacity {
                num_of_gpus: 2,
                mem_per_gpu_in_gib: 8
            }
        );
    }

    #[test]
    fn test_capacity_wire_name() {
        let value = serde_json::to_value(Capacity {
            num_of_gpus: 1,
            mem_per_gpu_in_gib: 16,
        })
        .unwrap();
        assert_eq!(value, json!({"num_of_gpus": 1, "mem_per_gpu_in_GiB": 16}));
    }

    #[test]
    fn test_user_keeps_unknown_fields() {
        let user: User = serde_json::from_value(json!({
            "id": 3,
            "email": "a@x",
            "role": "org_admin",
            "approval_state": 100,
            "created_at": "2024-01-01",
        }))
        .unwrap();
        assert!(user.is_approved());
        assert_eq!(user.label(), "a@x");
        assert_eq!(user.extra["created_at"], json!("2024-01-01"));
    }

    #[test]
    fn test_endpoints_lookup() {
        let endpoints: Endpoints =
            serde_json::from_value(json!({"dashboard": "https://dash", "server-jupyter": "https://j"}))
                .unwrap();
        assert_eq!(endpoints.dashboard().unwrap(), "https://dash");
        assert_eq!(endpoints.get(Endpoints::SERVER_JUPYTER).unwrap(), "https://j");
        assert!(endpoints.get("monitor").is_err());
    }
}
