//! NVFLARE testbed provisioning library
//!
//! This library provides the scenario orchestration engine and the
//! configuration expansion engine behind the `nvfl-testbed` binary.

pub mod cli;
pub mod config;
pub mod config_file;
pub mod error;
pub mod expand;
pub mod launcher;
pub mod lifecycle;
pub mod orchestrator;
pub mod poller;
pub mod remote;

// Re-export main types for convenience
pub use config::{JobWorkspace, RuntimeEnv};
pub use config_file::{JobConfig, OrgConfig, PapiConfig, ScenarioConfig};
pub use error::{EntityKind, Result, TestbedError};
pub use expand::{Variables, expand, expand_and_override};
pub use launcher::{
    Launcher, ProcessLauncher, StartClientArgs, TaskArgs, TaskHandle, UnzipArgs,
};
pub use lifecycle::{org_admin, org_clients_cfg, org_users_cfg, user_password};
pub use orchestrator::{Orchestrator, Phase, PhaseSet, ScenarioResult, open_project_admin};
pub use poller::{HttpProbe, Poller, StatusProbe};
pub use remote::{
    Client, ClientRecord, Credentials, DashboardSession, DeploymentApi, Endpoints,
    HttpSessionFactory, PapiClient, SessionFactory, User, UserRecord,
};
