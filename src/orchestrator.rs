//! Scenario orchestration: INIT → DOWNLOAD → START.
//!
//! The orchestrator walks the organizations of a scenario document in their
//! declared order and issues the dashboard calls each phase needs.
//!
//! # Phase Flow
//!
//! ```text
//! INIT      users: create + approve (project admin)
//!           clients: create (org admin) + approve (project admin)
//!     ↓
//! DOWNLOAD  console kit (project admin), client kits (org admin), extract
//!     ↓
//! START     namespace container names, launch ./docker.sh -d per client
//! ```
//!
//! Phases are independently runnable. DOWNLOAD and START always list
//! clients from the dashboard instead of trusting INIT's in-memory result,
//! so they can run in a later invocation. Extractions requested by DOWNLOAD
//! are awaited before START of the same run looks for the launch scripts.
//!
//! # Failure Modes
//!
//! The first failure aborts the run. Nothing is rolled back and nothing is
//! retried. INIT is single-shot: running it again against a provisioned
//! dashboard tries to register the same users again.

use indexmap::IndexMap;
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

use crate::config::JobWorkspace;
use crate::config_file::{OrgConfig, ScenarioConfig};
use crate::error::{Result, TestbedError};
use crate::launcher::{Launcher, StartClientArgs, TaskHandle, UnzipArgs, namespace_launch_script};
use crate::lifecycle::{org_admin, org_clients_cfg, org_users_cfg};
use crate::remote::{
    Client, Credentials, DashboardSession, ROLE_PROJECT_ADMIN, SessionFactory, User, UserRecord,
};

/// PIN protecting every downloaded startup kit
pub const BUNDLE_PIN: &str = "1234";

/// Provisioning phases in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum Phase {
    Init,
    Download,
    Start,
}

/// Set of requested phases; always executed in [`Phase`] order
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseSet {
    init: bool,
    download: bool,
    start: bool,
}

impl PhaseSet {
    pub fn new(init: bool, download: bool, start: bool) -> Self {
        Self {
            init,
            download,
            start,
        }
    }

    pub fn all() -> Self {
        Self::new(true, true, true)
    }

    pub fn contains(&self, phase: Phase) -> bool {
        match phase {
            Phase::Init => self.init,
            Phase::Download => self.download,
            Phase::Start => self.start,
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.init || self.download || self.start)
    }

    pub fn iter(&self) -> impl Iterator<Item = Phase> {
        let set = *self;
        Phase::iter().filter(move |p| set.contains(*p))
    }
}

/// Entities provisioned for one organization
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OrgResult {
    pub users: Vec<User>,
    pub clients: Vec<Client>,
}

/// INIT's result tree, filled as entities get approved
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScenarioResult {
    pub organizations: IndexMap<String, OrgResult>,
}

/// Files fetched by DOWNLOAD
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadReport {
    pub console: PathBuf,
    pub client_kits: Vec<PathBuf>,
}

/// Open the session that approves entities and fetches the console kit.
///
/// Fails with `Config` when the credentials belong to anyone but the
/// project admin.
pub fn open_project_admin<F: SessionFactory>(
    factory: &F,
    credentials: &Credentials,
) -> Result<F::Session> {
    let session = factory.open(credentials)?;
    match session.current_user() {
        Some(user) if user.role == ROLE_PROJECT_ADMIN => Ok(session),
        Some(user) => Err(TestbedError::config(format!(
            "dashboard user {} has role '{}', expected {ROLE_PROJECT_ADMIN}",
            user.email, user.role
        ))),
        None => Err(TestbedError::config(format!(
            "dashboard login as {} reported no user",
            credentials.email
        ))),
    }
}

fn admin_credentials(admin: &UserRecord) -> Credentials {
    Credentials::new(admin.email.clone(), admin.password.clone())
}

/// Open a session as the organization's `org_admin`
fn open_org_admin<F: SessionFactory>(
    factory: &F,
    org: &str,
    org_cfg: &OrgConfig,
) -> Result<F::Session> {
    let users_cfg = org_users_cfg(org, org_cfg)?;
    let admin = org_admin(&users_cfg)?;
    factory.open(&admin_credentials(admin))
}

fn init_organization<F: SessionFactory>(
    factory: &F,
    project_admin: &F::Session,
    org: &str,
    org_cfg: &OrgConfig,
    result: &mut OrgResult,
) -> Result<()> {
    let users_cfg = org_users_cfg(org, org_cfg)?;
    if users_cfg.is_empty() {
        tracing::error!("missing users in organization {} config", org);
        return Err(TestbedError::config(format!(
            "missing users in organization {org} config"
        )));
    }
    let admin = org_admin(&users_cfg)?;
    let clients_cfg = org_clients_cfg(org, org_cfg)?;

    let users = project_admin.create_users(&users_cfg)?;
    project_admin.approve_users(&users, &mut result.users)?;

    // org admins register their own clients but cannot approve them
    let org_session = factory.open(&admin_credentials(admin))?;
    if clients_cfg.is_empty() {
        tracing::warn!("missing clients in organization {} config", org);
    }
    let clients = org_session.create_clients(&clients_cfg)?;
    project_admin.approve_clients(&clients, &mut result.clients)?;
    Ok(())
}

/// Runs provisioning phases for one job against one dashboard
pub struct Orchestrator<F: SessionFactory, L: Launcher> {
    factory: F,
    project_admin: F::Session,
    launcher: L,
    scenario: ScenarioConfig,
    workspace: JobWorkspace,
    extract: bool,
    container_prefix: String,
    results: ScenarioResult,
    extractions: Vec<Box<dyn TaskHandle>>,
}

impl<F: SessionFactory, L: Launcher> Orchestrator<F, L> {
    /// Bundles are extracted and container names are prefixed with the job ID by default.
    pub fn new(
        factory: F,
        project_admin: F::Session,
        launcher: L,
        scenario: ScenarioConfig,
        workspace: JobWorkspace,
    ) -> Self {
        let container_prefix = workspace.job_id().to_string();
        Self {
            factory,
            project_admin,
            launcher,
            scenario,
            workspace,
            extract: true,
            container_prefix,
            results: ScenarioResult::default(),
            extractions: Vec::new(),
        }
    }

    pub fn with_extract(mut self, extract: bool) -> Self {
        self.extract = extract;
        self
    }

    pub fn with_container_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.container_prefix = prefix.into();
        self
    }

    /// Entities approved by the last INIT, including a partial one
    pub fn results(&self) -> &ScenarioResult {
        &self.results
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    /// Run the requested phases in order, stopping at the first failure
    pub fn run(&mut self, phases: PhaseSet) -> Result<()> {
        if phases.is_empty() {
            tracing::warn!("no phase requested, nothing to do");
        }
        for phase in phases.iter() {
            tracing::info!("scenario phase {} for job {}", phase, self.workspace.job_id());
            match phase {
                Phase::Init => {
                    self.run_init()?;
                }
                Phase::Download => {
                    self.run_download()?;
                }
                Phase::Start => {
                    self.run_start()?;
                }
            }
        }
        Ok(())
    }

    /// INIT: register and approve every organization's users and clients
    pub fn run_init(&mut self) -> Result<&ScenarioResult> {
        self.results = ScenarioResult::default();
        for (org, org_cfg) in &self.scenario.organizations {
            let entry = self.results.organizations.entry(org.clone()).or_default();
            init_organization(&self.factory, &self.project_admin, org, org_cfg, entry)?;
        }
        tracing::debug!(
            "scenario:\n{}",
            serde_json::to_string_pretty(&self.results)?
        );
        Ok(&self.results)
    }

    /// DOWNLOAD: fetch the console kit and every client's startup kit
    pub fn run_download(&mut self) -> Result<DownloadReport> {
        let download_dir = self.workspace.download_dir();
        fs::create_dir_all(&download_dir)?;

        let console = self
            .project_admin
            .download_flare_console(BUNDLE_PIN, &download_dir)?;
        tracing::info!("downloaded flare console: {}", console.display());
        if self.extract {
            let dest = self.workspace.extract_dir();
            fs::create_dir_all(&dest)?;
            let handle = self.extract(console.clone(), dest)?;
            self.extractions.push(handle);
        }

        let mut report = DownloadReport {
            console,
            client_kits: Vec::new(),
        };
        for (org, org_cfg) in &self.scenario.organizations {
            let session = open_org_admin(&self.factory, org, org_cfg)?;
            for client in session.get_clients(Some(org))? {
                let kit =
                    session.download_client_startup_kit(client.id, BUNDLE_PIN, &download_dir)?;
                tracing::info!("downloaded startup kit: {}", kit.display());
                if self.extract {
                    let handle = self.extract(kit.clone(), self.workspace.org_dir(org))?;
                    self.extractions.push(handle);
                }
                report.client_kits.push(kit);
            }
        }
        Ok(report)
    }

    /// START: launch every client of every organization. Returns the number launched.
    pub fn run_start(&mut self) -> Result<usize> {
        self.wait_for_extractions()?;
        let mut launched = 0;
        for (org, org_cfg) in &self.scenario.organizations {
            let session = open_org_admin(&self.factory, org, org_cfg)?;
            for client in session.get_clients(Some(org))? {
                self.start_client(&client)?;
                launched += 1;
            }
        }
        Ok(launched)
    }

    /// Block until every extraction requested by DOWNLOAD has finished
    fn wait_for_extractions(&mut self) -> Result<()> {
        if !self.extractions.is_empty() {
            tracing::info!("waiting for {} bundle extractions", self.extractions.len());
        }
        for handle in self.extractions.drain(..) {
            handle.wait()?;
        }
        Ok(())
    }

    fn extract(&self, archive: PathBuf, dest: PathBuf) -> Result<Box<dyn TaskHandle>> {
        self.launcher.launch(&UnzipArgs {
            archive,
            dest,
            pin: BUNDLE_PIN.to_string(),
        })
    }

    fn start_client(&self, client: &Client) -> Result<()> {
        let (org, name) = (client.organization.as_str(), client.name.as_str());
        let data_dir = self.workspace.client_data_dir(org, name);
        fs::create_dir_all(&data_dir)?;

        let startup_dir = self.workspace.client_startup_dir(org, name);
        let script = startup_dir.join("docker.sh");
        if !script.is_file() {
            return Err(TestbedError::Launch {
                program: script.display().to_string(),
                reason: "startup kit not extracted".to_string(),
            });
        }

        tracing::info!("starting client {} with docker ...", name);
        namespace_launch_script(&script, name, &self.container_prefix)?;
        // clients outlive the provisioner
        drop(self.launcher.launch(&StartClientArgs {
            startup_dir,
            data_dir,
        })?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_set_order() {
        let phases = PhaseSet::new(false, true, true);
        assert_eq!(phases.iter().collect::<Vec<_>>(), vec![Phase::Download, Phase::Start]);
        assert!(!phases.contains(Phase::Init));
        assert_eq!(PhaseSet::all().iter().count(), 3);
    }

    #[test]
    fn test_phase_set_empty() {
        assert!(PhaseSet::default().is_empty());
        assert!(!PhaseSet::new(true, false, false).is_empty());
    }

    #[test]
    fn test_phase_strings() {
        assert_eq!(Phase::Download.to_string(), "download");
        assert_eq!("start".parse::<Phase>().unwrap(), Phase::Start);
        assert!("deploy".parse::<Phase>().is_err());
    }
}
