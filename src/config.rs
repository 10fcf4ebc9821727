//! Runtime environment and per-job directory layout.
//!
//! All artifacts of a deployment live under `<jobs root>/<job ID>/`:
//!
//! ```text
//! jobs/<job ID>/
//!     downloads/                 zipped console and client startup kits
//!     <admin>/                   extracted console kit (project admin)
//!     <org>/<client>/startup/    extracted client kits
//!     data/<org>/<client>/       per-client data directory (MY_DATA_DIR)
//! ```

use std::path::{Path, PathBuf};

/// Environment variable holding the jobs root
pub const JOBS_DIR_ENV: &str = "NVFL_JOBS_DIR";
/// Environment variable holding the job ID; wins over `--jobid`
pub const JOB_ID_ENV: &str = "NVFL_JOBID";

/// Values resolved from the process environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeEnv {
    pub jobs_dir: PathBuf,
    pub job_id: Option<String>,
}

impl RuntimeEnv {
    /// Read `NVFL_JOBS_DIR` and `NVFL_JOBID` from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve from an arbitrary lookup function (used by tests)
    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            jobs_dir: non_empty(JOBS_DIR_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|| Path::new(".").join("jobs")),
            job_id: non_empty(JOB_ID_ENV),
        }
    }

    /// Job ID to operate on: the environment wins over the CLI flag
    pub fn resolve_job_id(&self, cli_job_id: Option<&str>) -> Option<String> {
        self.job_id
            .clone()
            .or_else(|| cli_job_id.map(str::to_string))
            .filter(|id| !id.trim().is_empty())
    }

    pub fn workspace(&self, job_id: &str) -> JobWorkspace {
        JobWorkspace::new(self.jobs_dir.join(job_id), job_id)
    }
}

/// Directory layout owned by one job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobWorkspace {
    root: PathBuf,
    job_id: String,
}

impl JobWorkspace {
    pub fn new(root: impl Into<PathBuf>, job_id: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            job_id: job_id.into(),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn download_dir(&self) -> PathBuf {
        self.root.join("downloads")
    }

    /// Where the console bundle is extracted
    pub fn extract_dir(&self) -> PathBuf {
        self.root.clone()
    }

    /// Where an organization's client bundles are extracted
    pub fn org_dir(&self, org: &str) -> PathBuf {
        self.root.join(org)
    }

    pub fn client_dir(&self, org: &str, client: &str) -> PathBuf {
        self.org_dir(org).join(client)
    }

    pub fn client_startup_dir(&self, org: &str, client: &str) -> PathBuf {
        self.client_dir(org, client).join("startup")
    }

    pub fn client_data_dir(&self, org: &str, client: &str) -> PathBuf {
        self.root.join("data").join(org).join(client)
    }

    /// Same layout rooted at an absolute path, as launched clients run from
    /// their own startup directories
    pub fn absolute(&self) -> std::io::Result<Self> {
        Ok(Self {
            root: std::path::absolute(&self.root)?,
            job_id: self.job_id.clone(),
        })
    }

    /// Create the job root (and any missing parents)
    pub fn create(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> RuntimeEnv {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        RuntimeEnv::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn test_default_jobs_dir() {
        let env = env(&[]);
        assert_eq!(env.jobs_dir, Path::new(".").join("jobs"));
        assert_eq!(env.job_id, None);
    }

    #[test]
    fn test_env_job_id_wins_over_flag() {
        let env = env(&[(JOB_ID_ENV, "from-env")]);
        assert_eq!(env.resolve_job_id(Some("from-flag")).as_deref(), Some("from-env"));
    }

    #[test]
    fn test_flag_used_without_env() {
        let env = env(&[(JOBS_DIR_ENV, "/srv/jobs")]);
        assert_eq!(env.resolve_job_id(Some("abc")).as_deref(), Some("abc"));
        assert_eq!(env.resolve_job_id(None), None);
        assert_eq!(env.workspace("abc").root(), Path::new("/srv/jobs/abc"));
    }

    #[test]
    fn test_blank_job_id_is_missing() {
        let env = env(&[(JOB_ID_ENV, "  ")]);
        assert_eq!(env.resolve_job_id(Some("")), None);
    }

    #[test]
    fn test_workspace_layout() {
        let ws = JobWorkspace::new("/j/42", "42");
        assert_eq!(ws.download_dir(), Path::new("/j/42/downloads"));
        assert_eq!(
            ws.client_startup_dir("orgA", "site-1"),
            Path::new("/j/42/orgA/site-1/startup")
        );
        assert_eq!(
            ws.client_data_dir("orgA", "site-1"),
            Path::new("/j/42/data/orgA/site-1")
        );
    }

    #[test]
    fn test_absolute_workspace() {
        let ws = JobWorkspace::new("jobs/42", "42").absolute().unwrap();
        assert!(ws.root().is_absolute());
        assert!(ws.root().ends_with("jobs/42"));
        assert_eq!(ws.job_id(), "42");
    }
}
