//! Loading of the three JSON documents the tool is driven by.
//!
//! - `papi.json`: deployment platform client settings ([`PapiConfig`])
//! - `job.json`: dashboard and server settings for a deployment ([`JobConfig`])
//! - `scenario.json`: organizations with their user/client templates ([`ScenarioConfig`])

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;

fn default_tool_name() -> String {
    "ai4os-nvflare".to_string()
}

fn default_vo() -> String {
    "vo.ai4eosc.eu".to_string()
}

/// Deployment platform client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PapiConfig {
    /// Base URL of the platform API
    pub host: String,
    /// Account name passed to `oidc-token`
    pub oidc_account: String,
    #[serde(default = "default_tool_name")]
    pub tool_name: String,
    #[serde(default = "default_vo")]
    pub vo: String,
}

/// Job deployment configuration.
///
/// Both sections are free-form: every key ends up in the deployment request
/// as `nvfl_<section>_<key>`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobConfig {
    #[serde(default)]
    pub dashboard: Map<String, Value>,
    #[serde(default)]
    pub server: Map<String, Value>,
}

impl JobConfig {
    /// Project admin credentials (`dashboard.username`, `dashboard.password`)
    pub fn dashboard_credentials(&self) -> Result<(String, String)> {
        let field = |key: &str| -> Result<String> {
            self.dashboard
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
                .with_context(|| format!("job config is missing dashboard.{key}"))
        };
        Ok((field("username")?, field("password")?))
    }
}

/// Per-organization templates as written in the scenario document.
///
/// Fields stay raw JSON: they are templates until expanded for a concrete
/// organization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrgConfig {
    #[serde(default)]
    pub users: Value,
    #[serde(default)]
    pub clients: Value,
    #[serde(rename = "override", default)]
    pub overrides: Map<String, Value>,
}

/// Scenario document: organizations in declared order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScenarioConfig {
    pub organizations: IndexMap<String, OrgConfig>,
}

fn load_json<T: DeserializeOwned, P: AsRef<Path>>(path: P, what: &str) -> Result<T> {
    tracing::debug!("loading configuration: {}", path.as_ref().display());
    let content = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {what} from {:?}", path.as_ref()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {what} JSON in {:?}", path.as_ref()))
}

impl PapiConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        load_json(path, "platform configuration")
    }
}

impl JobConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        load_json(path, "job configuration")
    }
}

impl ScenarioConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        load_json(path, "scenario configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_papi_defaults() {
        let file = write_temp(r#"{"host": "https://papi.example", "oidc_account": "me"}"#);
        let cfg = PapiConfig::load_from_file(file.path()).unwrap();
        assert_eq!(cfg.tool_name, "ai4os-nvflare");
        assert_eq!(cfg.vo, "vo.ai4eosc.eu");
    }

    #[test]
    fn test_scenario_keeps_declared_order() {
        let file = write_temp(
            r#"{"organizations": {
                "zeta": {"users": [], "clients": [], "override": {"user": {}, "client": {}}},
                "alpha": {"users": [], "clients": []}
            }}"#,
        );
        let cfg = ScenarioConfig::load_from_file(file.path()).unwrap();
        let names: Vec<&str> = cfg.organizations.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
        assert!(cfg.organizations["alpha"].overrides.is_empty());
        assert!(cfg.organizations["zeta"].overrides.contains_key("user"));
    }

    #[test]
    fn test_dashboard_credentials() {
        let file = write_temp(
            r#"{"dashboard": {"username": "admin@x", "password": "pw", "project_title": "t"},
                "server": {"jupyter_password": "j"}}"#,
        );
        let cfg = JobConfig::load_from_file(file.path()).unwrap();
        let (user, pass) = cfg.dashboard_credentials().unwrap();
        assert_eq!(user, "admin@x");
        assert_eq!(pass, "pw");
    }

    #[test]
    fn test_dashboard_credentials_missing() {
        let cfg = JobConfig::default();
        let err = cfg.dashboard_credentials().unwrap_err();
        assert!(err.to_string().contains("dashboard.username"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = ScenarioConfig::load_from_file("/nonexistent/scenario.json").unwrap_err();
        assert!(err.to_string().contains("scenario configuration"));
    }
}
