//! Deployment platform (PAPI) client.
//!
//! Deploys the NVFLARE tool (dashboard + FL server) and reports the endpoints
//! of a running job. Every request carries a fresh OIDC bearer token.

use serde_json::{Map, Value, json};
use std::process::Command;

use super::{DeploymentApi, Endpoints, JobId};
use crate::config_file::{JobConfig, PapiConfig};
use crate::error::{Result, TestbedError};

/// Source of bearer tokens for the platform
pub trait TokenSource {
    fn access_token(&self) -> Result<String>;
}

/// Tokens from a local `oidc-agent` via the `oidc-token` command
#[derive(Debug, Clone)]
pub struct OidcAgent {
    account: String,
}

impl OidcAgent {
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
        }
    }
}

impl TokenSource for OidcAgent {
    fn access_token(&self) -> Result<String> {
        let output = Command::new("oidc-token")
            .arg(&self.account)
            .output()
            .map_err(|e| TestbedError::Launch {
                program: "oidc-token".to_string(),
                reason: e.to_string(),
            })?;
        if !output.status.success() {
            return Err(TestbedError::Launch {
                program: "oidc-token".to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Fixed token, for platforms reached through a pre-issued credential
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

impl TokenSource for StaticToken {
    fn access_token(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// HTTP client for the deployment platform
pub struct PapiClient {
    http: reqwest::blocking::Client,
    host: String,
    tool_name: String,
    vo: String,
    tokens: Box<dyn TokenSource>,
}

impl PapiClient {
    pub fn new(cfg: &PapiConfig) -> Self {
        Self::with_token_source(cfg, Box::new(OidcAgent::new(&cfg.oidc_account)))
    }

    pub fn with_token_source(cfg: &PapiConfig, tokens: Box<dyn TokenSource>) -> Self {
        Self {
            http: reqwest::blocking::Client::new(),
            host: cfg.host.trim_end_matches('/').to_string(),
            tool_name: cfg.tool_name.clone(),
            vo: cfg.vo.clone(),
            tokens,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.host, path)
    }

    fn read_json(context: &str, response: reqwest::blocking::Response) -> Result<Value> {
        let status = response.status().as_u16();
        let body = response.text()?;
        let value = serde_json::from_str(&body)
            .map_err(|_| TestbedError::remote(context, status, body.clone()))?;
        tracing::debug!("{} response: {}", context, value);
        Ok(value)
    }
}

/// Request body for deploying the tool.
///
/// Starts from the platform's defaults and sets `nvfl_<section>_<key>` for
/// every key of the job config's `dashboard` and `server` sections.
pub fn deployment_request(job: &JobConfig) -> Value {
    let mut general: Map<String, Value> = [
        ("nvfl_server_jupyter_password", json!("")),
        ("nvfl_dashboard_username", json!("")),
        ("nvfl_dashboard_password", json!("")),
        ("nvfl_dashboard_project_short_name", json!("")),
        ("nvfl_dashboard_project_title", json!("")),
        ("nvfl_dashboard_project_description", json!("")),
        ("nvfl_dashboard_project_app_location", json!("")),
        ("nvfl_dashboard_project_starting_date", json!("")),
        ("nvfl_dashboard_project_end_date", json!("")),
        ("nvfl_dashboard_project_public", json!(false)),
        ("nvfl_dashboard_project_frozen", json!(false)),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();

    for (section, values) in [("dashboard", &job.dashboard), ("server", &job.server)] {
        for (k, v) in values {
            general.insert(format!("nvfl_{section}_{k}"), v.clone());
        }
    }

    json!({
        "general": general,
        "storage": {
            "rclone_user": "",
            "rclone_password": "",
        },
    })
}

impl DeploymentApi for PapiClient {
    fn deploy(&self, job: &JobConfig) -> Result<JobId> {
        let body = deployment_request(job);
        tracing::debug!("deployment request: {}", body);

        let response = self
            .http
            .post(self.url("/v1/deployments/tools/"))
            .bearer_auth(self.tokens.access_token()?)
            .query(&[("tool_name", self.tool_name.as_str()), ("vo", self.vo.as_str())])
            .json(&body)
            .send()?;
        let status = response.status().as_u16();
        let value = Self::read_json("deploy", response)?;

        let succeeded = value.get("status").and_then(Value::as_str) == Some("success");
        match value.get("job_ID").and_then(Value::as_str) {
            Some(job_id) if succeeded => Ok(job_id.to_string()),
            _ => Err(TestbedError::remote("deploy", status, value.to_string())),
        }
    }

    fn get_job_endpoints(&self, job_id: &str) -> Result<Endpoints> {
        let response = self
            .http
            .get(self.url(&format!("/v1/deployments/tools/{job_id}")))
            .bearer_auth(self.tokens.access_token()?)
            .query(&[("vo", self.vo.as_str()), ("full_info", "false")])
            .send()?;
        let status = response.status().as_u16();
        let mut value = Self::read_json("job endpoints", response)?;

        match value.get_mut("endpoints").map(Value::take) {
            Some(endpoints @ Value::Object(_)) => Ok(serde_json::from_value(endpoints)?),
            _ => Err(TestbedError::remote("job endpoints", status, value.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deployment_request_maps_sections() {
        let job: JobConfig = serde_json::from_value(json!({
            "dashboard": {"username": "admin@x", "project_public": true},
            "server": {"jupyter_password": "secret"},
        }))
        .unwrap();
        let body = deployment_request(&job);
        let general = &body["general"];
        assert_eq!(general["nvfl_dashboard_username"], json!("admin@x"));
        assert_eq!(general["nvfl_dashboard_project_public"], json!(true));
        assert_eq!(general["nvfl_server_jupyter_password"], json!("secret"));
        // untouched defaults remain
        assert_eq!(general["nvfl_dashboard_project_frozen"], json!(false));
        assert_eq!(body["storage"]["rclone_user"], json!(""));
    }

    #[test]
    fn test_host_trailing_slash_trimmed() {
        let cfg = PapiConfig {
            host: "https://papi.example/".to_string(),
            oidc_account: "acct".to_string(),
            tool_name: "t".to_string(),
            vo: "v".to_string(),
        };
        let client = PapiClient::with_token_source(&cfg, Box::new(StaticToken("tok".into())));
        assert_eq!(
            client.url("/v1/deployments/tools/"),
            "https://papi.example/v1/deployments/tools/"
        );
    }
}
