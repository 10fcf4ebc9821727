//! HTTP client for the NVFLARE dashboard API.
//!
//! One [`HttpDashboard`] is one session: it logs in with its credentials
//! when first asked for a token and keeps that token for its lifetime.
//! Tokens are never renewed proactively.

use reqwest::Url;
use reqwest::blocking::{RequestBuilder, Response};
use reqwest::header::CONTENT_DISPOSITION;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};

use super::{
    APPROVED, Client, ClientRecord, Credentials, DashboardSession, SessionFactory, User, UserRecord,
};
use crate::error::{Result, TestbedError};

/// Authenticated (or not yet authenticated) dashboard session
pub struct HttpDashboard {
    http: reqwest::blocking::Client,
    base_url: String,
    credentials: Credentials,
    token: RefCell<Option<String>>,
    user: RefCell<Option<User>>,
}

impl HttpDashboard {
    /// Session that logs in with `credentials` on first use
    pub fn with_credentials(base_url: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            http: reqwest::blocking::Client::new(),
            base_url: base_url.into(),
            credentials,
            token: RefCell::new(None),
            user: RefCell::new(None),
        }
    }

    /// Resolve `path` against the base URL (absolute paths replace the base path)
    fn url(&self, path: &str) -> Result<Url> {
        Url::parse(&self.base_url)
            .and_then(|base| base.join(path))
            .map_err(|e| TestbedError::config(format!("invalid dashboard url {}: {e}", self.base_url)))
    }

    /// Cached token, logging in first when none is held
    fn access_token(&self) -> Result<String> {
        if let Some(token) = self.token.borrow().as_ref() {
            return Ok(token.clone());
        }
        self.login()
    }

    fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder> {
        Ok(request.bearer_auth(self.access_token()?))
    }

    /// Send a JSON request and return the body if the dashboard reports `status: ok`
    fn send(&self, context: &str, request: RequestBuilder) -> Result<Value> {
        let response = request.send()?;
        let status = response.status().as_u16();
        let body = response.text()?;
        if status != 200 && status != 201 {
            return Err(TestbedError::remote(context, status, body));
        }
        let value: Value = serde_json::from_str(&body)
            .map_err(|_| TestbedError::remote(context, status, body.clone()))?;
        if value.get("status").and_then(Value::as_str) != Some("ok") {
            return Err(TestbedError::remote(context, status, body));
        }
        tracing::debug!("{} response: {}", context, value);
        Ok(value)
    }

    fn download_blob(&self, path: &str, dir: &Path, fallback_name: &str, pin: &str) -> Result<PathBuf> {
        let url = self.url(path)?;
        let response = self
            .authorized(self.http.post(url.clone()))?
            .json(&json!({ "pin": pin }))
            .send()?;
        write_blob(url.as_str(), response, dir, fallback_name)
    }
}

/// Take `key` out of a dashboard response and deserialize it
fn field<T: DeserializeOwned>(context: &str, mut body: Value, key: &str) -> Result<T> {
    match body.get_mut(key).map(Value::take) {
        Some(value) => Ok(serde_json::from_value(value)?),
        None => Err(TestbedError::remote(context, 200, body.to_string())),
    }
}

/// File name announced by a `Content-Disposition: attachment; filename=...` header.
///
/// Only the final path component is kept so a hostile name cannot escape the
/// download directory.
pub fn attachment_filename(header: &str) -> Option<String> {
    let mut parts = header.split(';').map(str::trim);
    if !parts.next()?.eq_ignore_ascii_case("attachment") {
        return None;
    }
    parts
        .filter_map(|p| p.split_once('='))
        .find(|(k, _)| k.trim().eq_ignore_ascii_case("filename"))
        .map(|(_, v)| v.trim().trim_matches('"').to_string())
        .and_then(|name| {
            Path::new(&name)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
        })
        .filter(|name| !name.is_empty())
}

fn write_blob(url: &str, response: Response, dir: &Path, fallback_name: &str) -> Result<PathBuf> {
    let status = response.status().as_u16();
    if status != 200 {
        return Err(TestbedError::Download {
            url: url.to_string(),
            status,
        });
    }
    let filename = response
        .headers()
        .get(CONTENT_DISPOSITION)
        .and_then(|h| h.to_str().ok())
        .and_then(attachment_filename)
        .unwrap_or_else(|| fallback_name.to_string());
    let bytes = response.bytes()?;

    fs::create_dir_all(dir)?;
    let path = dir.join(filename);
    fs::write(&path, &bytes)?;
    Ok(path)
}

impl DashboardSession for HttpDashboard {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn login(&self) -> Result<String> {
        let credentials = &self.credentials;
        let body = self.send(
            "login",
            self.http.post(self.url("/api/v1/login")?).json(&json!({
                "email": credentials.email,
                "password": credentials.password,
            })),
        )?;
        let token: String = field("login", body.clone(), "access_token")?;
        let user: User = field("login", body, "user")?;
        tracing::debug!("logged in to dashboard as {}", user.email);
        *self.token.borrow_mut() = Some(token.clone());
        *self.user.borrow_mut() = Some(user);
        Ok(token)
    }

    fn current_user(&self) -> Option<User> {
        self.user.borrow().clone()
    }

    fn create_user(&self, record: &UserRecord) -> Result<User> {
        let body = self.send(
            "create user",
            self.http.post(self.url("/api/v1/users")?).json(&json!({
                "email": record.email,
                "name": record.name,
                "password": record.password,
                "confirm_password": record.password,
                "organization": record.organization,
                "role": record.role,
            })),
        )?;
        field("create user", body, "user")
    }

    fn approve_user(&self, user: &User) -> Result<User> {
        let request = self
            .authorized(self.http.patch(self.url(&format!("/api/v1/users/{}", user.id))?))?
            .json(&json!({ "approval_state": APPROVED }));
        let body = self.send("approve user", request)?;
        field("approve user", body, "user")
    }

    fn create_client(&self, record: &ClientRecord) -> Result<Client> {
        let request = self
            .authorized(self.http.post(self.url("/api/v1/clients")?))?
            .json(&json!({
                "name": record.name,
                "organization": record.organization,
                "capacity": record.effective_capacity(),
            }));
        let body = self.send("create client", request)?;
        field("create client", body, "client")
    }

    fn approve_client(&self, client: &Client) -> Result<Client> {
        let request = self
            .authorized(self.http.patch(self.url(&format!("/api/v1/clients/{}", client.id))?))?
            .json(&json!({ "approval_state": APPROVED }));
        let body = self.send("approve client", request)?;
        field("approve client", body, "client")
    }

    fn get_users(&self) -> Result<Vec<User>> {
        let request = self.authorized(self.http.get(self.url("/api/v1/users")?))?;
        let body = self.send("list users", request)?;
        field("list users", body, "user_list")
    }

    fn get_clients(&self, org: Option<&str>) -> Result<Vec<Client>> {
        let request = self.authorized(self.http.get(self.url("/api/v1/clients")?))?;
        let body = self.send("list clients", request)?;
        let clients: Vec<Client> = field("list clients", body, "client_list")?;
        Ok(match org {
            Some(org) => clients
                .into_iter()
                .filter(|c| c.organization == org)
                .collect(),
            None => clients,
        })
    }

    fn download_flare_console(&self, pin: &str, dir: &Path) -> Result<PathBuf> {
        if self.current_user().is_none() {
            self.login()?;
        }
        let user_id = self
            .current_user()
            .map(|u| u.id)
            .ok_or_else(|| TestbedError::config("dashboard session has no logged-in user"))?;
        self.download_blob(
            &format!("/api/v1/users/{user_id}/blob"),
            dir,
            &format!("console-{user_id}.zip"),
            pin,
        )
    }

    fn download_client_startup_kit(
        &self,
        client_id: i64,
        pin: &str,
        dir: &Path,
    ) -> Result<PathBuf> {
        self.download_blob(
            &format!("/api/v1/clients/{client_id}/blob"),
            dir,
            &format!("client-{client_id}.zip"),
            pin,
        )
    }
}

/// Opens [`HttpDashboard`] sessions against one dashboard endpoint
#[derive(Debug, Clone)]
pub struct HttpSessionFactory {
    base_url: String,
}

impl HttpSessionFactory {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

impl SessionFactory for HttpSessionFactory {
    type Session = HttpDashboard;

    fn open(&self, credentials: &Credentials) -> Result<HttpDashboard> {
        let session = HttpDashboard::with_credentials(self.base_url.clone(), credentials.clone());
        session.login()?;
        Ok(session)
    }
}
