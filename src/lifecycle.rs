//! Per-organization views derived from the scenario document.
//!
//! These helpers turn an organization's templates into concrete records and
//! answer the lookups the orchestrator needs between phases: which user is
//! the organization admin, and which password belongs to a registered user.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::config_file::OrgConfig;
use crate::error::{Result, TestbedError};
use crate::expand::{Variables, expand_and_override};
use crate::remote::{Approvable, ClientRecord, ROLE_ORG_ADMIN, User, UserRecord};

/// Override scope applied to every user record
pub const USER_SCOPE: &str = "user";
/// Override scope applied to every client record
pub const CLIENT_SCOPE: &str = "client";

fn scope<'a>(org: &str, org_cfg: &'a OrgConfig, name: &str) -> Result<&'a Value> {
    org_cfg.overrides.get(name).ok_or_else(|| {
        TestbedError::config(format!(
            "organization {org} has no override.{name} scope"
        ))
    })
}

fn records<T: DeserializeOwned>(org: &str, what: &str, expanded: Value) -> Result<Vec<T>> {
    match expanded {
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(i, item)| {
                serde_json::from_value(item).map_err(|e| {
                    TestbedError::config(format!("{what} #{i} of organization {org}: {e}"))
                })
            })
            .collect(),
        _ => Err(TestbedError::config(format!(
            "{what}s of organization {org} must be a sequence"
        ))),
    }
}

fn template(value: &Value) -> Value {
    match value {
        Value::Null => Value::Array(Vec::new()),
        other => other.clone(),
    }
}

/// Concrete user records of one organization (templates + `override.user`)
pub fn org_users_cfg(org: &str, org_cfg: &OrgConfig) -> Result<Vec<UserRecord>> {
    let overrides = scope(org, org_cfg, USER_SCOPE)?;
    let expanded = expand_and_override(
        &template(&org_cfg.users),
        overrides,
        &Variables::organization(org),
    )?;
    records(org, "user", expanded)
}

/// Concrete client records of one organization (templates + `override.client`)
pub fn org_clients_cfg(org: &str, org_cfg: &OrgConfig) -> Result<Vec<ClientRecord>> {
    let overrides = scope(org, org_cfg, CLIENT_SCOPE)?;
    let expanded = expand_and_override(
        &template(&org_cfg.clients),
        overrides,
        &Variables::organization(org),
    )?;
    records(org, "client", expanded)
}

/// The single `org_admin` of a user list.
///
/// # Errors
///
/// `Config` when no user, or more than one user, carries the `org_admin` role.
pub fn org_admin(users: &[UserRecord]) -> Result<&UserRecord> {
    let mut admins = users.iter().filter(|u| u.role == ROLE_ORG_ADMIN);
    match (admins.next(), admins.next()) {
        (Some(admin), None) => Ok(admin),
        (None, _) => {
            tracing::error!("missing a user with {} role", ROLE_ORG_ADMIN);
            Err(TestbedError::config(format!(
                "missing a user with {ROLE_ORG_ADMIN} role"
            )))
        }
        (Some(first), Some(second)) => {
            tracing::error!(
                "ambiguous {} role: {} and {}",
                ROLE_ORG_ADMIN,
                first.email,
                second.email
            );
            Err(TestbedError::config(format!(
                "more than one user with {ROLE_ORG_ADMIN} role ({}, {})",
                first.email, second.email
            )))
        }
    }
}

/// Password configured for a registered user, matched by email
pub fn user_password<'a>(users_cfg: &'a [UserRecord], user: &User) -> Option<&'a str> {
    users_cfg
        .iter()
        .find(|cfg| cfg.email == user.email)
        .map(|cfg| cfg.password.as_str())
}

/// Approve `items` in order, pushing each verified entity into `approved`.
///
/// Stops at the first entity whose server-reported state is not approved;
/// entities approved before it stay in `approved`.
pub fn approve_batch<T, F>(items: &[T], approved: &mut Vec<T>, mut approve: F) -> Result<()>
where
    T: Approvable,
    F: FnMut(&T) -> Result<T>,
{
    for item in items {
        let updated = approve(item)?;
        if !updated.is_approved() {
            tracing::error!("could not approve {} {} in dashboard", T::KIND, updated.label());
            return Err(TestbedError::ApprovalMismatch {
                kind: T::KIND,
                name: updated.label().to_string(),
                state: updated.approval_state(),
            });
        }
        tracing::info!("{} {} approved in dashboard", T::KIND, updated.label());
        approved.push(updated);
    }
    Ok(())
}
