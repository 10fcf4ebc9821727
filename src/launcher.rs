//! Detached local tasks: bundle extraction and client startup.
//!
//! A [`Launcher`] only guarantees that the process was started. It hands
//! back a [`TaskHandle`] that the caller may wait on or drop. Extraction and
//! client start are described by typed argument structs implementing
//! [`TaskArgs`], so the command line is built in one place.
//!
//! # Contract
//!
//! - `launch()` returns once the child exists (or failed to spawn).
//! - Dropping the handle detaches the child: it keeps running after the
//!   provisioner exits.
//! - `wait()` blocks until the child is gone. A non-zero exit is logged,
//!   not raised.

use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use crate::error::{Result, TestbedError};

/// Typed description of a detached task.
///
/// - `program()`: executable name or path
/// - `to_cli_args()`: arguments exactly as the program expects them
/// - `get_env_vars()`: extra environment for the child
/// - `working_dir()`: directory the child starts in, if any
pub trait TaskArgs {
    fn program(&self) -> String;

    fn to_cli_args(&self) -> Vec<String>;

    fn get_env_vars(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    fn working_dir(&self) -> Option<PathBuf> {
        None
    }

    /// One-line rendering for logs
    fn describe(&self) -> String {
        let mut line = self.program();
        for arg in self.to_cli_args() {
            line.push(' ');
            line.push_str(&arg);
        }
        line
    }
}

/// Running (or already finished) detached task
pub trait TaskHandle {
    /// Block until the task has exited
    fn wait(self: Box<Self>) -> Result<()>;
}

/// Handle of a task that has nothing left to wait for
#[derive(Debug, Clone, Copy, Default)]
pub struct Finished;

impl TaskHandle for Finished {
    fn wait(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

/// Handle of a spawned child process
#[derive(Debug)]
pub struct ChildHandle {
    program: String,
    child: Child,
}

impl TaskHandle for ChildHandle {
    fn wait(mut self: Box<Self>) -> Result<()> {
        let status = self.child.wait()?;
        if !status.success() {
            tracing::warn!("{} exited with {}", self.program, status);
        }
        Ok(())
    }
}

/// Starts tasks without waiting for them
pub trait Launcher {
    fn launch(&self, task: &dyn TaskArgs) -> Result<Box<dyn TaskHandle>>;
}

/// `unzip -x -o -P <pin> <archive> -d <dir>`
///
/// `unzip` is used instead of an in-process extractor because it keeps the
/// file permissions of the startup scripts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnzipArgs {
    pub archive: PathBuf,
    pub dest: PathBuf,
    pub pin: String,
}

impl TaskArgs for UnzipArgs {
    fn program(&self) -> String {
        "unzip".to_string()
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "-x".to_string(),
            "-o".to_string(),
            "-P".to_string(),
            self.pin.clone(),
            self.archive.display().to_string(),
            "-d".to_string(),
            self.dest.display().to_string(),
        ]
    }
}

/// `<startup dir>/docker.sh -d`, run from the startup directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartClientArgs {
    pub startup_dir: PathBuf,
    pub data_dir: PathBuf,
}

impl TaskArgs for StartClientArgs {
    fn program(&self) -> String {
        self.startup_dir.join("docker.sh").display().to_string()
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["-d".to_string()]
    }

    fn get_env_vars(&self) -> Vec<(String, String)> {
        vec![(
            "MY_DATA_DIR".to_string(),
            self.data_dir.display().to_string(),
        )]
    }

    fn working_dir(&self) -> Option<PathBuf> {
        Some(self.startup_dir.clone())
    }
}

/// Spawns tasks as real child processes
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessLauncher;

impl Launcher for ProcessLauncher {
    fn launch(&self, task: &dyn TaskArgs) -> Result<Box<dyn TaskHandle>> {
        let program = task.program();
        let mut cmd = Command::new(&program);
        cmd.args(task.to_cli_args())
            .stdin(Stdio::null())
            .envs(task.get_env_vars());
        if let Some(dir) = task.working_dir() {
            cmd.current_dir(dir);
        }

        tracing::info!("launching detached: {}", task.describe());
        let child = cmd.spawn().map_err(|e| TestbedError::Launch {
            program: program.clone(),
            reason: e.to_string(),
        })?;
        tracing::debug!("{} started with PID {}", program, child.id());
        Ok(Box::new(ChildHandle { program, child }))
    }
}

/// Prefix the container name in a client's `docker run ... --name=<client>` line.
///
/// Returns the script unchanged when `prefix` is blank. Names that already
/// carry the prefix no longer match, so rewriting twice is harmless.
pub fn namespace_container_name(script: &str, client: &str, prefix: &str) -> String {
    let prefix = prefix.trim();
    if prefix.is_empty() {
        return script.to_string();
    }
    let pattern = format!(
        r"(docker\s+run\s+[^\n]+?--name)=({})",
        regex::escape(client)
    );
    match Regex::new(&pattern) {
        Ok(re) => re
            .replace_all(script, format!("${{1}}={prefix}_${{2}}").as_str())
            .into_owned(),
        Err(e) => {
            tracing::warn!("cannot build container name pattern for {}: {}", client, e);
            script.to_string()
        }
    }
}

/// Rewrite `<client dir>/startup/docker.sh` in place with [`namespace_container_name`]
pub fn namespace_launch_script(script_path: &Path, client: &str, prefix: &str) -> Result<()> {
    let script = fs::read_to_string(script_path)?;
    let rewritten = namespace_container_name(&script, client, prefix);
    if rewritten != script {
        fs::write(script_path, rewritten)?;
        tracing::debug!("container name of {} prefixed with {}", client, prefix.trim());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCRIPT: &str = "#!/bin/bash\n\
        docker run --rm -d --name=site-1 -v $MY_DATA_DIR:/data $DOCKER_IMAGE\n\
        echo site-1 started\n";

    #[test]
    fn test_unzip_args() {
        let args = UnzipArgs {
            archive: PathBuf::from("/j/downloads/site-1.zip"),
            dest: PathBuf::from("/j/orgA"),
            pin: "1234".to_string(),
        };
        assert_eq!(
            args.describe(),
            "unzip -x -o -P 1234 /j/downloads/site-1.zip -d /j/orgA"
        );
        assert!(args.working_dir().is_none());
    }

    #[test]
    fn test_start_client_args() {
        let args = StartClientArgs {
            startup_dir: PathBuf::from("/j/orgA/site-1/startup"),
            data_dir: PathBuf::from("/j/data/orgA/site-1"),
        };
        assert_eq!(args.describe(), "/j/orgA/site-1/startup/docker.sh -d");
        assert_eq!(
            args.get_env_vars(),
            vec![("MY_DATA_DIR".to_string(), "/j/data/orgA/site-1".to_string())]
        );
        assert_eq!(args.working_dir(), Some(PathBuf::from("/j/orgA/site-1/startup")));
    }

    #[test]
    fn test_namespace_container_name() {
        let out = namespace_container_name(SCRIPT, "site-1", "job42");
        assert!(out.contains("--name=job42_site-1 -v"));
        // only the docker run line changes
        assert!(out.contains("echo site-1 started"));
    }

    #[test]
    fn test_namespace_is_idempotent() {
        let once = namespace_container_name(SCRIPT, "site-1", "job42");
        let twice = namespace_container_name(&once, "site-1", "job42");
        assert_eq!(once, twice);
    }

    #[test]
    fn test_namespace_blank_prefix() {
        assert_eq!(namespace_container_name(SCRIPT, "site-1", "  "), SCRIPT);
    }

    #[test]
    fn test_namespace_escapes_client_name() {
        let script = "docker run -d --name=a.b img\ndocker run -d --name=axb img\n";
        let out = namespace_container_name(script, "a.b", "p");
        assert_eq!(out, "docker run -d --name=p_a.b img\ndocker run -d --name=axb img\n");
    }

    #[test]
    fn test_namespace_launch_script_rewrites_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docker.sh");
        fs::write(&path, SCRIPT).unwrap();
        namespace_launch_script(&path, "site-1", "job42").unwrap();
        assert!(fs::read_to_string(&path).unwrap().contains("--name=job42_site-1"));
    }

    #[test]
    fn test_process_launcher_wait_for_exit() {
        struct Touch(PathBuf);
        impl TaskArgs for Touch {
            fn program(&self) -> String {
                "touch".to_string()
            }
            fn to_cli_args(&self) -> Vec<String> {
                vec![self.0.display().to_string()]
            }
        }
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("done");
        let handle = ProcessLauncher.launch(&Touch(marker.clone())).unwrap();
        handle.wait().unwrap();
        assert!(marker.is_file());
    }

    #[test]
    fn test_process_launcher_missing_program() {
        struct Missing;
        impl TaskArgs for Missing {
            fn program(&self) -> String {
                "/nonexistent/definitely-not-here".to_string()
            }
            fn to_cli_args(&self) -> Vec<String> {
                Vec::new()
            }
        }
        let err = ProcessLauncher
            .launch(&Missing)
            .err()
            .expect("spawn fails");
        assert!(matches!(err, TestbedError::Launch { .. }));
    }
}
