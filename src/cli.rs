use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::orchestrator::PhaseSet;

/// nvfl-testbed - Provision NVFLARE federated-learning testbeds
#[derive(Parser, Debug)]
#[command(name = "nvfl-testbed")]
#[command(about = "Deploy an NVFLARE dashboard job and provision a scenario against it")]
#[command(version)]
pub struct Cli {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR). RUST_LOG wins when set.
    #[arg(long, global = true, default_value = "INFO")]
    pub log_level: String,

    /// Deployment platform configuration file
    #[arg(long, global = true, default_value = "papi.json")]
    pub cfg_papi: PathBuf,

    /// Job deployment configuration file
    #[arg(long, global = true, default_value = "job.json")]
    pub cfg_job: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage the dashboard+server job on the deployment platform
    Job {
        /// Deploy a new job and print its ID
        #[arg(long)]
        start: bool,
    },
    /// Provision a scenario against a running job
    Scenario {
        /// Job ID (NVFL_JOBID takes precedence)
        #[arg(long)]
        jobid: Option<String>,

        /// Scenario configuration file
        #[arg(long, default_value = "scenario.json")]
        cfg: PathBuf,

        /// Register and approve users and clients
        #[arg(long)]
        init: bool,

        /// Download (and extract) console and client startup kits
        #[arg(long)]
        download: bool,

        /// Launch every client from its startup kit
        #[arg(long)]
        start: bool,

        /// Keep downloaded kits zipped
        #[arg(long)]
        no_extract: bool,

        /// Give up waiting for the dashboard after this many retries
        #[arg(long)]
        wait_attempts: Option<u32>,
    },
}

impl Commands {
    /// Phases requested by the `scenario` subcommand
    pub fn phases(&self) -> PhaseSet {
        match self {
            Self::Scenario {
                init,
                download,
                start,
                ..
            } => PhaseSet::new(*init, *download, *start),
            Self::Job { .. } => PhaseSet::default(),
        }
    }
}

impl Cli {
    pub fn parse_args() -> Self {
        <Self as clap::Parser>::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::Phase;
    use clap::Parser;

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["nvfl-testbed"]).is_err());
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["nvfl-testbed", "job", "--start"]).unwrap();
        assert_eq!(cli.log_level, "INFO");
        assert_eq!(cli.cfg_papi, PathBuf::from("papi.json"));
        assert_eq!(cli.cfg_job, PathBuf::from("job.json"));
        assert!(matches!(cli.command, Commands::Job { start: true }));
    }

    #[test]
    fn test_cli_scenario_flags() {
        let cli = Cli::try_parse_from([
            "nvfl-testbed",
            "--log-level",
            "DEBUG",
            "scenario",
            "--jobid",
            "abc-123",
            "--init",
            "--start",
        ])
        .unwrap();
        assert_eq!(cli.log_level, "DEBUG");
        match &cli.command {
            Commands::Scenario {
                jobid, cfg, no_extract, ..
            } => {
                assert_eq!(jobid.as_deref(), Some("abc-123"));
                assert_eq!(cfg, &PathBuf::from("scenario.json"));
                assert!(!no_extract);
            }
            _ => panic!("Expected Scenario command"),
        }
        let phases: Vec<Phase> = cli.command.phases().iter().collect();
        assert_eq!(phases, vec![Phase::Init, Phase::Start]);
    }

    #[test]
    fn test_cli_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "nvfl-testbed",
            "scenario",
            "--cfg-job",
            "/etc/job.json",
            "--download",
            "--wait-attempts",
            "30",
        ])
        .unwrap();
        assert_eq!(cli.cfg_job, PathBuf::from("/etc/job.json"));
        assert!(matches!(
            cli.command,
            Commands::Scenario {
                download: true,
                wait_attempts: Some(30),
                ..
            }
        ));
    }

    #[test]
    fn test_cli_job_has_no_phases() {
        let cli = Cli::try_parse_from(["nvfl-testbed", "job"]).unwrap();
        assert!(cli.command.phases().is_empty());
    }
}
