//! nvfl-testbed - Main entry point
//!
//! `job --start` deploys the dashboard+server stack; `scenario` provisions a
//! scenario document against a running job.
//!
//! # Environment variables
//!
//! | Variable        | Default  | Description                                  |
//! |-----------------|----------|----------------------------------------------|
//! | `NVFL_JOBS_DIR` | `./jobs` | Root of the per-job artifact directories     |
//! | `NVFL_JOBID`    | --       | Job ID for `scenario`; wins over `--jobid`   |
//! | `RUST_LOG`      | --       | Log filter; wins over `--log-level`          |

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use nvfl_testbed::cli::{Cli, Commands};
use nvfl_testbed::config::RuntimeEnv;
use nvfl_testbed::config_file::{JobConfig, PapiConfig, ScenarioConfig};
use nvfl_testbed::launcher::ProcessLauncher;
use nvfl_testbed::orchestrator::{Orchestrator, PhaseSet, open_project_admin};
use nvfl_testbed::poller::Poller;
use nvfl_testbed::remote::{
    Credentials, DeploymentApi, Endpoints, HttpSessionFactory, PapiClient,
};

/// Initialize the tracing subscriber once for the whole process
fn init_logger(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level.to_lowercase()))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse_args();
    init_logger(&cli.log_level);

    let papi_cfg = PapiConfig::load_from_file(&cli.cfg_papi)?;
    let job_cfg = JobConfig::load_from_file(&cli.cfg_job)?;
    let papi = PapiClient::new(&papi_cfg);

    let env = RuntimeEnv::from_env();
    fs::create_dir_all(&env.jobs_dir)
        .with_context(|| format!("Failed to create jobs directory {:?}", env.jobs_dir))?;

    match &cli.command {
        Commands::Job { start } => {
            if *start {
                run_job_start(&papi, &job_cfg, &env)?;
            } else {
                warn!("job: nothing to do without --start");
            }
        }
        Commands::Scenario {
            jobid,
            cfg,
            no_extract,
            wait_attempts,
            ..
        } => {
            debug!("--jobid: {:?}", jobid);
            let Some(job_id) = env.resolve_job_id(jobid.as_deref()) else {
                eprintln!("--jobid argument or NVFL_JOBID env var is required");
                std::process::exit(1);
            };
            debug!("job ID: {}", job_id);

            let options = ScenarioOptions {
                scenario_path: cfg,
                extract: !*no_extract,
                wait_attempts: *wait_attempts,
                phases: cli.command.phases(),
            };
            run_scenario(&papi, &job_cfg, &env, &job_id, options)?;
        }
    }

    Ok(())
}

/// Deploy the dashboard+server job and prepare its directory
fn run_job_start(papi: &PapiClient, job_cfg: &JobConfig, env: &RuntimeEnv) -> Result<()> {
    let job_id = papi.deploy(job_cfg).context("Failed to deploy job")?;
    debug!("job ID: {}", job_id);
    println!("{job_id}");

    let workspace = env.workspace(&job_id);
    workspace
        .create()
        .with_context(|| format!("Failed to create job directory {:?}", workspace.root()))?;

    let endpoints = papi.get_job_endpoints(&job_id)?;
    info!("NVFLARE Dashboard: {}", endpoints.dashboard()?);
    Ok(())
}

struct ScenarioOptions<'a> {
    scenario_path: &'a Path,
    extract: bool,
    wait_attempts: Option<u32>,
    phases: PhaseSet,
}

/// Wait for the dashboard, log in as project admin and run the requested phases
fn run_scenario(
    papi: &PapiClient,
    job_cfg: &JobConfig,
    env: &RuntimeEnv,
    job_id: &str,
    options: ScenarioOptions<'_>,
) -> Result<()> {
    let endpoints = papi.get_job_endpoints(job_id)?;
    let dashboard = endpoints.dashboard()?.to_string();
    info!("NVFLARE Dashboard: {}", dashboard);
    match endpoints.get(Endpoints::SERVER_JUPYTER) {
        Ok(jupyter) => info!("NVFLARE FL Server JupyterLab: {}", jupyter),
        Err(_) => warn!("job {} reports no server JupyterLab endpoint", job_id),
    }

    Poller::http()
        .wait_for_url(&dashboard, 200, options.wait_attempts)
        .context("Dashboard did not become ready")?;

    let (username, password) = job_cfg.dashboard_credentials()?;
    let factory = HttpSessionFactory::new(dashboard);
    let project_admin = open_project_admin(&factory, &Credentials::new(username, password))
        .context("Failed to log in as project admin")?;

    let scenario = ScenarioConfig::load_from_file(options.scenario_path)?;
    let workspace = env.workspace(job_id).absolute()?;
    workspace.create()?;

    let mut orchestrator =
        Orchestrator::new(factory, project_admin, ProcessLauncher, scenario, workspace)
            .with_extract(options.extract);
    orchestrator
        .run(options.phases)
        .with_context(|| format!("Scenario failed for job {job_id}"))?;
    Ok(())
}
