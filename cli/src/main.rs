//! capmc_resume — power-cycle a set of KNL nodes into a requested
//! configuration.
//!
//! # Usage
//!
//! ```text
//! capmc_resume nid[00010-00013]
//! capmc_resume nid[00010-00013] cache,quad
//! ```
//!
//! Invoked by the workload manager's node resume hook: the first argument is
//! the hostname range to bring up, the optional second is the feature list
//! selecting MCDRAM and NUMA modes.

use std::path::{Path, PathBuf};
use std::process;

use capmc_core::capmc::CapmcRunner;
use capmc_core::cli::parse_args;
use capmc_core::config;
use capmc_core::logger::Logger;
use capmc_core::orchestrator::Orchestrator;
use capmc_core::slurm::ScontrolClient;

const DEFAULT_CONF_PATH: &str = "/etc/slurm/knl.conf";

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let prog = args
        .first()
        .map(|s| s.as_str())
        .unwrap_or("capmc_resume")
        .to_string();

    // Usage errors exit before any side effect.
    let invocation = match parse_args(&args[1..]) {
        Ok(inv) => inv,
        Err(usage) => {
            eprintln!("{}", usage);
            process::exit(2);
        }
    };

    let tag = format!("{}[{}]", prog, process::id());
    let conf_path = resolve_conf_path();
    let config = match config::load(&conf_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}: {}: {}", tag, conf_path.display(), e);
            process::exit(1);
        }
    };

    let debug_enabled = std::env::var_os("CAPMC_RESUME_DEBUG").is_some();
    let log = Logger::new(&tag, config.log_file.as_deref().map(Path::new), debug_enabled);

    let runner = CapmcRunner::new(&config.capmc_path, config.capmc_timeout_ms, &log);
    let slurm = ScontrolClient::new();
    let job_id = resolve_job_id();

    let orchestrator = Orchestrator::new(&config, &runner, &slurm, &log);
    match orchestrator.run(
        &invocation.host_expr,
        invocation.features.as_deref(),
        job_id,
    ) {
        Ok(()) => {}
        Err(e) => {
            log.error(&e);
            process::exit(1);
        }
    }
}

fn resolve_conf_path() -> PathBuf {
    match std::env::var_os("KNL_CONF") {
        Some(path) => PathBuf::from(path),
        None => Path::new(DEFAULT_CONF_PATH).to_path_buf(),
    }
}

/// The job that triggered this resume, if the manager exported one.
fn resolve_job_id() -> Option<u32> {
    std::env::var("SLURM_JOB_ID").ok()?.trim().parse().ok()
}
