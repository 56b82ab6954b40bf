//! Orchestrator — sequences one node power transition start to finish.
//!
//! One invocation drives one batch of nodes through configure, reboot and
//! convergence. A fatal control-plane failure diverts to the compensation
//! path: requeue the originating job (if one is known) and revert the node
//! power flags so the manager can re-drive the boot.

use std::fmt;

use crate::capmc::{ConvergencePoller, PowerConfig, PowerController, RetryPolicy};
use crate::capmc::runner::CommandRunner;
use crate::config::KnlConfig;
use crate::logger::Logger;
use crate::nidset::NidSet;
use crate::slurm::{NodePowerState, RequeueReason, WorkloadManager};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Init,
    Configuring,
    Rebooting,
    Polling,
    Compensating,
    Done,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Init => "init",
            Phase::Configuring => "configuring",
            Phase::Rebooting => "rebooting",
            Phase::Polling => "polling",
            Phase::Compensating => "compensating",
            Phase::Done => "done",
            Phase::Failed => "failed",
        };
        f.write_str(name)
    }
}

pub struct Orchestrator<'a> {
    config: &'a KnlConfig,
    runner: &'a dyn CommandRunner,
    slurm: &'a dyn WorkloadManager,
    log: &'a Logger,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        config: &'a KnlConfig,
        runner: &'a dyn CommandRunner,
        slurm: &'a dyn WorkloadManager,
        log: &'a Logger,
    ) -> Orchestrator<'a> {
        Orchestrator {
            config,
            runner,
            slurm,
            log,
        }
    }

    /// Run the full transition for `host_expr`. `features` is the optional
    /// feature list selecting MCDRAM/NUMA modes; `job_id` is the job to
    /// requeue if the transition has to be rolled back.
    pub fn run(
        &self,
        host_expr: &str,
        features: Option<&str>,
        job_id: Option<u32>,
    ) -> Result<(), String> {
        self.enter(Phase::Init);
        let mut pending = NidSet::decode(host_expr);
        if pending.is_empty() {
            return Err(format!("no node ids found in '{}'", host_expr));
        }
        let nid_list = pending.encode();
        let modes = features.map(PowerConfig::parse).unwrap_or_default();

        let policy = RetryPolicy {
            max_retries: self.config.capmc_retries,
            ..RetryPolicy::default()
        };
        let controller = PowerController::new(self.runner, policy, self.log);

        self.enter(Phase::Configuring);
        let configured = controller
            .set_modes(&nid_list, &modes)
            .and_then(|_| {
                self.enter(Phase::Rebooting);
                controller.reinit(&nid_list)
            });

        if let Err(err) = configured {
            self.compensate(host_expr, job_id);
            self.enter(Phase::Failed);
            return Err(err.to_string());
        }

        self.enter(Phase::Polling);
        let poller =
            ConvergencePoller::new(self.runner, self.log, self.config.capmc_poll_freq_secs);
        poller.wait_all_on(&mut pending);

        if let Some(features) = features {
            if let Err(e) = self.slurm.update_node_features(host_expr, features) {
                self.log.error(&format!(
                    "cannot set features '{}' on {}: {}",
                    features, host_expr, e
                ));
            }
        }

        self.enter(Phase::Done);
        Ok(())
    }

    /// Best-effort rollback after a fatal control-plane failure. Failures
    /// here are logged and swallowed; the run is already lost.
    fn compensate(&self, host_expr: &str, job_id: Option<u32>) {
        self.enter(Phase::Compensating);
        if let Some(job_id) = job_id {
            if let Err(e) = self.slurm.requeue_job(job_id, RequeueReason::ReconfigFail) {
                self.log
                    .error(&format!("cannot requeue job {}: {}", job_id, e));
            }
        }
        if let Err(e) = self
            .slurm
            .update_node_power(host_expr, NodePowerState::PowerDownUp)
        {
            self.log
                .error(&format!("cannot revert node state on {}: {}", host_expr, e));
        }
    }

    fn enter(&self, phase: Phase) {
        self.log.debug(&format!("phase: {}", phase));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
