//! Power controller — issues the configure and reboot operations with retry.
//!
//! Each operation is a bounded retry loop: transient failures sleep for the
//! fixed backoff and try again until the budget runs out; anything else is
//! fatal and aborts the whole apply. Phases never overlap: a later phase is
//! only entered once the previous one succeeded.

use std::fmt;
use std::time::Duration;

use crate::capmc::classify::{classify, Disposition, Operation};
use crate::capmc::runner::CommandRunner;
use crate::logger::Logger;

/// MCDRAM memory-mode tokens accepted on the command line.
const MCDRAM_MODES: &[&str] = &["cache", "split", "equal", "flat"];

/// NUMA-mode tokens accepted on the command line.
const NUMA_MODES: &[&str] = &["a2a", "hemi", "quad", "snc2", "snc4"];

/// The hardware modes one run applies, parsed once from the feature list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PowerConfig {
    pub mcdram_mode: Option<String>,
    pub numa_mode: Option<String>,
}

impl PowerConfig {
    /// Parse a comma-separated feature list. Each recognized token fills
    /// exactly one slot (the last of its class wins); unrecognized tokens
    /// are silently ignored. Matching is case-insensitive.
    pub fn parse(features: &str) -> PowerConfig {
        let mut config = PowerConfig::default();
        for tok in features.split(',') {
            let tok = tok.trim().to_ascii_lowercase();
            if NUMA_MODES.contains(&tok.as_str()) {
                config.numa_mode = Some(tok);
            } else if MCDRAM_MODES.contains(&tok.as_str()) {
                config.mcdram_mode = Some(tok);
            }
        }
        config
    }

    pub fn is_empty(&self) -> bool {
        self.mcdram_mode.is_none() && self.numa_mode.is_none()
    }
}

/// Retry budget for transient control-plane failures. The backoff is fixed:
/// the state manager either comes back within a few seconds or not at all.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: crate::config::DEFAULT_CAPMC_RETRIES,
            backoff_secs: 1,
        }
    }
}

/// A non-recoverable control-plane failure: the operation that failed, the
/// exit status, and the captured diagnostic text.
#[derive(Debug, Clone)]
pub struct FatalError {
    pub op: Operation,
    pub status: i32,
    pub output: String,
}

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "capmc {} failed: status {}: {}",
            self.op,
            self.status,
            self.output.trim()
        )
    }
}

impl std::error::Error for FatalError {}

/// Drives mode-set and reinit operations for one node set.
pub struct PowerController<'a> {
    runner: &'a dyn CommandRunner,
    policy: RetryPolicy,
    log: &'a Logger,
}

impl<'a> PowerController<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        policy: RetryPolicy,
        log: &'a Logger,
    ) -> PowerController<'a> {
        PowerController {
            runner,
            policy,
            log,
        }
    }

    /// Apply any requested mode changes, then reboot. The full sequence of
    /// the original transition: configure phases first, reinit always last.
    pub fn apply(&self, nid_list: &str, modes: &PowerConfig) -> Result<(), FatalError> {
        self.set_modes(nid_list, modes)?;
        self.reinit(nid_list)
    }

    /// Issue the MCDRAM and NUMA mode-set operations that were requested.
    /// Skipped slots cost nothing.
    pub fn set_modes(&self, nid_list: &str, modes: &PowerConfig) -> Result<(), FatalError> {
        if let Some(mode) = &modes.mcdram_mode {
            self.run_op(
                Operation::SetMcdramCfg,
                &["set_mcdram_cfg", "-m", mode, "-n", nid_list],
            )?;
        }
        if let Some(mode) = &modes.numa_mode {
            self.run_op(
                Operation::SetNumaCfg,
                &["set_numa_cfg", "-m", mode, "-n", nid_list],
            )?;
        }
        Ok(())
    }

    /// Trigger the reboot/re-init of the node set.
    pub fn reinit(&self, nid_list: &str) -> Result<(), FatalError> {
        self.run_op(Operation::NodeReinit, &["node_reinit", "-n", nid_list])
    }

    /// One operation, at most `max_retries + 1` attempts.
    fn run_op(&self, op: Operation, argv: &[&str]) -> Result<(), FatalError> {
        let args: Vec<String> = argv.iter().map(|s| s.to_string()).collect();
        let mut attempt: u32 = 0;
        loop {
            let result = self.runner.run(&args);
            match classify(op, &result) {
                Disposition::Success => {
                    self.log.debug(&format!("{} sent to {}", op, args[args.len() - 1]));
                    return Ok(());
                }
                Disposition::Transient if attempt < self.policy.max_retries => {
                    self.log.error(&format!(
                        "capmc({}): {} {} (retrying)",
                        args.join(","),
                        result.status,
                        result.output.trim()
                    ));
                    attempt += 1;
                    std::thread::sleep(Duration::from_secs(self.policy.backoff_secs));
                }
                _ => {
                    self.log.error(&format!(
                        "capmc({}): {} {}",
                        args.join(","),
                        result.status,
                        result.output.trim()
                    ));
                    return Err(FatalError {
                        op,
                        status: result.status,
                        output: result.output,
                    });
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capmc::runner::{MockRunner, ScriptResult};

    fn no_backoff(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            backoff_secs: 0,
        }
    }

    // ---- PowerConfig parsing ----

    #[test]
    fn parse_maps_tokens_to_slots() {
        let c = PowerConfig::parse("cache,quad");
        assert_eq!(c.mcdram_mode.as_deref(), Some("cache"));
        assert_eq!(c.numa_mode.as_deref(), Some("quad"));
    }

    #[test]
    fn parse_is_case_insensitive() {
        let c = PowerConfig::parse("FLAT,A2A");
        assert_eq!(c.mcdram_mode.as_deref(), Some("flat"));
        assert_eq!(c.numa_mode.as_deref(), Some("a2a"));
    }

    #[test]
    fn parse_ignores_unrecognized_tokens() {
        let c = PowerConfig::parse("cache,knl,19200MB");
        assert_eq!(c.mcdram_mode.as_deref(), Some("cache"));
        assert!(c.numa_mode.is_none());
    }

    #[test]
    fn parse_last_token_of_a_class_wins() {
        let c = PowerConfig::parse("cache,flat");
        assert_eq!(c.mcdram_mode.as_deref(), Some("flat"));
    }

    #[test]
    fn parse_empty_list_is_empty_config() {
        assert!(PowerConfig::parse("").is_empty());
    }

    // ---- apply sequencing ----

    #[test]
    fn apply_issues_mode_sets_then_reinit() {
        let runner = MockRunner::new();
        let log = Logger::stderr_only("test");
        let controller = PowerController::new(&runner, no_backoff(3), &log);

        let modes = PowerConfig::parse("cache,a2a");
        controller.apply("2-5,7", &modes).unwrap();

        let calls = runner.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0], vec!["set_mcdram_cfg", "-m", "cache", "-n", "2-5,7"]);
        assert_eq!(calls[1], vec!["set_numa_cfg", "-m", "a2a", "-n", "2-5,7"]);
        assert_eq!(calls[2], vec!["node_reinit", "-n", "2-5,7"]);
    }

    #[test]
    fn apply_without_modes_only_reboots() {
        let runner = MockRunner::new();
        let log = Logger::stderr_only("test");
        let controller = PowerController::new(&runner, no_backoff(3), &log);

        controller.apply("43", &PowerConfig::default()).unwrap();

        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], vec!["node_reinit", "-n", "43"]);
    }

    #[test]
    fn mode_failure_skips_later_phases() {
        let runner =
            MockRunner::with_responses(vec![ScriptResult::failed(1, "invalid mode")]);
        let log = Logger::stderr_only("test");
        let controller = PowerController::new(&runner, no_backoff(3), &log);

        let modes = PowerConfig::parse("cache,a2a");
        let err = controller.apply("43", &modes).unwrap_err();
        assert_eq!(err.op, Operation::SetMcdramCfg);
        assert_eq!(runner.call_count(), 1);
    }

    // ---- retry behavior ----

    #[test]
    fn persistent_transient_makes_exactly_budget_plus_one_attempts() {
        let mut runner = MockRunner::new();
        runner.set_default_response(ScriptResult::failed(1, "Could not lookup"));
        let log = Logger::stderr_only("test");
        let controller = PowerController::new(&runner, no_backoff(4), &log);

        let err = controller.reinit("1-3").unwrap_err();
        assert_eq!(err.op, Operation::NodeReinit);
        assert_eq!(runner.call_count(), 5);
    }

    #[test]
    fn transient_then_success_recovers() {
        let runner = MockRunner::with_responses(vec![
            ScriptResult::failed(1, "Could not lookup state manager"),
            ScriptResult::ok("ok"),
        ]);
        let log = Logger::stderr_only("test");
        let controller = PowerController::new(&runner, no_backoff(4), &log);

        controller.reinit("1-3").unwrap();
        assert_eq!(runner.call_count(), 2);
    }

    #[test]
    fn fatal_failure_does_not_retry() {
        let mut runner = MockRunner::new();
        runner.set_default_response(ScriptResult::failed(1, "permission denied"));
        let log = Logger::stderr_only("test");
        let controller = PowerController::new(&runner, no_backoff(4), &log);

        let err = controller.reinit("9").unwrap_err();
        assert_eq!(err.status, 1);
        assert_eq!(runner.call_count(), 1);
    }

    #[test]
    fn nonzero_with_success_text_completes_phase() {
        let runner = MockRunner::with_responses(vec![ScriptResult::failed(
            7,
            "reinit scheduled: Success",
        )]);
        let log = Logger::stderr_only("test");
        let controller = PowerController::new(&runner, no_backoff(0), &log);

        controller.reinit("9").unwrap();
        assert_eq!(runner.call_count(), 1);
    }

    #[test]
    fn fatal_error_display_includes_context() {
        let err = FatalError {
            op: Operation::SetNumaCfg,
            status: 22,
            output: "no such nid\n".into(),
        };
        let text = err.to_string();
        assert!(text.contains("set_numa_cfg"));
        assert!(text.contains("22"));
        assert!(text.contains("no such nid"));
    }
}
