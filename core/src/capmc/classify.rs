//! Classification of capmc results into success, transient, and fatal.
//!
//! The control plane is known to return nonzero exit codes with a textual
//! "Success" indicator, and to emit a small, stable vocabulary of transient
//! diagnostics while its backing state manager restarts. What counts as
//! retryable is therefore an explicit allow-list of (operation, pattern)
//! pairs, never an inline string check.

use crate::capmc::runner::ScriptResult;

/// The four capmc operations this tool issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    SetMcdramCfg,
    SetNumaCfg,
    NodeReinit,
    NodeStatus,
}

impl Operation {
    /// The capmc subcommand name.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::SetMcdramCfg => "set_mcdram_cfg",
            Operation::SetNumaCfg => "set_numa_cfg",
            Operation::NodeReinit => "node_reinit",
            Operation::NodeStatus => "node_status",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// What the caller should do with a command result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Success,
    /// Expected to resolve shortly; retry within budget.
    Transient,
    Fatal,
}

/// Diagnostics that indicate the backing state manager is temporarily down.
/// "Internal server error" is only observed (and only safe to retry) for
/// node_reinit. Patterns are matched case-sensitively, the success marker
/// case-insensitively, both matching the control plane's observed behavior.
const TRANSIENT_PATTERNS: &[(Operation, &str)] = &[
    (Operation::SetMcdramCfg, "Could not lookup"),
    (Operation::SetNumaCfg, "Could not lookup"),
    (Operation::NodeReinit, "Could not lookup"),
    (Operation::NodeReinit, "Internal server error"),
];

/// Classify one command result for the given operation.
///
/// Exit status 0, or any case variant of "success" in the captured text,
/// is Success. Otherwise the transient table decides between Transient and
/// Fatal. Retry budgets are the caller's concern; this stays a pure table
/// lookup so the retry policy is auditable in isolation.
pub fn classify(op: Operation, result: &ScriptResult) -> Disposition {
    if result.status == 0 || contains_ignore_ascii_case(&result.output, "success") {
        return Disposition::Success;
    }
    for (pat_op, pattern) in TRANSIENT_PATTERNS {
        if *pat_op == op && result.output.contains(pattern) {
            return Disposition::Transient;
        }
    }
    Disposition::Fatal
}

fn contains_ignore_ascii_case(haystack: &str, needle: &str) -> bool {
    haystack.to_ascii_lowercase().contains(needle)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_status_is_success() {
        let r = ScriptResult::ok("done");
        assert_eq!(classify(Operation::NodeReinit, &r), Disposition::Success);
    }

    #[test]
    fn success_marker_overrides_nonzero_status() {
        let r = ScriptResult::failed(7, "Operation reported Success");
        assert_eq!(classify(Operation::SetMcdramCfg, &r), Disposition::Success);
    }

    #[test]
    fn success_marker_is_case_insensitive() {
        let r = ScriptResult::failed(1, "SUCCESS");
        assert_eq!(classify(Operation::NodeStatus, &r), Disposition::Success);
    }

    #[test]
    fn lookup_failure_is_transient_for_mode_sets() {
        let r = ScriptResult::failed(1, "Could not lookup state manager");
        assert_eq!(classify(Operation::SetMcdramCfg, &r), Disposition::Transient);
        assert_eq!(classify(Operation::SetNumaCfg, &r), Disposition::Transient);
    }

    #[test]
    fn internal_server_error_transient_only_for_reinit() {
        let r = ScriptResult::failed(1, "Internal server error");
        assert_eq!(classify(Operation::NodeReinit, &r), Disposition::Transient);
        assert_eq!(classify(Operation::SetMcdramCfg, &r), Disposition::Fatal);
        assert_eq!(classify(Operation::SetNumaCfg, &r), Disposition::Fatal);
    }

    #[test]
    fn transient_patterns_are_case_sensitive() {
        let r = ScriptResult::failed(1, "could not lookup");
        assert_eq!(classify(Operation::NodeReinit, &r), Disposition::Fatal);
    }

    #[test]
    fn unrecognized_failure_is_fatal() {
        let r = ScriptResult::failed(1, "permission denied");
        assert_eq!(classify(Operation::NodeReinit, &r), Disposition::Fatal);
    }

    #[test]
    fn status_queries_are_never_transient() {
        let r = ScriptResult::failed(1, "Could not lookup state manager");
        assert_eq!(classify(Operation::NodeStatus, &r), Disposition::Fatal);
    }

    #[test]
    fn operation_names_match_capmc_subcommands() {
        assert_eq!(Operation::SetMcdramCfg.name(), "set_mcdram_cfg");
        assert_eq!(Operation::SetNumaCfg.name(), "set_numa_cfg");
        assert_eq!(Operation::NodeReinit.name(), "node_reinit");
        assert_eq!(Operation::NodeStatus.name(), "node_status");
    }
}
