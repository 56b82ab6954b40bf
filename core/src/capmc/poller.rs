//! Convergence poller — waits for a set of rebooting nodes to report "on".
//!
//! `node_status` is queried at the configured cadence until every pending
//! nid has shown up in the "on" list or the boot window closes. The poller
//! only ever shrinks the pending set; a node seen on once is never re-armed.

use std::time::{Duration, Instant};

use serde::Deserialize;

use crate::capmc::runner::CommandRunner;
use crate::logger::Logger;
use crate::nidset::NidSet;

/// How long a KNL node is given to come back after reinit.
pub const BOOT_WINDOW_SECS: u64 = 30 * 60;

/// The slice of the `node_status` reply we care about. Other state buckets
/// ("off", "halt", "ready", ...) are present in the document but ignored.
#[derive(Debug, Deserialize)]
struct StatusDocument {
    #[serde(default)]
    on: Vec<serde_json::Value>,
}

pub struct ConvergencePoller<'a> {
    runner: &'a dyn CommandRunner,
    log: &'a Logger,
    poll_freq_secs: u64,
    window_secs: u64,
}

impl<'a> ConvergencePoller<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        log: &'a Logger,
        poll_freq_secs: u64,
    ) -> ConvergencePoller<'a> {
        ConvergencePoller {
            runner,
            log,
            poll_freq_secs,
            window_secs: BOOT_WINDOW_SECS,
        }
    }

    #[cfg(test)]
    fn with_window(mut self, window_secs: u64) -> ConvergencePoller<'a> {
        self.window_secs = window_secs;
        self
    }

    /// Block until every nid in `pending` has reported "on" or the window
    /// expires. Nids still set on return never came up in time.
    pub fn wait_all_on(&self, pending: &mut NidSet) {
        let deadline = Instant::now() + Duration::from_secs(self.window_secs);
        while !pending.is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_secs(self.poll_freq_secs));

            let args = vec!["node_status".to_string()];
            let result = self.runner.run(&args);
            if result.status != 0 {
                self.log.error(&format!(
                    "capmc(node_status): {} {}",
                    result.status,
                    result.output.trim()
                ));
                break;
            }

            let doc: StatusDocument = match serde_json::from_str(&result.output) {
                Ok(doc) => doc,
                Err(e) => {
                    self.log
                        .error(&format!("capmc(node_status): json parse error: {}", e));
                    break;
                }
            };

            for nid in extract_nids(&doc.on) {
                pending.clear(nid);
            }
        }

        if !pending.is_empty() {
            self.log.error(&format!(
                "timeout waiting for nodes to boot: {}",
                pending.encode()
            ));
        }
    }
}

/// Pull the integer nids out of the "on" array. A malformed entry ends the
/// extraction; the well-formed prefix still counts.
fn extract_nids(values: &[serde_json::Value]) -> Vec<usize> {
    let mut nids = Vec::with_capacity(values.len());
    for value in values {
        match value.as_u64() {
            Some(n) => nids.push(n as usize),
            None => break,
        }
    }
    nids
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
