//! Command runner for capmc invocations.
//!
//! `CommandRunner` is the trait the controller and poller execute through.
//! `CapmcRunner` is the production implementation: it spawns the capmc binary
//! in its own process group with stdout and stderr merged into one pipe,
//! reads the pipe in bounded slices so the timeout budget is re-checked at
//! least every 500 ms, and tears the whole process group down (SIGTERM,
//! short grace, SIGKILL, reap) on every exit path. `MockRunner` is the test
//! double that records argv vectors and replays preset results.

use std::cell::RefCell;
use std::ffi::CString;
use std::os::unix::io::{FromRawFd, RawFd};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use crate::logger::Logger;

/// Maximum poll wait per slice, in milliseconds. Keeps the loop responsive
/// to the overall timeout even when the child produces no output.
const MAX_POLL_WAIT_MS: u64 = 500;

/// Initial capacity of the capture buffer; growth is geometric from here.
const CAPTURE_BUF_INIT: usize = 1024;

/// Synthetic exit status for spawn-side failures, matching the shell's
/// "command not found" convention.
const SPAWN_FAILURE_STATUS: i32 = 127;

/// Result of one command invocation. Immutable once returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptResult {
    pub status: i32,
    pub output: String,
    pub timed_out: bool,
}

impl ScriptResult {
    pub fn ok(output: &str) -> ScriptResult {
        ScriptResult {
            status: 0,
            output: output.into(),
            timed_out: false,
        }
    }

    pub fn failed(status: i32, output: &str) -> ScriptResult {
        ScriptResult {
            status,
            output: output.into(),
            timed_out: false,
        }
    }
}

/// Trait for executing capmc argument vectors.
///
/// `args` is the argument list after the binary name, e.g.
/// `["node_reinit", "-n", "20-22"]`.
pub trait CommandRunner: Send {
    fn run(&self, args: &[String]) -> ScriptResult;
}

// ---------------------------------------------------------------------------
// Production runner
// ---------------------------------------------------------------------------

pub struct CapmcRunner<'a> {
    capmc_path: String,
    timeout_ms: u64,
    log: &'a Logger,
}

impl<'a> CapmcRunner<'a> {
    pub fn new(capmc_path: &str, timeout_ms: u64, log: &'a Logger) -> CapmcRunner<'a> {
        CapmcRunner {
            capmc_path: capmc_path.into(),
            timeout_ms,
            log,
        }
    }

    fn is_executable(&self) -> bool {
        let cpath = match CString::new(self.capmc_path.as_str()) {
            Ok(c) => c,
            Err(_) => return false,
        };
        unsafe { libc::access(cpath.as_ptr(), libc::R_OK | libc::X_OK) == 0 }
    }
}

impl<'a> CommandRunner for CapmcRunner<'a> {
    fn run(&self, args: &[String]) -> ScriptResult {
        // Never attempt a spawn that cannot succeed.
        if !self.is_executable() {
            self.log
                .error(&format!("cannot execute: {}", self.capmc_path));
            return ScriptResult::failed(SPAWN_FAILURE_STATUS, "capmc configuration error");
        }

        let mut pfd: [RawFd; 2] = [-1, -1];
        if unsafe { libc::pipe(pfd.as_mut_ptr()) } != 0 {
            self.log.error("pipe() failed");
            return ScriptResult::failed(SPAWN_FAILURE_STATUS, "system error");
        }
        let read_end = FdGuard(pfd[0]);

        // stdout and stderr share the pipe's write end; both fds are owned
        // and closed by Command after the spawn, so EOF on the read end
        // tracks the child (and anything it spawned) closing its output.
        let stderr_fd = unsafe { libc::dup(pfd[1]) };
        if stderr_fd < 0 {
            unsafe { libc::close(pfd[1]) };
            self.log.error("dup() failed");
            return ScriptResult::failed(SPAWN_FAILURE_STATUS, "system error");
        }

        let spawned = Command::new(&self.capmc_path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(unsafe { Stdio::from_raw_fd(pfd[1]) })
            .stderr(unsafe { Stdio::from_raw_fd(stderr_fd) })
            .process_group(0)
            .spawn();

        let child = match spawned {
            Ok(c) => c,
            Err(e) => {
                self.log.error(&format!("spawn {}: {}", self.capmc_path, e));
                return ScriptResult::failed(SPAWN_FAILURE_STATUS, "system error");
            }
        };
        let mut guard = ChildGuard::new(child);

        unsafe {
            libc::fcntl(read_end.0, libc::F_SETFL, libc::O_NONBLOCK);
        }

        let start = Instant::now();
        let mut buf: Vec<u8> = Vec::with_capacity(CAPTURE_BUF_INIT);
        let mut chunk = [0u8; CAPTURE_BUF_INIT];
        let mut timed_out = false;

        loop {
            let elapsed_ms = start.elapsed().as_millis() as u64;
            if elapsed_ms >= self.timeout_ms {
                self.log.error(&format!(
                    "capmc({}) timeout @ {} msec",
                    args.first().map(String::as_str).unwrap_or(""),
                    self.timeout_ms
                ));
                timed_out = true;
                break;
            }
            let wait = (self.timeout_ms - elapsed_ms).min(MAX_POLL_WAIT_MS) as i32;

            let mut fds = libc::pollfd {
                fd: read_end.0,
                events: libc::POLLIN | libc::POLLHUP,
                revents: 0,
            };
            let rc = unsafe { libc::poll(&mut fds, 1, wait) };
            if rc == 0 {
                continue;
            }
            if rc < 0 {
                let errno = std::io::Error::last_os_error();
                if errno.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                self.log.error(&format!("poll(): {}", errno));
                break;
            }
            if (fds.revents & libc::POLLIN) == 0 {
                break;
            }

            let n = unsafe {
                libc::read(
                    read_end.0,
                    chunk.as_mut_ptr() as *mut libc::c_void,
                    chunk.len(),
                )
            };
            if n == 0 {
                break;
            }
            if n < 0 {
                let errno = std::io::Error::last_os_error();
                if errno.kind() == std::io::ErrorKind::WouldBlock {
                    continue;
                }
                self.log.error(&format!("read(): {}", errno));
                break;
            }
            // Vec growth is geometric, preserving amortized-linear appends.
            buf.extend_from_slice(&chunk[..n as usize]);
        }

        let status = guard.finish();
        ScriptResult {
            status,
            output: String::from_utf8_lossy(&buf).into_owned(),
            timed_out,
        }
    }
}

/// Owns the pipe read end; closed on every exit path.
struct FdGuard(RawFd);

impl Drop for FdGuard {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.0);
        }
    }
}

/// Scoped child handle. Exactly one teardown runs per child: signal the
/// process group, wait a short grace interval, force-kill, then reap. Runs
/// on drop as well, so early returns and panics cannot leak the child.
struct ChildGuard {
    child: Option<Child>,
}

impl ChildGuard {
    fn new(child: Child) -> ChildGuard {
        ChildGuard { child: Some(child) }
    }

    /// Terminate the child's process group and reap it, returning the exit
    /// status (128 + signal when signal-terminated).
    fn finish(&mut self) -> i32 {
        let mut child = match self.child.take() {
            Some(c) => c,
            None => return 0,
        };
        let pgid = child.id() as libc::pid_t;
        unsafe {
            libc::killpg(pgid, libc::SIGTERM);
        }
        std::thread::sleep(Duration::from_millis(10));
        unsafe {
            libc::killpg(pgid, libc::SIGKILL);
        }
        match child.wait() {
            Ok(st) => st
                .code()
                .unwrap_or_else(|| 128 + st.signal().unwrap_or(0)),
            Err(_) => SPAWN_FAILURE_STATUS,
        }
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        self.finish();
    }
}

// ---------------------------------------------------------------------------
// Mock runner
// ---------------------------------------------------------------------------

/// Test-double runner that records argument vectors and returns
/// pre-configured results in order.
pub struct MockRunner {
    responses: RefCell<Vec<ScriptResult>>,
    calls: RefCell<Vec<Vec<String>>>,
    default_response: ScriptResult,
}

unsafe impl Send for MockRunner {}

impl MockRunner {
    pub fn new() -> Self {
        MockRunner {
            responses: RefCell::new(Vec::new()),
            calls: RefCell::new(Vec::new()),
            default_response: ScriptResult::ok(""),
        }
    }

    pub fn with_responses(responses: Vec<ScriptResult>) -> Self {
        let mut reversed = responses;
        reversed.reverse();
        MockRunner {
            responses: RefCell::new(reversed),
            calls: RefCell::new(Vec::new()),
            default_response: ScriptResult::ok(""),
        }
    }

    /// Result returned once the preset responses run out.
    pub fn set_default_response(&mut self, result: ScriptResult) {
        self.default_response = result;
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.borrow().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.borrow().len()
    }
}

impl Default for MockRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRunner for MockRunner {
    fn run(&self, args: &[String]) -> ScriptResult {
        self.calls.borrow_mut().push(args.to_vec());
        self.responses
            .borrow_mut()
            .pop()
            .unwrap_or_else(|| self.default_response.clone())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn sh_runner(timeout_ms: u64, log: &Logger) -> CapmcRunner<'_> {
        CapmcRunner::new("/bin/sh", timeout_ms, log)
    }

    #[test]
    fn captures_stdout() {
        let log = Logger::stderr_only("test");
        let runner = sh_runner(5_000, &log);
        let result = runner.run(&args(&["-c", "echo hello"]));
        assert_eq!(result.status, 0);
        assert!(!result.timed_out);
        assert!(result.output.contains("hello"));
    }

    #[test]
    fn merges_stderr_into_capture() {
        let log = Logger::stderr_only("test");
        let runner = sh_runner(5_000, &log);
        let result = runner.run(&args(&["-c", "echo out; echo err 1>&2"]));
        assert_eq!(result.status, 0);
        assert!(result.output.contains("out"));
        assert!(result.output.contains("err"));
    }

    #[test]
    fn reports_nonzero_exit_status() {
        let log = Logger::stderr_only("test");
        let runner = sh_runner(5_000, &log);
        let result = runner.run(&args(&["-c", "exit 7"]));
        assert_eq!(result.status, 7);
        assert!(!result.timed_out);
    }

    #[test]
    fn missing_binary_is_synthetic_failure_without_spawn() {
        let log = Logger::stderr_only("test");
        let runner = CapmcRunner::new("/nonexistent/capmc", 5_000, &log);
        let result = runner.run(&args(&["node_status"]));
        assert_eq!(result.status, 127);
        assert!(!result.timed_out);
        assert!(result.output.contains("configuration error"));
    }

    #[test]
    fn timeout_terminates_child_and_reports() {
        let log = Logger::stderr_only("test");
        let runner = sh_runner(300, &log);
        let start = Instant::now();
        let result = runner.run(&args(&["-c", "sleep 30"]));
        assert!(result.timed_out);
        assert_ne!(result.status, 0);
        // The child was killed and reaped; the call did not run to sleep's end.
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn timeout_kills_grandchildren_via_process_group() {
        let log = Logger::stderr_only("test");
        let runner = sh_runner(300, &log);
        let start = Instant::now();
        // The inner sleep holds the pipe's write end open; only a
        // process-group kill unblocks the capture before sleep finishes.
        let result = runner.run(&args(&["-c", "sleep 30 & wait"]));
        assert!(result.timed_out);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn captures_large_output() {
        let log = Logger::stderr_only("test");
        let runner = sh_runner(10_000, &log);
        let result = runner.run(&args(&["-c", "yes x | head -c 100000"]));
        assert_eq!(result.status, 0);
        assert!(result.output.len() >= 100_000);
    }

    #[test]
    fn mock_records_calls_in_order() {
        let runner = MockRunner::with_responses(vec![
            ScriptResult::ok("first"),
            ScriptResult::failed(1, "second"),
        ]);
        assert_eq!(runner.run(&args(&["node_status"])).output, "first");
        assert_eq!(runner.run(&args(&["node_reinit", "-n", "1"])).status, 1);
        let calls = runner.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], vec!["node_status"]);
        assert_eq!(calls[1], vec!["node_reinit", "-n", "1"]);
    }

    #[test]
    fn mock_falls_back_to_default_response() {
        let mut runner = MockRunner::new();
        runner.set_default_response(ScriptResult::failed(3, "exhausted"));
        let result = runner.run(&args(&["node_status"]));
        assert_eq!(result.status, 3);
        assert_eq!(result.output, "exhausted");
    }
}
