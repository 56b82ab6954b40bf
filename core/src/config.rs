//! Configuration loading for the capmc control plane.
//!
//! `knl.conf` is a flat `Key=Value` file (`#` starts a comment). All keys are
//! optional; a missing file yields defaults. The parsed `KnlConfig` is built
//! once at startup and passed by reference into every component; there is no
//! ambient global configuration state.

use std::path::Path;

/// Default location of the capmc binary on Cray systems.
pub const DEFAULT_CAPMC_PATH: &str = "/opt/cray/capmc/default/bin/capmc";

/// Default and minimum per-call timeout for the capmc command.
pub const DEFAULT_CAPMC_TIMEOUT_MS: u64 = 60_000;
pub const MIN_CAPMC_TIMEOUT_MS: u64 = 1_000;

/// Default retry budget for transient capmc failures.
pub const DEFAULT_CAPMC_RETRIES: u32 = 4;

/// Default node_status poll frequency in seconds.
pub const DEFAULT_CAPMC_POLL_FREQ_SECS: u64 = 45;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnlConfig {
    pub capmc_path: String,
    pub capmc_poll_freq_secs: u64,
    pub capmc_retries: u32,
    pub capmc_timeout_ms: u64,
    pub log_file: Option<String>,
    pub syscfg_path: Option<String>,
}

/// Returns defaults for all configuration fields.
pub fn default_config() -> KnlConfig {
    KnlConfig {
        capmc_path: DEFAULT_CAPMC_PATH.into(),
        capmc_poll_freq_secs: DEFAULT_CAPMC_POLL_FREQ_SECS,
        capmc_retries: DEFAULT_CAPMC_RETRIES,
        capmc_timeout_ms: DEFAULT_CAPMC_TIMEOUT_MS,
        log_file: None,
        syscfg_path: None,
    }
}

/// Load configuration from a `knl.conf` file.
///
/// A file that cannot be read yields defaults (the tool must still run on
/// systems that never shipped a config); a file that reads but fails to
/// parse is a hard error.
pub fn load(path: &Path) -> Result<KnlConfig, String> {
    match std::fs::read_to_string(path) {
        Ok(content) => parse(&content),
        Err(_) => Ok(default_config()),
    }
}

/// Parse configuration from `Key=Value` text.
pub fn parse(content: &str) -> Result<KnlConfig, String> {
    let mut c = default_config();

    for raw_line in content.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let eq_pos = match line.find('=') {
            Some(p) => p,
            None => continue,
        };
        let key = line[..eq_pos].trim();
        let val = line[eq_pos + 1..].trim();

        match key {
            "CapmcPath" => c.capmc_path = unquote(val),
            "CapmcPollFreq" => c.capmc_poll_freq_secs = parse_u64(key, val)?,
            "CapmcRetries" => c.capmc_retries = parse_u32(key, val)?,
            "CapmcTimeout" => c.capmc_timeout_ms = parse_u64(key, val)?,
            "LogFile" => c.log_file = Some(unquote(val)),
            "SyscfgPath" => c.syscfg_path = Some(unquote(val)),
            _ => {
                // Unknown keys are silently ignored for forward-compatibility
            }
        }
    }

    c.capmc_timeout_ms = c.capmc_timeout_ms.max(MIN_CAPMC_TIMEOUT_MS);
    Ok(c)
}

fn parse_u64(key: &str, val: &str) -> Result<u64, String> {
    val.parse::<u64>()
        .map_err(|_| format!("invalid u64 for {}: {}", key, val))
}

fn parse_u32(key: &str, val: &str) -> Result<u32, String> {
    val.parse::<u32>()
        .map_err(|_| format!("invalid u32 for {}: {}", key, val))
}

/// Remove surrounding quotes if present.
fn unquote(s: &str) -> String {
    let s = s.trim();
    if (s.starts_with('"') && s.ends_with('"') && s.len() >= 2)
        || (s.starts_with('\'') && s.ends_with('\'') && s.len() >= 2)
    {
        s[1..s.len() - 1].to_string()
    } else {
        s.to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
