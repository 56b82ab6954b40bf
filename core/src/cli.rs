//! Command-line contract: one mandatory hostname expression, one optional
//! feature list. Wrong argument counts fail before any side effect.

pub const USAGE: &str = "Usage: capmc_resume <hostlist> [features]";

/// A validated invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub host_expr: String,
    pub features: Option<String>,
}

/// Parse the argument vector (program name excluded).
pub fn parse_args(args: &[String]) -> Result<Invocation, String> {
    match args {
        [host] => Ok(Invocation {
            host_expr: host.clone(),
            features: None,
        }),
        [host, features] => Ok(Invocation {
            host_expr: host.clone(),
            features: Some(features.clone()),
        }),
        _ => Err(USAGE.to_string()),
    }
}
