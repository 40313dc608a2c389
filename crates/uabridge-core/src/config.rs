//! Configuration defaults and environment variable names.
//!
//! Every crate reads its defaults from here so the CLI, the tests and the
//! library constructors agree on the same values.

/// Default values.
pub mod defaults {
    /// Endpoint assumed when a message carries no endpoint of its own.
    pub const ENDPOINT: &str = "opc.tcp://localhost:4840";
    /// Upper bound for a single transport request, in milliseconds.
    pub const TRANSPORT_TIMEOUT_MS: u64 = 10_000;
    /// Upper bound for a whole command, in milliseconds.
    pub const COMMAND_TIMEOUT_MS: u64 = 30_000;
    /// Maximum number of transport requests in flight at once.
    pub const MAX_CONCURRENT_OPERATIONS: usize = 64;
    /// Capacity of the monitored data broadcast channel.
    pub const MONITORED_CHANNEL_CAPACITY: usize = 1000;
}

/// Environment variable names.
pub mod env_vars {
    pub const ENDPOINT: &str = "UABRIDGE_ENDPOINT";
    pub const TRANSPORT_TIMEOUT_MS: &str = "UABRIDGE_TRANSPORT_TIMEOUT_MS";
    pub const COMMAND_TIMEOUT_MS: &str = "UABRIDGE_COMMAND_TIMEOUT_MS";
    pub const MAX_CONCURRENT: &str = "UABRIDGE_MAX_CONCURRENT";
    pub const LOG_JSON: &str = "UABRIDGE_LOG_JSON";

    /// Read and parse an environment variable, `None` when unset or unparsable.
    pub fn parse<T: std::str::FromStr>(name: &str) -> Option<T> {
        std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
    }

    /// Endpoint override, if set and non-empty.
    pub fn endpoint() -> Option<String> {
        std::env::var(ENDPOINT)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    pub fn transport_timeout_ms() -> Option<u64> {
        parse(TRANSPORT_TIMEOUT_MS)
    }

    pub fn command_timeout_ms() -> Option<u64> {
        parse(COMMAND_TIMEOUT_MS)
    }

    pub fn max_concurrent() -> Option<usize> {
        parse(MAX_CONCURRENT)
    }

    /// Whether JSON log output was requested.
    pub fn log_json() -> bool {
        parse(LOG_JSON).unwrap_or(false)
    }
}

/// Normalize an OPC-UA endpoint URL (adds the scheme, drops trailing slashes).
pub fn normalize_endpoint(endpoint: &str) -> String {
    let trimmed = endpoint.trim().trim_end_matches('/');
    if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("opc.tcp://{}", trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_endpoint() {
        assert_eq!(
            normalize_endpoint("localhost:4840"),
            "opc.tcp://localhost:4840"
        );
        assert_eq!(
            normalize_endpoint("opc.tcp://plc-1:4840/"),
            "opc.tcp://plc-1:4840"
        );
        assert_eq!(normalize_endpoint(defaults::ENDPOINT), defaults::ENDPOINT);
    }

    #[test]
    fn test_parse_missing_env_var() {
        assert_eq!(env_vars::parse::<u64>("UABRIDGE_TEST_UNSET_VARIABLE"), None);
    }
}
