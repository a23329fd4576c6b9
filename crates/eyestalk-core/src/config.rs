//! Runtime configuration for Eyestalk.
//!
//! Resolution order: environment variables → defaults. There is no config
//! file; the daemon's only other inputs are its two positional arguments.
//!
//! Recognised variables:
//!   EYESTALK_PROBE_WINDOW_SECS       reply window per probe
//!   EYESTALK_FIXTURE_DIR             directory holding `<name>.xml` fixtures
//!   EYESTALK_SERVER                  `host` or `host:port`, overrides the JID domain
//!   EYESTALK_CONNECT_TIMEOUT_SECS    TCP connect timeout
//!   EYESTALK_HANDSHAKE_TIMEOUT_SECS  per-step stream negotiation timeout
//!   EYESTALK_RESOURCE                resource to bind when the JID has none
//!   EYESTALK_BARE_JID_SESSIONS       key sessions by bare JID ("1"/"true")

use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone)]
pub struct EyestalkConfig {
    pub probe: ProbeConfig,
    pub network: NetworkConfig,
}

#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// How long each probe waits for a reply before the next one fires.
    pub window: Duration,
    /// Where recorded stanza fixtures live.
    pub fixture_dir: PathBuf,
    /// Strip the resource from sender addresses before looking up sessions.
    pub bare_jid_sessions: bool,
}

#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Explicit server endpoint. None = JID domain on the standard port.
    pub server: Option<String>,
    pub connect_timeout: Duration,
    pub handshake_timeout: Duration,
    /// Resource requested at bind time when the account JID carries none.
    pub resource: String,
}

/// Standard client-to-server port (RFC 6120).
pub const DEFAULT_CLIENT_PORT: u16 = 5222;

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for EyestalkConfig {
    fn default() -> Self {
        Self {
            probe: ProbeConfig::default(),
            network: NetworkConfig::default(),
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(10),
            fixture_dir: PathBuf::from("data/stanzas"),
            bare_jid_sessions: false,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            server: None,
            connect_timeout: Duration::from_secs(15),
            handshake_timeout: Duration::from_secs(10),
            resource: "eyestalk".to_string(),
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}: expected a positive number of seconds, got {value:?}")]
    InvalidSeconds { var: &'static str, value: String },
    #[error("{var}: must not be empty")]
    Empty { var: &'static str },
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl EyestalkConfig {
    /// Defaults with `EYESTALK_*` overrides from the process environment.
    ///
    /// Invalid values are skipped (the default stays in place) and returned
    /// alongside the config so the caller can log them.
    pub fn from_env() -> (Self, Vec<ConfigError>) {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reading variables through
    /// `lookup`, so tests never touch the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> (Self, Vec<ConfigError>) {
        let mut config = Self::default();
        let mut errors = Vec::new();

        if let Some(v) = lookup("EYESTALK_PROBE_WINDOW_SECS") {
            match parse_secs("EYESTALK_PROBE_WINDOW_SECS", &v) {
                Ok(d) => config.probe.window = d,
                Err(e) => errors.push(e),
            }
        }
        if let Some(v) = lookup("EYESTALK_FIXTURE_DIR") {
            if v.trim().is_empty() {
                errors.push(ConfigError::Empty { var: "EYESTALK_FIXTURE_DIR" });
            } else {
                config.probe.fixture_dir = PathBuf::from(v);
            }
        }
        if let Some(v) = lookup("EYESTALK_BARE_JID_SESSIONS") {
            config.probe.bare_jid_sessions = v == "true" || v == "1";
        }
        if let Some(v) = lookup("EYESTALK_SERVER") {
            let v = v.trim();
            config.network.server = (!v.is_empty()).then(|| v.to_string());
        }
        if let Some(v) = lookup("EYESTALK_CONNECT_TIMEOUT_SECS") {
            match parse_secs("EYESTALK_CONNECT_TIMEOUT_SECS", &v) {
                Ok(d) => config.network.connect_timeout = d,
                Err(e) => errors.push(e),
            }
        }
        if let Some(v) = lookup("EYESTALK_HANDSHAKE_TIMEOUT_SECS") {
            match parse_secs("EYESTALK_HANDSHAKE_TIMEOUT_SECS", &v) {
                Ok(d) => config.network.handshake_timeout = d,
                Err(e) => errors.push(e),
            }
        }
        if let Some(v) = lookup("EYESTALK_RESOURCE") {
            if v.trim().is_empty() {
                errors.push(ConfigError::Empty { var: "EYESTALK_RESOURCE" });
            } else {
                config.network.resource = v.trim().to_string();
            }
        }

        (config, errors)
    }
}

fn parse_secs(var: &'static str, value: &str) -> Result<Duration, ConfigError> {
    match value.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => Err(ConfigError::InvalidSeconds {
            var,
            value: value.to_string(),
        }),
    }
}

/// Split `host[:port]` into its parts, defaulting the port.
///
/// Bracketed IPv6 literals (`[::1]:5222`) are accepted.
pub fn split_host_port(server: &str, default_port: u16) -> (String, u16) {
    let server = server.trim();
    if let Some(rest) = server.strip_prefix('[') {
        if let Some((host, tail)) = rest.split_once(']') {
            let port = tail
                .strip_prefix(':')
                .and_then(|p| p.parse().ok())
                .unwrap_or(default_port);
            return (host.to_string(), port);
        }
    }
    match server.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => match port.parse() {
            Ok(port) => (host.to_string(), port),
            Err(_) => (server.to_string(), default_port),
        },
        _ => (server.to_string(), default_port),
    }
}
