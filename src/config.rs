//! Runtime settings for both roles, resolved once at startup.

use crate::builder::Routing;
use crate::error::ConfigError;
use crate::listener::DEFAULT_READ_TIMEOUT;
use crate::mllp::DEFAULT_MAX_FRAME_LENGTH;
use crate::session::Session;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

/// The registered HL7 MLLP port.
pub const DEFAULT_PORT: u16 = 2575;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Listener bind address (sink role).
    pub listen_address: IpAddr,
    pub listen_port: u16,
    /// Counterpart listener (source role).
    pub server_host: String,
    pub server_port: u16,
    /// Bound on a whole client exchange.
    pub timeout: Duration,
    /// How long the listener waits for a connection's message.
    pub read_timeout: Duration,
    pub max_frame_length: usize,
    /// Names as seen by the source system. The listener acknowledges under the reverse.
    pub routing: Routing,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listen_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            listen_port: DEFAULT_PORT,
            server_host: "localhost".to_owned(),
            server_port: DEFAULT_PORT,
            timeout: DEFAULT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
            routing: Routing::default(),
        }
    }
}

impl Config {
    /// Defaults overridden by `HL7_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each `HL7_*` key.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(value) = lookup("HL7_LISTEN_ADDRESS") {
            config.listen_address = parse("HL7_LISTEN_ADDRESS", value)?;
        }
        if let Some(value) = lookup("HL7_LISTEN_PORT") {
            config.listen_port = parse("HL7_LISTEN_PORT", value)?;
        }
        if let Some(value) = lookup("HL7_SERVER_HOST") {
            config.server_host = value;
        }
        if let Some(value) = lookup("HL7_SERVER_PORT") {
            config.server_port = parse("HL7_SERVER_PORT", value)?;
        }
        if let Some(value) = lookup("HL7_TIMEOUT_MS") {
            config.timeout = Duration::from_millis(parse("HL7_TIMEOUT_MS", value)?);
        }
        if let Some(value) = lookup("HL7_READ_TIMEOUT_MS") {
            config.read_timeout = Duration::from_millis(parse("HL7_READ_TIMEOUT_MS", value)?);
        }
        if let Some(value) = lookup("HL7_MAX_FRAME_LENGTH") {
            config.max_frame_length = parse("HL7_MAX_FRAME_LENGTH", value)?;
        }

        let routing = &mut config.routing;
        for (key, target) in [
            ("HL7_SENDING_APPLICATION", &mut routing.sending_application),
            ("HL7_SENDING_FACILITY", &mut routing.sending_facility),
            ("HL7_RECEIVING_APPLICATION", &mut routing.receiving_application),
            ("HL7_RECEIVING_FACILITY", &mut routing.receiving_facility),
            ("HL7_PROCESSING_ID", &mut routing.processing_id),
        ] {
            if let Some(value) = lookup(key) {
                if value.trim().is_empty() {
                    return Err(ConfigError { key, value });
                }
                *target = value;
            }
        }

        Ok(config)
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen_address, self.listen_port)
    }

    /// A client session towards the configured counterpart.
    pub fn session(&self) -> Session {
        Session::new(
            self.server_host.clone(),
            self.server_port,
            self.timeout,
            self.routing.clone(),
        )
    }
}

fn parse<T: FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError { key, value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.listen_port, 2575);
        assert_eq!(config.server_host, "localhost");
        assert_eq!(config.server_port, 2575);
        assert_eq!(config.listen_addr().to_string(), "0.0.0.0:2575");
        assert_eq!(config.routing.sending_application, "RECEPTION");
        assert_eq!(config.routing.receiving_application, "HIS");
    }

    #[test]
    fn environment_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("HL7_LISTEN_PORT", "3575"),
            ("HL7_SERVER_HOST", "his.example.org"),
            ("HL7_SERVER_PORT", " 4575 "),
            ("HL7_TIMEOUT_MS", "1500"),
            ("HL7_SENDING_APPLICATION", "FRONTDESK"),
        ]))
        .unwrap();

        assert_eq!(config.listen_port, 3575);
        assert_eq!(config.server_host, "his.example.org");
        assert_eq!(config.server_port, 4575);
        assert_eq!(config.timeout, Duration::from_millis(1500));
        assert_eq!(config.routing.sending_application, "FRONTDESK");
        assert_eq!(config.routing.receiving_facility, "HOSPITAL");
    }

    #[test]
    fn bad_values_are_reported() {
        let err = Config::from_lookup(lookup(&[("HL7_SERVER_PORT", "70000")])).unwrap_err();
        assert_eq!(err.key, "HL7_SERVER_PORT");
        assert_eq!(err.value, "70000");

        let err = Config::from_lookup(lookup(&[("HL7_RECEIVING_APPLICATION", "  ")])).unwrap_err();
        assert_eq!(err.key, "HL7_RECEIVING_APPLICATION");
    }
}
