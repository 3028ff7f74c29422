//! Configuration for the DishaIO daemon
//!
//! Loads configuration from a TOML file and applies command-line overrides
//! on top. Every field has a default, so the daemon runs with no file and
//! no flags at all (localhost broker, topic "coords").

use crate::error::{Error, Result};
use crate::protocol::QosLevel;
use crate::transport::ConnectionScheme;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub broker: BrokerConfig,
    pub subscription: SubscriptionConfig,
    pub client: ClientConfig,
    pub reconnect: ReconnectConfig,
}

/// Broker endpoint configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Connection scheme (tcp, ssl, ws, wsl); only tcp currently dials
    pub scheme: ConnectionScheme,
    /// Broker hostname or IP address
    pub host: String,
    /// Broker port
    pub port: u16,
    /// Keep-alive interval in seconds (0 disables the keep-alive clock)
    pub keep_alive_secs: u64,
    /// Request a clean session instead of resuming a persistent one
    pub clean_session: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            scheme: ConnectionScheme::Tcp,
            host: "127.0.0.1".to_string(),
            port: 1883,
            keep_alive_secs: 20,
            clean_session: false,
        }
    }
}

impl BrokerConfig {
    /// Keep-alive interval as a duration
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }
}

/// Subscription configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SubscriptionConfig {
    /// Topic filter carrying the orientation triples
    pub topic: String,
    /// Requested delivery QoS
    pub qos: QosLevel,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            topic: "coords".to_string(),
            qos: QosLevel::AtMostOnce,
        }
    }
}

/// Client identity configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Client identifier presented to the broker
    pub id: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            id: "sensor_listener".to_string(),
        }
    }
}

/// Reconnect poll configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Fixed interval between reconnect attempts, in milliseconds
    pub poll_interval_ms: u64,
    /// Attempts before giving up (0 disables reconnection)
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 250,
            max_attempts: 120,
        }
    }
}

impl ReconnectConfig {
    /// Poll interval as a duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl AppConfig {
    /// Load configuration from TOML file
    ///
    /// # Arguments
    /// - `path`: Path to TOML configuration file
    ///
    /// # Returns
    /// Parsed configuration or error
    ///
    /// # Example
    /// ```no_run
    /// use disha_io::config::AppConfig;
    ///
    /// let config = AppConfig::from_file("dishaio.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    ///
    /// # Arguments
    /// - `path`: Path to save TOML configuration file
    ///
    /// # Returns
    /// Success or error
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Broker address as `scheme://host:port`
    pub fn broker_url(&self) -> String {
        format!(
            "{}://{}:{}",
            self.broker.scheme, self.broker.host, self.broker.port
        )
    }
}

// ============================================================================
// Command Line
// ============================================================================

/// Usage text for `--help`
pub const USAGE: &str = "\
disha-io - MQTT orientation telemetry listener

USAGE:
    disha-io [OPTIONS]

OPTIONS:
    -c, --config <PATH>     Load configuration from a TOML file
    -t, --type <SCHEME>     Connection type: tcp, ssl, ws, wsl [default: tcp]
        --server <HOST>     Broker hostname or IP [default: 127.0.0.1]
        --port <PORT>       Broker port [default: 1883]
    -q, --qos <LEVEL>       Quality of service: 0, 1 or 2 [default: 0]
        --topic <TOPIC>     Topic to subscribe to [default: coords]
        --client-id <ID>    Client identifier [default: sensor_listener]
    -h, --help              Print this help text
";

/// Parsed command-line arguments
///
/// Flags override the corresponding file values; unset flags leave them
/// untouched.
#[derive(Debug, Default)]
pub struct CliArgs {
    pub config_path: Option<String>,
    pub show_help: bool,
    scheme: Option<String>,
    server: Option<String>,
    port: Option<String>,
    qos: Option<String>,
    topic: Option<String>,
    client_id: Option<String>,
}

impl CliArgs {
    /// Parse arguments (excluding the program name).
    pub fn parse(args: &[String]) -> Result<Self> {
        let mut parsed = CliArgs::default();
        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--config" | "-c" => parsed.config_path = Some(take_value(&mut iter, arg)?),
                "--type" | "-t" => parsed.scheme = Some(take_value(&mut iter, arg)?),
                "--server" => parsed.server = Some(take_value(&mut iter, arg)?),
                "--port" => parsed.port = Some(take_value(&mut iter, arg)?),
                "--qos" | "-q" => parsed.qos = Some(take_value(&mut iter, arg)?),
                "--topic" => parsed.topic = Some(take_value(&mut iter, arg)?),
                "--client-id" => parsed.client_id = Some(take_value(&mut iter, arg)?),
                "--help" | "-h" => parsed.show_help = true,
                other => {
                    return Err(Error::InvalidParameter(format!(
                        "Unknown argument {:?} (try --help)",
                        other
                    )))
                }
            }
        }
        Ok(parsed)
    }

    /// Resolve the effective configuration: file (or defaults) plus flag
    /// overrides.
    pub fn resolve(&self) -> Result<AppConfig> {
        let mut config = match &self.config_path {
            Some(path) => AppConfig::from_file(path)?,
            None => AppConfig::default(),
        };

        if let Some(scheme) = &self.scheme {
            config.broker.scheme = scheme.parse()?;
        }
        if let Some(server) = &self.server {
            config.broker.host = server.clone();
        }
        if let Some(port) = &self.port {
            config.broker.port = port
                .parse()
                .map_err(|_| Error::InvalidParameter(format!("Invalid port {:?}", port)))?;
        }
        if let Some(qos) = &self.qos {
            let value: u8 = qos
                .parse()
                .map_err(|_| Error::InvalidParameter(format!("Invalid QoS {:?}", qos)))?;
            config.subscription.qos = QosLevel::try_from(value)?;
        }
        if let Some(topic) = &self.topic {
            config.subscription.topic = topic.clone();
        }
        if let Some(client_id) = &self.client_id {
            config.client.id = client_id.clone();
        }
        Ok(config)
    }
}

fn take_value(iter: &mut std::slice::Iter<'_, String>, flag: &str) -> Result<String> {
    iter.next()
        .cloned()
        .ok_or_else(|| Error::InvalidParameter(format!("Missing value for {}", flag)))
}
