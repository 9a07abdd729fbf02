//! Configuration management for Pathwatch.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::probe::ProbingConfig;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Controller endpoint configuration.
    #[serde(default)]
    pub controller: ControllerConfig,

    /// Local-area link configuration.
    #[serde(default)]
    pub local_link: LocalLinkConfig,

    /// Wide-area link configuration.
    #[serde(default)]
    pub wide_area: WideAreaConfig,

    /// Probed device endpoints.
    #[serde(default)]
    pub devices: DevicesConfig,

    /// Probing cadence and timeouts.
    #[serde(default)]
    pub probing: ProbingConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("Failed to read config: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {e}")))?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Config(format!("Failed to create config dir: {e}")))?;
        }

        std::fs::write(path.as_ref(), content)
            .map_err(|e| Error::Config(format!("Failed to write config: {e}")))?;

        Ok(())
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        reqwest::Url::parse(&self.controller.url)
            .map_err(|e| Error::InvalidConfig(format!("controller.url: {e}")))?;

        if self.local_link.ssid.is_empty() && self.local_link.passphrase.is_some() {
            return Err(Error::InvalidConfig(
                "local_link.passphrase set without local_link.ssid".into(),
            ));
        }

        for (name, device) in [("devices.a", &self.devices.a), ("devices.b", &self.devices.b)] {
            if device.host.is_empty() {
                return Err(Error::InvalidConfig(format!("{name}.host is empty")));
            }
            if device.port == 0 {
                return Err(Error::InvalidConfig(format!("{name}.port is 0")));
            }
        }

        if self.probing.interval < std::time::Duration::from_millis(100) {
            return Err(Error::InvalidConfig(
                "probing.interval below 100ms".into(),
            ));
        }

        Ok(())
    }

    /// Get default config path.
    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("io", "pathwatch", "pathwatch").map_or_else(
            || PathBuf::from("pathwatch.toml"),
            |dirs| dirs.config_dir().join("config.toml"),
        )
    }

    /// Create example configuration.
    pub fn example() -> Self {
        Self {
            local_link: LocalLinkConfig {
                ssid: "site-ap".into(),
                ..Default::default()
            },
            devices: DevicesConfig {
                a: DeviceConfig {
                    host: "192.168.1.20".into(),
                    port: 22,
                    label: "ubnt-radio".into(),
                },
                b: DeviceConfig {
                    host: "192.168.88.1".into(),
                    port: 22,
                    label: "mikrotik".into(),
                },
            },
            ..Default::default()
        }
    }
}

/// Commented example configuration, written by `config --init`.
pub const EXAMPLE_TOML: &str = r#"# Pathwatch configuration

[controller]
# Probed with HTTP HEAD over the wide-area path.
url = "https://staging.controller.example"

[local_link]
# SSID the local Wi-Fi link must be associated with.
ssid = "site-ap"
# passphrase = "changeme"
# Explicit interface override; skips SSID resolution when set.
# interface = "wlan0"

[wide_area]
# Explicit interface override; otherwise the default-route interface.
# interface = "wwan0"

# Devices probed with TCP connect over the local link.
[devices.a]
host = "192.168.1.20"
port = 22
label = "ubnt-radio"

[devices.b]
host = "192.168.88.1"
port = 22
label = "mikrotik"

[probing]
interval = "3s"
http_timeout = "5s"
tcp_timeout = "1500ms"

[logging]
level = "info"
format = "pretty"
color = true
"#;

/// Controller endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Base URL probed with HTTP HEAD over the wide-area path.
    #[serde(default = "default_controller_url")]
    pub url: String,
}

fn default_controller_url() -> String {
    "https://staging.controller.example".into()
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            url: default_controller_url(),
        }
    }
}

/// Local-area link configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalLinkConfig {
    /// SSID the local link must be associated with. An empty SSID is valid
    /// configuration; acquisition against it is denied with a reason.
    #[serde(default)]
    pub ssid: String,

    /// Optional passphrase, carried in the request for selector identity.
    pub passphrase: Option<String>,

    /// Explicit interface override; skips SSID resolution when set.
    pub interface: Option<String>,
}

/// Wide-area link configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WideAreaConfig {
    /// Explicit interface override; otherwise the default-route interface.
    pub interface: Option<String>,
}

/// The two probed device endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevicesConfig {
    /// First device, probed with TCP connect over the local link.
    #[serde(default = "default_device_a")]
    pub a: DeviceConfig,

    /// Second device, probed with TCP connect over the local link.
    #[serde(default = "default_device_b")]
    pub b: DeviceConfig,
}

fn default_device_a() -> DeviceConfig {
    DeviceConfig {
        host: "192.168.1.20".into(),
        port: 22,
        label: String::new(),
    }
}

fn default_device_b() -> DeviceConfig {
    DeviceConfig {
        host: "192.168.88.1".into(),
        port: 22,
        label: String::new(),
    }
}

impl Default for DevicesConfig {
    fn default() -> Self {
        Self {
            a: default_device_a(),
            b: default_device_b(),
        }
    }
}

/// One probed device endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Host name or IP address.
    pub host: String,

    /// TCP port probed with a plain connect.
    #[serde(default = "default_device_port")]
    pub port: u16,

    /// Free-form display label.
    #[serde(default)]
    pub label: String,
}

fn default_device_port() -> u16 {
    22
}

impl DeviceConfig {
    /// Display label, falling back to host:port.
    pub fn display_label(&self) -> String {
        if self.label.is_empty() {
            format!("{}:{}", self.host, self.port)
        } else {
            self.label.clone()
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty or json).
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Enable colored output.
    #[serde(default = "default_color")]
    pub color: bool,
}

fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "pretty".into()
}
fn default_color() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            color: default_color(),
        }
    }
}

/// Initialize logging.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.format == "json" {
        subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| Error::Config(format!("Failed to init logging: {e}")))?;
    } else {
        subscriber
            .with(fmt::layer().with_ansi(config.color))
            .try_init()
            .map_err(|e| Error::Config(format!("Failed to init logging: {e}")))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_default_config_is_valid() {
        Config::default().validate().expect("default config");
        Config::example().validate().expect("example config");
    }

    #[test]
    fn test_roundtrip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::example();
        config.probing.interval = Duration::from_millis(750);
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.local_link.ssid, "site-ap");
        assert_eq!(loaded.probing.interval, Duration::from_millis(750));
        assert_eq!(loaded.devices.b.label, "mikrotik");
    }

    #[test]
    fn test_humantime_durations_parse() {
        let config: Config = toml::from_str(
            r#"
            [probing]
            interval = "3s"
            tcp_timeout = "1500ms"
            "#,
        )
        .unwrap();
        assert_eq!(config.probing.interval, Duration::from_secs(3));
        assert_eq!(config.probing.tcp_timeout, Duration::from_millis(1500));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.controller.url = "not a url".into();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.devices.a.port = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.probing.interval = Duration::from_millis(10);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.local_link.passphrase = Some("secret".into());
        assert!(config.validate().is_err(), "passphrase without ssid");
    }

    #[test]
    fn test_empty_ssid_is_valid_config() {
        let config = Config::default();
        assert!(config.local_link.ssid.is_empty());
        config.validate().expect("empty ssid is not a config error");
    }

    #[test]
    fn test_example_toml_parses_and_validates() {
        let config: Config = toml::from_str(EXAMPLE_TOML).expect("example template");
        config.validate().expect("example template validates");
        assert_eq!(config.local_link.ssid, "site-ap");
        assert_eq!(config.devices.b.host, "192.168.88.1");
        assert_eq!(config.probing.interval, Duration::from_secs(3));
    }
}
