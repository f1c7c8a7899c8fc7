use crate::arch::tensorcore::decoder::{DeviceLayout, INSTRUCTION_WINDOW_LEN};
use crate::simulator::server::socket::protocol::{SOCKET_HOST, SOCKET_MMIO_PORT};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;

/// Built-in defaults, compiled into the binary
pub const DEFAULT_CONFIG: &str = include_str!("default.toml");

/// Prefix of environment variables that override configuration keys,
/// e.g. `TENSORCORE_SERVER__PORT=7000`
pub const ENV_PREFIX: &str = "TENSORCORE";

/// Device placement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct DeviceSection {
  pub base_addr: u64,
  pub status_offset: u64,
}

impl Default for DeviceSection {
  fn default() -> Self {
    let layout = DeviceLayout::default();
    Self {
      base_addr: layout.base_addr,
      status_offset: layout.status_offset,
    }
  }
}

impl DeviceSection {
  pub fn layout(&self) -> DeviceLayout {
    DeviceLayout {
      base_addr: self.base_addr,
      status_offset: self.status_offset,
    }
  }
}

/// MMIO socket server
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ServerSection {
  #[serde(default = "default_host")]
  pub host: String,
  #[serde(default = "default_port")]
  pub port: u16,
}

fn default_host() -> String {
  SOCKET_HOST.to_string()
}

fn default_port() -> u16 {
  SOCKET_MMIO_PORT
}

impl Default for ServerSection {
  fn default() -> Self {
    Self {
      host: default_host(),
      port: default_port(),
    }
  }
}

impl ServerSection {
  pub fn addr(&self) -> String {
    format!("{}:{}", self.host, self.port)
  }
}

/// Simulation options
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct SimulationSection {
  #[serde(default)]
  pub quiet: bool,
  #[serde(default)]
  pub step_mode: bool,
  #[serde(default)]
  pub trace_file: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct AppConfig {
  #[serde(default)]
  pub device: DeviceSection,
  #[serde(default)]
  pub server: ServerSection,
  #[serde(default)]
  pub simulation: SimulationSection,
}

impl AppConfig {
  pub fn to_toml(&self) -> io::Result<String> {
    toml::to_string_pretty(self).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
  }
}

/// CLI flags that override whatever the files and environment said
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
  pub quiet: bool,
  pub step: bool,
  pub trace_file: Option<String>,
  pub port: Option<u16>,
  pub base_addr: Option<u64>,
}

/// Parse the built-in defaults
pub fn load_default_config() -> io::Result<AppConfig> {
  toml::from_str::<AppConfig>(DEFAULT_CONFIG)
    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("failed to parse default config: {}", e)))
}

/// Load a single TOML file, missing keys take their defaults
pub fn load_config_file(path: &Path) -> io::Result<AppConfig> {
  let content = std::fs::read_to_string(path)
    .map_err(|e| io::Error::new(io::ErrorKind::NotFound, format!("cannot read config file {:?}: {}", path, e)))?;

  toml::from_str::<AppConfig>(&content)
    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("failed to parse TOML config: {}", e)))
}

/// Defaults, then the optional user file, then `TENSORCORE_*` variables
fn load_layered(custom_config_path: Option<&Path>) -> io::Result<AppConfig> {
  let mut builder = config::Config::builder()
    .add_source(config::File::from_str(DEFAULT_CONFIG, config::FileFormat::Toml));

  if let Some(path) = custom_config_path {
    builder = builder.add_source(
      config::File::from(path.to_path_buf())
        .format(config::FileFormat::Toml)
        .required(true),
    );
  }

  builder = builder.add_source(
    config::Environment::with_prefix(ENV_PREFIX)
      .prefix_separator("_")
      .separator("__")
      .try_parsing(true),
  );

  builder
    .build()
    .and_then(|c| c.try_deserialize::<AppConfig>())
    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("failed to load config: {}", e)))
}

pub fn apply_cli_overrides(config: &mut AppConfig, overrides: &CliOverrides) {
  if overrides.quiet {
    config.simulation.quiet = true;
  }
  if overrides.step {
    config.simulation.step_mode = true;
  }
  if let Some(file) = &overrides.trace_file {
    config.simulation.trace_file = file.clone();
  }
  if let Some(port) = overrides.port {
    config.server.port = port;
  }
  if let Some(base_addr) = overrides.base_addr {
    config.device.base_addr = base_addr;
  }
}

pub fn validate_config(config: &AppConfig) -> io::Result<()> {
  let invalid = |msg: String| Err(io::Error::new(io::ErrorKind::InvalidData, msg));

  if config.device.base_addr % 8 != 0 {
    return invalid(format!("base_addr {:#x} must be 8-byte aligned", config.device.base_addr));
  }
  if config.device.status_offset < INSTRUCTION_WINDOW_LEN {
    return invalid(format!(
      "status_offset {:#x} overlaps the instruction window [0, {:#x})",
      config.device.status_offset, INSTRUCTION_WINDOW_LEN
    ));
  }
  if config.device.status_offset % 8 != 0 {
    return invalid(format!("status_offset {:#x} must be 8-byte aligned", config.device.status_offset));
  }
  if config.device.base_addr.checked_add(config.device.status_offset).is_none() {
    return invalid("status register address overflows u64".to_string());
  }
  if config.server.host.trim().is_empty() {
    return invalid("server host cannot be empty".to_string());
  }
  Ok(())
}

/// Load and merge configuration
///
/// 1. built-in defaults
/// 2. custom configuration file, if given
/// 3. `TENSORCORE_*` environment variables
/// 4. CLI overrides
/// 5. validation
pub fn load_and_merge_configs(custom_config_path: Option<&Path>, overrides: &CliOverrides) -> io::Result<AppConfig> {
  let mut config = load_layered(custom_config_path)?;
  apply_cli_overrides(&mut config, overrides);
  validate_config(&config)?;
  Ok(config)
}
