use crate::arch::tensorcore::decoder::DeviceLayout;
use crate::simulator::config::AppConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepMode {
  /// Serve a host over the MMIO socket
  Continuous,
  /// Drive the device by hand from the interactive shell
  Step,
}

#[derive(Debug, Clone)]
pub struct SimConfig {
  pub quiet: bool,
  pub step_mode: StepMode,
  pub trace_file: Option<String>,
  pub layout: DeviceLayout,
  pub server_addr: String,
}

impl SimConfig {
  pub fn from_app_config(config: &AppConfig) -> Self {
    Self {
      quiet: config.simulation.quiet,
      step_mode: if config.simulation.step_mode {
        StepMode::Step
      } else {
        StepMode::Continuous
      },
      trace_file: Some(config.simulation.trace_file.clone()).filter(|f| !f.is_empty()),
      layout: config.device.layout(),
      server_addr: config.server.addr(),
    }
  }
}
