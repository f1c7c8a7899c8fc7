pub mod arch;
pub mod error;
pub mod simulator;

pub use arch::tensorcore;
pub use error::{Error, Result};
pub use simulator::sim::mode::{SimConfig, StepMode};
pub use simulator::utils::log;
