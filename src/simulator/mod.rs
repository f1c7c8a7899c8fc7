pub mod config;
pub mod server;
pub mod sim;
pub mod simulator;
pub mod utils;

pub use simulator::Simulator;
pub use utils::log;
