//! Global logging configuration

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Once;

static ENABLE_LOG: AtomicBool = AtomicBool::new(true);
static INIT: Once = Once::new();

/// Set logging enabled
pub fn set_log(enabled: bool) {
  ENABLE_LOG.store(enabled, Ordering::Relaxed);
}

/// Check if logging is enabled, default is true
pub fn is_log_enabled() -> bool {
  ENABLE_LOG.load(Ordering::Relaxed)
}

/// Install the env_logger backend. Level defaults to `info`, `RUST_LOG` wins.
/// Safe to call more than once.
pub fn init_log() {
  INIT.call_once(|| {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
      .format(|buf, record| writeln!(buf, "[{}] {}", record.level(), record.args()))
      .is_test(cfg!(test))
      .try_init();
  });
}

/// Quiet mode: only warnings and errors reach the log
pub fn set_quiet(quiet: bool) {
  set_log(!quiet);
  if quiet {
    log::set_max_level(log::LevelFilter::Warn);
  }
}

/// Print a trace line with blue [Log] prefix, honouring the global flag
#[macro_export]
macro_rules! log_info {
  ($($arg:tt)*) => {
    if $crate::simulator::utils::log::is_log_enabled() {
      println!("\x1b[34m[Log]\x1b[0m {}", format!($($arg)*));
    }
  };
}
