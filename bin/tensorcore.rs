use clap::Parser;
use std::path::PathBuf;
use tensorcore::simulator::config::{load_and_merge_configs, CliOverrides};
use tensorcore::simulator::utils::log::init_log;
use tensorcore::simulator::Simulator;

fn parse_addr(s: &str) -> Result<u64, String> {
  let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
    Some(hex) => u64::from_str_radix(&hex.replace('_', ""), 16),
    None => s.parse::<u64>(),
  };
  parsed.map_err(|e| format!("invalid address '{}': {}", s, e))
}

/// TensorCore - GEMM accelerator MMIO device model
#[derive(Parser, Debug)]
#[command(name = "tensorcore")]
#[command(version = "0.1.0")]
#[command(about = "Register-mapped GEMM instruction decoder served over an MMIO socket", long_about = None)]
struct Args {
  /// Custom TOML configuration file
  #[arg(short, long, value_name = "FILE")]
  config: Option<PathBuf>,

  /// Enable step mode (interactive shell instead of the socket server)
  #[arg(short, long)]
  step: bool,

  /// Quiet mode (suppress log messages)
  #[arg(short, long)]
  quiet: bool,

  /// Output trace file path
  #[arg(long, value_name = "FILE")]
  trace_file: Option<String>,

  /// MMIO socket port
  #[arg(short, long)]
  port: Option<u16>,

  /// Device base address, hex with 0x prefix or decimal
  #[arg(long, value_name = "ADDR", value_parser = parse_addr)]
  base_addr: Option<u64>,

  /// Print the merged configuration and exit
  #[arg(long)]
  dump_config: bool,
}

fn main() -> std::io::Result<()> {
  init_log();

  let args = Args::parse();

  let overrides = CliOverrides {
    quiet: args.quiet,
    step: args.step,
    trace_file: args.trace_file,
    port: args.port,
    base_addr: args.base_addr,
  };
  let config = load_and_merge_configs(args.config.as_deref(), &overrides)?;

  if args.dump_config {
    print!("{}", config.to_toml()?);
    return Ok(());
  }

  let mut simulator = Simulator::from_app_config(&config)?;

  simulator.run()
}
