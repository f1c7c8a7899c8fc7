use super::server::socket::{serve_client, MmioServer};
use super::sim::mode::{SimConfig, StepMode};
use super::sim::shell::{Command, Shell, HELP};
use super::sim::trace::TraceWriter;
use super::utils::log::set_quiet;
use super::utils::report::print_records;
use crate::arch::tensorcore::bus::DeviceBus;
use crate::arch::tensorcore::decoder::TensorCore;
use crate::arch::tensorcore::encoder::{Encoder, GemmRequest};
use crate::log_info;
use crate::simulator::config::AppConfig;
use std::io::Result;
use std::path::Path;

pub struct Simulator {
  config: SimConfig,
  device: TensorCore,
  trace: Option<TraceWriter>,
  traced_seq: u64,
}

impl Simulator {
  pub fn new(config: SimConfig) -> Result<Self> {
    let trace = match &config.trace_file {
      Some(path) => {
        log::info!("Writing access trace to {}", path);
        Some(TraceWriter::create(Path::new(path))?)
      },
      None => None,
    };
    let device = TensorCore::new(config.layout);
    Ok(Self {
      config,
      device,
      trace,
      traced_seq: 0,
    })
  }

  pub fn from_app_config(config: &AppConfig) -> Result<Self> {
    Self::new(SimConfig::from_app_config(config))
  }

  pub fn device(&self) -> &TensorCore {
    &self.device
  }

  pub fn run(&mut self) -> Result<()> {
    set_quiet(self.config.quiet);
    match self.config.step_mode {
      StepMode::Continuous => self.run_continuous(),
      StepMode::Step => self.run_step_mode(),
    }
  }

  /// Serve hosts one after another. Returns only when accepting a connection fails.
  fn run_continuous(&mut self) -> Result<()> {
    let server = MmioServer::bind(self.config.server_addr.as_str())?;
    log::info!("Socket server listening on {}", server.local_addr()?);
    loop {
      self.serve_next(&server)?;
    }
  }

  /// Accept one host and serve it. A failed session is logged and does not
  /// end the simulator; a failed accept does.
  pub fn serve_next(&mut self, server: &MmioServer) -> Result<()> {
    log::info!("Waiting for host connection...");
    let (mut stream, addr) = server.accept()?;
    match serve_client(&mut stream, &mut self.device, self.trace.as_mut()) {
      Ok(served) => log::info!("Host {} disconnected after {} requests", addr, served),
      Err(e) => log::error!("session with {} ended: {}", addr, e),
    }
    if !self.config.quiet {
      print_records(&self.device);
    }
    Ok(())
  }

  fn run_step_mode(&mut self) -> Result<()> {
    println!("Step mode - type 'help' for commands, 'q' to quit");
    let mut shell = Shell::new()?;
    loop {
      let cmd = shell.read_command()?;
      if cmd == Command::Quit {
        break;
      }
      self.execute(cmd)?;
    }
    print_records(&self.device);
    Ok(())
  }

  /// Run one shell command against the local device. Access errors are
  /// reported and the shell keeps going.
  pub fn execute(&mut self, cmd: Command) -> Result<()> {
    let count_before = self.device.instruction_count();
    match cmd {
      Command::Read { offset, len } => match self.device.read_value(offset, len) {
        Ok(value) => println!("{:#018x}", value),
        Err(e) => eprintln!("Error: {}", e),
      },
      Command::Write { offset, len, value } => {
        if let Err(e) = self.device.write_value(offset, len, value) {
          eprintln!("Error: {}", e);
        }
      },
      Command::Gemm(req) => self.submit_local(&req),
      Command::Status => println!("status: {:#018x}", self.device.status()),
      Command::Records => print_records(&self.device),
      Command::Reset => self.device.reset(),
      Command::Help => println!("{}", HELP),
      Command::Quit => {},
    }
    self.trace_since(count_before)
  }

  fn submit_local(&mut self, req: &GemmRequest) {
    let layout = *self.device.layout();
    let mut encoder = Encoder::new(DeviceBus::new(&mut self.device), layout);
    match req.encode() {
      Ok(inst) => log_info!("instruction:\n{}", inst.hex_dump()),
      Err(e) => {
        eprintln!("Error: {}", e);
        return;
      },
    }
    match encoder.submit(req) {
      Ok(state) => log_info!("tensorcore state: {:016x}", state),
      Err(e) => eprintln!("Error: {}", e),
    }
  }

  /// Step mode traces after each command; the socket server traces per request
  fn trace_since(&mut self, count_before: u64) -> Result<()> {
    let Some(trace) = self.trace.as_mut() else {
      return Ok(());
    };
    let traced_seq = self.traced_seq;
    for record in self.device.records().filter(|r| r.seq > traced_seq) {
      trace.access(record)?;
    }
    if let Some(record) = self.device.records().last() {
      self.traced_seq = record.seq;
    }
    if self.device.instruction_count() > count_before {
      if let Some(inst) = self.device.last_instruction() {
        trace.instruction(inst)?;
      }
    }
    Ok(())
  }
}
