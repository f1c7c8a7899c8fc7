//! Register-mapped instruction decoder of the tensorcore device
//!
//! The host streams one instruction as five 64-bit stores into the instruction
//! window. The 8-byte store to the last word decodes the buffer, runs the
//! executor and acknowledges through the status register, all inside the
//! `write` call that delivered it.

use super::instruction::{
  InstructionRecord, OperandRole, PackedInstruction, META_WORD, RECORD_BYTES, RECORD_WORDS,
};
use super::status::StatusRegister;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Length of the instruction window, starting at offset 0
pub const INSTRUCTION_WINDOW_LEN: u64 = RECORD_BYTES as u64;
/// Offset of the trigger word inside the instruction window
pub const TRIGGER_OFFSET: u64 = (META_WORD * 8) as u64;

pub const DEFAULT_BASE_ADDR: u64 = 0xD000_1000;
pub const DEFAULT_STATUS_OFFSET: u64 = 0x1000;

/// Access records kept for reporting; older ones are dropped
pub const RECORD_LIMIT: usize = 1024;

const ALL_WORDS_WRITTEN: u8 = (1 << RECORD_WORDS) - 1;
const LOW_HALF: u64 = 0xFFFF_FFFF;

/// Placement of the device in the host address space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceLayout {
  pub base_addr: u64,
  pub status_offset: u64,
}

impl Default for DeviceLayout {
  fn default() -> Self {
    Self {
      base_addr: DEFAULT_BASE_ADDR,
      status_offset: DEFAULT_STATUS_OFFSET,
    }
  }
}

impl DeviceLayout {
  /// Absolute host address of device offset `offset`
  pub fn addr_of(&self, offset: u64) -> Result<u64> {
    self
      .base_addr
      .checked_add(offset)
      .ok_or(Error::InvalidOffset { offset, len: 8 })
  }

  pub fn status_addr(&self) -> Result<u64> {
    self.addr_of(self.status_offset)
  }

  /// Translate an absolute host address into a device offset
  pub fn offset_of(&self, addr: u64, len: usize) -> Result<u64> {
    addr
      .checked_sub(self.base_addr)
      .ok_or(Error::InvalidOffset { offset: addr, len })
  }
}

/// Width of a single bus access
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessWidth {
  Word32,
  Word64,
}

impl AccessWidth {
  pub fn from_len(offset: u64, len: usize) -> Result<Self> {
    match len {
      4 => Ok(AccessWidth::Word32),
      8 => Ok(AccessWidth::Word64),
      _ => Err(Error::InvalidWidth { offset, len }),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Region {
  Instruction { word: usize },
  Status,
}

/// Assembly progress of the current instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
  Idle,
  /// Bit `i` set once word `i` received an 8-byte store
  Filling { written: u8 },
}

impl DecoderState {
  pub fn words_written(&self) -> u32 {
    match self {
      DecoderState::Idle => 0,
      DecoderState::Filling { written } => written.count_ones(),
    }
  }
}

#[derive(Debug, Clone, Copy, Default)]
struct AssemblyBuffer {
  words: [u64; RECORD_WORDS],
  valid: bool,
}

/// An instruction as seen by the device after the trigger word arrived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedInstruction {
  /// 1-based position in the device's instruction stream
  pub seq: u64,
  pub record: InstructionRecord,
  /// High half of the meta word as received; ignored by the device
  pub padding: u32,
  pub din_addr: u64,
  pub b_addr: u64,
  pub a_addr: u64,
  pub dout_addr: u64,
}

impl DecodedInstruction {
  pub fn decode(seq: u64, packed: &PackedInstruction) -> Self {
    let record = packed.unpack();
    Self {
      seq,
      record,
      padding: packed.padding(),
      din_addr: record.real_addr(OperandRole::Din),
      b_addr: record.real_addr(OperandRole::B),
      a_addr: record.real_addr(OperandRole::A),
      dout_addr: record.real_addr(OperandRole::Dout),
    }
  }

  pub fn addr(&self, role: OperandRole) -> u64 {
    match role {
      OperandRole::Din => self.din_addr,
      OperandRole::B => self.b_addr,
      OperandRole::A => self.a_addr,
      OperandRole::Dout => self.dout_addr,
    }
  }
}

impl fmt::Display for DecodedInstruction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let meta = &self.record.meta;
    writeln!(f, "GEMM instruction #{}", self.seq)?;
    writeln!(f, "  type={} M={} N={} K={}", meta.instruction_type, meta.m, meta.n, meta.k)?;
    writeln!(f, "  transpose: A={} B={}", meta.if_a_transpose as u8, meta.if_b_transpose as u8)?;
    for role in OperandRole::ALL {
      let desc = self.record.operand(role);
      writeln!(
        f,
        "  {:<4} base={:#08x} stride_minor={} stride_major={} addr={:#018x}",
        role.name(),
        desc.base_addr,
        desc.stride_minor,
        desc.stride_major,
        self.addr(role)
      )?;
    }
    Ok(())
  }
}

/// Action run when a complete instruction has been received
pub trait Executor {
  fn execute(&mut self, inst: &DecodedInstruction);
}

/// Default executor: the device only reports what it would compute
#[derive(Debug, Default, Clone, Copy)]
pub struct LogExecutor;

impl Executor for LogExecutor {
  fn execute(&mut self, inst: &DecodedInstruction) {
    log::info!("[TensorCore] {}", inst.to_string().trim_end());
  }
}

impl<F> Executor for F
where
  F: FnMut(&DecodedInstruction),
{
  fn execute(&mut self, inst: &DecodedInstruction) {
    self(inst)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessKind {
  Read,
  Write,
}

/// One bus access as observed by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRecord {
  pub seq: u64,
  pub kind: AccessKind,
  pub offset: u64,
  pub len: usize,
  pub value: u64,
  pub ok: bool,
  /// Set on the write that triggered execution
  pub triggered: bool,
}

/// Plugin-style access contract: `false` means the access was rejected
pub trait MmioDevice {
  fn load(&mut self, offset: u64, bytes: &mut [u8]) -> bool;
  fn store(&mut self, offset: u64, bytes: &[u8]) -> bool;
}

/// Device model of the GEMM accelerator front end
pub struct TensorCore {
  layout: DeviceLayout,
  buffer: AssemblyBuffer,
  state: DecoderState,
  status: StatusRegister,
  instruction_count: u64,
  last_instruction: Option<DecodedInstruction>,
  executor: Box<dyn Executor + Send>,
  records: VecDeque<AccessRecord>,
  access_seq: u64,
}

impl fmt::Debug for TensorCore {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TensorCore")
      .field("layout", &self.layout)
      .field("state", &self.state)
      .field("status", &format_args!("{:#x}", self.status.get()))
      .field("instruction_count", &self.instruction_count)
      .finish()
  }
}

impl Default for TensorCore {
  fn default() -> Self {
    Self::new(DeviceLayout::default())
  }
}

impl TensorCore {
  pub fn new(layout: DeviceLayout) -> Self {
    log::info!(
      "[TensorCore] GEMM device initialized: base={:#x}, status offset={:#x}",
      layout.base_addr,
      layout.status_offset
    );
    Self {
      layout,
      buffer: AssemblyBuffer::default(),
      state: DecoderState::Idle,
      status: StatusRegister::new(),
      instruction_count: 0,
      last_instruction: None,
      executor: Box::new(LogExecutor),
      records: VecDeque::new(),
      access_seq: 0,
    }
  }

  pub fn with_executor<E>(mut self, executor: E) -> Self
  where
    E: Executor + Send + 'static,
  {
    self.executor = Box::new(executor);
    self
  }

  pub fn layout(&self) -> &DeviceLayout {
    &self.layout
  }

  pub fn state(&self) -> DecoderState {
    self.state
  }

  /// Validity flag of the assembly buffer; only ever observed set inside a trigger
  pub fn is_valid(&self) -> bool {
    self.buffer.valid
  }

  pub fn status(&self) -> u64 {
    self.status.get()
  }

  pub fn instruction_count(&self) -> u64 {
    self.instruction_count
  }

  pub fn last_instruction(&self) -> Option<&DecodedInstruction> {
    self.last_instruction.as_ref()
  }

  /// Raw assembly buffer contents, for diagnostics
  pub fn buffer_words(&self) -> [u64; RECORD_WORDS] {
    self.buffer.words
  }

  pub fn records(&self) -> impl Iterator<Item = &AccessRecord> {
    self.records.iter()
  }

  /// Back to power-on state. Access records survive a reset.
  pub fn reset(&mut self) {
    self.buffer = AssemblyBuffer::default();
    self.state = DecoderState::Idle;
    self.status.clear();
    self.instruction_count = 0;
    self.last_instruction = None;
    log::info!("[TensorCore] reset");
  }

  fn region(&self, offset: u64, len: usize) -> Result<Region> {
    if offset < INSTRUCTION_WINDOW_LEN {
      if offset % 8 != 0 {
        return Err(Error::InvalidWidth { offset, len });
      }
      return Ok(Region::Instruction {
        word: (offset / 8) as usize,
      });
    }
    if offset == self.layout.status_offset {
      return Ok(Region::Status);
    }
    Err(Error::InvalidOffset { offset, len })
  }

  /// Serve a load of `bytes.len()` bytes at `offset`
  pub fn read(&mut self, offset: u64, bytes: &mut [u8]) -> Result<()> {
    let result = self.try_read(offset, bytes.len());
    let value = *result.as_ref().unwrap_or(&0);
    self.record(AccessKind::Read, offset, bytes.len(), value, result.is_ok(), false);
    match result {
      Ok(value) => {
        bytes.copy_from_slice(&value.to_le_bytes()[..bytes.len()]);
        Ok(())
      },
      Err(e) => {
        log::warn!("[TensorCore] Invalid read: {}", e);
        Err(e)
      },
    }
  }

  /// Read `len` bytes at `offset` and return them zero-extended
  pub fn read_value(&mut self, offset: u64, len: usize) -> Result<u64> {
    let mut bytes = [0u8; 8];
    if len > bytes.len() {
      return self.reject(AccessKind::Read, offset, Error::InvalidWidth { offset, len });
    }
    self.read(offset, &mut bytes[..len])?;
    Ok(u64::from_le_bytes(bytes))
  }

  fn try_read(&self, offset: u64, len: usize) -> Result<u64> {
    let region = self.region(offset, len)?;
    let width = AccessWidth::from_len(offset, len)?;
    let value = match region {
      Region::Instruction { word } => self.buffer.words[word],
      Region::Status => {
        log::debug!("[TensorCore] Read status: {:#018x}", self.status.get());
        self.status.get()
      },
    };
    Ok(match width {
      AccessWidth::Word32 => value & LOW_HALF,
      AccessWidth::Word64 => value,
    })
  }

  /// Serve a store of `bytes` at `offset`. Rejected stores change nothing.
  pub fn write(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
    let mut raw = [0u8; 8];
    let len = bytes.len();
    if len <= raw.len() {
      raw[..len].copy_from_slice(bytes);
    }
    let value = u64::from_le_bytes(raw);

    let result = self.try_write(offset, len, value);
    let triggered = matches!(result, Ok(true));
    self.record(AccessKind::Write, offset, len, value, result.is_ok(), triggered);
    match result {
      Ok(_) => Ok(()),
      Err(e) => {
        log::warn!("[TensorCore] Invalid write: {}", e);
        Err(e)
      },
    }
  }

  /// Store the low `len` bytes of `value` at `offset`
  pub fn write_value(&mut self, offset: u64, len: usize, value: u64) -> Result<()> {
    let bytes = value.to_le_bytes();
    if len > bytes.len() {
      return self.reject(AccessKind::Write, offset, Error::InvalidWidth { offset, len });
    }
    self.write(offset, &bytes[..len])
  }

  fn reject<T>(&mut self, kind: AccessKind, offset: u64, err: Error) -> Result<T> {
    let len = match err {
      Error::InvalidWidth { len, .. } | Error::InvalidOffset { len, .. } => len,
      _ => 0,
    };
    self.record(kind, offset, len, 0, false, false);
    log::warn!("[TensorCore] Invalid access: {}", err);
    Err(err)
  }

  /// Returns whether the store triggered execution
  fn try_write(&mut self, offset: u64, len: usize, value: u64) -> Result<bool> {
    let region = self.region(offset, len)?;
    let width = AccessWidth::from_len(offset, len)?;
    match (region, width) {
      (Region::Instruction { word }, AccessWidth::Word64) => {
        self.buffer.words[word] = value;
        log::debug!("[TensorCore] Write instruction[{}] = {:#018x}", word, value);
        let written = match self.state {
          DecoderState::Idle => 0,
          DecoderState::Filling { written } => written,
        } | (1 << word);
        self.state = DecoderState::Filling { written };
        if word == META_WORD {
          self.trigger(written);
          return Ok(true);
        }
      },
      (Region::Instruction { word }, AccessWidth::Word32) => {
        let old = self.buffer.words[word];
        self.buffer.words[word] = (old & !LOW_HALF) | (value & LOW_HALF);
        log::debug!("[TensorCore] Write instruction[{}][31:0] = {:#010x}", word, value & LOW_HALF);
      },
      (Region::Status, AccessWidth::Word64) => {
        self.status.set(value);
        log::debug!("[TensorCore] Status register written: {:#018x}", value);
      },
      (Region::Status, AccessWidth::Word32) => {
        self.status.set_low(value as u32);
        log::debug!("[TensorCore] Status register written (low 32): {:#010x}", value as u32);
      },
    }
    Ok(false)
  }

  fn trigger(&mut self, written: u8) {
    self.buffer.valid = true;
    if written != ALL_WORDS_WRITTEN {
      let missing: Vec<usize> = (0..RECORD_WORDS).filter(|i| written & (1 << i) == 0).collect();
      log::warn!(
        "[TensorCore] Trigger word received but words {:?} were not written since the last instruction",
        missing
      );
    }

    let packed = PackedInstruction::from_words(self.buffer.words);
    let decoded = DecodedInstruction::decode(self.instruction_count + 1, &packed);
    if decoded.padding != 0 {
      log::debug!("[TensorCore] Ignoring non-zero padding {:#010x}", decoded.padding);
    }

    self.executor.execute(&decoded);

    self.status.mark_received();
    self.instruction_count += 1;
    self.last_instruction = Some(decoded);
    self.buffer.valid = false;
    self.state = DecoderState::Idle;
    log::info!("[TensorCore] Instruction executed (count: {})", self.instruction_count);
  }

  fn record(&mut self, kind: AccessKind, offset: u64, len: usize, value: u64, ok: bool, triggered: bool) {
    self.access_seq += 1;
    if self.records.len() == RECORD_LIMIT {
      self.records.pop_front();
    }
    self.records.push_back(AccessRecord {
      seq: self.access_seq,
      kind,
      offset,
      len,
      value,
      ok,
      triggered,
    });
  }
}

impl MmioDevice for TensorCore {
  fn load(&mut self, offset: u64, bytes: &mut [u8]) -> bool {
    self.read(offset, bytes).is_ok()
  }

  fn store(&mut self, offset: u64, bytes: &[u8]) -> bool {
    self.write(offset, bytes).is_ok()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::arch::tensorcore::status::STATUS_RECEIVED;
  use std::sync::{Arc, Mutex};

  fn recording_device() -> (TensorCore, Arc<Mutex<Vec<DecodedInstruction>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let device = TensorCore::default().with_executor(move |inst: &DecodedInstruction| {
      sink.lock().unwrap().push(*inst);
    });
    (device, seen)
  }

  #[test]
  fn test_first_four_words_do_not_trigger() {
    let (mut dev, seen) = recording_device();
    for (i, offset) in [0x00u64, 0x08, 0x10, 0x18].into_iter().enumerate() {
      dev.write(offset, &(i as u64 + 1).to_le_bytes()).unwrap();
      assert!(!dev.is_valid());
      assert_eq!(dev.state().words_written(), i as u32 + 1);
    }
    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(dev.status(), 0);
    assert_eq!(dev.instruction_count(), 0);
  }

  #[test]
  fn test_trigger_word_executes_once() {
    let (mut dev, seen) = recording_device();
    for offset in (0..INSTRUCTION_WINDOW_LEN).step_by(8) {
      dev.write(offset, &0u64.to_le_bytes()).unwrap();
    }
    assert_eq!(seen.lock().unwrap().len(), 1);
    assert_eq!(dev.state(), DecoderState::Idle);
    assert!(!dev.is_valid());
    assert_eq!(dev.status(), STATUS_RECEIVED);
    assert_eq!(dev.instruction_count(), 1);
    assert!(dev.records().last().unwrap().triggered);
  }

  #[test]
  fn test_narrow_write_never_triggers() {
    let (mut dev, seen) = recording_device();
    dev.write(TRIGGER_OFFSET, &0xFFFF_FFFF_0000_0000u64.to_le_bytes()).unwrap();
    assert_eq!(seen.lock().unwrap().len(), 1);

    dev.write(TRIGGER_OFFSET, &0x1234_5678u32.to_le_bytes()).unwrap();
    assert_eq!(seen.lock().unwrap().len(), 1);
    assert_eq!(dev.buffer_words()[META_WORD], 0xFFFF_FFFF_1234_5678);

    dev.write(0x08, &0xAAAA_BBBBu32.to_le_bytes()).unwrap();
    assert_eq!(dev.buffer_words()[1], 0xAAAA_BBBB);
    assert_eq!(dev.instruction_count(), 1);
  }

  #[test]
  fn test_rejected_writes_leave_state_unchanged() {
    let (mut dev, seen) = recording_device();
    dev.write(0x00, &0x55u64.to_le_bytes()).unwrap();
    let words = dev.buffer_words();
    let state = dev.state();

    assert!(matches!(dev.write(0x04, &[0u8; 8]), Err(Error::InvalidWidth { offset: 0x04, len: 8 })));
    assert!(matches!(dev.write(0x21, &[0u8; 4]), Err(Error::InvalidWidth { .. })));
    assert!(matches!(dev.write(0x28, &[0u8; 8]), Err(Error::InvalidOffset { offset: 0x28, .. })));
    assert!(matches!(dev.write(0x800, &[0u8; 8]), Err(Error::InvalidOffset { .. })));
    assert!(matches!(dev.write(0x20, &[0u8; 2]), Err(Error::InvalidWidth { len: 2, .. })));
    assert!(matches!(dev.write(0x20, &[0u8; 16]), Err(Error::InvalidWidth { len: 16, .. })));
    assert!(matches!(dev.write(DEFAULT_STATUS_OFFSET, &[1u8; 1]), Err(Error::InvalidWidth { .. })));

    assert_eq!(dev.buffer_words(), words);
    assert_eq!(dev.state(), state);
    assert_eq!(dev.status(), 0);
    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(dev.records().filter(|r| !r.ok).count(), 7);
  }

  #[test]
  fn test_status_round_trip() {
    let mut dev = TensorCore::default();
    dev.write_value(DEFAULT_STATUS_OFFSET, 8, 0x0123_4567_89AB_CDEF).unwrap();
    assert_eq!(dev.read_value(DEFAULT_STATUS_OFFSET, 8).unwrap(), 0x0123_4567_89AB_CDEF);
    assert_eq!(dev.read_value(DEFAULT_STATUS_OFFSET, 4).unwrap(), 0x89AB_CDEF);

    dev.write_value(DEFAULT_STATUS_OFFSET, 4, 0x1).unwrap();
    assert_eq!(dev.read_value(DEFAULT_STATUS_OFFSET, 8).unwrap(), 0x0123_4567_0000_0001);
  }

  #[test]
  fn test_debug_readback_of_instruction_window() {
    let mut dev = TensorCore::default();
    dev.write_value(0x10, 8, 0xCAFE_F00D_DEAD_BEEF).unwrap();
    assert_eq!(dev.read_value(0x10, 8).unwrap(), 0xCAFE_F00D_DEAD_BEEF);
    assert_eq!(dev.read_value(0x10, 4).unwrap(), 0xDEAD_BEEF);
    assert!(dev.read_value(0x14, 4).is_err());
    assert!(dev.read_value(0x28, 8).is_err());
    assert!(dev.read_value(0x10, 2).is_err());
  }

  #[test]
  fn test_mmio_device_boolean_contract() {
    let mut dev = TensorCore::default();
    let mut buf = [0u8; 8];
    assert!(dev.store(0x00, &[0u8; 8]));
    assert!(!dev.store(0x03, &[0u8; 8]));
    assert!(dev.load(DEFAULT_STATUS_OFFSET, &mut buf));
    assert!(!dev.load(0x30, &mut buf));
  }

  #[test]
  fn test_reset_clears_buffer_and_status() {
    let mut dev = TensorCore::default();
    for offset in (0..INSTRUCTION_WINDOW_LEN).step_by(8) {
      dev.write_value(offset, 8, 0x7).unwrap();
    }
    assert_eq!(dev.instruction_count(), 1);
    dev.reset();
    assert_eq!(dev.buffer_words(), [0; RECORD_WORDS]);
    assert_eq!(dev.status(), 0);
    assert_eq!(dev.instruction_count(), 0);
    assert!(dev.last_instruction().is_none());
  }

  #[test]
  fn test_layout_offset_translation() {
    let layout = DeviceLayout::default();
    assert_eq!(layout.offset_of(0xD000_1020, 8).unwrap(), 0x20);
    assert_eq!(layout.status_addr().unwrap(), 0xD000_2000);
    assert!(matches!(layout.offset_of(0x1000, 8), Err(Error::InvalidOffset { .. })));
  }

  #[test]
  fn test_layout_at_top_of_address_space() {
    let layout = DeviceLayout {
      base_addr: u64::MAX - 4,
      status_offset: DEFAULT_STATUS_OFFSET,
    };
    assert!(matches!(layout.status_addr(), Err(Error::InvalidOffset { .. })));
    assert!(layout.addr_of(TRIGGER_OFFSET).is_err());
    assert_eq!(layout.addr_of(0).unwrap(), u64::MAX - 4);

    let mut dev = TensorCore::new(layout);
    dev.write_value(0x00, 8, 0x1).unwrap();
    assert_eq!(dev.read_value(0x00, 8).unwrap(), 0x1);
  }
}
