//! Producer side: build an instruction from a GEMM request and stream it to the device

use super::bus::Bus;
use super::decoder::DeviceLayout;
use super::instruction::{
  block_count, check_field, InstructionRecord, MetaDescriptor, OperandDescriptor, OperandRole,
  PackedInstruction, DIM_BITS, INST_TYPE_GEMM, RECORD_WORDS,
};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// `Dout[MxN] = A[MxK] * B[KxN] + Din[MxN]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GemmShape {
  pub m: u64,
  pub n: u64,
  pub k: u64,
}

impl GemmShape {
  pub fn new(m: u64, n: u64, k: u64) -> Self {
    Self { m, n, k }
  }
}

/// Byte addresses of the four operand buffers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperandAddrs {
  pub din: u64,
  pub b: u64,
  pub a: u64,
  pub dout: u64,
}

impl OperandAddrs {
  pub fn get(&self, role: OperandRole) -> u64 {
    match role {
      OperandRole::Din => self.din,
      OperandRole::B => self.b,
      OperandRole::A => self.a,
      OperandRole::Dout => self.dout,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GemmRequest {
  pub shape: GemmShape,
  pub addrs: OperandAddrs,
  pub a_transpose: bool,
  pub b_transpose: bool,
  pub instruction_type: u8,
}

impl GemmRequest {
  pub fn new(shape: GemmShape, addrs: OperandAddrs) -> Self {
    Self {
      shape,
      addrs,
      a_transpose: false,
      b_transpose: false,
      instruction_type: INST_TYPE_GEMM,
    }
  }

  pub fn with_transpose(mut self, a_transpose: bool, b_transpose: bool) -> Self {
    self.a_transpose = a_transpose;
    self.b_transpose = b_transpose;
    self
  }

  /// Validate every field and build the typed record.
  ///
  /// Nothing is truncated: a dimension above `64 * 255`, an opcode wider than
  /// 5 bits, or an operand address that is not a multiple of its role
  /// alignment is an error.
  pub fn to_record(&self) -> Result<InstructionRecord> {
    let dims = [("M", self.shape.m), ("N", self.shape.n), ("K", self.shape.k)];
    let mut blocks = [0u64; 3];
    for (block, (name, dim)) in blocks.iter_mut().zip(dims) {
      if dim == 0 {
        return Err(Error::ZeroDimension { name });
      }
      *block = check_field(name, block_count(dim), DIM_BITS)?;
    }
    let [m_block, n_block, k_block] = blocks;

    let descriptor = |role: OperandRole| {
      let stride_minor = match role {
        OperandRole::A => k_block,
        OperandRole::Din | OperandRole::B | OperandRole::Dout => n_block,
      };
      OperandDescriptor::for_address(role, self.addrs.get(role), stride_minor)
    };

    let record = InstructionRecord {
      din: descriptor(OperandRole::Din)?,
      b: descriptor(OperandRole::B)?,
      a: descriptor(OperandRole::A)?,
      dout: descriptor(OperandRole::Dout)?,
      meta: MetaDescriptor {
        k: k_block as u8,
        n: n_block as u8,
        m: m_block as u8,
        reserved: false,
        if_b_transpose: self.b_transpose,
        if_a_transpose: self.a_transpose,
        instruction_type: self.instruction_type,
      },
    };
    // opcode width is only checked while packing
    record.pack()?;
    Ok(record)
  }

  pub fn encode(&self) -> Result<PackedInstruction> {
    self.to_record()?.pack()
  }
}

/// Streams instructions into a device through a `Bus`
#[derive(Debug)]
pub struct Encoder<B: Bus> {
  bus: B,
  layout: DeviceLayout,
}

impl<B: Bus> Encoder<B> {
  pub fn new(bus: B, layout: DeviceLayout) -> Self {
    Self { bus, layout }
  }

  pub fn layout(&self) -> &DeviceLayout {
    &self.layout
  }

  pub fn bus_mut(&mut self) -> &mut B {
    &mut self.bus
  }

  pub fn into_inner(self) -> B {
    self.bus
  }

  /// Write words 0..=4 in order, one 64-bit store each.
  ///
  /// A compiler barrier follows every store and a full memory barrier follows
  /// the last one: the device may only see the trigger word after words 0..=3.
  pub fn send_instruction(&mut self, inst: &PackedInstruction) -> Result<()> {
    // every word address must exist before the first store goes out
    let mut addrs = [0u64; RECORD_WORDS];
    for (i, addr) in addrs.iter_mut().enumerate() {
      *addr = self.layout.addr_of((i * 8) as u64)?;
    }
    for (i, (addr, word)) in addrs.into_iter().zip(inst.words()).enumerate() {
      self.bus.write_u64(addr, *word)?;
      self.bus.compiler_barrier();
      log::debug!("send word[{}] -> {:#x}: {:#018x}", i, addr, word);
    }
    self.bus.memory_barrier();
    log::debug!("sent {} words to {:#x}", RECORD_WORDS, self.layout.base_addr);
    Ok(())
  }

  /// One 64-bit load of the status register, returned uninterpreted
  pub fn load_state(&mut self) -> Result<u64> {
    let addr = self.layout.status_addr()?;
    self.bus.read_u64(addr)
  }

  /// Encode, send and read back the status. Nothing reaches the bus if the
  /// request does not encode.
  pub fn submit(&mut self, req: &GemmRequest) -> Result<u64> {
    let inst = req.encode()?;
    self.layout.status_addr()?;
    let record = inst.unpack();
    log::info!(
      "submit GEMM M={} N={} K={} -> M_block={} N_block={} K_block={}",
      req.shape.m,
      req.shape.n,
      req.shape.k,
      record.meta.m,
      record.meta.n,
      record.meta.k
    );
    for role in OperandRole::ALL {
      let desc = record.operand(role);
      log::debug!(
        "{}: stride_minor={} stride_major={} base_addr={:#08x} real_addr={:#x}",
        role,
        desc.stride_minor,
        desc.stride_major,
        desc.base_addr,
        req.addrs.get(role)
      );
    }
    self.send_instruction(&inst)?;
    let state = self.load_state()?;
    log::info!("tensorcore state: {:016x}", state);
    Ok(state)
  }
}
