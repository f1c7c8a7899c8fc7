//! Packed GEMM instruction format
//!
//! One instruction is 320 bits (5 little-endian u64 words):
//!
//! | word | content |
//! |------|---------|
//! | 0 | Din operand descriptor |
//! | 1 | B operand descriptor |
//! | 2 | A operand descriptor |
//! | 3 | Dout operand descriptor |
//! | 4 | meta descriptor (low 32 bits), padding (high 32 bits) |
//!
//! Operand word: `[19:0] stride_minor`, `[39:20] stride_major`, `[63:40] base_addr`.
//! Meta: `[7:0] K`, `[15:8] N`, `[23:16] M`, `[24] reserved`, `[25] B transpose`,
//! `[26] A transpose`, `[31:27] instruction_type`.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of u64 words in one instruction
pub const RECORD_WORDS: usize = 5;
/// Size of one instruction in bytes
pub const RECORD_BYTES: usize = RECORD_WORDS * 8;
/// Index of the word that carries the meta descriptor and triggers execution
pub const META_WORD: usize = 4;

/// Matrix tile edge; dimensions travel as block counts of this size
pub const BLOCK_DIM: u64 = 64;

/// Alignment of the A/B (int8 multiplicand) buffers: one 64x64 byte tile
pub const INPUT_ALIGNMENT: u64 = 64 * 64;
/// Alignment of the Din/Dout (int32 accumulator) buffers: one 64x64x4 byte tile
pub const ACC_ALIGNMENT: u64 = 64 * 64 * 4;

pub const STRIDE_MINOR_BITS: u32 = 20;
pub const STRIDE_MAJOR_BITS: u32 = 20;
pub const BASE_ADDR_BITS: u32 = 24;

const STRIDE_MINOR_SHIFT: u32 = 0;
const STRIDE_MAJOR_SHIFT: u32 = STRIDE_MINOR_SHIFT + STRIDE_MINOR_BITS;
const BASE_ADDR_SHIFT: u32 = STRIDE_MAJOR_SHIFT + STRIDE_MAJOR_BITS;

pub const DIM_BITS: u32 = 8;
pub const INSTRUCTION_TYPE_BITS: u32 = 5;

const K_SHIFT: u32 = 0;
const N_SHIFT: u32 = 8;
const M_SHIFT: u32 = 16;
const RESERVED_BIT: u32 = 24;
const B_TRANSPOSE_BIT: u32 = 25;
const A_TRANSPOSE_BIT: u32 = 26;
const INSTRUCTION_TYPE_SHIFT: u32 = 27;

/// Opcode of a plain `Dout = A * B + Din` instruction
pub const INST_TYPE_GEMM: u8 = 1;

#[inline]
const fn mask(bits: u32) -> u64 {
  (1u64 << bits) - 1
}

/// Reject `value` if it does not fit into `bits` bits
pub fn check_field(field: &'static str, value: u64, bits: u32) -> Result<u64> {
  if value > mask(bits) {
    return Err(Error::OverflowField { field, value, bits });
  }
  Ok(value)
}

/// Number of 64-wide blocks needed to cover `dim`
pub fn block_count(dim: u64) -> u64 {
  dim.div_ceil(BLOCK_DIM)
}

/// Role of an operand buffer within `Dout = A * B + Din`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperandRole {
  Din,
  B,
  A,
  Dout,
}

impl OperandRole {
  /// All roles in transmission (word) order
  pub const ALL: [OperandRole; 4] = [OperandRole::Din, OperandRole::B, OperandRole::A, OperandRole::Dout];

  pub fn word_index(self) -> usize {
    match self {
      OperandRole::Din => 0,
      OperandRole::B => 1,
      OperandRole::A => 2,
      OperandRole::Dout => 3,
    }
  }

  /// Divisor used to squeeze a real address into the 24-bit base field
  pub fn alignment(self) -> u64 {
    match self {
      OperandRole::A | OperandRole::B => INPUT_ALIGNMENT,
      OperandRole::Din | OperandRole::Dout => ACC_ALIGNMENT,
    }
  }

  pub fn name(self) -> &'static str {
    match self {
      OperandRole::Din => "Din",
      OperandRole::B => "B",
      OperandRole::A => "A",
      OperandRole::Dout => "Dout",
    }
  }
}

impl fmt::Display for OperandRole {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

/// One operand buffer: scaled base address plus two strides (in blocks)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperandDescriptor {
  pub stride_minor: u32,
  pub stride_major: u32,
  pub base_addr: u32,
}

impl OperandDescriptor {
  pub fn new(stride_minor: u32, stride_major: u32, base_addr: u32) -> Result<Self> {
    let desc = Self {
      stride_minor,
      stride_major,
      base_addr,
    };
    desc.pack()?;
    Ok(desc)
  }

  /// Describe the buffer at real address `addr` for the given role.
  ///
  /// `addr` must be an exact multiple of the role alignment and the scaled
  /// value must fit the 24-bit base field.
  pub fn for_address(role: OperandRole, addr: u64, stride_minor: u64) -> Result<Self> {
    let alignment = role.alignment();
    if addr % alignment != 0 {
      return Err(Error::NonMultipleAddress { role, addr, alignment });
    }
    let base_addr = check_field("base_addr", addr / alignment, BASE_ADDR_BITS)?;
    let stride_minor = check_field("stride_minor", stride_minor, STRIDE_MINOR_BITS)?;
    Ok(Self {
      stride_minor: stride_minor as u32,
      stride_major: 1,
      base_addr: base_addr as u32,
    })
  }

  pub fn pack(&self) -> Result<u64> {
    let stride_minor = check_field("stride_minor", self.stride_minor as u64, STRIDE_MINOR_BITS)?;
    let stride_major = check_field("stride_major", self.stride_major as u64, STRIDE_MAJOR_BITS)?;
    let base_addr = check_field("base_addr", self.base_addr as u64, BASE_ADDR_BITS)?;
    Ok(
      (stride_minor << STRIDE_MINOR_SHIFT) | (stride_major << STRIDE_MAJOR_SHIFT) | (base_addr << BASE_ADDR_SHIFT),
    )
  }

  pub fn unpack(word: u64) -> Self {
    Self {
      stride_minor: ((word >> STRIDE_MINOR_SHIFT) & mask(STRIDE_MINOR_BITS)) as u32,
      stride_major: ((word >> STRIDE_MAJOR_SHIFT) & mask(STRIDE_MAJOR_BITS)) as u32,
      base_addr: ((word >> BASE_ADDR_SHIFT) & mask(BASE_ADDR_BITS)) as u32,
    }
  }

  /// Byte address this descriptor points at for the given role
  pub fn real_addr(&self, role: OperandRole) -> u64 {
    self.base_addr as u64 * role.alignment()
  }
}

/// Shape, transpose flags and opcode of one instruction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaDescriptor {
  pub k: u8,
  pub n: u8,
  pub m: u8,
  pub reserved: bool,
  pub if_b_transpose: bool,
  pub if_a_transpose: bool,
  pub instruction_type: u8,
}

impl MetaDescriptor {
  pub fn pack(&self) -> Result<u32> {
    let instruction_type = check_field(
      "instruction_type",
      self.instruction_type as u64,
      INSTRUCTION_TYPE_BITS,
    )? as u32;
    Ok(
      ((self.k as u32) << K_SHIFT)
        | ((self.n as u32) << N_SHIFT)
        | ((self.m as u32) << M_SHIFT)
        | ((self.reserved as u32) << RESERVED_BIT)
        | ((self.if_b_transpose as u32) << B_TRANSPOSE_BIT)
        | ((self.if_a_transpose as u32) << A_TRANSPOSE_BIT)
        | (instruction_type << INSTRUCTION_TYPE_SHIFT),
    )
  }

  pub fn unpack(raw: u32) -> Self {
    let bit = |pos: u32| (raw >> pos) & 1 == 1;
    Self {
      k: (raw >> K_SHIFT) as u8,
      n: (raw >> N_SHIFT) as u8,
      m: (raw >> M_SHIFT) as u8,
      reserved: bit(RESERVED_BIT),
      if_b_transpose: bit(B_TRANSPOSE_BIT),
      if_a_transpose: bit(A_TRANSPOSE_BIT),
      instruction_type: ((raw as u64 >> INSTRUCTION_TYPE_SHIFT) & mask(INSTRUCTION_TYPE_BITS)) as u8,
    }
  }
}

/// Typed view of one GEMM instruction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstructionRecord {
  pub din: OperandDescriptor,
  pub b: OperandDescriptor,
  pub a: OperandDescriptor,
  pub dout: OperandDescriptor,
  pub meta: MetaDescriptor,
}

impl InstructionRecord {
  pub fn operand(&self, role: OperandRole) -> &OperandDescriptor {
    match role {
      OperandRole::Din => &self.din,
      OperandRole::B => &self.b,
      OperandRole::A => &self.a,
      OperandRole::Dout => &self.dout,
    }
  }

  pub fn real_addr(&self, role: OperandRole) -> u64 {
    self.operand(role).real_addr(role)
  }

  /// Range-check every field and lay the record out as wire words.
  /// Padding is always zero.
  pub fn pack(&self) -> Result<PackedInstruction> {
    let mut words = [0u64; RECORD_WORDS];
    for role in OperandRole::ALL {
      words[role.word_index()] = self.operand(role).pack()?;
    }
    words[META_WORD] = self.meta.pack()? as u64;
    Ok(PackedInstruction(words))
  }
}

/// Wire image of one instruction, exactly as it crosses the bus
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PackedInstruction([u64; RECORD_WORDS]);

impl PackedInstruction {
  pub fn from_words(words: [u64; RECORD_WORDS]) -> Self {
    Self(words)
  }

  pub fn from_bytes(bytes: &[u8; RECORD_BYTES]) -> Self {
    let mut words = [0u64; RECORD_WORDS];
    for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(8)) {
      let mut raw = [0u8; 8];
      raw.copy_from_slice(chunk);
      *word = u64::from_le_bytes(raw);
    }
    Self(words)
  }

  pub fn words(&self) -> &[u64; RECORD_WORDS] {
    &self.0
  }

  pub fn to_bytes(&self) -> [u8; RECORD_BYTES] {
    let mut bytes = [0u8; RECORD_BYTES];
    for (chunk, word) in bytes.chunks_exact_mut(8).zip(self.0.iter()) {
      chunk.copy_from_slice(&word.to_le_bytes());
    }
    bytes
  }

  /// High 32 bits of the meta word; zero when produced by `InstructionRecord::pack`
  pub fn padding(&self) -> u32 {
    (self.0[META_WORD] >> 32) as u32
  }

  /// Decode the typed view; padding is ignored
  pub fn unpack(&self) -> InstructionRecord {
    InstructionRecord {
      din: OperandDescriptor::unpack(self.0[OperandRole::Din.word_index()]),
      b: OperandDescriptor::unpack(self.0[OperandRole::B.word_index()]),
      a: OperandDescriptor::unpack(self.0[OperandRole::A.word_index()]),
      dout: OperandDescriptor::unpack(self.0[OperandRole::Dout.word_index()]),
      meta: MetaDescriptor::unpack(self.0[META_WORD] as u32),
    }
  }

  /// Bytes from the highest address down, eight per line
  pub fn hex_dump(&self) -> String {
    let bytes = self.to_bytes();
    let mut out = String::with_capacity(RECORD_BYTES * 3 + RECORD_WORDS);
    for (i, byte) in bytes.iter().enumerate().rev() {
      out.push_str(&format!("{:02x} ", byte));
      if i % 8 == 0 {
        out.push('\n');
      }
    }
    out
  }
}
