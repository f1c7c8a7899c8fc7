//! Error types for tensorcore operations

use crate::arch::tensorcore::instruction::OperandRole;
use thiserror::Error;

/// Result type alias for tensorcore operations
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
  /// Access outside both the instruction window and the status window
  #[error("invalid offset {offset:#x} (len={len})")]
  InvalidOffset { offset: u64, len: usize },

  /// Access width is not 4 or 8 bytes, or misaligned for that width
  #[error("invalid access width {len} at offset {offset:#x}")]
  InvalidWidth { offset: u64, len: usize },

  /// A value does not fit into its packed bit field
  #[error("field {field} = {value:#x} does not fit in {bits} bits")]
  OverflowField {
    field: &'static str,
    value: u64,
    bits: u32,
  },

  /// Operand address is not a multiple of its role alignment
  #[error("{role} address {addr:#x} is not a multiple of {alignment:#x}")]
  NonMultipleAddress {
    role: OperandRole,
    addr: u64,
    alignment: u64,
  },

  /// Matrix dimension is zero
  #[error("matrix dimension {name} must be positive")]
  ZeroDimension { name: &'static str },

  /// Remote device refused the access (reported over the MMIO socket)
  #[error("device rejected access at offset {offset:#x} (len={len})")]
  AccessRejected { offset: u64, len: usize },

  /// Malformed message on the MMIO socket
  #[error("protocol error: {reason}")]
  Protocol { reason: String },

  #[error(transparent)]
  Io(#[from] std::io::Error),
}

impl Error {
  pub fn protocol(reason: impl Into<String>) -> Self {
    Self::Protocol { reason: reason.into() }
  }
}

impl From<Error> for std::io::Error {
  fn from(err: Error) -> Self {
    match err {
      Error::Io(e) => e,
      other => std::io::Error::new(std::io::ErrorKind::InvalidData, other.to_string()),
    }
  }
}
