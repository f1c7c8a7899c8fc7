//! Status register of the tensorcore device

/// Value the device leaves in the status register after accepting an instruction
pub const STATUS_RECEIVED: u64 = 0x1;
/// Power-on value
pub const STATUS_IDLE: u64 = 0x0;

const LOW_HALF: u64 = 0xFFFF_FFFF;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusRegister {
  value: u64,
}

impl StatusRegister {
  pub fn new() -> Self {
    Self { value: STATUS_IDLE }
  }

  pub fn get(&self) -> u64 {
    self.value
  }

  pub fn set(&mut self, value: u64) {
    self.value = value;
  }

  /// Replace the low 32 bits, keep the high half
  pub fn set_low(&mut self, value: u32) {
    self.value = (self.value & !LOW_HALF) | value as u64;
  }

  pub fn mark_received(&mut self) {
    self.value = STATUS_RECEIVED;
  }

  pub fn clear(&mut self) {
    self.value = STATUS_IDLE;
  }
}
