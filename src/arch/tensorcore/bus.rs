//! Host-side view of the memory bus the encoder streams through

use super::decoder::{DeviceLayout, TensorCore};
use crate::error::{Error, Result};
use std::sync::atomic::{compiler_fence, fence, Ordering};

/// 64-bit stores and loads at absolute host addresses, plus the two barriers
/// the instruction stream relies on
pub trait Bus {
  fn write_u64(&mut self, addr: u64, value: u64) -> Result<()>;

  fn read_u64(&mut self, addr: u64) -> Result<u64>;

  /// Keep the compiler from reordering the stores around this point
  fn compiler_barrier(&mut self) {
    compiler_fence(Ordering::SeqCst);
  }

  /// Make every prior store visible to the device before later accesses
  fn memory_barrier(&mut self) {
    fence(Ordering::SeqCst);
  }
}

impl<B: Bus + ?Sized> Bus for &mut B {
  fn write_u64(&mut self, addr: u64, value: u64) -> Result<()> {
    (**self).write_u64(addr, value)
  }

  fn read_u64(&mut self, addr: u64) -> Result<u64> {
    (**self).read_u64(addr)
  }

  fn compiler_barrier(&mut self) {
    (**self).compiler_barrier()
  }

  fn memory_barrier(&mut self) {
    (**self).memory_barrier()
  }
}

/// Direct volatile access to physical MMIO, for code running on the host core
#[derive(Debug)]
pub struct VolatileBus {
  _private: (),
}

impl VolatileBus {
  /// # Safety
  ///
  /// Every address later passed to this bus must be mapped, device-backed
  /// memory that tolerates 64-bit volatile accesses.
  pub unsafe fn new() -> Self {
    Self { _private: () }
  }

  fn check_aligned(addr: u64) -> Result<()> {
    if addr % 8 != 0 {
      return Err(Error::InvalidWidth { offset: addr, len: 8 });
    }
    Ok(())
  }
}

impl Bus for VolatileBus {
  fn write_u64(&mut self, addr: u64, value: u64) -> Result<()> {
    Self::check_aligned(addr)?;
    // SAFETY: constructor contract; address is mapped MMIO and 8-byte aligned.
    unsafe { std::ptr::write_volatile(addr as usize as *mut u64, value) };
    Ok(())
  }

  fn read_u64(&mut self, addr: u64) -> Result<u64> {
    Self::check_aligned(addr)?;
    // SAFETY: constructor contract; address is mapped MMIO and 8-byte aligned.
    Ok(unsafe { std::ptr::read_volatile(addr as usize as *const u64) })
  }
}

/// In-process bus wired straight into a device model
#[derive(Debug)]
pub struct DeviceBus<'a> {
  device: &'a mut TensorCore,
}

impl<'a> DeviceBus<'a> {
  pub fn new(device: &'a mut TensorCore) -> Self {
    Self { device }
  }

  pub fn device(&self) -> &TensorCore {
    self.device
  }

  fn offset(&self, addr: u64) -> Result<u64> {
    let layout: &DeviceLayout = self.device.layout();
    layout.offset_of(addr, 8)
  }
}

impl Bus for DeviceBus<'_> {
  fn write_u64(&mut self, addr: u64, value: u64) -> Result<()> {
    let offset = self.offset(addr)?;
    self.device.write_value(offset, 8, value)
  }

  fn read_u64(&mut self, addr: u64) -> Result<u64> {
    let offset = self.offset(addr)?;
    self.device.read_value(offset, 8)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_device_bus_translates_addresses() {
    let mut dev = TensorCore::default();
    let base = dev.layout().base_addr;
    let status = dev.layout().status_addr().unwrap();
    {
      let mut bus = DeviceBus::new(&mut dev);
      bus.write_u64(base + 8, 0xABCD).unwrap();
      bus.write_u64(status, 0x42).unwrap();
      assert_eq!(bus.read_u64(status).unwrap(), 0x42);
      assert!(bus.write_u64(base - 8, 0).is_err());
      assert!(bus.write_u64(base + 0x28, 0).is_err());
    }
    assert_eq!(dev.buffer_words()[1], 0xABCD);
  }

  #[test]
  fn test_volatile_bus_rejects_misaligned() {
    // SAFETY: no access reaches memory, alignment is rejected first.
    let mut bus = unsafe { VolatileBus::new() };
    assert!(matches!(bus.write_u64(0x1003, 0), Err(Error::InvalidWidth { .. })));
    assert!(matches!(bus.read_u64(0x1004), Err(Error::InvalidWidth { .. })));
  }

  #[test]
  fn test_volatile_bus_on_local_memory() {
    let mut cell = Box::new(0u64);
    let addr = &mut *cell as *mut u64 as u64;
    // SAFETY: `addr` points at a live, aligned heap u64.
    let mut bus = unsafe { VolatileBus::new() };
    bus.write_u64(addr, 0x1234).unwrap();
    bus.memory_barrier();
    assert_eq!(bus.read_u64(addr).unwrap(), 0x1234);
    assert_eq!(*cell, 0x1234);
  }
}
