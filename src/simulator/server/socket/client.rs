use super::protocol::Message;
use crate::arch::tensorcore::bus::Bus;
use crate::arch::tensorcore::decoder::DeviceLayout;
use crate::error::{Error, Result};
use std::net::{TcpStream, ToSocketAddrs};

/// Host side of the MMIO socket; a `Bus` onto a remote device
#[derive(Debug)]
pub struct MmioClient {
  stream: TcpStream,
  layout: DeviceLayout,
}

impl MmioClient {
  pub fn connect<A: ToSocketAddrs>(addr: A, layout: DeviceLayout) -> Result<Self> {
    let stream = TcpStream::connect(addr)?;
    stream.set_nodelay(true)?;
    Ok(Self { stream, layout })
  }

  /// Load `len` bytes at device offset `offset`
  pub fn read(&mut self, offset: u64, len: usize) -> Result<u64> {
    let len_field = wire_len(offset, len)?;
    Message::ReadReq { offset, len: len_field }.write_to(&mut self.stream)?;
    match Message::read_from(&mut self.stream)? {
      Some(Message::ReadResp { ok: true, data }) => Ok(data),
      Some(Message::ReadResp { ok: false, .. }) => Err(Error::AccessRejected { offset, len }),
      other => Err(unexpected(other)),
    }
  }

  /// Store the low `len` bytes of `value` at device offset `offset`
  pub fn write(&mut self, offset: u64, len: usize, value: u64) -> Result<()> {
    let len_field = wire_len(offset, len)?;
    Message::WriteReq {
      offset,
      len: len_field,
      data: value,
    }
    .write_to(&mut self.stream)?;
    match Message::read_from(&mut self.stream)? {
      Some(Message::WriteResp { ok: true }) => Ok(()),
      Some(Message::WriteResp { ok: false }) => Err(Error::AccessRejected { offset, len }),
      other => Err(unexpected(other)),
    }
  }
}

/// The wire carries a 32-bit length; anything wider never leaves the host
fn wire_len(offset: u64, len: usize) -> Result<u32> {
  u32::try_from(len).map_err(|_| Error::InvalidWidth { offset, len })
}

fn unexpected(msg: Option<Message>) -> Error {
  match msg {
    Some(msg) => Error::protocol(format!("unexpected {:?} from device", msg.msg_type())),
    None => Error::protocol("device closed the connection"),
  }
}

impl Bus for MmioClient {
  fn write_u64(&mut self, addr: u64, value: u64) -> Result<()> {
    let offset = self.layout.offset_of(addr, 8)?;
    self.write(offset, 8, value)
  }

  fn read_u64(&mut self, addr: u64) -> Result<u64> {
    let offset = self.layout.offset_of(addr, 8)?;
    self.read(offset, 8)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::arch::tensorcore::decoder::TensorCore;
  use crate::simulator::server::socket::MmioServer;
  use crate::simulator::sim::trace::TraceWriter;
  use std::thread;

  #[test]
  #[cfg(target_pointer_width = "64")]
  fn test_oversized_length_is_rejected_before_sending() {
    let layout = DeviceLayout::default();
    let server = MmioServer::bind("127.0.0.1:0").unwrap();
    let addr = server.local_addr().unwrap();
    let device_thread = thread::spawn(move || {
      let mut device = TensorCore::new(layout);
      let served = server.accept_and_serve(&mut device, None::<&mut TraceWriter>).unwrap();
      (device, served)
    });

    let mut client = MmioClient::connect(addr, layout).unwrap();
    let huge = (1usize << 32) + 8;
    assert!(matches!(
      client.write(0x20, huge, 0),
      Err(Error::InvalidWidth { offset: 0x20, len }) if len == huge
    ));
    assert!(matches!(client.read(0x1000, huge), Err(Error::InvalidWidth { .. })));
    assert_eq!(client.read(0x1000, 8).unwrap(), 0);
    drop(client);

    let (device, served) = device_thread.join().unwrap();
    assert_eq!(served, 1);
    assert_eq!(device.instruction_count(), 0);
    assert_eq!(device.records().count(), 1);
  }
}
