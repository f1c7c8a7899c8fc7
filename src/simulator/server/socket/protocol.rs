use crate::error::{Error, Result};
use std::io::{ErrorKind, Read, Write};

// Socket configuration
pub const SOCKET_MMIO_PORT: u16 = 6000;
pub const SOCKET_HOST: &str = "127.0.0.1";

pub const HEADER_SIZE: usize = 8;

// Message types
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgType {
  MmioReadReq = 0,
  MmioReadResp = 1,
  MmioWriteReq = 2,
  MmioWriteResp = 3,
}

impl TryFrom<u32> for MsgType {
  type Error = Error;

  fn try_from(raw: u32) -> Result<Self> {
    match raw {
      0 => Ok(MsgType::MmioReadReq),
      1 => Ok(MsgType::MmioReadResp),
      2 => Ok(MsgType::MmioWriteReq),
      3 => Ok(MsgType::MmioWriteResp),
      other => Err(Error::protocol(format!("unknown msg_type: {}", other))),
    }
  }
}

impl MsgType {
  /// Bytes following the header
  pub fn body_size(self) -> usize {
    match self {
      MsgType::MmioReadReq | MsgType::MmioReadResp | MsgType::MmioWriteResp => 16,
      MsgType::MmioWriteReq => 24,
    }
  }
}

// Message header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgHeader {
  pub msg_type: u32,
  pub reserved: u32,
}

/// Every message on the wire, little-endian, header first.
///
/// | message | body |
/// |---------|------|
/// | ReadReq | `len: u32, padding: u32, offset: u64` |
/// | ReadResp | `ok: u32, padding: u32, data: u64` |
/// | WriteReq | `len: u32, padding: u32, offset: u64, data: u64` |
/// | WriteResp | `ok: u32, padding: u32, reserved: u64` |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
  ReadReq { offset: u64, len: u32 },
  ReadResp { ok: bool, data: u64 },
  WriteReq { offset: u64, len: u32, data: u64 },
  WriteResp { ok: bool },
}

impl Message {
  pub fn msg_type(&self) -> MsgType {
    match self {
      Message::ReadReq { .. } => MsgType::MmioReadReq,
      Message::ReadResp { .. } => MsgType::MmioReadResp,
      Message::WriteReq { .. } => MsgType::MmioWriteReq,
      Message::WriteResp { .. } => MsgType::MmioWriteResp,
    }
  }

  pub fn header(&self) -> MsgHeader {
    MsgHeader {
      msg_type: self.msg_type() as u32,
      reserved: 0,
    }
  }

  pub fn encode(&self) -> Vec<u8> {
    let header = self.header();
    let mut buf = Vec::with_capacity(HEADER_SIZE + self.msg_type().body_size());
    buf.extend_from_slice(&header.msg_type.to_le_bytes());
    buf.extend_from_slice(&header.reserved.to_le_bytes());
    let (first, second, third) = match *self {
      Message::ReadReq { offset, len } => (len, offset, None),
      Message::ReadResp { ok, data } => (ok as u32, data, None),
      Message::WriteReq { offset, len, data } => (len, offset, Some(data)),
      Message::WriteResp { ok } => (ok as u32, 0, None),
    };
    buf.extend_from_slice(&first.to_le_bytes());
    buf.extend_from_slice(&0u32.to_le_bytes());
    buf.extend_from_slice(&second.to_le_bytes());
    if let Some(third) = third {
      buf.extend_from_slice(&third.to_le_bytes());
    }
    buf
  }

  fn decode_body(msg_type: MsgType, body: &[u8]) -> Self {
    let u32_at = |at: usize| u32::from_le_bytes([body[at], body[at + 1], body[at + 2], body[at + 3]]);
    let u64_at = |at: usize| {
      let mut raw = [0u8; 8];
      raw.copy_from_slice(&body[at..at + 8]);
      u64::from_le_bytes(raw)
    };
    match msg_type {
      MsgType::MmioReadReq => Message::ReadReq {
        len: u32_at(0),
        offset: u64_at(8),
      },
      MsgType::MmioReadResp => Message::ReadResp {
        ok: u32_at(0) != 0,
        data: u64_at(8),
      },
      MsgType::MmioWriteReq => Message::WriteReq {
        len: u32_at(0),
        offset: u64_at(8),
        data: u64_at(16),
      },
      MsgType::MmioWriteResp => Message::WriteResp { ok: u32_at(0) != 0 },
    }
  }

  /// Read one message. `Ok(None)` means the peer closed the stream between
  /// messages.
  pub fn read_from<R: Read>(stream: &mut R) -> Result<Option<Message>> {
    let mut header = [0u8; HEADER_SIZE];
    let mut filled = 0;
    while filled < HEADER_SIZE {
      match stream.read(&mut header[filled..]) {
        Ok(0) if filled == 0 => return Ok(None),
        Ok(0) => return Err(Error::protocol("connection closed inside a message header")),
        Ok(n) => filled += n,
        Err(e) if e.kind() == ErrorKind::Interrupted => continue,
        Err(e) => return Err(e.into()),
      }
    }

    let msg_type = MsgType::try_from(u32::from_le_bytes([header[0], header[1], header[2], header[3]]))?;
    let mut body = vec![0u8; msg_type.body_size()];
    stream.read_exact(&mut body)?;
    Ok(Some(Self::decode_body(msg_type, &body)))
  }

  pub fn write_to<W: Write>(&self, stream: &mut W) -> Result<()> {
    stream.write_all(&self.encode())?;
    stream.flush()?;
    Ok(())
  }
}
