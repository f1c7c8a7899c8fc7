use super::protocol::Message;
use crate::arch::tensorcore::decoder::TensorCore;
use crate::error::{Error, Result};
use crate::simulator::sim::trace::TraceWriter;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};

/// Accepts one host and forwards its MMIO accesses to a device model
pub struct MmioServer {
  listener: TcpListener,
}

impl MmioServer {
  pub fn bind<A: ToSocketAddrs>(addr: A) -> Result<Self> {
    let listener = TcpListener::bind(addr)?;
    Ok(Self { listener })
  }

  pub fn local_addr(&self) -> Result<SocketAddr> {
    Ok(self.listener.local_addr()?)
  }

  /// Block until a host connects
  pub fn accept(&self) -> Result<(TcpStream, SocketAddr)> {
    let (stream, addr) = self.listener.accept()?;
    log::info!("Connected: {}", addr);
    stream.set_nodelay(true)?;
    Ok((stream, addr))
  }

  /// Accept one host and serve it until it disconnects.
  /// Returns the number of requests served.
  pub fn accept_and_serve<W: Write>(&self, device: &mut TensorCore, trace: Option<&mut TraceWriter<W>>) -> Result<u64> {
    let (mut stream, addr) = self.accept()?;
    let served = serve_client(&mut stream, device, trace)?;
    log::info!("Host {} disconnected after {} requests", addr, served);
    Ok(served)
  }
}

/// Serve requests from `stream` until EOF. Rejected accesses are answered
/// with `ok = false`; only transport and framing errors end the session.
pub fn serve_client<S, W>(stream: &mut S, device: &mut TensorCore, mut trace: Option<&mut TraceWriter<W>>) -> Result<u64>
where
  S: Read + Write,
  W: Write,
{
  let mut served = 0;
  while let Some(msg) = Message::read_from(stream)? {
    let count_before = device.instruction_count();
    let resp = match msg {
      Message::ReadReq { offset, len } => match device.read_value(offset, len as usize) {
        Ok(data) => Message::ReadResp { ok: true, data },
        Err(_) => Message::ReadResp { ok: false, data: 0 },
      },
      Message::WriteReq { offset, len, data } => Message::WriteResp {
        ok: device.write_value(offset, len as usize, data).is_ok(),
      },
      other => {
        return Err(Error::protocol(format!("unexpected {:?} from host", other.msg_type())));
      },
    };

    if let Some(trace) = trace.as_deref_mut() {
      if let Some(record) = device.records().last() {
        trace.access(record)?;
      }
      if device.instruction_count() != count_before {
        if let Some(inst) = device.last_instruction() {
          trace.instruction(inst)?;
        }
      }
    }

    resp.write_to(stream)?;
    served += 1;
  }
  Ok(served)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::arch::tensorcore::status::STATUS_RECEIVED;
  use std::io::Cursor;

  /// Scripted host: requests in, responses out
  struct Loopback {
    input: Cursor<Vec<u8>>,
    output: Vec<u8>,
  }

  impl Loopback {
    fn new(requests: &[Message]) -> Self {
      let mut input = Vec::new();
      for req in requests {
        input.extend_from_slice(&req.encode());
      }
      Self {
        input: Cursor::new(input),
        output: Vec::new(),
      }
    }

    fn responses(&self) -> Vec<Message> {
      let mut cursor = Cursor::new(self.output.clone());
      let mut out = Vec::new();
      while let Some(msg) = Message::read_from(&mut cursor).unwrap() {
        out.push(msg);
      }
      out
    }
  }

  impl Read for Loopback {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
      self.input.read(buf)
    }
  }

  impl Write for Loopback {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
      self.output.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
      Ok(())
    }
  }

  #[test]
  fn test_serves_instruction_stream() {
    let mut requests: Vec<Message> = (0..5)
      .map(|i| Message::WriteReq {
        offset: i * 8,
        len: 8,
        data: 0,
      })
      .collect();
    requests.push(Message::ReadReq { offset: 0x1000, len: 8 });
    requests.push(Message::WriteReq {
      offset: 0x30,
      len: 8,
      data: 0,
    });

    let mut host = Loopback::new(&requests);
    let mut device = TensorCore::default();
    let mut trace = TraceWriter::new(Vec::new());
    let served = serve_client(&mut host, &mut device, Some(&mut trace)).unwrap();

    assert_eq!(served, 7);
    assert_eq!(device.instruction_count(), 1);
    let responses = host.responses();
    assert_eq!(responses[5], Message::ReadResp { ok: true, data: STATUS_RECEIVED });
    assert_eq!(responses[6], Message::WriteResp { ok: false });

    // 7 access lines plus one instruction line
    let text = String::from_utf8(trace.into_inner()).unwrap();
    assert_eq!(text.lines().count(), 8);
  }

  #[test]
  fn test_response_from_host_is_a_protocol_error() {
    let mut host = Loopback::new(&[Message::WriteResp { ok: true }]);
    let mut device = TensorCore::default();
    let result = serve_client::<_, Vec<u8>>(&mut host, &mut device, None);
    assert!(matches!(result, Err(Error::Protocol { .. })));
  }

  #[test]
  fn test_accept_failure_is_reported() {
    let server = MmioServer::bind("127.0.0.1:0").unwrap();
    // no host pending: a non-blocking accept fails instead of waiting
    server.listener.set_nonblocking(true).unwrap();
    assert!(matches!(server.accept(), Err(Error::Io(_))));
    let mut device = TensorCore::default();
    assert!(server.accept_and_serve(&mut device, None::<&mut TraceWriter>).is_err());
    assert_eq!(device.records().count(), 0);
  }
}
