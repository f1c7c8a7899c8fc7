use std::sync::Mutex;
use std::thread;
use tensorcore::simulator::server::socket::{MmioClient, MmioServer};
use tensorcore::simulator::sim::trace::TraceWriter;
use tensorcore::simulator::utils::log::init_log;
use tensorcore::tensorcore::{Bus, DeviceLayout, Encoder, GemmRequest, GemmShape, OperandAddrs, TensorCore, STATUS_RECEIVED};
use tensorcore::Error;

// Only one test at a time talks over loopback sockets
static TEST_MUTEX: Mutex<()> = Mutex::new(());

fn reference_request() -> GemmRequest {
  GemmRequest::new(
    GemmShape::new(128, 128, 128),
    OperandAddrs {
      din: 0x4000,
      b: 0x2000,
      a: 0x1000,
      dout: 0x8000,
    },
  )
}

#[test]
fn submit_over_socket() {
  let _guard = TEST_MUTEX.lock().unwrap();
  init_log();

  let layout = DeviceLayout::default();
  let server = MmioServer::bind("127.0.0.1:0").unwrap();
  let addr = server.local_addr().unwrap();

  let device_thread = thread::spawn(move || {
    let mut device = TensorCore::new(layout);
    let mut trace = TraceWriter::new(Vec::new());
    let served = server.accept_and_serve(&mut device, Some(&mut trace)).unwrap();
    (device, served, trace.into_inner())
  });

  let client = MmioClient::connect(addr, layout).unwrap();
  let mut encoder = Encoder::new(client, layout);
  assert_eq!(encoder.submit(&reference_request()).unwrap(), STATUS_RECEIVED);
  assert_eq!(encoder.submit(&reference_request().with_transpose(true, true)).unwrap(), STATUS_RECEIVED);

  // outside both windows: rejected, the session continues
  let client = encoder.bus_mut();
  assert!(matches!(client.write(0x30, 8, 0), Err(Error::AccessRejected { offset: 0x30, .. })));
  assert_eq!(client.read(0x1000, 4).unwrap(), STATUS_RECEIVED);
  drop(encoder);

  let (device, served, trace) = device_thread.join().unwrap();
  assert_eq!(served, 2 * 6 + 2);
  assert_eq!(device.instruction_count(), 2);
  let last = device.last_instruction().unwrap();
  assert!(last.record.meta.if_a_transpose && last.record.meta.if_b_transpose);
  assert_eq!(last.a_addr, 0x1000);

  let text = String::from_utf8(trace).unwrap();
  let instructions = text.lines().filter(|l| l.contains("\"instruction\"")).count();
  assert_eq!(instructions, 2);
  assert_eq!(text.lines().count(), 14 + 2);
}

#[test]
fn client_rejects_addresses_outside_device() {
  let _guard = TEST_MUTEX.lock().unwrap();
  init_log();

  let layout = DeviceLayout::default();
  let server = MmioServer::bind("127.0.0.1:0").unwrap();
  let addr = server.local_addr().unwrap();
  let device_thread = thread::spawn(move || {
    let mut device = TensorCore::new(layout);
    server.accept_and_serve(&mut device, None::<&mut TraceWriter>).unwrap()
  });

  let mut client = MmioClient::connect(addr, layout).unwrap();
  assert!(client.write_u64(layout.base_addr - 8, 0).is_err());
  assert_eq!(client.read_u64(layout.status_addr().unwrap()).unwrap(), 0);
  drop(client);

  // the out-of-range store never left the host
  assert_eq!(device_thread.join().unwrap(), 1);
}
