use crate::arch::tensorcore::decoder::{AccessKind, AccessRecord, TensorCore};

pub fn format_record(record: &AccessRecord) -> String {
  let kind = match record.kind {
    AccessKind::Read => "R",
    AccessKind::Write => "W",
  };
  let verdict = if !record.ok {
    " (rejected)"
  } else if record.triggered {
    " (trigger)"
  } else {
    ""
  };
  format!(
    "#{:<5} {} off={:#06x} len={} value={:#018x}{}",
    record.seq, kind, record.offset, record.len, record.value, verdict
  )
}

pub fn print_records(device: &TensorCore) {
  println!("\n--- Access Records ---");
  for record in device.records() {
    println!("  {}", format_record(record));
  }
  println!(
    "  instructions executed: {}, status: {:#018x}",
    device.instruction_count(),
    device.status()
  );
  println!("--- End Records ---\n");
}
