use crate::arch::tensorcore::decoder::{AccessRecord, DecodedInstruction};
use std::fs::File;
use std::io::{BufWriter, Result, Write};
use std::path::Path;

/// JSON-lines trace of device activity, one object per line
pub struct TraceWriter<W: Write = BufWriter<File>> {
  writer: W,
}

impl TraceWriter {
  pub fn create(path: &Path) -> Result<Self> {
    Ok(Self::new(BufWriter::new(File::create(path)?)))
  }
}

impl<W: Write> TraceWriter<W> {
  pub fn new(writer: W) -> Self {
    Self { writer }
  }

  pub fn access(&mut self, record: &AccessRecord) -> Result<()> {
    let trace_entry = serde_json::json!({
      "event": "access",
      "seq": record.seq,
      "kind": record.kind,
      "offset": record.offset,
      "len": record.len,
      "value": format!("{:#018x}", record.value),
      "ok": record.ok,
      "triggered": record.triggered,
    });
    writeln!(self.writer, "{}", trace_entry)?;
    self.writer.flush()
  }

  pub fn instruction(&mut self, inst: &DecodedInstruction) -> Result<()> {
    let trace_entry = serde_json::json!({
      "event": "instruction",
      "instruction": inst,
    });
    writeln!(self.writer, "{}", trace_entry)?;
    self.writer.flush()
  }

  pub fn into_inner(self) -> W {
    self.writer
  }
}
