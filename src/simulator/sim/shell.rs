use crate::arch::tensorcore::encoder::{GemmRequest, GemmShape, OperandAddrs};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::io::{self, Result};

pub const HELP: &str = "\
  r <off> <len>                   read 4/8 bytes at device offset
  w <off> <len> <value>           write 4/8 bytes at device offset
  gemm <M> <N> <K> <A> <B> <Din> <Dout>
                                  encode and send one GEMM instruction
  status                          read the status register
  records                         print the access records
  reset                           reset the device
  q                               quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
  Read { offset: u64, len: usize },
  Write { offset: u64, len: usize, value: u64 },
  Gemm(GemmRequest),
  Status,
  Records,
  Reset,
  Help,
  Quit,
}

fn parse_num(s: &str) -> std::result::Result<u64, String> {
  let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
    Some(hex) => u64::from_str_radix(&hex.replace('_', ""), 16),
    None => s.replace('_', "").parse::<u64>(),
  };
  parsed.map_err(|e| format!("invalid number '{}': {}", s, e))
}

fn expect_args(cmd: &str, args: &[&str], n: usize) -> std::result::Result<(), String> {
  if args.len() != n {
    return Err(format!("'{}' expects {} args, got {}", cmd, n, args.len()));
  }
  Ok(())
}

/// Parse one shell line
pub fn parse_command(line: &str) -> std::result::Result<Command, String> {
  let parts: Vec<&str> = line.split_whitespace().collect();
  let Some((&cmd, args)) = parts.split_first() else {
    return Err("empty command".to_string());
  };

  match cmd {
    "r" | "read" => {
      expect_args(cmd, args, 2)?;
      Ok(Command::Read {
        offset: parse_num(args[0])?,
        len: parse_num(args[1])? as usize,
      })
    },
    "w" | "write" => {
      expect_args(cmd, args, 3)?;
      Ok(Command::Write {
        offset: parse_num(args[0])?,
        len: parse_num(args[1])? as usize,
        value: parse_num(args[2])?,
      })
    },
    "gemm" => {
      expect_args(cmd, args, 7)?;
      let n: Vec<u64> = args.iter().map(|a| parse_num(a)).collect::<std::result::Result<_, _>>()?;
      Ok(Command::Gemm(GemmRequest::new(
        GemmShape::new(n[0], n[1], n[2]),
        OperandAddrs {
          a: n[3],
          b: n[4],
          din: n[5],
          dout: n[6],
        },
      )))
    },
    "status" => Ok(Command::Status),
    "records" => Ok(Command::Records),
    "reset" => Ok(Command::Reset),
    "help" | "h" | "?" => Ok(Command::Help),
    "q" | "quit" | "exit" => Ok(Command::Quit),
    other => Err(format!("unknown command: '{}', type 'help' for the list", other)),
  }
}

/// Line editor with history around `parse_command`
pub struct Shell {
  editor: DefaultEditor,
}

impl Shell {
  pub fn new() -> Result<Self> {
    let editor = DefaultEditor::new().map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
    Ok(Self { editor })
  }

  /// Prompt until a valid command is entered. Ctrl-C and Ctrl-D quit.
  pub fn read_command(&mut self) -> Result<Command> {
    loop {
      match self.editor.readline("(tensorcore) ") {
        Ok(line) => {
          let trimmed = line.trim();
          if trimmed.is_empty() {
            continue;
          }
          let _ = self.editor.add_history_entry(trimmed);
          match parse_command(trimmed) {
            Ok(cmd) => return Ok(cmd),
            Err(msg) => eprintln!("Error: {}", msg),
          }
        },
        Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => return Ok(Command::Quit),
        Err(err) => return Err(io::Error::new(io::ErrorKind::Other, err.to_string())),
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_access_commands() {
    assert_eq!(parse_command("r 0x1000 8"), Ok(Command::Read { offset: 0x1000, len: 8 }));
    assert_eq!(
      parse_command("w 0x20 8 0x0802_0202"),
      Ok(Command::Write {
        offset: 0x20,
        len: 8,
        value: 0x0802_0202
      })
    );
    assert_eq!(parse_command("  q "), Ok(Command::Quit));
  }

  #[test]
  fn test_parse_gemm() {
    let cmd = parse_command("gemm 128 128 128 0x1000 0x2000 0x4000 0x8000").unwrap();
    let Command::Gemm(req) = cmd else {
      panic!("expected gemm, got {:?}", cmd);
    };
    assert_eq!(req.shape, GemmShape::new(128, 128, 128));
    assert_eq!(req.addrs.a, 0x1000);
    assert_eq!(req.addrs.b, 0x2000);
    assert_eq!(req.addrs.din, 0x4000);
    assert_eq!(req.addrs.dout, 0x8000);
  }

  #[test]
  fn test_parse_errors() {
    assert!(parse_command("").is_err());
    assert!(parse_command("r 0x10").is_err());
    assert!(parse_command("w 0x10 8 zz").is_err());
    assert!(parse_command("jump").is_err());
  }
}
