//! Intel HEX images and the bootloader merge.
//!
//! Supported record types: `00` data, `01` end of file, `02` extended
//! segment address, `04` extended linear address. Start address records
//! (`03`, `05`) are accepted and ignored.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum HexError {
  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("{path}:{line}: {message}")]
  Parse { path: PathBuf, line: usize, message: String },

  #[error("failed to write {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

/// A sparse memory image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HexImage {
  bytes: BTreeMap<u32, u8>,
}

fn decode_record(text: &str) -> Result<Vec<u8>, String> {
  let body = text.strip_prefix(':').ok_or("record does not start with ':'")?;
  if body.len() % 2 != 0 || body.len() < 10 {
    return Err("truncated record".to_string());
  }
  let bytes = hex::decode(body).map_err(|e| format!("invalid hex: {e}"))?;
  if bytes.len() != usize::from(bytes[0]) + 5 {
    return Err("record length does not match byte count".to_string());
  }
  if bytes.iter().fold(0u8, |sum, b| sum.wrapping_add(*b)) != 0 {
    return Err("checksum mismatch".to_string());
  }
  Ok(bytes)
}

impl HexImage {
  pub fn parse(text: &str, origin: &Path) -> Result<Self, HexError> {
    let mut image = Self::default();
    let mut base: u32 = 0;
    for (idx, line) in text.lines().enumerate() {
      let line = line.trim();
      if line.is_empty() {
        continue;
      }
      let err = |message: String| HexError::Parse {
        path: origin.to_path_buf(),
        line: idx + 1,
        message,
      };
      let record = decode_record(line).map_err(err)?;
      let address = u32::from(u16::from_be_bytes([record[1], record[2]]));
      let data = &record[4..record.len() - 1];
      match record[3] {
        0x00 => {
          for (offset, byte) in data.iter().enumerate() {
            image.bytes.insert(base.wrapping_add(address).wrapping_add(offset as u32), *byte);
          }
        }
        0x01 => break,
        0x02 if data.len() == 2 => base = u32::from(u16::from_be_bytes([data[0], data[1]])) << 4,
        0x04 if data.len() == 2 => base = u32::from(u16::from_be_bytes([data[0], data[1]])) << 16,
        0x03 | 0x05 => {}
        other => return Err(err(format!("unsupported record type {other:02X}"))),
      }
    }
    Ok(image)
  }

  pub fn load(path: &Path) -> Result<Self, HexError> {
    let text = fs::read_to_string(path).map_err(|source| HexError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    Self::parse(&text, path)
  }

  pub fn len(&self) -> usize {
    self.bytes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.bytes.is_empty()
  }

  /// Copy every byte of `other` over this image.
  pub fn overlay(&mut self, other: &HexImage) {
    self.bytes.extend(other.bytes.iter().map(|(a, b)| (*a, *b)));
  }

  /// Intel HEX text with 16-byte data records.
  pub fn to_hex(&self) -> String {
    fn record(out: &mut String, address: u16, kind: u8, data: &[u8]) {
      let mut bytes = vec![data.len() as u8];
      bytes.extend(address.to_be_bytes());
      bytes.push(kind);
      bytes.extend_from_slice(data);
      let checksum = bytes.iter().fold(0u8, |sum, b| sum.wrapping_add(*b)).wrapping_neg();
      bytes.push(checksum);
      let _ = writeln!(out, ":{}", hex::encode_upper(&bytes));
    }

    let mut out = String::new();
    let mut upper: u32 = 0;
    let mut row: Vec<u8> = Vec::new();
    let mut row_start: u32 = 0;

    let flush = |out: &mut String, upper: &mut u32, row: &mut Vec<u8>, start: u32| {
      if row.is_empty() {
        return;
      }
      if start >> 16 != *upper {
        *upper = start >> 16;
        record(out, 0, 0x04, &(*upper as u16).to_be_bytes());
      }
      record(out, (start & 0xFFFF) as u16, 0x00, row);
      row.clear();
    };

    for (&address, &byte) in &self.bytes {
      let contiguous = !row.is_empty() && address == row_start + row.len() as u32;
      let same_segment = address >> 16 == row_start >> 16;
      if !contiguous || !same_segment || row.len() == 16 {
        flush(&mut out, &mut upper, &mut row, row_start);
        row_start = address;
      }
      row.push(byte);
    }
    flush(&mut out, &mut upper, &mut row, row_start);
    record(&mut out, 0, 0x01, &[]);
    out
  }

  /// Raw bytes from the lowest to the highest address, gaps filled with `0xFF`.
  pub fn to_bin(&self) -> Vec<u8> {
    let (Some((&first, _)), Some((&last, _))) = (self.bytes.first_key_value(), self.bytes.last_key_value()) else {
      return Vec::new();
    };
    let mut out = vec![0xFF; (last - first) as usize + 1];
    for (&address, &byte) in &self.bytes {
      out[(address - first) as usize] = byte;
    }
    out
  }
}

/// Overlay `bootloader` onto `sketch` and write both HEX and binary images.
pub fn merge_hex(sketch: &Path, bootloader: &Path, hex_output: &Path, bin_output: &Path) -> Result<(), HexError> {
  let mut image = HexImage::load(sketch)?;
  let boot = HexImage::load(bootloader)?;
  image.overlay(&boot);
  debug!(
    sketch = %sketch.display(),
    bootloader = %bootloader.display(),
    bytes = image.len(),
    "merged bootloader"
  );

  fs::write(hex_output, image.to_hex()).map_err(|source| HexError::Write {
    path: hex_output.to_path_buf(),
    source,
  })?;
  fs::write(bin_output, image.to_bin()).map_err(|source| HexError::Write {
    path: bin_output.to_path_buf(),
    source,
  })
}
