//! # Intel HEX Reader
//!
//! Reduces an Intel HEX file to `(address, data)` records.

use std::fs;
use std::path::Path;

use super::HexRecord;
use crate::error::{PwrctlError, Result};

const RECORD_DATA: u8 = 0x00;
const RECORD_EOF: u8 = 0x01;
const RECORD_EXT_SEGMENT: u8 = 0x02;
const RECORD_EXT_LINEAR: u8 = 0x04;

fn hex_error(line: usize, reason: impl Into<String>) -> PwrctlError {
    PwrctlError::HexFormat {
        line,
        reason: reason.into(),
    }
}

fn decode_hex_bytes(text: &str, line: usize) -> Result<Vec<u8>> {
    if text.len() % 2 != 0 {
        return Err(hex_error(line, "odd number of hex digits"));
    }
    (0..text.len())
        .step_by(2)
        .map(|i| {
            text.get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| hex_error(line, format!("invalid hex digits at column {}", i + 2)))
        })
        .collect()
}

/// Parse Intel HEX text into data records
///
/// Supports data, end-of-file, extended segment address and extended
/// linear address records. Blank lines are skipped; anything after the
/// end-of-file record is ignored.
///
/// # Errors
///
/// Returns `HexFormat` with the 1-based line number for a missing start
/// code, bad hex digits, a length mismatch, a checksum failure or an
/// unsupported record type.
///
/// # Examples
///
/// ```
/// use pwrctl::firmware::hex::parse_hex;
///
/// let records = parse_hex(":0400000001020304F2\n:00000001FF\n").unwrap();
/// assert_eq!(records[0].data, vec![1, 2, 3, 4]);
/// ```
pub fn parse_hex(text: &str) -> Result<Vec<HexRecord>> {
    let mut records = Vec::new();
    let mut base: u32 = 0;

    for (index, raw) in text.lines().enumerate() {
        let line = index + 1;
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }

        let body = raw
            .strip_prefix(':')
            .ok_or_else(|| hex_error(line, "missing ':' start code"))?;
        let bytes = decode_hex_bytes(body, line)?;
        if bytes.len() < 5 {
            return Err(hex_error(line, "record too short"));
        }

        let count = bytes[0] as usize;
        if bytes.len() != count + 5 {
            return Err(hex_error(
                line,
                format!("byte count {} does not match record length", count),
            ));
        }

        let checksum = bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
        if checksum != 0 {
            return Err(hex_error(line, "checksum mismatch"));
        }

        let offset = u16::from_be_bytes([bytes[1], bytes[2]]) as u32;
        let record_type = bytes[3];
        let data = &bytes[4..4 + count];

        match record_type {
            RECORD_DATA => {
                if !data.is_empty() {
                    records.push(HexRecord::new(base.wrapping_add(offset), data.to_vec()));
                }
            }
            RECORD_EOF => return Ok(records),
            RECORD_EXT_SEGMENT | RECORD_EXT_LINEAR => {
                if count != 2 {
                    return Err(hex_error(line, "address record must carry 2 bytes"));
                }
                let value = u16::from_be_bytes([data[0], data[1]]) as u32;
                base = if record_type == RECORD_EXT_LINEAR {
                    value << 16
                } else {
                    value << 4
                };
            }
            other => {
                return Err(hex_error(line, format!("unsupported record type {:02X}", other)));
            }
        }
    }

    Ok(records)
}

/// Read and parse an Intel HEX file
pub fn load_hex_file<P: AsRef<Path>>(path: P) -> Result<Vec<HexRecord>> {
    let text = fs::read_to_string(path)?;
    parse_hex(&text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_data_and_eof() {
        let text = ":10010000214601360121470136007EFE09D2190140\n:00000001FF\n";
        let records = parse_hex(text).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].address, 0x0100);
        assert_eq!(records[0].data.len(), 16);
        assert_eq!(records[0].data[0], 0x21);
    }

    #[test]
    fn test_extended_linear_address() {
        let text = ":020000040001F9\n:0400100001020304E2\n:00000001FF\n";
        let records = parse_hex(text).unwrap();
        assert_eq!(records[0].address, 0x0001_0010);
    }

    #[test]
    fn test_extended_segment_address() {
        let text = ":020000021000EC\n:0100000055AA\n";
        let records = parse_hex(text).unwrap();
        assert_eq!(records[0].address, 0x1_0000);
        assert_eq!(records[0].data, vec![0x55]);
    }

    #[test]
    fn test_stops_at_eof_record() {
        let text = ":00000001FF\n:0100000055AA\n";
        assert!(parse_hex(text).unwrap().is_empty());
    }

    #[test]
    fn test_blank_lines_and_crlf() {
        let text = "\r\n:0100000055AA\r\n\r\n:00000001FF\r\n";
        assert_eq!(parse_hex(text).unwrap().len(), 1);
    }

    #[test]
    fn test_checksum_mismatch() {
        let err = parse_hex(":0100000055AB\n").unwrap_err();
        assert!(matches!(err, PwrctlError::HexFormat { line: 1, .. }));
        assert!(err.to_string().contains("checksum"));
    }

    #[test]
    fn test_missing_start_code() {
        let err = parse_hex("0100000055AA\n").unwrap_err();
        assert!(matches!(err, PwrctlError::HexFormat { line: 1, .. }));
    }

    #[test]
    fn test_length_mismatch() {
        assert!(matches!(
            parse_hex(":0200000055A9\n"),
            Err(PwrctlError::HexFormat { .. })
        ));
    }

    #[test]
    fn test_unsupported_record_type() {
        // Start linear address record
        let err = parse_hex(":0400000500000000F7\n").unwrap_err();
        assert!(err.to_string().contains("unsupported record type 05"));
    }

    #[test]
    fn test_invalid_digits() {
        assert!(matches!(
            parse_hex(":01000000G5AA\n"),
            Err(PwrctlError::HexFormat { line: 1, .. })
        ));
    }

    #[test]
    fn test_load_hex_file() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, ":0100000055AA\n:00000001FF\n").unwrap();
        let records = load_hex_file(file.path()).unwrap();
        assert_eq!(records, vec![HexRecord::new(0, vec![0x55])]);
    }
}
