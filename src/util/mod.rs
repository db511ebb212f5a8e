
use std::fmt;

/// Write a hexdump of the provided byte slice.
pub fn hexdump(
    f: &mut fmt::Formatter,
    prefix: &str,
    buffer: &[u8],
) -> std::result::Result<(), std::fmt::Error> {
    const COLUMNS: usize = 16;
    let mut offset: usize = 0;
    if buffer.is_empty() {
        // For a zero-length buffer, at least print an offset instead of
        // nothing.
        write!(f, "{}{:04x}: ", prefix, 0)?;
    }
    while offset < buffer.len() {
        write!(f, "{}{:04x}: ", prefix, offset)?;

        // Determine row byte range
        let next_offset = offset + COLUMNS;
        let (row_size, padding) = if next_offset <= buffer.len() {
            (COLUMNS, 0)
        } else {
            (buffer.len() - offset, next_offset - buffer.len())
        };
        let row = &buffer[offset..offset + row_size];

        // Print hex representation
        for b in row {
            write!(f, "{:02x} ", b)?;
        }
        for _ in 0..padding {
            write!(f, "   ")?;
        }

        // Print ASCII representation
        for b in row {
            write!(
                f,
                "{}",
                match *b {
                    c @ 0x20..=0x7E => c as char,
                    _ => '.',
                }
            )?;
        }

        offset += COLUMNS;
        if offset < buffer.len() {
            writeln!(f)?;
        }
    }
    Ok(())
}

pub struct Hex<'a>(pub &'a [u8]);
impl<'a> fmt::Display for Hex<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        hexdump(f, "", self.0)
    }
}

pub fn hex(bytes: &[u8]) -> Hex<'_> {
    Hex(bytes)
}

/// Render bytes as a space-separated list, either as two-digit hex or
/// three-digit decimal values.
pub fn bytes_as_string(bytes: &[u8], hex: bool) -> String {
    let mut s = String::with_capacity(bytes.len() * 4);
    for b in bytes {
        if hex {
            s.push_str(&format!("{:02x} ", b));
        } else {
            s.push_str(&format!("{:03} ", b));
        }
    }
    s
}
