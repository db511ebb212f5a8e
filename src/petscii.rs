//! A minimal Petscii string type.  Only the unshifted character set is
//! mapped onto Unicode; everything else is shown escaped.

use std::fmt;
use std::io;

/// A string of Petscii bytes, as found in file names, disk names, and
/// disk identifiers.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Petscii(Vec<u8>);

impl Petscii {
    pub fn from_bytes(bytes: &[u8]) -> Petscii {
        Petscii(bytes.to_vec())
    }

    /// Build a Petscii string from a fixed-size field, discarding any
    /// trailing `pad` bytes.
    pub fn from_padded_bytes(bytes: &[u8], pad: u8) -> Petscii {
        let end = bytes
            .iter()
            .rposition(|&b| b != pad)
            .map(|p| p + 1)
            .unwrap_or(0);
        Petscii(bytes[..end].to_vec())
    }

    /// Write this string into a fixed-size field, filling the remainder
    /// with `pad`.
    pub fn write_bytes_with_padding(&self, dest: &mut [u8], pad: u8) -> io::Result<()> {
        if self.0.len() > dest.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "petscii string exceeds field size",
            ));
        }
        dest[..self.0.len()].copy_from_slice(&self.0);
        for b in dest[self.0.len()..].iter_mut() {
            *b = pad;
        }
        Ok(())
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Render the string using printable ASCII where possible and `{$xx}`
    /// escapes for everything else.
    pub fn to_escaped_string(&self) -> String {
        let mut s = String::with_capacity(self.0.len());
        for &b in self.0.iter() {
            match to_char(b) {
                Some(c) => s.push(c),
                None => s.push_str(&format!("{{${:02x}}}", b)),
            }
        }
        s
    }
}

/// Map a Petscii byte onto a printable character, if one exists.
fn to_char(b: u8) -> Option<char> {
    match b {
        0x20..=0x5A => Some(b as char),
        0x5B => Some('['),
        0x5D => Some(']'),
        0xC1..=0xDA => Some((b - 0x80) as char),
        _ => None,
    }
}

/// Map a character onto Petscii.  Letters of either case become the
/// unshifted capitals.
fn from_char(c: char) -> u8 {
    match c {
        'a'..='z' => c.to_ascii_uppercase() as u8,
        ' '..='Z' | '[' | ']' => c as u8,
        _ => b'?',
    }
}

impl fmt::Display for Petscii {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s: String = self.0.iter().map(|&b| to_char(b).unwrap_or('?')).collect();
        f.pad(&s)
    }
}

impl fmt::Debug for Petscii {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "\"{}\"", self.to_escaped_string())
    }
}

impl<'a> From<&'a str> for Petscii {
    fn from(string: &str) -> Petscii {
        Petscii(string.chars().map(from_char).collect())
    }
}

impl From<String> for Petscii {
    fn from(string: String) -> Petscii {
        Petscii::from(&string[..])
    }
}

impl<'a> From<&'a String> for Petscii {
    fn from(string: &String) -> Petscii {
        Petscii::from(&string[..])
    }
}

impl<'a> From<&'a [u8]> for Petscii {
    fn from(bytes: &[u8]) -> Petscii {
        Petscii::from_bytes(bytes)
    }
}

impl From<Petscii> for String {
    fn from(petscii: Petscii) -> String {
        petscii.to_string()
    }
}
