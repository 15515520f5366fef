use core::fmt;

/// A four-character chunk tag as stored in a `PSB` container.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    /// Returns the tag as a `str` if all four bytes are printable ASCII.
    pub fn as_str(&self) -> Option<&str> {
        if self.0.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
            core::str::from_utf8(&self.0).ok()
        } else {
            None
        }
    }
}

impl fmt::Debug for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_str() {
            Some(s) => write!(f, "FourCC({s:?})"),
            None => write!(f, "FourCC({:02x?})", self.0),
        }
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_str() {
            Some(s) => f.write_str(s),
            None => write!(f, "{:02x?}", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn printable_tag_formats_as_text() {
        assert_eq!(FourCC(*b"GLSL").as_str(), Some("GLSL"));
        assert_eq!(format!("{}", FourCC(*b"ISGN")), "ISGN");
    }

    #[test]
    fn non_printable_tag_formats_as_hex() {
        assert_eq!(FourCC([0, 1, 2, 3]).as_str(), None);
    }
}
