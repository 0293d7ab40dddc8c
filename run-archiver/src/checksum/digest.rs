//! Content digests.
//!
//! The whole pipeline uses one algorithm: 128-bit MD5, rendered the way
//! `md5sum` prints it, so listings can be checked with stock tools.

use md5::{Digest as _, Md5};
use std::fmt;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

const HEX_LEN: usize = 32;

/// A lowercase hex content digest
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest(String);

impl Digest {
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Digest {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != HEX_LEN {
            return Err(format!("expected {} hex characters, got {}", HEX_LEN, s.len()));
        }
        if !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(format!("invalid hex in digest: {}", s));
        }
        Ok(Digest(s.to_ascii_lowercase()))
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Streams bytes into a digest.
pub trait Hasher: Send + Sync {
    fn digest(&self, reader: &mut dyn Read) -> io::Result<Digest>;

    /// Digest a file by path
    fn digest_file(&self, path: &Path) -> io::Result<Digest> {
        let mut file = std::fs::File::open(path)?;
        self.digest(&mut file)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Md5Hasher;

impl Hasher for Md5Hasher {
    fn digest(&self, reader: &mut dyn Read) -> io::Result<Digest> {
        let mut hasher = Md5::new();
        let mut buffer = vec![0u8; 64 * 1024];

        loop {
            let n = reader.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }

        Ok(Digest(format!("{:x}", hasher.finalize())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_values() -> io::Result<()> {
        let hasher = Md5Hasher;
        assert_eq!(
            hasher.digest(&mut &b""[..])?.as_str(),
            "d41d8cd98f00b204e9800998ecf8427e"
        );
        assert_eq!(
            hasher.digest(&mut &b"abc"[..])?.as_str(),
            "900150983cd24fb0d6963f7d28e17f72"
        );
        Ok(())
    }

    #[test]
    fn test_large_input_spans_buffers() -> io::Result<()> {
        let data = vec![7u8; 200 * 1024];
        let hasher = Md5Hasher;
        let whole = hasher.digest(&mut &data[..])?;
        let chained = hasher.digest(&mut (&data[..100 * 1024]).chain(&data[100 * 1024..]))?;
        assert_eq!(whole, chained);
        Ok(())
    }

    #[test]
    fn test_digest_parsing() {
        let parsed: Digest = "900150983CD24FB0D6963F7D28E17F72".parse().unwrap();
        assert_eq!(parsed.as_str(), "900150983cd24fb0d6963f7d28e17f72");
        assert!("abc".parse::<Digest>().is_err());
        assert!("z00150983cd24fb0d6963f7d28e17f72".parse::<Digest>().is_err());
    }
}
