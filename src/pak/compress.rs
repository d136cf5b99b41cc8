#![forbid(unsafe_code)]

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{self, Read, Write};

/// Files are streamed through the compressor in blocks of this size, so peak
/// memory does not depend on input size.
pub const BLOCK_SIZE: usize = 8 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compressed {
    pub data: Vec<u8>,
    pub raw_len: u64,
}

pub trait Compressor: Send + Sync {
    fn name(&self) -> &'static str;

    fn compress(&self, input: &mut dyn Read) -> io::Result<Compressed>;

    fn decompress(&self, input: &[u8]) -> io::Result<Vec<u8>>;

    fn compress_bytes(&self, mut input: &[u8]) -> io::Result<Compressed> {
        self.compress(&mut input)
    }
}

/// gzip, the format every reader of the resource table expects.
#[derive(Debug, Clone, Copy)]
pub struct Gzip {
    level: Compression,
}

impl Gzip {
    pub fn new(level: u32) -> Self {
        Self {
            level: Compression::new(level.min(9)),
        }
    }
}

impl Default for Gzip {
    fn default() -> Self {
        Self {
            level: Compression::best(),
        }
    }
}

impl Compressor for Gzip {
    fn name(&self) -> &'static str {
        "gzip"
    }

    fn compress(&self, input: &mut dyn Read) -> io::Result<Compressed> {
        let mut encoder = GzEncoder::new(Vec::<u8>::new(), self.level);
        let mut block = [0u8; BLOCK_SIZE];
        let mut raw_len = 0u64;
        loop {
            let n = match input.read(&mut block) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            encoder.write_all(&block[..n])?;
            raw_len += n as u64;
        }
        Ok(Compressed {
            data: encoder.finish()?,
            raw_len,
        })
    }

    fn decompress(&self, input: &[u8]) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        GzDecoder::new(input).read_to_end(&mut out)?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn empty_input_still_produces_a_gzip_member() {
        let gz = Gzip::default();
        let out = gz.compress_bytes(&[]).unwrap();
        assert_eq!(out.raw_len, 0);
        assert_eq!(&out.data[..2], &[0x1f, 0x8b]);
        assert!(gz.decompress(&out.data).unwrap().is_empty());
    }

    #[test]
    fn inputs_larger_than_a_block_are_counted_fully() {
        let data: Vec<u8> = (0..(BLOCK_SIZE * 3 + 17)).map(|i| (i % 251) as u8).collect();
        let gz = Gzip::new(6);
        let out = gz.compress_bytes(&data).unwrap();
        assert_eq!(out.raw_len, data.len() as u64);
        assert_eq!(gz.decompress(&out.data).unwrap(), data);
    }

    #[test]
    fn garbage_is_not_decompressed() {
        assert!(Gzip::default().decompress(b"not gzip at all").is_err());
    }

    proptest! {
        #[test]
        fn decompress_inverts_compress(data in prop::collection::vec(any::<u8>(), 0..20_000), level in 0u32..10) {
            let gz = Gzip::new(level);
            let out = gz.compress_bytes(&data).unwrap();
            prop_assert_eq!(gz.decompress(&out.data).unwrap(), data);
        }
    }
}
