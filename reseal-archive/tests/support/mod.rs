//! Hand-built ZIP bytes for reader tests.
//!
//! Local headers are written exactly as requested so tests can produce data
//! descriptors, bad CRCs, and truncations that a real zip writer refuses to.

#![allow(dead_code)]

use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::Write;

pub enum Method {
    Stored,
    Deflated,
    /// Deflate with sizes and CRC in a trailing data descriptor.
    Streamed { signature: bool },
}

pub struct ZipBuilder {
    out: Vec<u8>,
    central: Vec<u8>,
    count: u16,
}

impl ZipBuilder {
    pub fn new() -> Self {
        Self {
            out: Vec::new(),
            central: Vec::new(),
            count: 0,
        }
    }

    pub fn stored(self, name: &str, data: &[u8]) -> Self {
        self.entry(name, data, Method::Stored)
    }

    pub fn deflated(self, name: &str, data: &[u8]) -> Self {
        self.entry(name, data, Method::Deflated)
    }

    pub fn streamed(self, name: &str, data: &[u8], signature: bool) -> Self {
        self.entry(name, data, Method::Streamed { signature })
    }

    pub fn directory(self, name: &str) -> Self {
        assert!(name.ends_with('/'));
        self.entry(name, b"", Method::Stored)
    }

    pub fn entry(self, name: &str, data: &[u8], method: Method) -> Self {
        self.entry_with(name, data, method, 0, None)
    }

    /// Writes an entry with extra flag bits and an optional CRC override.
    pub fn entry_with(
        mut self,
        name: &str,
        data: &[u8],
        method: Method,
        extra_flags: u16,
        crc_override: Option<u32>,
    ) -> Self {
        let crc = crc_override.unwrap_or_else(|| crc32fast::hash(data));
        let (code, payload, descriptor) = match method {
            Method::Stored => (0u16, data.to_vec(), None),
            Method::Deflated => (8u16, deflate(data), None),
            Method::Streamed { signature } => (8u16, deflate(data), Some(signature)),
        };
        let flags = extra_flags | if descriptor.is_some() { 0x0008 } else { 0 };
        let (hdr_crc, hdr_csize, hdr_usize) = if descriptor.is_some() {
            (0, 0, 0)
        } else {
            (crc, payload.len() as u32, data.len() as u32)
        };

        let local_offset = self.out.len() as u32;
        self.out.extend_from_slice(&0x0403_4b50u32.to_le_bytes());
        self.out.extend_from_slice(&20u16.to_le_bytes());
        self.out.extend_from_slice(&flags.to_le_bytes());
        self.out.extend_from_slice(&code.to_le_bytes());
        self.out.extend_from_slice(&0u16.to_le_bytes());
        self.out.extend_from_slice(&0u16.to_le_bytes());
        self.out.extend_from_slice(&hdr_crc.to_le_bytes());
        self.out.extend_from_slice(&hdr_csize.to_le_bytes());
        self.out.extend_from_slice(&hdr_usize.to_le_bytes());
        self.out.extend_from_slice(&(name.len() as u16).to_le_bytes());
        self.out.extend_from_slice(&0u16.to_le_bytes());
        self.out.extend_from_slice(name.as_bytes());
        self.out.extend_from_slice(&payload);

        if let Some(signature) = descriptor {
            if signature {
                self.out.extend_from_slice(&0x0807_4b50u32.to_le_bytes());
            }
            self.out.extend_from_slice(&crc.to_le_bytes());
            self.out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
            self.out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        }

        self.central.extend_from_slice(&0x0201_4b50u32.to_le_bytes());
        self.central.extend_from_slice(&20u16.to_le_bytes());
        self.central.extend_from_slice(&20u16.to_le_bytes());
        self.central.extend_from_slice(&flags.to_le_bytes());
        self.central.extend_from_slice(&code.to_le_bytes());
        self.central.extend_from_slice(&0u16.to_le_bytes());
        self.central.extend_from_slice(&0u16.to_le_bytes());
        self.central.extend_from_slice(&crc.to_le_bytes());
        self.central
            .extend_from_slice(&(payload.len() as u32).to_le_bytes());
        self.central.extend_from_slice(&(data.len() as u32).to_le_bytes());
        self.central.extend_from_slice(&(name.len() as u16).to_le_bytes());
        self.central.extend_from_slice(&0u16.to_le_bytes());
        self.central.extend_from_slice(&0u16.to_le_bytes());
        self.central.extend_from_slice(&0u16.to_le_bytes());
        self.central.extend_from_slice(&0u16.to_le_bytes());
        self.central.extend_from_slice(&0u32.to_le_bytes());
        self.central.extend_from_slice(&local_offset.to_le_bytes());
        self.central.extend_from_slice(name.as_bytes());

        self.count += 1;
        self
    }

    /// Appends raw bytes after the entries written so far.
    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.out.extend_from_slice(bytes);
        self
    }

    /// Local records only, no central directory.
    pub fn local_only(self) -> Vec<u8> {
        self.out
    }

    pub fn finish(mut self) -> Vec<u8> {
        let cd_start = self.out.len() as u32;
        let cd_size = self.central.len() as u32;
        self.out.extend_from_slice(&self.central);
        self.out.extend_from_slice(&0x0605_4b50u32.to_le_bytes());
        self.out.extend_from_slice(&0u16.to_le_bytes());
        self.out.extend_from_slice(&0u16.to_le_bytes());
        self.out.extend_from_slice(&self.count.to_le_bytes());
        self.out.extend_from_slice(&self.count.to_le_bytes());
        self.out.extend_from_slice(&cd_size.to_le_bytes());
        self.out.extend_from_slice(&cd_start.to_le_bytes());
        self.out.extend_from_slice(&0u16.to_le_bytes());
        self.out
    }
}

pub fn deflate(data: &[u8]) -> Vec<u8> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).expect("deflate");
    encoder.finish().expect("deflate finish")
}

/// Deterministic, poorly compressible bytes.
pub fn noise(len: usize, seed: u32) -> Vec<u8> {
    let mut state = seed.wrapping_mul(2_654_435_761).wrapping_add(1);
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state >> 24) as u8
        })
        .collect()
}
