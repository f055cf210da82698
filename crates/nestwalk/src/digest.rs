//! Pass-through reader that digests bytes as they flow.
//!
//! [`DigestReader`] never buffers: every chunk handed to the caller is fed
//! to each accumulator and counted. Final values are only available once
//! the wrapped reader has reported end of stream.

use crate::error::{EngineError, Result};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Read};
use std::str::FromStr;

/// Property name for the byte count.
pub const SIZE_PROPERTY: &str = "size";

/// Supported digest algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DigestAlgorithm {
    Md5,
    Sha1,
    Sha256,
    Sha512,
    Blake3,
    Crc32,
    Size,
}

impl DigestAlgorithm {
    pub fn name(self) -> &'static str {
        match self {
            DigestAlgorithm::Md5 => "md5",
            DigestAlgorithm::Sha1 => "sha-1",
            DigestAlgorithm::Sha256 => "sha-256",
            DigestAlgorithm::Sha512 => "sha-512",
            DigestAlgorithm::Blake3 => "blake3",
            DigestAlgorithm::Crc32 => "crc32",
            DigestAlgorithm::Size => SIZE_PROPERTY,
        }
    }

    /// Parse a comma separated list such as `"md5, sha-256"`.
    pub fn parse_list(list: &str) -> Result<Vec<DigestAlgorithm>> {
        let mut algorithms = Vec::new();
        for name in list.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            let algorithm: DigestAlgorithm = name.parse()?;
            if !algorithms.contains(&algorithm) {
                algorithms.push(algorithm);
            }
        }
        Ok(algorithms)
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DigestAlgorithm {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "md5" => Ok(DigestAlgorithm::Md5),
            "sha1" | "sha-1" => Ok(DigestAlgorithm::Sha1),
            "sha256" | "sha-256" => Ok(DigestAlgorithm::Sha256),
            "sha512" | "sha-512" => Ok(DigestAlgorithm::Sha512),
            "blake3" => Ok(DigestAlgorithm::Blake3),
            "crc32" => Ok(DigestAlgorithm::Crc32),
            "size" => Ok(DigestAlgorithm::Size),
            other => Err(EngineError::Config(format!("Unknown digest algorithm: {}", other))),
        }
    }
}

/// Final value of one algorithm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DigestValue {
    Bytes(Vec<u8>),
    Numeric(u64),
}

impl fmt::Display for DigestValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DigestValue::Bytes(bytes) => f.write_str(&hex::encode(bytes)),
            DigestValue::Numeric(n) => write!(f, "{}", n),
        }
    }
}

enum Accumulator {
    Md5(md5::Context),
    Sha1(Sha1),
    Sha256(Sha256),
    Sha512(Sha512),
    Blake3(Box<blake3::Hasher>),
    Crc32(crc32fast::Hasher),
    Size,
}

impl Accumulator {
    fn new(algorithm: DigestAlgorithm) -> Self {
        match algorithm {
            DigestAlgorithm::Md5 => Accumulator::Md5(md5::Context::new()),
            DigestAlgorithm::Sha1 => Accumulator::Sha1(Sha1::new()),
            DigestAlgorithm::Sha256 => Accumulator::Sha256(Sha256::new()),
            DigestAlgorithm::Sha512 => Accumulator::Sha512(Sha512::new()),
            DigestAlgorithm::Blake3 => Accumulator::Blake3(Box::new(blake3::Hasher::new())),
            DigestAlgorithm::Crc32 => Accumulator::Crc32(crc32fast::Hasher::new()),
            DigestAlgorithm::Size => Accumulator::Size,
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Accumulator::Md5(ctx) => ctx.consume(data),
            Accumulator::Sha1(h) => h.update(data),
            Accumulator::Sha256(h) => h.update(data),
            Accumulator::Sha512(h) => h.update(data),
            Accumulator::Blake3(h) => {
                h.update(data);
            }
            Accumulator::Crc32(h) => h.update(data),
            Accumulator::Size => {}
        }
    }

    fn finalize(self, bytes: u64) -> DigestValue {
        match self {
            Accumulator::Md5(ctx) => DigestValue::Bytes(ctx.compute().0.to_vec()),
            Accumulator::Sha1(h) => DigestValue::Bytes(h.finalize().to_vec()),
            Accumulator::Sha256(h) => DigestValue::Bytes(h.finalize().to_vec()),
            Accumulator::Sha512(h) => DigestValue::Bytes(h.finalize().to_vec()),
            Accumulator::Blake3(h) => DigestValue::Bytes(h.finalize().as_bytes().to_vec()),
            Accumulator::Crc32(h) => DigestValue::Numeric(u64::from(h.finalize())),
            Accumulator::Size => DigestValue::Numeric(bytes),
        }
    }
}

/// Final byte count and digest values of a drained [`DigestReader`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestSummary {
    pub bytes: u64,
    pub values: BTreeMap<DigestAlgorithm, DigestValue>,
}

impl DigestSummary {
    pub fn value(&self, algorithm: DigestAlgorithm) -> Option<&DigestValue> {
        self.values.get(&algorithm)
    }

    /// Properties as recorded in associated information: `size` first,
    /// then one entry per algorithm.
    pub fn properties(&self) -> Vec<(String, String)> {
        let mut properties = vec![(SIZE_PROPERTY.to_string(), self.bytes.to_string())];
        properties.extend(
            self.values
                .iter()
                .filter(|(algorithm, _)| **algorithm != DigestAlgorithm::Size)
                .map(|(algorithm, value)| (algorithm.name().to_string(), value.to_string())),
        );
        properties
    }
}

/// Reader wrapper computing digests of everything read through it.
pub struct DigestReader<R> {
    inner: R,
    accumulators: Vec<(DigestAlgorithm, Accumulator)>,
    bytes: u64,
    drained: bool,
}

impl<R: Read> DigestReader<R> {
    pub fn new(inner: R, algorithms: &[DigestAlgorithm]) -> Self {
        Self {
            inner,
            accumulators: algorithms
                .iter()
                .map(|&algorithm| (algorithm, Accumulator::new(algorithm)))
                .collect(),
            bytes: 0,
            drained: false,
        }
    }

    /// Bytes read so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes
    }

    /// Whether the wrapped reader has reported end of stream.
    pub fn is_drained(&self) -> bool {
        self.drained
    }

    /// Read and digest whatever is left.
    pub fn drain(&mut self) -> io::Result<u64> {
        io::copy(self, &mut io::sink())
    }

    /// Final values; fails unless the stream has been fully drained.
    pub fn finish(self) -> Result<DigestSummary> {
        if !self.drained {
            return Err(EngineError::Io(io::Error::new(
                io::ErrorKind::Other,
                format!("digest requested after {} bytes, before end of stream", self.bytes),
            )));
        }
        let bytes = self.bytes;
        let values = self
            .accumulators
            .into_iter()
            .map(|(algorithm, acc)| (algorithm, acc.finalize(bytes)))
            .collect();
        Ok(DigestSummary { bytes, values })
    }

    /// Release the wrapped reader without finalizing.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for DigestReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n == 0 {
            if !buf.is_empty() {
                self.drained = true;
            }
            return Ok(0);
        }
        let chunk = &buf[..n];
        for (_, acc) in &mut self.accumulators {
            acc.update(chunk);
        }
        self.bytes += n as u64;
        Ok(n)
    }
}
