use std::fmt;
use std::io;
use std::io::{Read, Write};
use std::str::FromStr;

use bzip2::read::BzDecoder;
use bzip2::write::BzEncoder;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};

use crate::error::ArchiveError;

/// Body compression codec. Absence of compression is `Option::None`
/// (serialized as `null` in the metadata record).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionMode {
    Gzip,
    Bzip2,
    Zstd,
}

impl CompressionMode {
    /// Conventional filename suffix for the mode.
    pub fn suffix(&self) -> &'static str {
        match self {
            CompressionMode::Gzip => ".gz",
            CompressionMode::Bzip2 => ".bz2",
            CompressionMode::Zstd => ".zst",
        }
    }
}

impl fmt::Display for CompressionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            CompressionMode::Gzip => "gzip",
            CompressionMode::Bzip2 => "bzip2",
            CompressionMode::Zstd => "zstd",
        };
        write!(f, "{}", tag)
    }
}

impl FromStr for CompressionMode {
    type Err = ArchiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gzip" | "gz" => Ok(CompressionMode::Gzip),
            "bzip2" | "bz2" => Ok(CompressionMode::Bzip2),
            "zstd" | "zst" => Ok(CompressionMode::Zstd),
            other => Err(ArchiveError::UnsupportedCompression(other.to_string())),
        }
    }
}

/// Compressing writer over an arbitrary sink. `flush` pushes buffered data
/// through without finalizing; `finish` writes the codec trailer and
/// returns the inner sink, after which the emitted byte count is final.
pub enum CodecWrite<W: Write> {
    Store(W),
    Gzip(GzEncoder<W>),
    Bzip2(BzEncoder<W>),
    Zstd(zstd::stream::write::Encoder<'static, W>),
}

impl<W: Write> CodecWrite<W> {
    pub fn new(inner: W, mode: Option<CompressionMode>) -> io::Result<Self> {
        Ok(match mode {
            None => CodecWrite::Store(inner),
            Some(CompressionMode::Gzip) => {
                CodecWrite::Gzip(GzEncoder::new(inner, flate2::Compression::default()))
            }
            Some(CompressionMode::Bzip2) => {
                CodecWrite::Bzip2(BzEncoder::new(inner, bzip2::Compression::default()))
            }
            Some(CompressionMode::Zstd) => CodecWrite::Zstd(zstd::stream::write::Encoder::new(
                inner,
                zstd::DEFAULT_COMPRESSION_LEVEL,
            )?),
        })
    }

    pub fn finish(self) -> io::Result<W> {
        match self {
            CodecWrite::Store(w) => Ok(w),
            CodecWrite::Gzip(e) => e.finish(),
            CodecWrite::Bzip2(e) => e.finish(),
            CodecWrite::Zstd(e) => e.finish(),
        }
    }
}

impl<W: Write> Write for CodecWrite<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            CodecWrite::Store(w) => w.write(buf),
            CodecWrite::Gzip(e) => e.write(buf),
            CodecWrite::Bzip2(e) => e.write(buf),
            CodecWrite::Zstd(e) => e.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            CodecWrite::Store(w) => w.flush(),
            CodecWrite::Gzip(e) => e.flush(),
            CodecWrite::Bzip2(e) => e.flush(),
            CodecWrite::Zstd(e) => e.flush(),
        }
    }
}

/// Decompressing reader for the recorded mode.
pub fn decoder<'a>(
    inner: Box<dyn Read + 'a>,
    mode: Option<CompressionMode>,
) -> io::Result<Box<dyn Read + 'a>> {
    Ok(match mode {
        None => inner,
        Some(CompressionMode::Gzip) => Box::new(GzDecoder::new(inner)),
        Some(CompressionMode::Bzip2) => Box::new(BzDecoder::new(inner)),
        Some(CompressionMode::Zstd) => Box::new(zstd::stream::read::Decoder::new(inner)?),
    })
}
