//! Streaming construction and verification of tar-compatible backup
//! archives.
//!
//! An archive is built in a single pass through an ordered chain of I/O
//! links (cancellation gate, rate limiter, byte counter, content hash) over
//! a tar entry writer that patches its own header once the final body size
//! is known, and finishes with an appended metadata record. The checker
//! rebuilds the equivalent read chain and re-derives the digest.

pub mod buf;
pub mod cancel;
pub mod chain;
pub mod check;
pub mod cipher;
pub mod codec;
pub mod create;
pub mod error;
pub mod hash;
pub mod limit;
pub mod meta;
pub mod patcher;

pub use crate::cancel::CancelToken;
pub use crate::check::{ArchiveChecker, CheckOptions, IntegrityCheck};
pub use crate::cipher::{Aes256Cbc, BlockCipher, Padding};
pub use crate::codec::CompressionMode;
pub use crate::create::{ArchiveCreator, ArchiveOptions, CipherSpec};
pub use crate::error::ArchiveError;
pub use crate::meta::{ArchiveMeta, META_ENTRY_NAME};
