use std::fs::File;
use std::io;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use log::{error, info};

use crate::cancel::{CancelToken, GateRead};
use crate::cipher::{BlockCipher, CipherRead};
use crate::codec;
use crate::error::ArchiveError;
use crate::hash::{HashRead, Hasher};
use crate::limit::LimitRead;
use crate::meta::{ArchiveMeta, META_ENTRY_NAME};

#[derive(Default)]
pub struct CheckOptions {
    pub rate_cap: Option<f64>,
    pub cancel: Option<CancelToken>,
}

/// Outcome of an integrity check. A mismatch is a result, not an error;
/// both digests stay available for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityCheck {
    pub matches: bool,
    pub expected: String,
    pub actual: String,
}

/// Read-direction counterpart of the creator: locates the metadata record,
/// rebuilds an equivalent chain over the body entry and re-derives the
/// content digest.
pub struct ArchiveChecker {
    path: PathBuf,
    opts: CheckOptions,
}

impl ArchiveChecker {
    pub fn new(path: impl Into<PathBuf>, opts: CheckOptions) -> Self {
        ArchiveChecker {
            path: path.into(),
            opts,
        }
    }

    // Fresh read chain over the physical file: throttle, then the gate so
    // cancellation is polled on every read.
    fn open_reader(&self) -> Result<Box<dyn Read>, ArchiveError> {
        let file = File::open(&self.path)?;
        let mut reader: Box<dyn Read> = Box::new(LimitRead::new(file, self.opts.rate_cap));
        if let Some(token) = self.opts.cancel.clone() {
            reader = Box::new(GateRead::new(reader, token));
        }
        Ok(reader)
    }

    // Locate the named entry and hand its sub-stream to `work`. Entries are
    // walked in order; the body payload is never buffered whole.
    fn with_entry<T>(
        &self,
        name: &str,
        work: impl FnOnce(&mut dyn Read) -> Result<T, ArchiveError>,
    ) -> Result<T, ArchiveError> {
        let reader = self.open_reader()?;
        let mut archive = tar::Archive::new(reader);

        for entry in archive.entries()? {
            let mut entry = entry?;
            if entry.path()?.as_ref() == Path::new(name) {
                return work(&mut entry);
            }
        }
        Err(ArchiveError::EntryNotFound(name.to_string()))
    }

    /// Read the named container entry fully.
    pub fn open_file(&self, name: &str) -> Result<Vec<u8>, ArchiveError> {
        self.with_entry(name, |entry| {
            let mut data = Vec::new();
            entry.read_to_end(&mut data)?;
            Ok(data)
        })
    }

    /// Parse the well-known metadata entry.
    pub fn open_meta(&self) -> Result<ArchiveMeta, ArchiveError> {
        let raw = self.open_file(META_ENTRY_NAME)?;
        Ok(ArchiveMeta::from_json(&raw)?)
    }

    /// Re-derive the body digest with the recorded algorithm over the
    /// recorded compression mode and compare it (case-insensitively)
    /// against the stored one. Encrypted archives need the matching
    /// decryption cipher.
    pub fn check_archive(
        &self,
        cipher: Option<Box<dyn BlockCipher>>,
    ) -> Result<IntegrityCheck, ArchiveError> {
        let meta = self.open_meta()?;
        let algorithm = meta
            .hash_algorithm
            .as_deref()
            .ok_or(ArchiveError::MissingField("hash_algorithm"))?;
        let expected = meta
            .hash_value
            .clone()
            .ok_or(ArchiveError::MissingField("hash_value"))?;
        let hasher = Hasher::new(algorithm)?;

        let result = self.with_entry(&meta.inside_filename, move |entry| {
            let body: Box<dyn Read + '_> = match cipher {
                Some(cipher) => Box::new(CipherRead::new(entry, cipher)),
                None => Box::new(entry),
            };
            let decoded = codec::decoder(body, meta.compression_mode)?;

            let mut hashing = HashRead::new(decoded, hasher);
            io::copy(&mut hashing, &mut io::sink())?;
            Ok(hashing.hexdigest())
        });

        match result {
            Ok(actual) => {
                let matches = actual.eq_ignore_ascii_case(&expected);
                if matches {
                    info!("archive {} digest verified", self.path.display());
                } else {
                    error!(
                        "archive {} digest mismatch: expected {}, got {}",
                        self.path.display(),
                        expected,
                        actual
                    );
                }
                Ok(IntegrityCheck {
                    matches,
                    expected,
                    actual,
                })
            }
            Err(ArchiveError::Terminated) => {
                error!("integrity check of {} cancelled", self.path.display());
                Err(ArchiveError::Terminated)
            }
            Err(err) => Err(err),
        }
    }

    /// Stream the decoded body payload into `out`; returns the byte count.
    pub fn extract_to<W: Write>(
        &self,
        out: &mut W,
        cipher: Option<Box<dyn BlockCipher>>,
    ) -> Result<u64, ArchiveError> {
        let meta = self.open_meta()?;
        self.with_entry(&meta.inside_filename, move |entry| {
            let body: Box<dyn Read + '_> = match cipher {
                Some(cipher) => Box::new(CipherRead::new(entry, cipher)),
                None => Box::new(entry),
            };
            let mut decoded = codec::decoder(body, meta.compression_mode)?;
            Ok(io::copy(&mut decoded, out)?)
        })
    }
}
