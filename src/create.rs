use std::fs;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use log::{error, info};
use time::OffsetDateTime;

use crate::cancel::CancelToken;
use crate::chain::{LinkSpec, WriteChain};
use crate::cipher::{BlockCipher, Padding};
use crate::codec::CompressionMode;
use crate::error::ArchiveError;
use crate::meta::ArchiveMeta;
use crate::patcher::{PatchOptions, TarPatcher};

/// Block cipher plus its padding strategy, handed over ready to use.
pub struct CipherSpec {
    pub cipher: Box<dyn BlockCipher>,
    pub padding: Option<Padding>,
}

pub struct ArchiveOptions {
    pub compression: Option<CompressionMode>,
    pub hash_algorithm: String,
    pub rate_cap: Option<f64>,
    pub cancel: Option<CancelToken>,
    pub inside_name: Option<String>,
    pub cipher: Option<CipherSpec>,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        ArchiveOptions {
            compression: None,
            hash_algorithm: "sha256".to_string(),
            rate_cap: None,
            cancel: None,
            inside_name: None,
            cipher: None,
        }
    }
}

/// One-shot archive orchestrator.
///
/// `archive` consumes the creator, so a second run on the same instance is
/// unrepresentable. Whatever happens — callback error, I/O failure,
/// cancellation — no partial file survives at the target path.
pub struct ArchiveCreator {
    path: PathBuf,
    opts: ArchiveOptions,
}

impl ArchiveCreator {
    pub fn new(path: impl Into<PathBuf>, opts: ArchiveOptions) -> Self {
        ArchiveCreator {
            path: path.into(),
            opts,
        }
    }

    /// Create the archive, driving `populate` with a writable handle for
    /// the body payload, and return the final metadata record.
    pub fn archive<F>(self, populate: F) -> Result<ArchiveMeta, ArchiveError>
    where
        F: FnOnce(&mut dyn Write) -> Result<(), ArchiveError>,
    {
        let ArchiveCreator { path, opts } = self;

        if let Some(token) = &opts.cancel {
            if token.is_cancelled() {
                error!(
                    "archive {} cancelled before any data was written",
                    path.display()
                );
                return Err(ArchiveError::Terminated);
            }
        }

        let file = match File::create(&path) {
            Ok(file) => file,
            Err(err) => {
                error!("could not create archive {}: {}", path.display(), err);
                return Err(err.into());
            }
        };

        match run(file, opts, populate) {
            Ok(meta) => {
                info!(
                    "archive {} written, {} payload bytes ({})",
                    path.display(),
                    meta.uncompressed_archive_size,
                    meta.hash_value.as_deref().unwrap_or("no digest")
                );
                Ok(meta)
            }
            Err(err) => {
                match &err {
                    ArchiveError::Terminated => {
                        error!(
                            "archive {} cancelled mid-stream, removing partial file",
                            path.display()
                        );
                    }
                    other => {
                        error!(
                            "archive {} failed: {}, removing partial file",
                            path.display(),
                            other
                        );
                    }
                }
                if let Err(rm_err) = fs::remove_file(&path) {
                    error!(
                        "could not remove partial archive {}: {}",
                        path.display(),
                        rm_err
                    );
                }
                Err(err)
            }
        }
    }
}

fn run<F>(file: File, opts: ArchiveOptions, populate: F) -> Result<ArchiveMeta, ArchiveError>
where
    F: FnOnce(&mut dyn Write) -> Result<(), ArchiveError>,
{
    let ArchiveOptions {
        compression,
        hash_algorithm,
        rate_cap,
        cancel,
        inside_name,
        cipher,
    } = opts;

    let creation_time = OffsetDateTime::now_utc().unix_timestamp();
    let inside_name =
        inside_name.unwrap_or_else(|| ArchiveMeta::inside_name_for(compression));

    let patch_opts = PatchOptions {
        entry_name: inside_name.clone(),
        mode: compression,
        patch_header: true,
        patch_tail: true,
        mtime: creation_time,
    };
    let patcher = TarPatcher::create(
        file,
        patch_opts,
        cipher.map(|spec| (spec.cipher, spec.padding)),
    )?;

    // Gate outermost, so a cancelled stream stops before it is throttled,
    // counted or hashed.
    let mut specs = Vec::new();
    if let Some(token) = cancel {
        specs.push(LinkSpec::Gate(token));
    }
    if let Some(cap) = rate_cap {
        specs.push(LinkSpec::Limit { cap });
    }
    specs.push(LinkSpec::Count);
    specs.push(LinkSpec::Hash {
        algorithm: hash_algorithm,
    });
    let mut chain = WriteChain::build(patcher, specs)?;

    populate(&mut chain)?;

    // Everything has to reach the physical sink before the size-dependent
    // header rewrite.
    chain.flush()?;

    let mut meta = ArchiveMeta::new(inside_name, compression, creation_time);
    chain.annotate(&mut meta);

    chain.sink_mut().patch(&meta)?;
    chain.close()?;
    chain.sink_mut().close()?;

    Ok(meta)
}

#[cfg(test)]
mod test_creator {
    use super::*;
    use crate::patcher::RECORD_SIZE;
    use std::io;

    const HELLO_SHA256: &str =
        "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[test]
    fn hello_world_archive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.tar");

        let creator = ArchiveCreator::new(&path, ArchiveOptions::default());
        let meta = creator
            .archive(|w| {
                w.write_all(b"hello world")?;
                Ok(())
            })
            .unwrap();

        assert_eq!(meta.uncompressed_archive_size, 11);
        assert_eq!(meta.hash_algorithm.as_deref(), Some("sha256"));
        assert_eq!(meta.hash_value.as_deref(), Some(HELLO_SHA256));
        assert_eq!(meta.inside_filename, "payload.tar");
        assert!(meta.compression_mode.is_none());

        // 11 raw payload bytes, record-aligned file.
        let len = fs::metadata(&path).unwrap().len();
        assert_eq!(len % RECORD_SIZE, 0);

        let mut archive = tar::Archive::new(File::open(&path).unwrap());
        let body = archive.entries().unwrap().next().unwrap().unwrap();
        assert_eq!(body.header().size().unwrap(), 11);
    }

    #[test]
    fn pre_set_cancellation_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("never.tar");

        let token = CancelToken::new();
        token.cancel();

        let creator = ArchiveCreator::new(
            &path,
            ArchiveOptions {
                cancel: Some(token),
                ..ArchiveOptions::default()
            },
        );
        let err = creator.archive(|_| Ok(())).unwrap_err();

        assert!(matches!(err, ArchiveError::Terminated));
        assert!(!path.exists());
    }

    #[test]
    fn mid_stream_cancellation_removes_the_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cut.tar");

        let token = CancelToken::new();
        let creator = ArchiveCreator::new(
            &path,
            ArchiveOptions {
                cancel: Some(token.clone()),
                ..ArchiveOptions::default()
            },
        );

        let err = creator
            .archive(|w| {
                w.write_all(b"some bytes make it out")?;
                token.cancel();
                w.write_all(b"this write hits the gate")?;
                Ok(())
            })
            .unwrap_err();

        assert!(matches!(err, ArchiveError::Terminated));
        assert!(!path.exists());
    }

    #[test]
    fn callback_failure_cleans_up_and_propagates_unwrapped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.tar");

        let creator = ArchiveCreator::new(&path, ArchiveOptions::default());
        let err = creator
            .archive(|w| {
                w.write_all(b"partial payload")?;
                Err(ArchiveError::Io(io::Error::new(
                    io::ErrorKind::Other,
                    "snapshot provider exploded",
                )))
            })
            .unwrap_err();

        match err {
            ArchiveError::Io(inner) => {
                assert_eq!(inner.to_string(), "snapshot provider exploded")
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(!path.exists());
    }

    #[test]
    fn unknown_hash_name_fails_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nohash.tar");

        let creator = ArchiveCreator::new(
            &path,
            ArchiveOptions {
                hash_algorithm: "adler32".to_string(),
                ..ArchiveOptions::default()
            },
        );
        let err = creator.archive(|_| Ok(())).unwrap_err();

        assert!(matches!(err, ArchiveError::UnsupportedHash(_)));
        assert!(!path.exists());
    }

    #[test]
    fn rate_cap_is_recorded_and_roughly_honored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slow.tar");

        let cap = 100_000.0;
        let creator = ArchiveCreator::new(
            &path,
            ArchiveOptions {
                rate_cap: Some(cap),
                ..ArchiveOptions::default()
            },
        );
        let meta = creator
            .archive(|w| {
                for _ in 0..5 {
                    w.write_all(&[0u8; 10_000])?;
                }
                Ok(())
            })
            .unwrap();

        let rate = meta.io_write_rate.expect("limiter should report a rate");
        assert!(rate <= cap * 1.1, "rate {} exceeds cap {}", rate, cap);
    }
}
