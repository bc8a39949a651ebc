use std::io;
use std::io::{Seek, SeekFrom, Write};

use log::debug;

use crate::cipher::{BlockCipher, CipherWrite, Padding};
use crate::codec::{CodecWrite, CompressionMode};
use crate::error::ArchiveError;
use crate::meta::{ArchiveMeta, META_ENTRY_NAME};

/// Tar alignment units: entries are padded to the block size, the whole
/// archive to the record size.
pub const BLOCK_SIZE: u64 = 512;
pub const RECORD_SIZE: u64 = BLOCK_SIZE * 20;

const HEADER_LEN: u64 = BLOCK_SIZE;

/// Smallest multiple of `unit` that is >= `value`.
pub fn align_up(value: u64, unit: u64) -> u64 {
    match value % unit {
        0 => value,
        rem => value + unit - rem,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    HeaderWritten,
    Streaming,
    Flushed,
    Patched,
    Closed,
}

pub struct PatchOptions {
    pub entry_name: String,
    pub mode: Option<CompressionMode>,
    pub patch_header: bool,
    pub patch_tail: bool,
    pub mtime: i64,
}

impl PatchOptions {
    pub fn new(mode: Option<CompressionMode>) -> Self {
        PatchOptions {
            entry_name: ArchiveMeta::inside_name_for(mode),
            mode,
            patch_header: true,
            patch_tail: true,
            mtime: time::OffsetDateTime::now_utc().unix_timestamp(),
        }
    }
}

// Body bytes optionally pass a block cipher on their way to the sink;
// container structure never does, so the file stays a readable tar and the
// header patch can seek.
enum BodySink<W: Write> {
    Plain(W),
    Cipher(CipherWrite<W>),
}

impl<W: Write> BodySink<W> {
    fn finish(self) -> io::Result<W> {
        match self {
            BodySink::Plain(w) => Ok(w),
            BodySink::Cipher(c) => c.finish(),
        }
    }
}

impl<W: Write> Write for BodySink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            BodySink::Plain(w) => w.write(buf),
            BodySink::Cipher(c) => c.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            BodySink::Plain(w) => w.flush(),
            BodySink::Cipher(c) => c.flush(),
        }
    }
}

/// Streaming tar entry writer that fixes its own header up afterwards.
///
/// The final body size is unknown until all data has passed through the
/// codec, so a provisional header (size 0) reserves the right byte span at
/// construction, the body streams through without ever being buffered
/// whole, and `patch` rewrites the header in place once the count is known,
/// appending the block padding and the trailing metadata entry on the way.
///
/// State machine: header written -> body streaming -> flushed -> patched
/// -> closed. `write` is only legal in the first two states, `patch` moves
/// through the middle ones exactly once.
pub struct TarPatcher<W: Write + Seek> {
    opts: PatchOptions,
    start_position: u64,
    data_written: u64,
    state: State,
    inner: Option<W>,
    body: Option<CodecWrite<BodySink<W>>>,
}

impl<W: Write + Seek> TarPatcher<W> {
    pub fn create(
        mut inner: W,
        opts: PatchOptions,
        cipher: Option<(Box<dyn BlockCipher>, Option<Padding>)>,
    ) -> Result<Self, ArchiveError> {
        let start_position = inner.stream_position()?;

        if opts.patch_header {
            // Provisional header; the eventual patch overwrites exactly
            // this span with the true size.
            let header = entry_header(&opts.entry_name, 0, opts.mtime)?;
            inner.write_all(header.as_bytes())?;
        }

        let sink = match cipher {
            None => BodySink::Plain(inner),
            Some((cipher, padding)) => {
                BodySink::Cipher(CipherWrite::new(inner, cipher, padding)?)
            }
        };
        let body = CodecWrite::new(sink, opts.mode)?;

        Ok(TarPatcher {
            opts,
            start_position,
            data_written: 0,
            state: State::HeaderWritten,
            inner: None,
            body: Some(body),
        })
    }

    /// Bytes the body entry occupies on disk, post-codec and post-cipher.
    /// Only meaningful once `patch` has run.
    pub fn data_written(&self) -> u64 {
        self.data_written
    }

    /// Finalize the entry: flush the codec trailer, compute the true body
    /// size from the stream offset, pad, append the metadata entry, pad the
    /// archive to the record boundary, and rewrite the header in place.
    /// Returns the patched-in body size.
    pub fn patch(&mut self, meta: &ArchiveMeta) -> Result<u64, ArchiveError> {
        match self.state {
            State::HeaderWritten | State::Streaming => {}
            _ => return Err(bad_state("patch").into()),
        }

        // The codec has to emit its trailer (and the cipher its padding
        // block) before the byte count is final.
        let body = self.body.take().ok_or_else(|| bad_state("patch"))?;
        let mut inner = body.finish()?.finish()?;
        inner.flush()?;
        self.state = State::Flushed;

        let mut position = inner.stream_position()?;
        let header_len = if self.opts.patch_header { HEADER_LEN } else { 0 };
        let inside_file_size = position - self.start_position - header_len;

        if self.opts.patch_tail {
            position = pad_to(&mut inner, position, BLOCK_SIZE)?;

            let payload = meta.to_json()?;
            let header = entry_header(META_ENTRY_NAME, payload.len() as u64, self.opts.mtime)?;
            inner.write_all(header.as_bytes())?;
            inner.write_all(&payload)?;

            position = inner.stream_position()?;
            position = pad_to(&mut inner, position, BLOCK_SIZE)?;
            // The record padding doubles as the end-of-archive zero blocks.
            pad_to(&mut inner, position, RECORD_SIZE)?;
        }

        if self.opts.patch_header {
            let header = entry_header(&self.opts.entry_name, inside_file_size, self.opts.mtime)?;
            let end = inner.stream_position()?;
            inner.seek(SeekFrom::Start(self.start_position))?;
            inner.write_all(header.as_bytes())?;
            inner.seek(SeekFrom::Start(end))?;
        }

        inner.flush()?;
        debug!(
            "patched entry {}: {} bytes on disk",
            self.opts.entry_name, inside_file_size
        );

        self.inner = Some(inner);
        self.data_written = inside_file_size;
        self.state = State::Patched;
        Ok(inside_file_size)
    }

    /// Close the patcher. After a successful `patch` this flushes the sink;
    /// on an abandoned stream it drops the owned codec without a trailer
    /// (the orchestrator deletes the file in that case).
    pub fn close(&mut self) -> io::Result<()> {
        match self.state {
            State::Closed => Ok(()),
            State::Patched => {
                if let Some(inner) = self.inner.as_mut() {
                    inner.flush()?;
                }
                self.state = State::Closed;
                Ok(())
            }
            _ => {
                self.body = None;
                self.state = State::Closed;
                Ok(())
            }
        }
    }

    /// Hand the underlying sink back, if the patcher still owns it whole.
    pub fn into_inner(self) -> Option<W> {
        self.inner
    }
}

impl<W: Write + Seek> Write for TarPatcher<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.state {
            State::HeaderWritten | State::Streaming => {}
            _ => return Err(bad_state("write")),
        }
        self.state = State::Streaming;
        match self.body.as_mut() {
            Some(body) => body.write(buf),
            None => Err(bad_state("write")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(body) = self.body.as_mut() {
            return body.flush();
        }
        if let Some(inner) = self.inner.as_mut() {
            return inner.flush();
        }
        Ok(())
    }
}

fn bad_state(op: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("{} on finalized archive entry", op),
    )
}

fn entry_header(name: &str, size: u64, mtime: i64) -> io::Result<tar::Header> {
    let mut header = tar::Header::new_ustar();
    header.set_path(name)?;
    header.set_size(size);
    header.set_mode(0o644);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mtime(mtime.max(0) as u64);
    header.set_entry_type(tar::EntryType::Regular);
    header.set_cksum();
    Ok(header)
}

fn pad_to<W: Write>(w: &mut W, position: u64, unit: u64) -> io::Result<u64> {
    let target = align_up(position, unit);
    let zeros = [0u8; BLOCK_SIZE as usize];

    let mut remaining = target - position;
    while remaining > 0 {
        let n = remaining.min(BLOCK_SIZE) as usize;
        w.write_all(&zeros[..n])?;
        remaining -= n as u64;
    }
    Ok(target)
}
