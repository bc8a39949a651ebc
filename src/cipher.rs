use std::io;
use std::io::{Read, Write};

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes256;

use crate::buf::{fill_buf, flush_buf};
use crate::error::ArchiveError;

/// Opaque block cipher supplied by the caller. The adapter only cares about
/// the block size and in-place block transforms; algorithm, key and chaining
/// mode all live behind this seam.
pub trait BlockCipher {
    fn block_size(&self) -> usize;

    /// Transform one plaintext block in place. `block.len()` is always
    /// exactly `block_size()`.
    fn encrypt_block(&mut self, block: &mut [u8]);

    /// Inverse of `encrypt_block`, same length contract.
    fn decrypt_block(&mut self, block: &mut [u8]);
}

/// Padding strategy for the final partial block. Mandatory: the payload
/// length is rarely block-aligned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Padding {
    Pkcs7,
}

/// AES-256 in CBC mode. One instance drives one direction of one stream;
/// the IV chains through the instance state.
pub struct Aes256Cbc {
    cipher: Aes256,
    state: [u8; 16],
}

impl Aes256Cbc {
    pub fn new(key: &[u8; 32], iv: [u8; 16]) -> Self {
        Aes256Cbc {
            cipher: Aes256::new(GenericArray::from_slice(key)),
            state: iv,
        }
    }
}

impl BlockCipher for Aes256Cbc {
    fn block_size(&self) -> usize {
        16
    }

    fn encrypt_block(&mut self, block: &mut [u8]) {
        for (b, s) in block.iter_mut().zip(self.state.iter()) {
            *b ^= s;
        }
        self.cipher
            .encrypt_block(GenericArray::from_mut_slice(block));
        self.state.copy_from_slice(block);
    }

    fn decrypt_block(&mut self, block: &mut [u8]) {
        let mut chained = [0u8; 16];
        chained.copy_from_slice(block);
        self.cipher
            .decrypt_block(GenericArray::from_mut_slice(block));
        for (b, s) in block.iter_mut().zip(self.state.iter()) {
            *b ^= s;
        }
        self.state = chained;
    }
}

/// Encrypting writer. Buffers at most one partial block between calls and
/// emits only whole ciphertext blocks; `finish` pads and seals the stream.
/// Consuming `self` in `finish` makes write-after-flush unrepresentable.
pub struct CipherWrite<W: Write> {
    inner: W,
    cipher: Box<dyn BlockCipher>,
    padding: Padding,
    buf: Vec<u8>,
}

impl<W: Write> CipherWrite<W> {
    pub fn new(
        inner: W,
        cipher: Box<dyn BlockCipher>,
        padding: Option<Padding>,
    ) -> Result<Self, ArchiveError> {
        let padding = padding.ok_or(ArchiveError::MissingPadding)?;
        Ok(CipherWrite {
            inner,
            cipher,
            padding,
            buf: Vec::new(),
        })
    }

    /// Pad the remainder, emit the final block, flush, hand the sink back.
    pub fn finish(mut self) -> io::Result<W> {
        let bs = self.cipher.block_size();
        let Padding::Pkcs7 = self.padding;

        // PKCS#7 always emits a padding block, a full one when the
        // plaintext happened to be aligned.
        let pad = bs - (self.buf.len() % bs);
        self.buf.extend(std::iter::repeat(pad as u8).take(pad));

        let mut block = std::mem::take(&mut self.buf);
        self.cipher.encrypt_block(&mut block);
        self.inner.write_all(&block)?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for CipherWrite<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);

        let bs = self.cipher.block_size();
        while self.buf.len() >= bs {
            let mut block: Vec<u8> = self.buf.drain(..bs).collect();
            self.cipher.encrypt_block(&mut block);
            self.inner.write_all(&block)?;
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Decrypting reader. Holds one decrypted block back so the padding of the
/// final block can be stripped once the source reports EoF.
pub struct CipherRead<R: Read> {
    inner: R,
    cipher: Box<dyn BlockCipher>,
    out_buf: Vec<u8>,
    held: Option<Vec<u8>>,
    done: bool,
}

impl<R: Read> CipherRead<R> {
    pub fn new(inner: R, cipher: Box<dyn BlockCipher>) -> Self {
        CipherRead {
            inner,
            cipher,
            out_buf: Vec::new(),
            held: None,
            done: false,
        }
    }
}

impl<R: Read> Read for CipherRead<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        while self.out_buf.is_empty() && !self.done {
            let bs = self.cipher.block_size();
            let mut block = vec![0u8; bs];

            match fill_buf(&mut self.inner, &mut block)? {
                // EoF: the block held back is the padded final block.
                (true, 0) => {
                    if let Some(last) = self.held.take() {
                        let last = strip_pkcs7(last, bs)?;
                        self.out_buf.extend_from_slice(&last);
                    }
                    self.done = true;
                }

                // Full block: release the previous one, hold this one.
                (false, _) => {
                    self.cipher.decrypt_block(&mut block);
                    if let Some(prev) = self.held.replace(block) {
                        self.out_buf.extend_from_slice(&prev);
                    }
                }

                (true, _) => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "truncated cipher block",
                    ));
                }
            }
        }

        Ok(flush_buf(&mut self.out_buf, buf))
    }
}

fn strip_pkcs7(mut block: Vec<u8>, bs: usize) -> io::Result<Vec<u8>> {
    let bad = || io::Error::new(io::ErrorKind::InvalidData, "bad cipher padding");

    let pad = *block.last().ok_or_else(bad)? as usize;
    if pad == 0 || pad > bs || pad > block.len() {
        return Err(bad());
    }
    if !block[block.len() - pad..].iter().all(|b| *b as usize == pad) {
        return Err(bad());
    }
    block.truncate(block.len() - pad);
    Ok(block)
}
