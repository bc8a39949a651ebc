use std::io;
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::chain::{Role, SinkLink};
use crate::error::ArchiveError;

/// Shared cancellation flag, polled by the gate before every transfer.
/// Cloning hands out another handle onto the same flag. The gate never
/// clears it.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// Not ErrorKind::Interrupted: io::copy and write_all silently retry on
// Interrupted, which would turn a cancelled stream into a spin loop.
pub(crate) fn terminated() -> io::Error {
    io::Error::new(io::ErrorKind::Other, ArchiveError::Terminated)
}

/// Write-direction gate link. Checks the token before the bytes move on.
pub struct GateLink {
    token: CancelToken,
}

impl GateLink {
    pub fn new(token: CancelToken) -> Self {
        GateLink { token }
    }
}

impl SinkLink for GateLink {
    fn role(&self) -> Role {
        Role::Gate
    }

    fn write(&mut self, _buf: &[u8]) -> io::Result<()> {
        if self.token.is_cancelled() {
            return Err(terminated());
        }
        Ok(())
    }
}

/// Read-direction gate, checked on every read call.
pub struct GateRead<R: Read> {
    inner: R,
    token: CancelToken,
}

impl<R: Read> GateRead<R> {
    pub fn new(inner: R, token: CancelToken) -> Self {
        GateRead { inner, token }
    }
}

impl<R: Read> Read for GateRead<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.token.is_cancelled() {
            return Err(terminated());
        }
        self.inner.read(buf)
    }
}
