use std::io;
use std::io::Write;

use crate::cancel::{CancelToken, GateLink};
use crate::error::ArchiveError;
use crate::hash::HashLink;
use crate::limit::LimitLink;
use crate::meta::ArchiveMeta;

/// Tag identifying a link's job, used for post-hoc lookup of final state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Gate,
    Limit,
    Count,
    Hash,
}

/// One composable stage of the write chain.
///
/// Links observe the payload byte stream in order before it reaches the
/// sink; they never transform it. `close` is invoked exactly once, in chain
/// order, and a link may pin final state there (the limiter stops its
/// clock). `annotate` contributes whatever the link learned to the metadata
/// record.
pub trait SinkLink {
    fn role(&self) -> Role;

    fn write(&mut self, buf: &[u8]) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn annotate(&self, _meta: &mut ArchiveMeta) {}

    fn status(&self) -> Option<String> {
        None
    }
}

/// Declarative chain construction list, outermost link first.
pub enum LinkSpec {
    Gate(CancelToken),
    Limit { cap: f64 },
    Count,
    Hash { algorithm: String },
}

/// The write-direction I/O chain: an ordered stack of links over one sink.
///
/// Built eagerly from a `LinkSpec` list; constructor errors (an unknown
/// hash name) surface before any byte moves. Every `write` walks the links
/// outermost first, then lands in the sink, so a cancelled or throttled
/// stream never reaches the file.
pub struct WriteChain<W: Write> {
    links: Vec<Box<dyn SinkLink>>,
    sink: W,
    closed: bool,
}

impl<W: Write> WriteChain<W> {
    pub fn build(sink: W, specs: Vec<LinkSpec>) -> Result<Self, ArchiveError> {
        let mut links: Vec<Box<dyn SinkLink>> = Vec::with_capacity(specs.len());
        for spec in specs {
            links.push(match spec {
                LinkSpec::Gate(token) => Box::new(GateLink::new(token)),
                LinkSpec::Limit { cap } => Box::new(LimitLink::new(Some(cap))),
                LinkSpec::Count => Box::new(CountLink::new()),
                LinkSpec::Hash { algorithm } => Box::new(HashLink::new(&algorithm)?),
            });
        }
        Ok(WriteChain {
            links,
            sink,
            closed: false,
        })
    }

    /// First link carrying the given role, for pulling out final state.
    pub fn instance(&self, role: Role) -> Option<&dyn SinkLink> {
        self.links
            .iter()
            .map(|link| link.as_ref())
            .find(|link| link.role() == role)
    }

    /// Human-readable status of every link that reports one.
    pub fn status(&self) -> String {
        self.links
            .iter()
            .filter_map(|link| link.status())
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Merge every link's metadata contribution into `meta`.
    pub fn annotate(&self, meta: &mut ArchiveMeta) {
        for link in &self.links {
            link.annotate(meta);
        }
    }

    /// Close every link once, in chain order, then flush the sink.
    pub fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        for link in &mut self.links {
            link.close()?;
        }
        self.sink.flush()?;
        self.closed = true;
        Ok(())
    }

    pub fn sink_mut(&mut self) -> &mut W {
        &mut self.sink
    }

    pub fn into_sink(self) -> W {
        self.sink
    }
}

impl<W: Write> Write for WriteChain<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        for link in &mut self.links {
            link.write(buf)?;
        }
        self.sink.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        for link in &mut self.links {
            link.flush()?;
        }
        self.sink.flush()
    }
}

/// Plain byte counter link; its count becomes `uncompressed_archive_size`.
pub struct CountLink {
    bytes: u64,
}

impl CountLink {
    pub fn new() -> Self {
        CountLink { bytes: 0 }
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

impl Default for CountLink {
    fn default() -> Self {
        Self::new()
    }
}

impl SinkLink for CountLink {
    fn role(&self) -> Role {
        Role::Count
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        self.bytes += buf.len() as u64;
        Ok(())
    }

    fn annotate(&self, meta: &mut ArchiveMeta) {
        meta.uncompressed_archive_size = self.bytes;
    }

    fn status(&self) -> Option<String> {
        Some(format!("{} bytes", self.bytes))
    }
}

#[cfg(test)]
mod test_write_chain {
    use super::*;

    fn full_specs() -> Vec<LinkSpec> {
        vec![
            LinkSpec::Gate(CancelToken::new()),
            LinkSpec::Limit { cap: 1e12 },
            LinkSpec::Count,
            LinkSpec::Hash {
                algorithm: "sha256".to_string(),
            },
        ]
    }

    #[test]
    fn bad_hash_name_fails_at_build_time() {
        let specs = vec![LinkSpec::Hash {
            algorithm: "crc7".to_string(),
        }];
        assert!(matches!(
            WriteChain::build(Vec::<u8>::new(), specs),
            Err(ArchiveError::UnsupportedHash(_))
        ));
    }

    #[test]
    fn payload_reaches_the_sink_unchanged() {
        let mut chain = WriteChain::build(Vec::new(), full_specs()).unwrap();
        chain.write_all(b"hello world").unwrap();
        chain.flush().unwrap();
        assert_eq!(chain.into_sink(), b"hello world");
    }

    #[test]
    fn links_are_findable_by_role() {
        let mut chain = WriteChain::build(Vec::new(), full_specs()).unwrap();
        chain.write_all(b"hello world").unwrap();

        assert!(chain.instance(Role::Gate).is_some());
        assert!(chain.instance(Role::Limit).is_some());
        let count = chain.instance(Role::Count).unwrap();
        assert_eq!(count.status().as_deref(), Some("11 bytes"));
    }

    #[test]
    fn annotate_merges_every_contribution() {
        let mut chain = WriteChain::build(Vec::new(), full_specs()).unwrap();
        chain.write_all(b"hello world").unwrap();
        chain.close().unwrap();

        let mut meta = ArchiveMeta::new("payload.tar".to_string(), None, 0);
        chain.annotate(&mut meta);

        assert_eq!(meta.uncompressed_archive_size, 11);
        assert_eq!(meta.hash_algorithm.as_deref(), Some("sha256"));
        assert_eq!(
            meta.hash_value.as_deref(),
            Some("b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9")
        );
        assert!(meta.io_write_rate.is_some());
    }

    #[test]
    fn cancelled_token_stops_the_chain_before_the_sink() {
        let token = CancelToken::new();
        let mut chain =
            WriteChain::build(Vec::new(), vec![LinkSpec::Gate(token.clone()), LinkSpec::Count])
                .unwrap();

        chain.write_all(b"first").unwrap();
        token.cancel();
        assert!(chain.write_all(b"second").is_err());

        // Nothing after the cancellation point landed in the sink.
        assert_eq!(chain.into_sink(), b"first");
    }

    #[test]
    fn close_is_idempotent() {
        let mut chain = WriteChain::build(Vec::new(), full_specs()).unwrap();
        chain.write_all(b"x").unwrap();
        chain.close().unwrap();
        chain.close().unwrap();
    }

    #[test]
    fn status_concatenates_links() {
        let mut chain = WriteChain::build(Vec::new(), full_specs()).unwrap();
        chain.write_all(b"abc").unwrap();
        let status = chain.status();
        assert!(status.contains("3 bytes"));
        assert!(status.contains("sha256"));
    }
}
