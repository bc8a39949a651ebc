use std::io;
use std::io::Read;
use std::thread;
use std::time::{Duration, Instant};

use crate::chain::{Role, SinkLink};
use crate::meta::ArchiveMeta;

// A single throttling sleep never exceeds this, so a cancellation poll is
// at most half a second away even while the limiter is braking.
const MAX_SLEEP: Duration = Duration::from_millis(500);

/// Cumulative throughput meter with an optional average-rate cap.
///
/// The clock starts at the first transfer. When a cap is set and the running
/// average exceeds it, `transfer` sleeps just long enough to bring the
/// average back down. Throttling is best effort, not a hard guarantee.
pub struct RateGauge {
    cap: Option<f64>,
    started: Option<Instant>,
    stopped: Option<Instant>,
    bytes: u64,
}

impl RateGauge {
    pub fn new(cap: Option<f64>) -> Self {
        RateGauge {
            cap,
            started: None,
            stopped: None,
            bytes: 0,
        }
    }

    /// Account for `len` transferred bytes, sleeping if over the cap.
    pub fn transfer(&mut self, len: usize) {
        if len == 0 {
            return;
        }

        let started = *self.started.get_or_insert_with(Instant::now);
        self.bytes += len as u64;

        if let Some(cap) = self.cap {
            let elapsed = started.elapsed().as_secs_f64().max(1e-9);
            if self.bytes as f64 / elapsed > cap {
                // Time the average needs to fall back under the cap.
                let pause = (self.bytes as f64 / cap) - elapsed;
                let pause = pause.min(MAX_SLEEP.as_secs_f64());
                if pause > 0.0 {
                    thread::sleep(Duration::from_secs_f64(pause));
                }
            }
        }
    }

    /// Average bytes/sec so far; uses "now" until `stop` pins the clock.
    pub fn rate(&self) -> f64 {
        let started = match self.started {
            Some(t) => t,
            None => return 0.0,
        };
        let end = self.stopped.unwrap_or_else(Instant::now);
        let elapsed = end.duration_since(started).as_secs_f64().max(1e-9);
        self.bytes as f64 / elapsed
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn stop(&mut self) {
        if self.started.is_some() && self.stopped.is_none() {
            self.stopped = Some(Instant::now());
        }
    }
}

/// Write-direction rate limiter link.
pub struct LimitLink {
    gauge: RateGauge,
}

impl LimitLink {
    pub fn new(cap: Option<f64>) -> Self {
        LimitLink {
            gauge: RateGauge::new(cap),
        }
    }

    pub fn rate(&self) -> f64 {
        self.gauge.rate()
    }
}

impl SinkLink for LimitLink {
    fn role(&self) -> Role {
        Role::Limit
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        self.gauge.transfer(buf.len());
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.gauge.stop();
        Ok(())
    }

    fn annotate(&self, meta: &mut ArchiveMeta) {
        meta.io_write_rate = Some(self.gauge.rate());
    }

    fn status(&self) -> Option<String> {
        Some(format!("io rate {:.0} B/s", self.gauge.rate()))
    }
}

/// Read-direction rate limiter.
pub struct LimitRead<R: Read> {
    inner: R,
    gauge: RateGauge,
}

impl<R: Read> LimitRead<R> {
    pub fn new(inner: R, cap: Option<f64>) -> Self {
        LimitRead {
            inner,
            gauge: RateGauge::new(cap),
        }
    }

    pub fn rate(&self) -> f64 {
        self.gauge.rate()
    }
}

impl<R: Read> Read for LimitRead<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let len = self.inner.read(buf)?;
        self.gauge.transfer(len);
        Ok(len)
    }
}
