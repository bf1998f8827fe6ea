use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use byteorder::{BigEndian, WriteBytesExt};
use log::{debug, warn};
use thiserror::Error;

use crate::conf::{
    Conf, COLLECTOR_ADDRESS_KEY, COLLECTOR_BUFFER_SIZE_KEY, COLLECTOR_CONNECT_TIMEO_MS_KEY,
    COLLECTOR_FLUSH_INTERVAL_MS_KEY, COLLECTOR_MAX_SEND_ATTEMPTS_KEY, COLLECTOR_READ_TIMEO_MS_KEY,
    COLLECTOR_SEND_TRIGGER_FRACTION_KEY, COLLECTOR_SHUTDOWN_TIMEO_MS_KEY,
    COLLECTOR_WRITE_TIMEO_MS_KEY,
};
use crate::receiver::{ReceiverStats, SpanReceiver};
use crate::span::Span;

const DEFAULT_BUFFER_SIZE: u64 = 4096;
const DEFAULT_TRIGGER_FRACTION: f64 = 0.5;
const DEFAULT_FLUSH_INTERVAL_MS: u64 = 60_000;
const DEFAULT_CONNECT_TIMEO_MS: u64 = 10_000;
const DEFAULT_WRITE_TIMEO_MS: u64 = 60_000;
const DEFAULT_READ_TIMEO_MS: u64 = 60_000;
const DEFAULT_MAX_SEND_ATTEMPTS: u64 = 3;
const DEFAULT_SHUTDOWN_TIMEO_MS: u64 = 30_000;

/// The pause between send attempts for one batch.
const RETRY_PAUSE: Duration = Duration::from_millis(100);

/// NetConfError describes why the collector receiver could not start.
#[derive(Debug, Error)]
pub enum NetConfError {
    /// No collector address was configured.
    #[error("no collector address configured under \"collector.address\"")]
    MissingAddress,
    /// The address was not in host:port form.
    #[error("collector address {0:?} is not in host:port form")]
    BadAddress(String),
    /// The background worker thread could not be spawned.
    #[error("cannot spawn flush worker: {0}")]
    Spawn(#[from] io::Error),
}

/// BatchSink is the opaque batch-send seam: one blocking attempt to deliver
/// a batch of finished spans to a destination. Implementations are driven
/// only from the receiver's background worker, never from producer threads.
pub trait BatchSink: Send {
    /// Delivers the batch, or reports why it could not. The caller decides
    /// whether to retry; spans in the batch are sent in submission order.
    fn send(&mut self, batch: &[Span]) -> io::Result<()>;
}

/// TcpSink ships batches to a remote collector over TCP.
///
/// The frame is a 4-byte big-endian length prefix followed by a JSON array
/// of spans; the collector acknowledges each frame with a single byte. The
/// connection is established lazily and torn down on any error, to be
/// re-established on the next attempt.
pub struct TcpSink {
    addr: String,
    connect_timeout: Duration,
    write_timeout: Duration,
    read_timeout: Duration,
    conn: Option<TcpStream>,
}

impl TcpSink {
    /// Creates a sink for `addr` ("host:port") with the given timeout budget.
    pub fn new(
        addr: &str,
        connect_timeout: Duration,
        write_timeout: Duration,
        read_timeout: Duration,
    ) -> TcpSink {
        TcpSink {
            addr: addr.to_string(),
            connect_timeout,
            write_timeout,
            read_timeout,
            conn: None,
        }
    }

    fn connect(&self) -> io::Result<TcpStream> {
        let mut last_err = None;
        for addr in self.addr.to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => {
                    stream.set_write_timeout(Some(self.write_timeout))?;
                    stream.set_read_timeout(Some(self.read_timeout))?;
                    return Ok(stream);
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{:?} did not resolve to any address", self.addr),
            )
        }))
    }

    fn transmit(conn: &mut TcpStream, body: &[u8]) -> io::Result<()> {
        conn.write_u32::<BigEndian>(body.len() as u32)?;
        conn.write_all(body)?;
        conn.flush()?;
        let mut ack = [0u8; 1];
        conn.read_exact(&mut ack)?;
        Ok(())
    }
}

impl BatchSink for TcpSink {
    fn send(&mut self, batch: &[Span]) -> io::Result<()> {
        let body = serde_json::to_vec(batch)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let mut conn = match self.conn.take() {
            Some(conn) => conn,
            None => self.connect()?,
        };
        // On error the connection stays torn down, to be re-established
        // lazily on the next attempt.
        TcpSink::transmit(&mut conn, &body)?;
        self.conn = Some(conn);
        Ok(())
    }
}

/// Tunables for a NetReceiver instance.
#[derive(Clone, Debug)]
pub struct NetConf {
    /// Ring buffer capacity in spans (at least 1).
    pub capacity: usize,
    /// Occupancy fraction of the buffer that wakes the worker early.
    pub trigger_fraction: f64,
    /// Maximum time between flush cycles regardless of occupancy.
    pub flush_interval: Duration,
    /// Send attempts per batch before the batch is discarded (at least 1).
    pub max_send_attempts: u32,
    /// Bounded wait for the final drain at shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for NetConf {
    fn default() -> NetConf {
        NetConf {
            capacity: DEFAULT_BUFFER_SIZE as usize,
            trigger_fraction: DEFAULT_TRIGGER_FRACTION,
            flush_interval: Duration::from_millis(DEFAULT_FLUSH_INTERVAL_MS),
            max_send_attempts: DEFAULT_MAX_SEND_ATTEMPTS as u32,
            shutdown_timeout: Duration::from_millis(DEFAULT_SHUTDOWN_TIMEO_MS),
        }
    }
}

/// SpanRing is a fixed-capacity circular buffer of completed spans.
///
/// Cursors wrap modulo capacity; occupancy never exceeds capacity. When the
/// ring is full the incoming span is rejected (drop-newest), never blocking
/// the producer.
struct SpanRing {
    slots: Box<[Option<Span>]>,
    read: usize,
    write: usize,
    len: usize,
}

impl SpanRing {
    fn with_capacity(capacity: usize) -> SpanRing {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        SpanRing {
            slots: slots.into_boxed_slice(),
            read: 0,
            write: 0,
            len: 0,
        }
    }

    fn len(&self) -> usize {
        self.len
    }

    fn push(&mut self, span: Span) -> Result<(), Span> {
        if self.len == self.slots.len() {
            return Err(span);
        }
        self.slots[self.write] = Some(span);
        self.write = (self.write + 1) % self.slots.len();
        self.len += 1;
        Ok(())
    }

    /// Claims every buffered span in FIFO order, leaving the ring empty.
    fn drain_into(&mut self, out: &mut Vec<Span>) {
        while self.len > 0 {
            if let Some(span) = self.slots[self.read].take() {
                out.push(span);
            }
            self.read = (self.read + 1) % self.slots.len();
            self.len -= 1;
        }
    }
}

#[derive(Clone, Copy, Eq, PartialEq, Debug)]
enum Phase {
    Running,
    Draining,
    Closed,
}

struct Shared {
    ring: SpanRing,
    phase: Phase,
    stats: ReceiverStats,
}

struct Inner {
    shared: Mutex<Shared>,
    wakeup: Condvar,
}

/// NetReceiver is the buffered asynchronous network sink.
///
/// Producer threads enqueue into a bounded circular buffer and never block
/// on I/O; one background worker drains the buffer when the fill-fraction
/// trigger is crossed, when the flush interval elapses, or when a drain is
/// requested at shutdown, and ships each claimed batch through a BatchSink.
/// This is a best-effort telemetry sink: under sustained buffer overflow or
/// collector outage it drops data and counts it rather than blocking or
/// failing the host application.
pub struct NetReceiver {
    inner: Arc<Inner>,
    trigger: usize,
    shutdown_timeout: Duration,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl NetReceiver {
    /// Builds a receiver from configuration, sending to a TCP collector.
    pub fn from_conf(conf: &Conf) -> Result<NetReceiver, NetConfError> {
        let addr = conf
            .get(COLLECTOR_ADDRESS_KEY)
            .ok_or(NetConfError::MissingAddress)?;
        if !addr.contains(':') {
            return Err(NetConfError::BadAddress(addr.to_string()));
        }
        let sink = TcpSink::new(
            addr,
            conf.get_ms(COLLECTOR_CONNECT_TIMEO_MS_KEY, DEFAULT_CONNECT_TIMEO_MS),
            conf.get_ms(COLLECTOR_WRITE_TIMEO_MS_KEY, DEFAULT_WRITE_TIMEO_MS),
            conf.get_ms(COLLECTOR_READ_TIMEO_MS_KEY, DEFAULT_READ_TIMEO_MS),
        );
        let net_conf = NetConf {
            capacity: conf.get_u64(COLLECTOR_BUFFER_SIZE_KEY, DEFAULT_BUFFER_SIZE) as usize,
            trigger_fraction: conf
                .get_f64(COLLECTOR_SEND_TRIGGER_FRACTION_KEY, DEFAULT_TRIGGER_FRACTION),
            flush_interval: conf
                .get_ms(COLLECTOR_FLUSH_INTERVAL_MS_KEY, DEFAULT_FLUSH_INTERVAL_MS),
            max_send_attempts: conf
                .get_u64(COLLECTOR_MAX_SEND_ATTEMPTS_KEY, DEFAULT_MAX_SEND_ATTEMPTS)
                as u32,
            shutdown_timeout: conf
                .get_ms(COLLECTOR_SHUTDOWN_TIMEO_MS_KEY, DEFAULT_SHUTDOWN_TIMEO_MS),
        };
        NetReceiver::with_sink(net_conf, Box::new(sink))
    }

    /// Builds a receiver around an arbitrary batch sink and starts its
    /// background worker.
    pub fn with_sink(
        conf: NetConf,
        sink: Box<dyn BatchSink>,
    ) -> Result<NetReceiver, NetConfError> {
        let capacity = conf.capacity.max(1);
        let mut fraction = conf.trigger_fraction;
        if !fraction.is_finite() {
            warn!(
                "invalid send trigger fraction {}; using {}",
                fraction, DEFAULT_TRIGGER_FRACTION
            );
            fraction = DEFAULT_TRIGGER_FRACTION;
        }
        fraction = fraction.max(0.0).min(1.0);
        let trigger = ((capacity as f64 * fraction).ceil() as usize).max(1).min(capacity);

        let inner = Arc::new(Inner {
            shared: Mutex::new(Shared {
                ring: SpanRing::with_capacity(capacity),
                phase: Phase::Running,
                stats: ReceiverStats::default(),
            }),
            wakeup: Condvar::new(),
        });
        let worker_inner = Arc::clone(&inner);
        let flush_interval = conf.flush_interval;
        let max_attempts = conf.max_send_attempts.max(1);
        let handle = thread::Builder::new()
            .name("spanflow-flush".to_string())
            .spawn(move || run_worker(worker_inner, flush_interval, trigger, max_attempts, sink))?;

        Ok(NetReceiver {
            inner,
            trigger,
            shutdown_timeout: conf.shutdown_timeout,
            worker: Mutex::new(Some(handle)),
        })
    }
}

impl SpanReceiver for NetReceiver {
    fn submit(&self, span: Span) {
        let mut shared = self.inner.shared.lock().unwrap();
        shared.stats.submitted += 1;
        match shared.phase {
            Phase::Running => {
                if let Err(span) = shared.ring.push(span) {
                    shared.stats.dropped += 1;
                    debug!("span buffer full; dropping span {}", span.span_id());
                } else if shared.ring.len() >= self.trigger {
                    self.inner.wakeup.notify_one();
                }
            }
            // Draining or closed: late arrivals are silently discarded.
            _ => shared.stats.dropped += 1,
        }
    }

    fn shutdown(&self) {
        {
            let mut shared = self.inner.shared.lock().unwrap();
            if shared.phase == Phase::Running {
                shared.phase = Phase::Draining;
                self.inner.wakeup.notify_all();
            }
        }
        let deadline = Instant::now() + self.shutdown_timeout;
        let mut shared = self.inner.shared.lock().unwrap();
        while shared.phase != Phase::Closed {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let (guard, _) = self
                .inner
                .wakeup
                .wait_timeout(shared, deadline - now)
                .unwrap();
            shared = guard;
        }
        let closed = shared.phase == Phase::Closed;
        drop(shared);

        let handle = self.worker.lock().unwrap().take();
        if let Some(handle) = handle {
            if closed {
                let _ = handle.join();
            } else {
                // The worker's I/O timeouts bound how long it can linger; it
                // exits on its own, but we stop waiting for it.
                warn!("span receiver shutdown timed out; abandoning flush worker");
            }
        }
    }

    fn stats(&self) -> ReceiverStats {
        self.inner.shared.lock().unwrap().stats
    }
}

impl Drop for NetReceiver {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(
    inner: Arc<Inner>,
    flush_interval: Duration,
    trigger: usize,
    max_attempts: u32,
    mut sink: Box<dyn BatchSink>,
) {
    let mut batch: Vec<Span> = Vec::new();
    loop {
        let draining;
        {
            let mut shared = inner.shared.lock().unwrap();
            let deadline = Instant::now() + flush_interval;
            while shared.phase == Phase::Running && shared.ring.len() < trigger {
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                let (guard, _) = inner.wakeup.wait_timeout(shared, deadline - now).unwrap();
                shared = guard;
            }
            draining = shared.phase != Phase::Running;
            shared.ring.drain_into(&mut batch);
            shared.stats.flushes += 1;
        }
        if !batch.is_empty() {
            // A final best-effort flush gets a single attempt so shutdown
            // stays within its bound.
            let attempts = if draining { 1 } else { max_attempts };
            let delivered = send_with_retry(sink.as_mut(), &batch, attempts);
            let mut shared = inner.shared.lock().unwrap();
            if delivered {
                shared.stats.sent += batch.len() as u64;
            } else {
                shared.stats.send_failures += 1;
            }
            batch.clear();
        }
        if draining {
            let mut shared = inner.shared.lock().unwrap();
            shared.phase = Phase::Closed;
            inner.wakeup.notify_all();
            return;
        }
    }
}

fn send_with_retry(sink: &mut dyn BatchSink, batch: &[Span], attempts: u32) -> bool {
    for attempt in 1..=attempts {
        match sink.send(batch) {
            Ok(()) => return true,
            Err(e) => {
                warn!(
                    "sending {} spans failed (attempt {}/{}): {}",
                    batch.len(),
                    attempt,
                    attempts,
                    e
                );
                if attempt < attempts {
                    thread::sleep(RETRY_PAUSE);
                }
            }
        }
    }
    false
}
