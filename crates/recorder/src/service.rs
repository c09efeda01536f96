//! Collector-side recorder service.
//!
//! [`TcpRecorderService`] accepts listener connections, applies every
//! received envelope to a shared [`SliceCollector`] and acknowledges it.
//! Each connection gets its own thread; the accept loop polls a
//! non-blocking socket so `stop` can join every thread promptly.

use std::io::{self, ErrorKind, Read};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, trace, warn, Dispatch};

use crate::collector::{SliceCollector, SliceOutcome};
use crate::config::DistributedConfig;
use crate::error::{RecorderError, RecorderResult};
use crate::protocol::{decode_payload, encode_payload, read_frame, write_frame, Ack, Envelope};

/// How often blocked threads look at the shutdown flag.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Collector side of distributed recording.
pub trait RecorderService {
    /// Store the configuration.
    fn init(&mut self, config: DistributedConfig) -> RecorderResult<()>;

    /// Start accepting recorders. Waits for the configured client count.
    fn start(&mut self) -> RecorderResult<()>;

    /// Stop accepting, close connections and join all threads.
    fn stop(&mut self);

    /// Apply one envelope to the collector.
    fn send_message(&self, envelope: &Envelope) -> SliceOutcome;
}

struct Shared {
    collector: Arc<SliceCollector>,
    shutdown: AtomicBool,
    clients: Mutex<usize>,
    client_joined: Condvar,
    connections: Mutex<Vec<JoinHandle<()>>>,
    write_timeout: Duration,
}

struct Running {
    shared: Arc<Shared>,
    local_addr: SocketAddr,
    acceptor: JoinHandle<()>,
}

/// TCP implementation of [`RecorderService`].
pub struct TcpRecorderService {
    config: Option<DistributedConfig>,
    collector: Arc<SliceCollector>,
    dispatch: Dispatch,
    running: Option<Running>,
}

impl TcpRecorderService {
    /// Service with a fresh collector, logging to the current dispatcher.
    pub fn new() -> Self {
        TcpRecorderService {
            config: None,
            collector: Arc::new(SliceCollector::new()),
            dispatch: tracing::dispatcher::get_default(|d| d.clone()),
            running: None,
        }
    }

    /// Apply messages to `collector` instead of a private one.
    pub fn with_collector(mut self, collector: Arc<SliceCollector>) -> Self {
        self.collector = collector;
        self
    }

    /// Log through `dispatch` on every service thread.
    pub fn with_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = dispatch;
        self
    }

    /// Collector receiving the messages.
    pub fn collector(&self) -> Arc<SliceCollector> {
        Arc::clone(&self.collector)
    }

    /// Bound address while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.local_addr)
    }

    /// Connections accepted since start.
    pub fn registered_clients(&self) -> usize {
        self.running
            .as_ref()
            .map(|r| *r.shared.clients.lock())
            .unwrap_or(0)
    }

    /// Wait until `expected` connections have been accepted. Returns `false`
    /// on timeout or if the service is not running.
    pub fn await_clients(&self, expected: usize, timeout: Duration) -> bool {
        let Some(running) = &self.running else {
            return false;
        };
        let deadline = Instant::now() + timeout;
        let mut count = running.shared.clients.lock();
        while *count < expected {
            if running
                .shared
                .client_joined
                .wait_until(&mut count, deadline)
                .timed_out()
            {
                return *count >= expected;
            }
        }
        true
    }
}

impl Default for TcpRecorderService {
    fn default() -> Self {
        Self::new()
    }
}

impl RecorderService for TcpRecorderService {
    fn init(&mut self, config: DistributedConfig) -> RecorderResult<()> {
        config.validate()?;
        self.config = Some(config);
        Ok(())
    }

    fn start(&mut self) -> RecorderResult<()> {
        if self.running.is_some() {
            return Err(RecorderError::AlreadyRunning);
        }
        let config = self.config.clone().ok_or(RecorderError::NotInitialized)?;

        let listener = TcpListener::bind((config.host.as_str(), config.port))?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let shared = Arc::new(Shared {
            collector: Arc::clone(&self.collector),
            shutdown: AtomicBool::new(false),
            clients: Mutex::new(0),
            client_joined: Condvar::new(),
            connections: Mutex::new(Vec::new()),
            write_timeout: config.timeout(),
        });

        let acceptor = {
            let shared = Arc::clone(&shared);
            let dispatch = self.dispatch.clone();
            thread::Builder::new()
                .name("tally-recorder-accept".to_string())
                .spawn(move || {
                    tracing::dispatcher::with_default(&dispatch, || {
                        accept_loop(&listener, &shared, &dispatch)
                    })
                })?
        };

        tracing::dispatcher::with_default(&self.dispatch, || {
            info!(
                target: "tally::recorder",
                name = %config.name,
                addr = %local_addr,
                "recorder service started"
            )
        });
        self.running = Some(Running {
            shared,
            local_addr,
            acceptor,
        });

        if config.num_clients > 0 {
            let expected = config.num_clients as usize;
            tracing::dispatcher::with_default(&self.dispatch, || {
                info!(
                    target: "tally::recorder",
                    expected,
                    "waiting for remote recorders to attach"
                );
                if !self.await_clients(expected, config.client_wait_timeout()) {
                    warn!(
                        target: "tally::recorder",
                        expected,
                        attached = self.registered_clients(),
                        "proceeding before all remote recorders attached"
                    );
                }
            });
        }
        Ok(())
    }

    fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        running.shared.shutdown.store(true, Ordering::Release);
        {
            let _clients = running.shared.clients.lock();
            running.shared.client_joined.notify_all();
        }
        let _ = running.acceptor.join();
        let handles: Vec<_> = running.shared.connections.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
        tracing::dispatcher::with_default(&self.dispatch, || {
            info!(
                target: "tally::recorder",
                addr = %running.local_addr,
                events = running.shared.collector.total_events(),
                "recorder service stopped"
            )
        });
    }

    fn send_message(&self, envelope: &Envelope) -> SliceOutcome {
        self.collector.apply(envelope)
    }
}

impl Drop for TcpRecorderService {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(listener: &TcpListener, shared: &Arc<Shared>, dispatch: &Dispatch) {
    while !shared.shutdown.load(Ordering::Acquire) {
        match listener.accept() {
            Ok((stream, peer)) => {
                {
                    let mut count = shared.clients.lock();
                    *count += 1;
                    shared.client_joined.notify_all();
                }
                debug!(target: "tally::recorder", %peer, "recorder attached");
                let conn_shared = Arc::clone(shared);
                let conn_dispatch = dispatch.clone();
                let spawned = thread::Builder::new()
                    .name(format!("tally-recorder-{}", peer))
                    .spawn(move || {
                        tracing::dispatcher::with_default(&conn_dispatch, || {
                            serve_connection(stream, peer, &conn_shared)
                        })
                    });
                match spawned {
                    Ok(handle) => shared.connections.lock().push(handle),
                    Err(e) => error!(target: "tally::recorder", %peer, error = %e, "failed to spawn connection thread"),
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(POLL_INTERVAL),
            Err(e) => {
                warn!(target: "tally::recorder", error = %e, "accept failed");
                thread::sleep(POLL_INTERVAL);
            }
        }
    }
}

/// Blocking reads that give up once shutdown is requested.
struct ShutdownAwareReader<'a> {
    stream: &'a TcpStream,
    shutdown: &'a AtomicBool,
}

impl Read for ShutdownAwareReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match (&*self.stream).read(buf) {
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    if self.shutdown.load(Ordering::Acquire) {
                        return Err(io::Error::new(ErrorKind::ConnectionAborted, "service stopping"));
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                other => return other,
            }
        }
    }
}

fn serve_connection(stream: TcpStream, peer: SocketAddr, shared: &Shared) {
    if let Err(e) = configure(&stream, shared.write_timeout) {
        warn!(target: "tally::recorder", %peer, error = %e, "failed to configure connection");
        return;
    }
    let mut reader = ShutdownAwareReader {
        stream: &stream,
        shutdown: &shared.shutdown,
    };
    let mut writer = &stream;
    loop {
        let payload = match read_frame(&mut reader) {
            Ok(p) => p,
            Err(RecorderError::Io(e)) if e.kind() == ErrorKind::UnexpectedEof => {
                debug!(target: "tally::recorder", %peer, "recorder detached");
                return;
            }
            Err(RecorderError::Io(e)) if e.kind() == ErrorKind::ConnectionAborted => return,
            Err(e) => {
                warn!(target: "tally::recorder", %peer, error = %e, "dropping connection after bad frame");
                return;
            }
        };
        let envelope = match decode_payload::<Envelope>(&payload) {
            Ok(env) => env,
            Err(e) => {
                warn!(target: "tally::recorder", %peer, error = %e, "undecodable message dropped");
                continue;
            }
        };
        let outcome = shared.collector.apply(&envelope);
        trace!(
            target: "tally::recorder",
            recorder = %envelope.recorder_id,
            sequence = envelope.sequence,
            kind = envelope.message.kind(),
            ?outcome,
            "applied"
        );
        let ack = Ack {
            sequence: envelope.sequence,
        };
        let sent = encode_payload(&ack).and_then(|p| write_frame(&mut writer, &p));
        if let Err(e) = sent {
            debug!(target: "tally::recorder", %peer, error = %e, "ack failed, closing connection");
            return;
        }
    }
}

fn configure(stream: &TcpStream, write_timeout: Duration) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_nodelay(true)?;
    stream.set_read_timeout(Some(POLL_INTERVAL))?;
    stream.set_write_timeout(Some(write_timeout))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{MethodStart, RecorderMessage};

    #[test]
    fn test_start_requires_init() {
        let mut service = TcpRecorderService::new();
        assert!(matches!(service.start(), Err(RecorderError::NotInitialized)));
    }

    #[test]
    fn test_start_stop_binds_and_releases() {
        let mut service = TcpRecorderService::new();
        service.init(DistributedConfig::for_testing()).unwrap();
        service.start().unwrap();
        assert!(service.local_addr().is_some());
        assert!(matches!(service.start(), Err(RecorderError::AlreadyRunning)));
        service.stop();
        assert!(service.local_addr().is_none());
        service.stop();
    }

    #[test]
    fn test_send_message_applies_locally() {
        let service = TcpRecorderService::new();
        let outcome = service.send_message(&Envelope {
            recorder_id: "local".into(),
            epoch: 1,
            sequence: 1,
            message: RecorderMessage::MethodStart(MethodStart {
                type_name: "X".into(),
                slice: 1,
                start_ts: 0,
            }),
        });
        assert_eq!(outcome, SliceOutcome::Opened { slice: 1 });
    }

    #[test]
    fn test_await_clients_times_out() {
        let mut service = TcpRecorderService::new();
        service.init(DistributedConfig::for_testing()).unwrap();
        service.start().unwrap();
        assert!(!service.await_clients(1, Duration::from_millis(100)));
        let _conn = TcpStream::connect(service.local_addr().unwrap()).unwrap();
        assert!(service.await_clients(1, Duration::from_secs(5)));
        service.stop();
    }
}
