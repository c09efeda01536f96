//! Recorder-side listener.
//!
//! [`TcpRecorderListener`] queues every message in a bounded outbox and a
//! background sender thread delivers them to the collector one at a time.
//! An envelope leaves the outbox only once the service acknowledges it, so
//! messages queued before the first connection, or left unsent when a
//! connection drops, are delivered after the next successful connect.

use std::collections::VecDeque;
use std::io::{self, ErrorKind};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn, Dispatch};

use crate::config::DistributedConfig;
use crate::error::{RecorderError, RecorderResult};
use crate::protocol::{
    decode_payload, encode_payload, read_frame, write_frame, Ack, Envelope, RecorderMessage,
};

/// Wake-up interval of an idle sender.
const IDLE_POLL: Duration = Duration::from_millis(100);

/// Remote side of distributed recording.
pub trait RecorderListener {
    /// Store the configuration.
    fn init(&mut self, config: DistributedConfig) -> RecorderResult<()>;

    /// Start delivering in the background. Never blocks on the network.
    fn connect(&mut self) -> RecorderResult<()>;

    /// Deliver what can still be delivered, then stop the sender.
    fn disconnect(&mut self);

    /// Queue one message for delivery.
    fn handle_message(&self, message: RecorderMessage);
}

#[derive(Default)]
struct OutboxState {
    pending: VecDeque<Envelope>,
    next_sequence: u64,
    capacity: usize,
    dropped: u64,
    delivered: u64,
}

struct Outbox {
    state: Mutex<OutboxState>,
    /// Signalled when a message is queued or shutdown is requested.
    ready: Condvar,
    /// Signalled only on shutdown; backoff sleeps wait on it.
    stopped: Condvar,
    shutdown: AtomicBool,
    connected: AtomicBool,
}

impl Outbox {
    fn new(capacity: usize) -> Self {
        Outbox {
            state: Mutex::new(OutboxState {
                capacity,
                ..OutboxState::default()
            }),
            ready: Condvar::new(),
            stopped: Condvar::new(),
            shutdown: AtomicBool::new(false),
            connected: AtomicBool::new(false),
        }
    }

    fn is_stopping(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    fn request_stop(&self) {
        let _state = self.state.lock();
        self.shutdown.store(true, Ordering::Release);
        self.ready.notify_all();
        self.stopped.notify_all();
    }

    fn sleep_unless_stopped(&self, delay: Duration) {
        let deadline = Instant::now() + delay;
        let mut state = self.state.lock();
        while !self.is_stopping() {
            if self.stopped.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
    }

    /// Oldest undelivered envelope, waiting briefly if there is none.
    fn next(&self) -> Option<Envelope> {
        let mut state = self.state.lock();
        if state.pending.is_empty() && !self.is_stopping() {
            self.ready.wait_for(&mut state, IDLE_POLL);
        }
        state.pending.front().cloned()
    }

    fn acknowledge(&self, sequence: u64) {
        let mut state = self.state.lock();
        if state.pending.front().map(|e| e.sequence) == Some(sequence) {
            state.pending.pop_front();
            state.delivered += 1;
        }
    }
}

/// TCP implementation of [`RecorderListener`].
pub struct TcpRecorderListener {
    recorder_id: String,
    epoch: u64,
    config: Option<DistributedConfig>,
    outbox: Arc<Outbox>,
    dispatch: Dispatch,
    sender: Option<JoinHandle<()>>,
}

impl TcpRecorderListener {
    /// Listener identifying itself as `recorder_id`, under a fresh random
    /// epoch.
    pub fn new(recorder_id: impl Into<String>) -> Self {
        TcpRecorderListener {
            recorder_id: recorder_id.into(),
            epoch: rand::random::<u64>().max(1),
            config: None,
            outbox: Arc::new(Outbox::new(
                DistributedConfig::default().max_buffered_messages,
            )),
            dispatch: tracing::dispatcher::get_default(|d| d.clone()),
            sender: None,
        }
    }

    /// Log through `dispatch` on the sender thread.
    pub fn with_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = dispatch;
        self
    }

    /// Identity stamped on every envelope.
    pub fn recorder_id(&self) -> &str {
        &self.recorder_id
    }

    /// Incarnation stamped on every envelope. Never
    /// [`LOCAL_EPOCH`](crate::collector::LOCAL_EPOCH).
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Messages queued and not yet acknowledged.
    pub fn pending(&self) -> usize {
        self.outbox.state.lock().pending.len()
    }

    /// Messages acknowledged by the service.
    pub fn delivered(&self) -> u64 {
        self.outbox.state.lock().delivered
    }

    /// Messages discarded because the outbox was full.
    pub fn dropped(&self) -> u64 {
        self.outbox.state.lock().dropped
    }

    /// Returns `true` while the sender holds a live connection.
    pub fn is_connected(&self) -> bool {
        self.outbox.connected.load(Ordering::Acquire)
    }

    /// Wait until every queued message is acknowledged.
    pub fn flush(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.pending() == 0 {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }
}

impl RecorderListener for TcpRecorderListener {
    fn init(&mut self, config: DistributedConfig) -> RecorderResult<()> {
        config.validate()?;
        self.outbox.state.lock().capacity = config.max_buffered_messages;
        self.config = Some(config);
        Ok(())
    }

    fn connect(&mut self) -> RecorderResult<()> {
        let config = self.config.clone().ok_or(RecorderError::NotInitialized)?;
        if !config.enabled {
            info!(target: "tally::recorder", recorder = %self.recorder_id, "distributed recording disabled");
            return Ok(());
        }
        if let Some(sender) = self.sender.take() {
            if !sender.is_finished() {
                self.sender = Some(sender);
                return Err(RecorderError::AlreadyRunning);
            }
            let _ = sender.join();
        }

        self.outbox.shutdown.store(false, Ordering::Release);
        let outbox = Arc::clone(&self.outbox);
        let dispatch = self.dispatch.clone();
        let recorder_id = self.recorder_id.clone();
        let handle = thread::Builder::new()
            .name(format!("tally-listener-{}", self.recorder_id))
            .spawn(move || {
                tracing::dispatcher::with_default(&dispatch, || {
                    run_sender(&outbox, &config, &recorder_id)
                })
            })?;
        self.sender = Some(handle);
        Ok(())
    }

    fn disconnect(&mut self) {
        let Some(sender) = self.sender.take() else {
            return;
        };
        self.outbox.request_stop();
        let _ = sender.join();
        let pending = self.pending();
        if pending > 0 {
            tracing::dispatcher::with_default(&self.dispatch, || {
                warn!(
                    target: "tally::recorder",
                    recorder = %self.recorder_id,
                    pending,
                    "disconnected with undelivered messages"
                )
            });
        }
    }

    fn handle_message(&self, message: RecorderMessage) {
        let mut state = self.outbox.state.lock();
        state.next_sequence += 1;
        let envelope = Envelope {
            recorder_id: self.recorder_id.clone(),
            epoch: self.epoch,
            sequence: state.next_sequence,
            message,
        };
        while state.capacity > 0 && state.pending.len() >= state.capacity {
            state.pending.pop_front();
            state.dropped += 1;
            if state.dropped == 1 || state.dropped % 1000 == 0 {
                warn!(
                    target: "tally::recorder",
                    recorder = %self.recorder_id,
                    dropped = state.dropped,
                    "outbox full, discarding oldest messages"
                );
            }
        }
        state.pending.push_back(envelope);
        self.outbox.ready.notify_one();
    }
}

impl Drop for TcpRecorderListener {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn run_sender(outbox: &Outbox, config: &DistributedConfig, recorder_id: &str) {
    let mut stream: Option<TcpStream> = None;
    let mut delay = config.retry_period();
    let mut failures: u32 = 0;

    loop {
        let stopping = outbox.is_stopping();
        if stream.is_none() {
            if stopping {
                break;
            }
            match open_connection(config) {
                Ok(s) => {
                    info!(
                        target: "tally::recorder",
                        recorder = recorder_id,
                        server = %config.server_location(),
                        "connected to recorder service"
                    );
                    outbox.connected.store(true, Ordering::Release);
                    failures = 0;
                    delay = config.retry_period();
                    stream = Some(s);
                }
                Err(e) => {
                    failures += 1;
                    debug!(
                        target: "tally::recorder",
                        recorder = recorder_id,
                        failures,
                        retry_ms = delay.as_millis() as u64,
                        error = %e,
                        "connection attempt failed"
                    );
                    if config
                        .max_reconnect_attempts
                        .map_or(false, |max| failures >= max)
                    {
                        warn!(
                            target: "tally::recorder",
                            recorder = recorder_id,
                            failures,
                            "giving up on recorder service"
                        );
                        break;
                    }
                    outbox.sleep_unless_stopped(delay);
                    delay = (delay * 2).min(config.max_retry_period());
                    continue;
                }
            }
        }

        let Some(envelope) = outbox.next() else {
            if stopping {
                break;
            }
            continue;
        };
        let Some(conn) = stream.as_mut() else {
            continue;
        };
        match exchange(conn, &envelope) {
            Ok(()) => outbox.acknowledge(envelope.sequence),
            Err(e) => {
                warn!(
                    target: "tally::recorder",
                    recorder = recorder_id,
                    sequence = envelope.sequence,
                    error = %e,
                    "delivery failed, reconnecting"
                );
                stream = None;
                outbox.connected.store(false, Ordering::Release);
            }
        }
    }
    outbox.connected.store(false, Ordering::Release);
}

fn open_connection(config: &DistributedConfig) -> io::Result<TcpStream> {
    let timeout = config.timeout();
    let mut last_err = None;
    for addr in (config.host.as_str(), config.port).to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                stream.set_read_timeout(Some(timeout))?;
                stream.set_write_timeout(Some(timeout))?;
                return Ok(stream);
            }
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(
            ErrorKind::AddrNotAvailable,
            format!("no address for {}", config.server_location()),
        )
    }))
}

/// Send one envelope and wait for its acknowledgement.
fn exchange(stream: &mut TcpStream, envelope: &Envelope) -> RecorderResult<()> {
    let payload = encode_payload(envelope)?;
    write_frame(stream, &payload)?;
    let ack: Ack = decode_payload(&read_frame(stream)?)?;
    if ack.sequence != envelope.sequence {
        return Err(RecorderError::UnexpectedRecord("out-of-order Ack"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::LOCAL_EPOCH;
    use crate::protocol::MethodStart;

    fn start(slice: u32) -> RecorderMessage {
        RecorderMessage::MethodStart(MethodStart {
            type_name: "T".into(),
            slice,
            start_ts: 0,
        })
    }

    #[test]
    fn test_sequence_numbers_start_at_one() {
        let listener = TcpRecorderListener::new("r1");
        listener.handle_message(start(1));
        listener.handle_message(start(2));
        let state = listener.outbox.state.lock();
        let seqs: Vec<u64> = state.pending.iter().map(|e| e.sequence).collect();
        assert_eq!(seqs, vec![1, 2]);
        assert!(state.pending.iter().all(|e| e.recorder_id == "r1"));
        assert!(state.pending.iter().all(|e| e.epoch == listener.epoch()));
    }

    #[test]
    fn test_each_listener_gets_its_own_epoch() {
        let first = TcpRecorderListener::new("r1");
        let second = TcpRecorderListener::new("r1");
        assert_ne!(first.epoch(), LOCAL_EPOCH);
        assert_ne!(first.epoch(), second.epoch());
    }

    #[test]
    fn test_full_outbox_drops_oldest() {
        let mut listener = TcpRecorderListener::new("r1");
        let mut config = DistributedConfig::for_testing();
        config.max_buffered_messages = 2;
        listener.init(config).unwrap();
        for slice in 1..=3 {
            listener.handle_message(start(slice));
        }
        assert_eq!(listener.pending(), 2);
        assert_eq!(listener.dropped(), 1);
        let front = listener.outbox.state.lock().pending.front().map(|e| e.sequence);
        assert_eq!(front, Some(2));
    }

    #[test]
    fn test_connect_requires_init() {
        let mut listener = TcpRecorderListener::new("r1");
        assert!(matches!(
            listener.connect(),
            Err(RecorderError::NotInitialized)
        ));
    }

    #[test]
    fn test_disconnect_keeps_undelivered_messages() {
        // Nothing listens on this port once this socket is dropped.
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let mut listener = TcpRecorderListener::new("r1");
        listener
            .init(DistributedConfig::for_testing().with_server("127.0.0.1", port))
            .unwrap();
        listener.handle_message(start(1));
        listener.connect().unwrap();
        thread::sleep(Duration::from_millis(50));
        listener.disconnect();
        assert_eq!(listener.pending(), 1);
        assert!(!listener.is_connected());
    }

    #[test]
    fn test_gives_up_after_max_attempts() {
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let mut config = DistributedConfig::for_testing().with_server("127.0.0.1", port);
        config.max_reconnect_attempts = Some(2);
        let mut listener = TcpRecorderListener::new("r1");
        listener.init(config).unwrap();
        listener.connect().unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while !listener.sender.as_ref().unwrap().is_finished() {
            assert!(Instant::now() < deadline, "sender did not give up");
            thread::sleep(Duration::from_millis(10));
        }
        // A finished sender can be restarted.
        listener.connect().unwrap();
        listener.disconnect();
    }
}
