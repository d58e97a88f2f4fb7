//! The link to the bench: a serial port or a TCP socket, a background thread
//! that turns incoming bytes into [`Frame`]s, and a thread-safe way to send.
//!
//! The endpoint is split into two handles when it is opened. The receive
//! thread owns the read half, while the write half sits behind a mutex that
//! any number of [`ConnectionHandle`]s share, so sending never waits on a
//! pending read.
//!
//! ```text
//!  connect()         start()          stop()           disconnect()
//! Disconnected -> Connecting -> Connected -> Reading -> Connected -> Closing -> Disconnected
//! ```

use crate::frame_codec::{encode_frame, Frame, FrameDecoder, MAX_PAYLOAD};

use log::{debug, error, info, trace, warn};
use serial2::SerialPort;
use std::{
    borrow::Cow,
    fmt, io,
    io::{Read, Write},
    net::{TcpStream, ToSocketAddrs},
    str::FromStr,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc, Mutex, MutexGuard, PoisonError,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

/// Baud rates the bench firmware supports.
pub const SUPPORTED_BAUD_RATES: [u32; 8] = [1200, 2400, 4800, 9600, 19200, 38400, 57600, 115200];

/// A baud rate known to be in [`SUPPORTED_BAUD_RATES`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BaudRate(u32);

impl BaudRate {
    /// The rate in bits per second.
    pub fn get(self) -> u32 {
        self.0
    }
}

impl Default for BaudRate {
    fn default() -> Self {
        BaudRate(115200)
    }
}

impl fmt::Display for BaudRate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A string or number that is not a supported baud rate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BaudRateError {
    /// Not a number at all.
    NotANumber(String),
    /// A number the firmware does not support.
    Unsupported(u32),
}

impl fmt::Display for BaudRateError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BaudRateError::NotANumber(s) => write!(f, "{:?} is not a baud rate", s),
            BaudRateError::Unsupported(rate) => write!(
                f,
                "unsupported baud rate {}, expected one of {:?}",
                rate, SUPPORTED_BAUD_RATES
            ),
        }
    }
}

impl std::error::Error for BaudRateError {}

impl TryFrom<u32> for BaudRate {
    type Error = BaudRateError;

    fn try_from(rate: u32) -> Result<Self, Self::Error> {
        if SUPPORTED_BAUD_RATES.contains(&rate) {
            Ok(BaudRate(rate))
        } else {
            Err(BaudRateError::Unsupported(rate))
        }
    }
}

impl FromStr for BaudRate {
    type Err = BaudRateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rate = s
            .trim()
            .parse::<u32>()
            .map_err(|_| BaudRateError::NotANumber(s.to_string()))?;
        BaudRate::try_from(rate)
    }
}

/// Where the bench is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkConfig {
    /// A local serial device.
    Serial {
        /// Device path, e.g. `/dev/ttyACM0`.
        port: String,
        /// Line speed.
        baud: BaudRate,
    },
    /// A bench (or simulator) reachable over TCP.
    Tcp {
        /// Host name or address.
        host: String,
        /// TCP port.
        port: u16,
    },
}

impl fmt::Display for LinkConfig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LinkConfig::Serial { port, baud } => write!(f, "{} @ {} baud", port, baud),
            LinkConfig::Tcp { host, port } => write!(f, "tcp://{}:{}", host, port),
        }
    }
}

/// Timing and sizing knobs of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Upper bound on establishing a TCP connection.
    pub connect_timeout: Duration,
    /// How long one read may block. Also bounds how quickly the receive
    /// thread notices [`Connection::stop`].
    pub read_timeout: Duration,
    /// How long one send may block on a peer that does not drain the link.
    /// A send that runs out of time fails with [`ConnectionError::Io`].
    pub write_timeout: Duration,
    /// Largest payload the decoder accepts.
    pub max_payload: usize,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        ConnectionOptions {
            connect_timeout: Duration::from_secs(2),
            read_timeout: Duration::from_millis(50),
            write_timeout: Duration::from_secs(1),
            max_payload: MAX_PAYLOAD,
        }
    }
}

/// Lifecycle of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reading,
    Closing,
}

/// Things observers of a [`Connection`] are told about.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// A frame came in while the read gate was open.
    Frame(Frame),
    /// The connection moved to a new state.
    StateChanged(ConnectionState),
    /// The link broke underneath us. Carries the reason.
    LinkLost(String),
}

/// Everything that can go wrong with the link itself.
#[derive(Debug)]
pub enum ConnectionError {
    /// The endpoint could not be opened.
    Unreachable {
        /// Human readable description of the endpoint.
        target: String,
        /// What the OS said.
        source: io::Error,
    },
    /// The endpoint did not answer within the connect timeout.
    Timeout(String),
    /// There is no open link to use.
    NotConnected,
    /// Reading or writing failed.
    Io(io::Error),
    /// The receive thread could not be started.
    ThreadSpawn(io::Error),
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use ConnectionError as CE;
        let msg = match self {
            CE::Unreachable { target, source } => {
                Cow::from(format!("could not open {}: {}", target, source))
            }
            CE::Timeout(target) => Cow::from(format!("timed out connecting to {}", target)),
            CE::NotConnected => Cow::from("not connected"),
            CE::Io(e) => Cow::from(format!("i/o error on the link: {}", e)),
            CE::ThreadSpawn(e) => Cow::from(format!("could not start the receive thread: {}", e)),
        };

        write!(f, "{}", msg)
    }
}

impl std::error::Error for ConnectionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConnectionError::Unreachable { source, .. } => Some(source),
            ConnectionError::Io(e) | ConnectionError::ThreadSpawn(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ConnectionError {
    fn from(e: io::Error) -> Self {
        ConnectionError::Io(e)
    }
}

/// Called on the receive thread for every frame that passes the read gate.
/// Implementations should be quick; the next read waits for them.
pub trait FrameSink: Send + Sync {
    /// A frame arrived.
    fn on_frame(&self, frame: &Frame);

    /// The link broke. No more frames will follow.
    fn on_link_lost(&self, _reason: &str) {}
}

/// The sending side of a link, as seen by the experiment logic.
pub trait FrameSender: Send + Sync {
    /// Writes already encoded bytes.
    fn send(&self, bytes: &[u8]) -> Result<(), ConnectionError>;

    /// Encodes and writes one frame.
    fn send_frame(&self, frame: &Frame) -> Result<(), ConnectionError> {
        self.send(&encode_frame(frame))
    }

    /// Opens or closes the read gate.
    fn set_do_read(&self, enabled: bool);

    /// Whether there is a link to send on.
    fn is_connected(&self) -> bool;

    /// Asks the receive thread to drop any partially received frame.
    fn discard_pending(&self);
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

type Reader = Box<dyn Read + Send>;
type Writer = Box<dyn Write + Send>;

/// State shared between the owner, its handles and the receive thread.
struct Shared {
    state: Mutex<ConnectionState>,
    writer: Mutex<Option<Writer>>,
    do_read: AtomicBool,
    stop: AtomicBool,
    discard: AtomicBool,
    sinks: Mutex<Vec<Arc<dyn FrameSink>>>,
    subscribers: Mutex<Vec<mpsc::Sender<ConnectionEvent>>>,
}

impl Shared {
    fn new() -> Self {
        Shared {
            state: Mutex::new(ConnectionState::Disconnected),
            writer: Mutex::new(None),
            do_read: AtomicBool::new(false),
            stop: AtomicBool::new(false),
            discard: AtomicBool::new(false),
            sinks: Mutex::new(Vec::new()),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    fn set_state(&self, state: ConnectionState) {
        *lock(&self.state) = state;
        debug!("connection state: {:?}", state);
        self.publish(ConnectionEvent::StateChanged(state));
    }

    /// Sends `event` to every live subscriber and forgets the dead ones.
    fn publish(&self, event: ConnectionEvent) {
        lock(&self.subscribers).retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn deliver(&self, frame: Frame) {
        let sinks = lock(&self.sinks).clone();
        for sink in sinks {
            sink.on_frame(&frame);
        }
        self.publish(ConnectionEvent::Frame(frame));
    }

    fn write(&self, bytes: &[u8]) -> Result<(), ConnectionError> {
        let mut writer = lock(&self.writer);
        let writer = writer.as_mut().ok_or(ConnectionError::NotConnected)?;
        writer
            .write_all(bytes)
            .and_then(|()| writer.flush())
            .map_err(|e| {
                if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) {
                    warn!("send timed out, the peer is not reading");
                }
                ConnectionError::Io(e)
            })
    }

    fn link_lost(&self, reason: &str) {
        error!("link lost: {}", reason);
        *lock(&self.writer) = None;
        self.set_state(ConnectionState::Disconnected);
        let sinks = lock(&self.sinks).clone();
        for sink in sinks {
            sink.on_link_lost(reason);
        }
        self.publish(ConnectionEvent::LinkLost(reason.to_string()));
    }
}

/// Cloneable, thread-safe access to the sending side and the read gate of a
/// [`Connection`].
#[derive(Clone)]
pub struct ConnectionHandle {
    shared: Arc<Shared>,
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("state", &self.shared.state())
            .finish()
    }
}

impl ConnectionHandle {
    /// Current state of the connection.
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }
}

impl FrameSender for ConnectionHandle {
    fn send(&self, bytes: &[u8]) -> Result<(), ConnectionError> {
        self.shared.write(bytes)
    }

    fn set_do_read(&self, enabled: bool) {
        self.shared.do_read.store(enabled, Ordering::Release);
    }

    fn is_connected(&self) -> bool {
        matches!(
            self.shared.state(),
            ConnectionState::Connected | ConnectionState::Reading
        )
    }

    fn discard_pending(&self) {
        self.shared.discard.store(true, Ordering::Release);
    }
}

/// One link to the bench. See the module docs for the lifecycle.
pub struct Connection {
    config: LinkConfig,
    options: ConnectionOptions,
    shared: Arc<Shared>,
    reader: Option<Reader>,
    worker: Option<JoinHandle<Option<Reader>>>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Connection")
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

impl Connection {
    /// A disconnected connection to `config` with default options.
    pub fn new(config: LinkConfig) -> Self {
        Self::with_options(config, ConnectionOptions::default())
    }

    /// A disconnected connection to `config`.
    pub fn with_options(config: LinkConfig, options: ConnectionOptions) -> Self {
        Connection {
            config,
            options,
            shared: Arc::new(Shared::new()),
            reader: None,
            worker: None,
        }
    }

    /// Where this connection goes.
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Whether the link is open.
    pub fn is_connected(&self) -> bool {
        matches!(
            self.state(),
            ConnectionState::Connected | ConnectionState::Reading
        )
    }

    /// A handle for sending and gating from other places and threads.
    pub fn handle(&self) -> ConnectionHandle {
        ConnectionHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Opens the endpoint. Does nothing if already open.
    pub fn connect(&mut self) -> Result<(), ConnectionError> {
        if self.state() != ConnectionState::Disconnected {
            debug!("connect: already connected to {}", self.config);
            return Ok(());
        }
        // a receive thread that ended with a lost link
        self.reap_worker();

        self.shared.set_state(ConnectionState::Connecting);
        match open(&self.config, &self.options) {
            Ok((reader, writer)) => {
                self.reader = Some(reader);
                *lock(&self.shared.writer) = Some(writer);
                self.shared.discard.store(false, Ordering::Release);
                self.shared.set_state(ConnectionState::Connected);
                info!("connected to {}", self.config);
                Ok(())
            }
            Err(e) => {
                warn!("failed to connect to {}: {}", self.config, e);
                self.shared.set_state(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    /// Starts the receive thread. Does nothing if it is already running.
    pub fn start(&mut self) -> Result<(), ConnectionError> {
        if self.worker.is_some() {
            return Ok(());
        }
        let reader = self.reader.take().ok_or(ConnectionError::NotConnected)?;

        self.shared.stop.store(false, Ordering::Release);
        // before the spawn, so a link lost right away is not overwritten
        self.shared.set_state(ConnectionState::Reading);
        let shared = Arc::clone(&self.shared);
        let max_payload = self.options.max_payload;
        let spawned = thread::Builder::new()
            .name("benchlink-rx".into())
            .spawn(move || receive_loop(reader, shared, max_payload));

        match spawned {
            Ok(worker) => {
                self.worker = Some(worker);
                Ok(())
            }
            Err(e) => {
                // the read half went down with the closure
                *lock(&self.shared.writer) = None;
                self.shared.set_state(ConnectionState::Disconnected);
                Err(ConnectionError::ThreadSpawn(e))
            }
        }
    }

    /// Stops the receive thread, keeping the link open.
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        self.shared.stop.store(true, Ordering::Release);
        match worker.join() {
            Ok(Some(reader)) => {
                self.reader = Some(reader);
                if self.state() == ConnectionState::Reading {
                    self.shared.set_state(ConnectionState::Connected);
                }
            }
            // the link was lost, the thread already cleaned up
            Ok(None) => {}
            Err(_) => {
                error!("receive thread panicked");
                *lock(&self.shared.writer) = None;
                self.shared.set_state(ConnectionState::Disconnected);
            }
        }
    }

    /// Closes the link. Returns once the receive thread has exited, so no
    /// frame is dispatched after this returns. Calling it again is a no-op.
    pub fn disconnect(&mut self) {
        if self.state() == ConnectionState::Disconnected {
            self.reap_worker();
            self.reader = None;
            return;
        }

        self.shared.set_state(ConnectionState::Closing);
        self.reap_worker();
        self.reader = None;
        *lock(&self.shared.writer) = None;
        self.shared.set_state(ConnectionState::Disconnected);
        info!("disconnected from {}", self.config);
    }

    fn reap_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            self.shared.stop.store(true, Ordering::Release);
            if worker.join().is_err() {
                error!("receive thread panicked");
            }
        }
    }

    /// Writes already encoded bytes.
    pub fn send(&self, bytes: &[u8]) -> Result<(), ConnectionError> {
        self.shared.write(bytes)
    }

    /// Encodes and writes one frame.
    pub fn send_frame(&self, frame: &Frame) -> Result<(), ConnectionError> {
        self.send(&encode_frame(frame))
    }

    /// Opens or closes the read gate. While closed, received frames are
    /// decoded and dropped.
    pub fn set_do_read(&self, enabled: bool) {
        self.shared.do_read.store(enabled, Ordering::Release);
    }

    /// A channel receiving every [`ConnectionEvent`] from now on.
    pub fn subscribe(&self) -> mpsc::Receiver<ConnectionEvent> {
        let (tx, rx) = mpsc::channel();
        lock(&self.shared.subscribers).push(tx);
        rx
    }

    /// Registers a callback run on the receive thread for every frame.
    pub fn subscribe_sink(&self, sink: Arc<dyn FrameSink>) {
        lock(&self.shared.sinks).push(sink);
    }

    /// Removes a callback added with [`Connection::subscribe_sink`].
    pub fn unsubscribe_sink(&self, sink: &Arc<dyn FrameSink>) {
        let target = Arc::as_ptr(sink) as *const ();
        lock(&self.shared.sinks).retain(|s| Arc::as_ptr(s) as *const () != target);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn open(config: &LinkConfig, options: &ConnectionOptions) -> Result<(Reader, Writer), ConnectionError> {
    let read_timeout = options.read_timeout.max(Duration::from_millis(1));
    let write_timeout = options.write_timeout.max(Duration::from_millis(1));
    let unreachable = |source| ConnectionError::Unreachable {
        target: config.to_string(),
        source,
    };

    match config {
        LinkConfig::Serial { port, baud } => {
            let mut serial = SerialPort::open(port, baud.get()).map_err(unreachable)?;
            serial.set_read_timeout(read_timeout)?;
            serial.set_write_timeout(write_timeout)?;
            let mut writer = serial.try_clone()?;
            writer.set_write_timeout(write_timeout)?;
            Ok((Box::new(serial), Box::new(writer)))
        }
        LinkConfig::Tcp { host, port } => {
            let addrs = (host.as_str(), *port)
                .to_socket_addrs()
                .map_err(unreachable)?;

            let mut last_error = None;
            for addr in addrs {
                match TcpStream::connect_timeout(&addr, options.connect_timeout) {
                    Ok(stream) => {
                        stream.set_read_timeout(Some(read_timeout))?;
                        stream.set_write_timeout(Some(write_timeout))?;
                        stream.set_nodelay(true)?;
                        let writer = stream.try_clone()?;
                        return Ok((Box::new(stream), Box::new(writer)));
                    }
                    Err(e) => {
                        debug!("connecting to {} failed: {}", addr, e);
                        last_error = Some(e);
                    }
                }
            }

            Err(match last_error {
                Some(e) if e.kind() == io::ErrorKind::TimedOut => {
                    ConnectionError::Timeout(config.to_string())
                }
                Some(e) => unreachable(e),
                None => unreachable(io::Error::new(
                    io::ErrorKind::NotFound,
                    "host resolved to no address",
                )),
            })
        }
    }
}

/// Body of the receive thread. Hands the reader back when asked to stop,
/// and returns `None` when the link broke.
fn receive_loop(mut reader: Reader, shared: Arc<Shared>, max_payload: usize) -> Option<Reader> {
    let mut decoder = FrameDecoder::new(max_payload);
    let mut chunk = [0u8; 512];

    while !shared.stop.load(Ordering::Acquire) {
        if shared.discard.swap(false, Ordering::AcqRel) {
            trace!("dropping {} pending bytes", decoder.pending());
            decoder.clear();
        }

        match reader.read(&mut chunk) {
            Ok(0) => {
                shared.link_lost("end of stream");
                return None;
            }
            Ok(n) => {
                decoder.extend(&chunk[..n]);
                loop {
                    match decoder.next_frame() {
                        Ok(Some(frame)) if shared.do_read.load(Ordering::Acquire) => {
                            shared.deliver(frame)
                        }
                        Ok(Some(frame)) => trace!("read gate closed, dropping frame {}", frame.id()),
                        Ok(None) => break,
                        Err(e) => warn!("protocol error, resynchronizing: {}", e),
                    }
                }
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) => {}
            Err(e) => {
                shared.link_lost(&e.to_string());
                return None;
            }
        }
    }

    Some(reader)
}
