//! A simulated bench that speaks the protocol over TCP, for trying the front
//! end without hardware and for end-to-end tests.
//!
//! The device runs a ramp trajectory. A parameter frame (id 12) sets it up:
//!
//! | field         | type  |
//! |---------------|-------|
//! | start value   | `f64` |
//! | end value     | `f32` |
//! | start tick    | `i16` |
//! | end tick      | `i16` |
//!
//! Output holds the start value until the start tick, moves linearly to the
//! end value at the end tick and stays there. A control frame (id 1) starts
//! (`[1]`) or stops (`[0]`) the run. While running, one telemetry frame
//! (id 10) is sent per period: elapsed milliseconds, the output, the output
//! with noise added, the start value and the end value.

use crate::experiment_interactor::EXPERIMENT_CONTROL_ID;
use crate::frame_codec::{decode_fields, encode, FieldKind, FieldValue, Frame, FrameDecoder};
use crate::test_module::{PARAMETER_ID, TELEMETRY_ID};

use log::{debug, info, warn};
use rand::prelude::*;
use std::{
    io::{self, Read, Write},
    net::{SocketAddr, TcpListener, TcpStream},
    sync::mpsc,
    thread::{self, JoinHandle},
    time::Duration,
};

const PARAMETER_LAYOUT: [FieldKind; 4] = [FieldKind::F64, FieldKind::F32, FieldKind::I16, FieldKind::I16];

enum Signal {
    Noise(f64),
    Period(Duration),
    Stop,
}

/// The ramp the device follows, in sample ticks.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Ramp {
    start_value: f64,
    end_value: f64,
    start_tick: i64,
    end_tick: i64,
}

impl Default for Ramp {
    fn default() -> Self {
        Ramp {
            start_value: 0.0,
            end_value: 10.0,
            start_tick: 320,
            end_tick: 10,
        }
    }
}

impl Ramp {
    fn from_parameters(payload: &[u8]) -> Option<Self> {
        let fields = decode_fields(&PARAMETER_LAYOUT, payload).ok()?;
        match fields[..] {
            [start_value, end_value, start_tick, end_tick] => Some(Ramp {
                start_value: start_value.as_f64(),
                end_value: end_value.as_f64(),
                start_tick: start_tick.as_i64(),
                end_tick: end_tick.as_i64(),
            }),
            _ => None,
        }
    }

    fn output(&self, tick: i64) -> f64 {
        if tick < self.start_tick {
            self.start_value
        } else if tick < self.end_tick {
            let slope = (self.end_value - self.start_value) / (self.end_tick - self.start_tick) as f64;
            self.start_value + slope * (tick - self.start_tick) as f64
        } else {
            self.end_value
        }
    }
}

/// Per-client bench state.
/// Milliseconds since the run started at `tick`, exact for sub-millisecond
/// periods too.
fn sample_time_ms(tick: i64, period: Duration) -> i64 {
    (period.as_secs_f64() * 1000.0 * tick as f64).round() as i64
}

struct Bench {
    stream: TcpStream,
    decoder: FrameDecoder,
    ramp: Ramp,
    tick: i64,
    running: bool,
}

impl Bench {
    fn new(stream: TcpStream) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        Ok(Bench {
            stream,
            decoder: FrameDecoder::default(),
            ramp: Ramp::default(),
            tick: 0,
            running: false,
        })
    }

    fn handle(&mut self, frame: Frame) {
        match frame.id() {
            PARAMETER_ID => match Ramp::from_parameters(frame.payload()) {
                Some(ramp) => {
                    info!("dummy device: new ramp {:?}", ramp);
                    self.ramp = ramp;
                }
                None => warn!("dummy device: malformed parameters"),
            },
            EXPERIMENT_CONTROL_ID => {
                self.running = frame.payload().first().map_or(false, |&b| b != 0);
                self.tick = 0;
                info!("dummy device: {}", if self.running { "running" } else { "stopped" });
            }
            other => debug!("dummy device: ignoring frame {}", other),
        }
    }

    /// Reads whatever arrived. `false` once the client is gone.
    fn poll(&mut self) -> bool {
        let mut chunk = [0u8; 256];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => return false,
                Ok(n) => self.decoder.extend(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("dummy device: read failed: {}", e);
                    return false;
                }
            }
        }

        loop {
            match self.decoder.next_frame() {
                Ok(Some(frame)) => self.handle(frame),
                Ok(None) => return true,
                Err(e) => debug!("dummy device: {}", e),
            }
        }
    }

    /// Advances one tick and sends a sample. `false` once the client is gone.
    fn step(&mut self, period: Duration, noise: f64) -> bool {
        if !self.running {
            return true;
        }
        self.tick += 1;

        let output = self.ramp.output(self.tick);
        let noisy = if noise > 0.0 {
            output + thread_rng().gen_range(-noise..noise)
        } else {
            output
        };
        let time_ms = sample_time_ms(self.tick, period);

        let sample = encode(
            TELEMETRY_ID,
            &[
                (FieldKind::U32, FieldValue::Int(time_ms)),
                (FieldKind::F64, FieldValue::Float(output)),
                (FieldKind::F64, FieldValue::Float(noisy)),
                (FieldKind::F64, FieldValue::Float(self.ramp.start_value)),
                (FieldKind::F64, FieldValue::Float(self.ramp.end_value)),
            ],
        );
        let Ok(bytes) = sample else {
            return true;
        };

        match self.stream.write_all(&bytes) {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                debug!("dummy device: client not keeping up, sample dropped");
                true
            }
            Err(e) => {
                warn!("dummy device: write failed: {}", e);
                false
            }
        }
    }
}

/// Builder for [`DummyDevice`].
#[derive(Debug, Clone)]
pub struct DummyDeviceBuilder {
    bind: String,
    period: Duration,
    noise: f64,
}

impl Default for DummyDeviceBuilder {
    fn default() -> Self {
        DummyDeviceBuilder {
            bind: "127.0.0.1:50007".to_string(),
            period: Duration::from_millis(10),
            noise: 0.0,
        }
    }
}

impl DummyDeviceBuilder {
    /// Address to listen on. Port 0 picks a free one.
    pub fn bind(mut self, addr: impl Into<String>) -> Self {
        self.bind = addr.into();
        self
    }

    /// Time between two samples.
    pub fn period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Amplitude of the noise added to the second signal.
    pub fn noise(mut self, noise: f64) -> Self {
        self.noise = noise;
        self
    }

    /// Starts listening and spawns the device thread.
    pub fn build(self) -> io::Result<DummyDevice> {
        let listener = TcpListener::bind(&self.bind)?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;
        info!("dummy device listening on {}", addr);

        let (tx, rx) = mpsc::channel::<Signal>();
        let handle = thread::Builder::new()
            .name("dummy-device".into())
            .spawn(move || serve(listener, rx, self.period, self.noise))?;

        Ok(DummyDevice {
            handle: Some(handle),
            tx,
            addr,
        })
    }
}

fn serve(listener: TcpListener, rx: mpsc::Receiver<Signal>, mut period: Duration, mut noise: f64) {
    let mut bench: Option<Bench> = None;

    loop {
        while let Ok(received) = rx.try_recv() {
            match received {
                Signal::Noise(new_noise) => noise = new_noise,
                Signal::Period(new_period) => period = new_period,
                Signal::Stop => return,
            }
        }

        if bench.is_none() {
            match listener.accept() {
                Ok((stream, peer)) => match Bench::new(stream) {
                    Ok(b) => {
                        info!("dummy device: client {} connected", peer);
                        bench = Some(b);
                    }
                    Err(e) => warn!("dummy device: could not set up client: {}", e),
                },
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => warn!("dummy device: accept failed: {}", e),
            }
        }

        if let Some(b) = bench.as_mut() {
            if !(b.poll() && b.step(period, noise)) {
                info!("dummy device: client gone");
                bench = None;
            }
        }

        spin_sleep::sleep(period);
    }
}

/// Handle to a running simulated bench. Stops it when dropped.
pub struct DummyDevice {
    handle: Option<JoinHandle<()>>,
    tx: mpsc::Sender<Signal>,
    addr: SocketAddr,
}

impl DummyDevice {
    /// Starts configuring a device.
    pub fn builder() -> DummyDeviceBuilder {
        DummyDeviceBuilder::default()
    }

    /// The address clients connect to.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Changes the noise amplitude.
    pub fn set_noise(&self, noise: f64) {
        if self.tx.send(Signal::Noise(noise)).is_err() {
            warn!("dummy device already stopped");
        }
    }

    /// Changes the sample period.
    pub fn set_period(&self, period: Duration) {
        if self.tx.send(Signal::Period(period)).is_err() {
            warn!("dummy device already stopped");
        }
    }

    /// Stops the device thread and waits for it.
    pub fn stop(&mut self) {
        let _ = self.tx.send(Signal::Stop);
        if let Some(thread) = self.handle.take() {
            if thread.join().is_err() {
                warn!("dummy device thread panicked");
            }
        }
    }
}

impl Drop for DummyDevice {
    fn drop(&mut self) {
        self.stop();
    }
}
