//! benchlink is the host side of a laboratory test bench. It connects to the
//! bench's controller over a serial port or TCP, sends experiment parameters,
//! starts and stops runs, and records the telemetry that comes back into
//! bounded per-signal buffers that a display loop can poll.
//!
//! The pieces, from the wire up:
//!
//! - [`frame_codec`]: the framing used on the wire, and typed payload fields.
//! - [`connection`]: the serial/TCP link and its receive thread.
//! - [`data_point_buffer`]: thread-safe sliding windows of samples.
//! - [`experiment_module`] and [`test_module`]: the plug-in contract that
//!   maps settings to frames and frames to data points.
//! - [`experiment_interactor`]: the experiment state machine.
//! - [`session`]: a connection and an interactor wired together.
//!
//! [`dummy_device`] simulates a bench over TCP, and [`gui`] holds the
//! terminal front end used by the `benchlink` binary.

#![warn(missing_docs)]
pub mod args;
pub mod config;
pub mod connection;
pub mod data_point_buffer;
pub mod dummy_device;
pub mod experiment_file;
pub mod experiment_interactor;
pub mod experiment_module;
pub mod frame_codec;
pub mod gui;
pub mod session;
pub mod test_module;
