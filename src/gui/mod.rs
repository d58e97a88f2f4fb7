//! Terminal front end: a serial port picker and a live monitor of the
//! active experiment's data points.

mod device_selector;
mod error;
mod monitor;

pub use device_selector::device_selector;
pub use error::BenchGuiError;
pub use monitor::monitor;
