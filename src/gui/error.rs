use std::{error::Error, fmt::Display};

use crate::connection::ConnectionError;
use crate::experiment_interactor::InteractorError;

/// Errors from the terminal front end.
#[derive(Debug)]
pub enum BenchGuiError {
    /// The terminal could not be driven.
    IOError(std::io::Error),
    /// The link failed.
    Connection(ConnectionError),
    /// The experiment logic refused an action.
    Interactor(InteractorError),
}

impl Display for BenchGuiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IOError(e) => write!(f, "terminal error: {}", e),
            Self::Connection(e) => write!(f, "{}", e),
            Self::Interactor(e) => write!(f, "{}", e),
        }
    }
}

impl Error for BenchGuiError {}

impl From<std::io::Error> for BenchGuiError {
    fn from(value: std::io::Error) -> Self {
        Self::IOError(value)
    }
}

impl From<ConnectionError> for BenchGuiError {
    fn from(value: ConnectionError) -> Self {
        Self::Connection(value)
    }
}

impl From<InteractorError> for BenchGuiError {
    fn from(value: InteractorError) -> Self {
        Self::Interactor(value)
    }
}
