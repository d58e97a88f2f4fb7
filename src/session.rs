//! Glue between one [`Connection`] and one [`ExperimentInteractor`]: the
//! interactor sends through the connection and the connection's receive
//! thread feeds the interactor's buffers.

use crate::connection::{Connection, ConnectionError, ConnectionEvent, ConnectionState};
use crate::experiment_interactor::{ExperimentInteractor, InteractorState};

use log::{info, warn};
use std::sync::{mpsc, Arc};

/// A connection and the experiment logic driving it.
#[derive(Debug)]
pub struct Session {
    connection: Connection,
    interactor: ExperimentInteractor,
}

impl Session {
    /// Pairs `connection` with `interactor`. Nothing is opened yet.
    pub fn new(connection: Connection, interactor: ExperimentInteractor) -> Self {
        Session {
            connection,
            interactor,
        }
    }

    /// Opens the link, starts receiving and hands the link to the
    /// interactor.
    pub fn connect(&mut self) -> Result<(), ConnectionError> {
        self.connection.connect()?;
        self.connection.start()?;

        let sink = self.interactor.frame_sink();
        self.connection.unsubscribe_sink(&sink);
        self.connection.subscribe_sink(sink);
        self.interactor.attach(Arc::new(self.connection.handle()));
        info!("session up on {}", self.connection.config());
        Ok(())
    }

    /// Stops a running experiment, then closes the link.
    pub fn disconnect(&mut self) {
        if self.interactor.state() == InteractorState::Running {
            if let Err(e) = self.interactor.stop_experiment() {
                warn!("stopping the experiment before disconnecting: {}", e);
            }
        }
        self.connection.disconnect();
        self.connection.unsubscribe_sink(&self.interactor.frame_sink());
        self.interactor.detach();
    }

    /// Whether the link is open.
    pub fn is_connected(&self) -> bool {
        matches!(
            self.connection.state(),
            ConnectionState::Connected | ConnectionState::Reading
        )
    }

    /// Events from the connection, from now on.
    pub fn subscribe(&self) -> mpsc::Receiver<ConnectionEvent> {
        self.connection.subscribe()
    }

    /// The connection.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// The experiment logic.
    pub fn interactor(&self) -> &ExperimentInteractor {
        &self.interactor
    }

    /// The experiment logic, for lifecycle operations.
    pub fn interactor_mut(&mut self) -> &mut ExperimentInteractor {
        &mut self.interactor
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.disconnect();
    }
}
