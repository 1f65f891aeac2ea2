//! The two ends of the bridge.
//!
//! Each direction is an ordered mpsc queue. Report buffers travel inside
//! [`Message::Report`] and [`Command::ReturnBuffer`] by value, so sending one
//! moves its heap storage and leaves nothing behind on the sending side.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::Duration;

use meshi_physx_protocol::{Command, Message};

use crate::error::{BridgeError, Result};

pub struct Endpoint<S, R> {
    tx: Sender<S>,
    rx: Receiver<R>,
}

/// The host's end: sends commands, receives messages.
pub type HostEndpoint = Endpoint<Command, Message>;
/// The engine host's end: sends messages, receives commands.
pub type EngineEndpoint = Endpoint<Message, Command>;

pub fn connect() -> (HostEndpoint, EngineEndpoint) {
    let (command_tx, command_rx) = mpsc::channel();
    let (message_tx, message_rx) = mpsc::channel();
    (
        Endpoint {
            tx: command_tx,
            rx: message_rx,
        },
        Endpoint {
            tx: message_tx,
            rx: command_rx,
        },
    )
}

impl<S, R> Endpoint<S, R> {
    pub fn send(&self, value: S) -> Result<()> {
        self.tx.send(value).map_err(|_| BridgeError::Disconnected)
    }

    /// Never blocks. `Ok(None)` when nothing is queued.
    pub fn try_recv(&self) -> Result<Option<R>> {
        match self.rx.try_recv() {
            Ok(value) => Ok(Some(value)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(BridgeError::Disconnected),
        }
    }

    pub fn recv(&self) -> Result<R> {
        self.rx.recv().map_err(|_| BridgeError::Disconnected)
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<R>> {
        match self.rx.recv_timeout(timeout) {
            Ok(value) => Ok(Some(value)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(BridgeError::Disconnected),
        }
    }
}
