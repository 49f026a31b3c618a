use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use thiserror::Error;

use network_messages::{Message, MessageNotifier, MessageType};
use utils::observer::Notifier;
use utils::timers::Timers;

use crate::close_type::CloseType;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum SendError {
    #[error("channel is already closed")]
    AlreadyClosed,
    #[error("failed to hand the message to the transport")]
    Transport,
}

/// Transport backend of a peer channel. The production implementation frames
/// and writes to a socket; tests plug in a recording sink.
pub trait NetworkSink: Send + Sync {
    fn send(&self, msg: Message) -> Result<(), SendError>;
    fn close(&self, ty: CloseType);
}

/// The agent-facing side of one peer connection: typed inbound dispatch,
/// outbound sends, close signalling and response-expectation timeouts.
pub struct PeerChannel {
    pub msg_notifier: Arc<MessageNotifier>,
    pub close_notifier: Arc<RwLock<Notifier<'static, CloseType>>>,
    sink: Arc<dyn NetworkSink>,
    closed: AtomicBool,
    expected_responses: Timers<MessageType>,
}

impl PeerChannel {
    pub fn new(sink: Arc<dyn NetworkSink>) -> Self {
        PeerChannel {
            msg_notifier: Arc::new(MessageNotifier::new()),
            close_notifier: Arc::new(RwLock::new(Notifier::new())),
            sink,
            closed: AtomicBool::new(false),
            expected_responses: Timers::new(),
        }
    }

    pub fn send(&self, msg: Message) -> Result<(), SendError> {
        if self.closed() {
            return Err(SendError::AlreadyClosed);
        }
        self.sink.send(msg)
    }

    pub fn send_or_close(&self, msg: Message) {
        if let Err(e) = self.send(msg) {
            debug!("Closing channel after send error: {}", e);
            self.close(CloseType::SendFailed);
        }
    }

    /// Closes the channel once; later calls are ignored.
    pub fn close(&self, ty: CloseType) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.expected_responses.clear_all();
        self.sink.close(ty);
        self.close_notifier.read().notify(ty);
    }

    pub fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Arms a timeout that fires unless a message of `ty` arrives first.
    /// Re-arming the same type replaces the previous expectation.
    pub fn expect_message<F>(&self, ty: MessageType, on_timeout: F, timeout: Duration)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.closed() {
            return;
        }
        self.expected_responses.set_delay(ty, on_timeout, timeout);
    }

    /// Entry point for inbound messages decoded by the transport.
    pub fn on_message(&self, msg: Message) {
        if self.closed() {
            return;
        }
        self.expected_responses.clear_delay(&msg.ty());
        self.msg_notifier.notify(msg);
    }
}
