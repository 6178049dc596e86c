/// Outbound messages to the editor host
use crate::pipeline::PopupCandidate;
use crate::types::{CompletedItem, Context};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tokio::sync::mpsc;
use tracing::warn;

/// One source to ask, with the context prepared for it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub name: String,
    pub context: Context,
}

/// Messages the core sends to the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum HostMessage {
    /// Ask sources to produce completions
    NotifyComplete {
        context: Context,
        notifies: Vec<Notification>,
    },
    /// Show (or replace) the popup
    UpdateMatches {
        context: Context,
        start_byte_column: usize,
        matches: Vec<PopupCandidate>,
    },
    /// Let sources prepare ahead of a completion request
    WarmupSources {
        context: Context,
        warmups: Vec<Notification>,
    },
    /// Tell a source the user accepted one of its candidates
    NotifyCompleted {
        context: Context,
        name: String,
        source_context: Context,
        completed: CompletedItem,
    },
    /// Scopes the core can expand into subscopes
    SyncDetectors { scopes: BTreeSet<String> },
}

impl HostMessage {
    pub fn method(&self) -> &'static str {
        match self {
            HostMessage::NotifyComplete { .. } => "notify_complete",
            HostMessage::UpdateMatches { .. } => "update_matches",
            HostMessage::WarmupSources { .. } => "warmup_sources",
            HostMessage::NotifyCompleted { .. } => "notify_completed",
            HostMessage::SyncDetectors { .. } => "sync_detectors",
        }
    }
}

/// Fire-and-forget channel to the host
pub trait HostSink {
    fn send(&mut self, message: HostMessage);
}

/// Keeps messages in memory until drained
#[derive(Debug, Default)]
pub struct BufferedSink {
    messages: Vec<HostMessage>,
}

impl BufferedSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[HostMessage] {
        &self.messages
    }

    pub fn drain(&mut self) -> Vec<HostMessage> {
        std::mem::take(&mut self.messages)
    }
}

impl HostSink for BufferedSink {
    fn send(&mut self, message: HostMessage) {
        self.messages.push(message);
    }
}

/// Forwards messages over an unbounded tokio channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<HostMessage>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<HostMessage>) -> Self {
        Self { tx }
    }

    /// Create a sink together with the receiving end
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<HostMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl HostSink for ChannelSink {
    fn send(&mut self, message: HostMessage) {
        let method = message.method();
        if self.tx.send(message).is_err() {
            warn!(method, "host channel closed, message dropped");
        }
    }
}
