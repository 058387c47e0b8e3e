//! Small supporting types for the Adaptable Bus's one-shot bookkeeping,
//! grounded on the request-id/alias bookkeeping used to demultiplex a single
//! inbound stream onto many waiting callers.

use tokio::sync::oneshot;

use crate::adaptable::Adaptable;

/// One entry of an aggregated acknowledgements envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckEntry {
    pub label: String,
    pub status: u16,
}

impl AckEntry {
    pub fn is_failure(&self) -> bool {
        (400..600).contains(&self.status)
    }
}

pub(super) struct CorrelationEntry {
    pub(super) sender: oneshot::Sender<Adaptable>,
}

pub(super) struct ProtocolStringEntry {
    pub(super) id: u64,
    pub(super) sender: oneshot::Sender<String>,
    pub(super) exclusive: bool,
}

/// Opaque handle returned by the bus on subscribe, used to unsubscribe
/// without generating protocol traffic.
pub type SubscriptionId = u64;
