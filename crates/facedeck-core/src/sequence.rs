//! Request sequencing for views that can be re-queried while a fetch is in flight.
//!
//! Every fetch takes a ticket before it starts. When the response arrives,
//! it is only applied if no newer fetch has been issued in the meantime,
//! so a slow earlier response can never overwrite a later one.

use std::sync::atomic::{AtomicU64, Ordering};

/// Handle identifying one issued request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Ticket(u64);

#[derive(Debug, Default)]
pub struct RequestSequencer {
    issued: AtomicU64,
}

impl RequestSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a ticket for a new request, superseding all earlier ones.
    pub fn begin(&self) -> Ticket {
        Ticket(self.issued.fetch_add(1, Ordering::AcqRel) + 1)
    }

    /// Whether the response for `ticket` is still the latest and may be applied.
    pub fn accept(&self, ticket: Ticket) -> bool {
        self.issued.load(Ordering::Acquire) == ticket.0
    }
}
