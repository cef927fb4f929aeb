//! The per-instance "active operation" slot.
//!
//! Beginning a new operation swaps the slot atomically and signals the
//! previous occupant to cancel. A ticket only clears the slot on drop if it
//! still owns it, so a superseded call never evicts its successor.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use tokio::sync::watch;
use tracing::info;

struct ActiveOperation {
    id: u64,
    cancel: watch::Sender<bool>,
}

#[derive(Default)]
pub(crate) struct SingleFlight {
    next_id: AtomicU64,
    active: Mutex<Option<ActiveOperation>>,
}

impl SingleFlight {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Claims the slot for a new operation, cancelling whoever held it.
    pub(crate) fn begin(&self) -> FlightTicket<'_> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (cancel, cancelled) = watch::channel(false);

        let previous = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(ActiveOperation { id, cancel });

        if let Some(previous) = previous {
            info!(superseded = previous.id, by = id, "Superseding in-flight request");
            let _ = previous.cancel.send(true);
        }

        FlightTicket {
            id,
            cancelled,
            owner: self,
        }
    }

    /// Cancels the current occupant, if any. Returns whether one existed.
    pub(crate) fn cancel_active(&self) -> bool {
        let current = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match current {
            Some(op) => {
                info!(op = op.id, "Cancelling in-flight request");
                let _ = op.cancel.send(true);
                true
            }
            None => false,
        }
    }

    pub(crate) fn is_occupied(&self) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn release(&self, id: u64) {
        let mut slot = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|op| op.id == id) {
            *slot = None;
        }
    }
}

/// Proof of ownership of the slot for one logical call.
pub(crate) struct FlightTicket<'a> {
    id: u64,
    cancelled: watch::Receiver<bool>,
    owner: &'a SingleFlight,
}

impl FlightTicket<'_> {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }

    /// Resolves once this operation has been superseded or cancelled.
    pub(crate) async fn cancelled(&mut self) {
        loop {
            if *self.cancelled.borrow_and_update() {
                return;
            }
            if self.cancelled.changed().await.is_err() {
                // Sender gone without a cancel signal: nothing can cancel us anymore.
                if !*self.cancelled.borrow() {
                    std::future::pending::<()>().await;
                }
                return;
            }
        }
    }
}

impl Drop for FlightTicket<'_> {
    fn drop(&mut self) {
        self.owner.release(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_begin_cancels_previous_ticket() {
        let flight = SingleFlight::new();
        let first = flight.begin();
        assert!(!first.is_cancelled());

        let second = flight.begin();
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
    }

    #[test]
    fn test_superseded_ticket_drop_keeps_successor() {
        let flight = SingleFlight::new();
        let first = flight.begin();
        let second = flight.begin();
        drop(first);
        assert!(flight.is_occupied());
        drop(second);
        assert!(!flight.is_occupied());
    }

    #[test]
    fn test_cancel_active_without_operation_is_noop() {
        let flight = SingleFlight::new();
        assert!(!flight.cancel_active());
        assert!(!flight.cancel_active());
        assert!(!flight.is_occupied());
    }

    #[tokio::test]
    async fn test_cancelled_future_resolves_on_cancel() {
        let flight = SingleFlight::new();
        let mut ticket = flight.begin();
        assert!(flight.cancel_active());
        tokio::time::timeout(Duration::from_secs(1), ticket.cancelled())
            .await
            .expect("ticket should observe cancellation");
        assert!(ticket.is_cancelled());
    }
}
