//! Per-job fan-out of events to independent bounded channels.
//!
//! Every subscriber owns one `mpsc` channel. The producer only ever uses
//! `try_send`, so a slow subscriber loses events instead of stalling the run
//! or its peers. The last [`TERMINAL_RESERVE`] slots of each channel are held
//! back for the closing `status` and `done`/`error` pair, which therefore
//! always arrive and always arrive last.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};

use crate::event::JobEvent;

/// Slots reserved for the final status and terminal event.
pub(crate) const TERMINAL_RESERVE: usize = 2;

/// Smallest usable buffer: the initial status plus the reserve.
pub const MIN_SUBSCRIBER_BUFFER: usize = TERMINAL_RESERVE + 1;

struct Slot {
    tx: mpsc::Sender<JobEvent>,
    dropped: Arc<AtomicU64>,
}

/// Receiving side handed to a new subscriber.
pub(crate) struct Registration {
    pub id: u64,
    pub rx: mpsc::Receiver<JobEvent>,
    pub dropped: Arc<AtomicU64>,
}

#[derive(Default)]
pub(crate) struct Hub {
    next_id: u64,
    slots: HashMap<u64, Slot>,
    closed: bool,
}

impl Hub {
    /// Register a channel of `buffer` slots and enqueue `first` on it.
    ///
    /// On a closed hub the channel carries `first` and is then closed.
    pub fn add(&mut self, buffer: usize, first: JobEvent) -> Registration {
        let (tx, rx) = mpsc::channel(buffer.max(MIN_SUBSCRIBER_BUFFER));
        let dropped = Arc::new(AtomicU64::new(0));
        // A fresh channel always has room.
        let _ = tx.try_send(first);

        self.next_id += 1;
        let id = self.next_id;
        if !self.closed {
            self.slots.insert(
                id,
                Slot {
                    tx,
                    dropped: Arc::clone(&dropped),
                },
            );
        }
        Registration { id, rx, dropped }
    }

    /// Deregister a subscriber. Dropping its sender closes the stream.
    pub fn remove(&mut self, id: u64) -> bool {
        self.slots.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Deliver a non-terminal event to every subscriber with spare room.
    pub fn broadcast(&mut self, event: &JobEvent) {
        self.slots.retain(|id, slot| {
            if slot.tx.is_closed() {
                tracing::trace!(subscriber = id, "Pruning closed subscriber");
                return false;
            }
            if slot.tx.capacity() <= TERMINAL_RESERVE {
                slot.dropped.fetch_add(1, Ordering::Relaxed);
                return true;
            }
            match slot.tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    slot.dropped.fetch_add(1, Ordering::Relaxed);
                    true
                }
                Err(TrySendError::Closed(_)) => false,
            }
        });
    }

    /// Deliver the closing events into the reserved slots, then drop every
    /// sender. Later calls are no-ops.
    pub fn close(&mut self, closing: [JobEvent; TERMINAL_RESERVE]) {
        if self.closed {
            return;
        }
        self.closed = true;
        for (id, slot) in self.slots.drain() {
            for event in &closing {
                if let Err(TrySendError::Full(_)) = slot.tx.try_send(event.clone()) {
                    slot.dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(subscriber = id, kind = %event.kind, "Closing event dropped");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use crate::status::JobStatus;

    fn progress(i: u64) -> JobEvent {
        JobEvent::new(EventKind::Progress, i.to_string())
    }

    fn closing() -> [JobEvent; 2] {
        [JobEvent::status(JobStatus::Done), JobEvent::new(EventKind::Done, "{}")]
    }

    fn drain(rx: &mut mpsc::Receiver<JobEvent>) -> Vec<JobEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    #[test]
    fn full_subscriber_is_skipped_but_terminal_arrives() {
        let mut hub = Hub::default();
        let mut reg = hub.add(4, JobEvent::status(JobStatus::Running));

        for i in 0..10 {
            hub.broadcast(&progress(i));
        }
        hub.close(closing());

        let events = drain(&mut reg.rx);
        let kinds: Vec<EventKind> = events.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            [
                EventKind::Status,
                EventKind::Progress,
                EventKind::Status,
                EventKind::Done
            ]
        );
        assert_eq!(reg.dropped.load(Ordering::Relaxed), 9);
        assert_eq!(hub.len(), 0);
    }

    #[tokio::test]
    async fn close_ends_streams() {
        let mut hub = Hub::default();
        let mut reg = hub.add(8, JobEvent::status(JobStatus::Running));
        hub.close(closing());

        let mut seen = Vec::new();
        while let Some(ev) = reg.rx.recv().await {
            seen.push(ev.kind);
        }
        assert_eq!(seen, [EventKind::Status, EventKind::Status, EventKind::Done]);
    }

    #[test]
    fn add_after_close_gets_only_first_event() {
        let mut hub = Hub::default();
        hub.close(closing());
        let mut reg = hub.add(8, JobEvent::status(JobStatus::Done));

        assert_eq!(reg.rx.try_recv().unwrap(), JobEvent::status(JobStatus::Done));
        assert!(matches!(
            reg.rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
        assert_eq!(hub.len(), 0);
    }

    #[test]
    fn dropped_receiver_is_pruned() {
        let mut hub = Hub::default();
        let reg = hub.add(8, JobEvent::status(JobStatus::Running));
        let _keep = hub.add(8, JobEvent::status(JobStatus::Running));
        assert_eq!(hub.len(), 2);

        drop(reg);
        hub.broadcast(&progress(0));
        assert_eq!(hub.len(), 1);
    }

    #[test]
    fn remove_deregisters() {
        let mut hub = Hub::default();
        let mut reg = hub.add(8, JobEvent::status(JobStatus::Running));
        assert!(hub.remove(reg.id));
        assert!(!hub.remove(reg.id));

        hub.broadcast(&progress(0));
        assert_eq!(drain(&mut reg.rx).len(), 1);
    }

    #[test]
    fn buffer_is_clamped_to_minimum() {
        let mut hub = Hub::default();
        let mut reg = hub.add(0, JobEvent::status(JobStatus::Running));
        hub.broadcast(&progress(0));
        hub.close(closing());
        assert_eq!(drain(&mut reg.rx).len(), MIN_SUBSCRIBER_BUFFER);
    }
}
