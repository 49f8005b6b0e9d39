use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use crate::operation::Origin;
use crate::queue::lock;

/// Orders store calls across origins when several workers apply at once.
///
/// Every operation takes a ticket as it is dequeued, so tickets follow
/// dequeue order. An operation may only start once no operation of the
/// other origin holding an earlier ticket is still unfinished. The store
/// therefore never sees a backfill write and a realtime write overlap,
/// and never sees them complete out of dequeue order.
pub(crate) struct ApplyGate {
    state: Mutex<InFlight>,
    released: Notify,
}

#[derive(Default)]
struct InFlight {
    next: u64,
    backfill: BTreeSet<u64>,
    realtime: BTreeSet<u64>,
}

impl InFlight {
    fn of(&self, origin: Origin) -> &BTreeSet<u64> {
        match origin {
            Origin::Backfill => &self.backfill,
            Origin::Realtime => &self.realtime,
        }
    }

    fn of_mut(&mut self, origin: Origin) -> &mut BTreeSet<u64> {
        match origin {
            Origin::Backfill => &mut self.backfill,
            Origin::Realtime => &mut self.realtime,
        }
    }

    fn earliest(&self, origin: Origin) -> Option<u64> {
        self.of(origin).first().copied()
    }
}

/// Place of one dequeued operation. Dropping it releases the place.
pub(crate) struct Ticket {
    gate: Arc<ApplyGate>,
    origin: Origin,
    id: u64,
}

impl ApplyGate {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(ApplyGate {
            state: Mutex::new(InFlight::default()),
            released: Notify::new(),
        })
    }

    /// Register an operation in dequeue order.
    pub(crate) fn issue(self: &Arc<Self>, origin: Origin) -> Ticket {
        let mut state = lock(&self.state);
        let id = state.next;
        state.next += 1;
        state.of_mut(origin).insert(id);
        Ticket {
            gate: Arc::clone(self),
            origin,
            id,
        }
    }

    /// Wait until `ticket` may reach the store.
    ///
    /// With `drain_own_origin` set, earlier operations of the ticket's own
    /// origin must have finished as well.
    pub(crate) async fn wait_turn(&self, ticket: &Ticket, drain_own_origin: bool) {
        let other = match ticket.origin {
            Origin::Backfill => Origin::Realtime,
            Origin::Realtime => Origin::Backfill,
        };

        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            {
                let state = lock(&self.state);
                let other_clear = state.earliest(other).map_or(true, |id| id > ticket.id);
                let own_clear = !drain_own_origin || state.earliest(ticket.origin) == Some(ticket.id);
                if other_clear && own_clear {
                    return;
                }
            }
            released.await;
        }
    }

    /// True if `origin` has no unfinished operation besides `ticket`.
    pub(crate) fn is_sole(&self, ticket: &Ticket, origin: Origin) -> bool {
        lock(&self.state).of(origin).iter().all(|&id| id == ticket.id)
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        lock(&self.gate.state).of_mut(self.origin).remove(&self.id);
        self.gate.released.notify_waiters();
    }
}
