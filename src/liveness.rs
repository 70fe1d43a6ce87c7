//! Liveness bookkeeping for the parent role: the last position reported by
//! the paired child and the FALL/MISSING events derived from it. The
//! deadline itself lives in the parent task loop; this type only decides
//! what an accepted report or an expired deadline means.

use crate::BraceletEvent;
use crate::link_message::{MovementStatus, Position, StatusRecord};

pub(crate) struct LivenessMonitor {
    last_known: Option<Position>,
}

impl LivenessMonitor {
    pub(crate) const fn new() -> Self {
        LivenessMonitor { last_known: None }
    }

    pub(crate) fn last_known_position(&self) -> Option<Position> {
        self.last_known
    }

    /// Caches the reported position. Returns a FALL event when the report
    /// carries FALLING; every such report alerts, repeats included.
    pub(crate) fn record_report(&mut self, record: &StatusRecord) -> Option<BraceletEvent> {
        self.last_known = Some(record.position);
        if record.status == MovementStatus::Falling {
            Some(BraceletEvent::Fall {
                position: record.position,
            })
        } else {
            None
        }
    }

    /// The deadline expired with no accepted report: MISSING, carrying the
    /// last position ever accepted (none if the child never reported).
    pub(crate) fn missing_event(&self) -> BraceletEvent {
        BraceletEvent::Missing {
            position: self.last_known,
        }
    }
}
