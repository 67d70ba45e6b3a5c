use bitflags::bitflags;

bitflags! {
    /// Conditions a handle can be waited on for.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct HandleSignals: u32 {
        /// At least one message is queued for reading.
        const READABLE = 1 << 0;
        /// The peer is open, so writes would be delivered.
        const WRITABLE = 1 << 1;
        /// The peer endpoint has been closed.
        const PEER_CLOSED = 1 << 2;
    }
}

/// Snapshot of which signals are currently satisfied and which could still
/// become satisfied in the future.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HandleSignalsState {
  pub satisfied: HandleSignals,
  pub satisfiable: HandleSignals,
}

impl HandleSignalsState {
  /// `Some(true)` once any of `signals` is satisfied, `Some(false)` if none
  /// of them ever can be, `None` while the caller has to keep waiting.
  pub(crate) fn evaluate(&self, signals: HandleSignals) -> Option<bool> {
    if self.satisfied.intersects(signals) {
      Some(true)
    } else if !self.satisfiable.intersects(signals) {
      Some(false)
    } else {
      None
    }
  }

  pub fn readable(&self) -> bool {
    self.satisfied.contains(HandleSignals::READABLE)
  }

  pub fn peer_closed(&self) -> bool {
    self.satisfied.contains(HandleSignals::PEER_CLOSED)
  }
}
