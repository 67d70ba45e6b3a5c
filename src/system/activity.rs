use parking_lot::{Condvar, Mutex};
use std::time::Instant;

/// Process-wide generation counter bumped on every pipe or event state change.
///
/// Blocking waits snapshot the generation, inspect the state they care about
/// and then sleep until the generation moves. State is always mutated before
/// the bump, so a change that lands between the snapshot and the sleep is never
/// missed.
pub(crate) struct ActivityMonitor {
  generation: Mutex<u64>,
  changed: Condvar,
}

static ACTIVITY: ActivityMonitor = ActivityMonitor {
  generation: parking_lot::const_mutex(0),
  changed: Condvar::new(),
};

pub(crate) fn activity_monitor() -> &'static ActivityMonitor {
  &ACTIVITY
}

impl ActivityMonitor {
  pub fn generation(&self) -> u64 {
    *self.generation.lock()
  }

  pub fn bump(&self) {
    let mut generation = self.generation.lock();
    *generation = generation.wrapping_add(1);
    self.changed.notify_all();
  }

  /// Sleeps until the generation differs from `seen`. Returns `false` if the
  /// deadline passed first.
  pub fn wait_for_change(&self, seen: u64, deadline: Option<Instant>) -> bool {
    let mut generation = self.generation.lock();
    while *generation == seen {
      match deadline {
        None => self.changed.wait(&mut generation),
        Some(deadline) => {
          if self.changed.wait_until(&mut generation, deadline).timed_out() {
            return *generation != seen;
          }
        }
      }
    }
    true
  }
}
