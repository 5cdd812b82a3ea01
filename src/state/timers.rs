//! Timers owned by a state.

use crate::manager::{TimerHandle, TimerId, TimerKind};

/// The timers a state has armed.
///
/// Dropping the collection cancels everything still in it, so a state that
/// is replaced takes its timers with it.
#[derive(Debug, Default)]
pub struct Timers {
    handles: Vec<TimerHandle>,
}

impl Timers {
    /// Take ownership of a timer.
    pub fn add(&mut self, handle: TimerHandle) {
        self.handles.push(handle);
    }

    /// Number of timers held.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether no timers are held.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Whether this collection holds the timer.
    pub fn contains(&self, id: TimerId) -> bool {
        self.handles.iter().any(|h| h.id() == id)
    }

    /// Record that a timer fired.
    ///
    /// Returns the timer's kind if it is held here. One-shot timers are
    /// released; repeating timers stay.
    pub fn fire(&mut self, id: TimerId) -> Option<TimerKind> {
        let pos = self.handles.iter().position(|h| h.id() == id)?;
        let kind = self.handles[pos].kind();
        if !self.handles[pos].is_repeating() {
            self.handles.remove(pos);
        }
        Some(kind)
    }

    /// Cancel and release every timer.
    pub fn cancel_all(&mut self) {
        for handle in self.handles.drain(..) {
            handle.cancel();
        }
    }
}

impl Drop for Timers {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
