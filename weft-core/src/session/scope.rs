//! Scopes: the engine surface handed to widget code.
//!
//! A [`RenderScope`] is passed to render closures; reads through it are
//! recorded by the dependency tracker and writes feed the current cycle's
//! dirty queue (cascading reactivity). An [`UpdateScope`] is passed to
//! event handlers; reads are untracked since handlers have no dependency
//! set to maintain.

use serde_json::Value;

use crate::error::Result;
use crate::graph::scheduler::DirtyQueue;
use crate::reactive::signal::{SignalId, SignalStore};
use crate::reactive::tracker::DependencyTracker;

/// Signal access for a render closure, with dependency capture.
pub struct RenderScope<'a> {
    signals: &'a mut SignalStore,
    tracker: &'a mut DependencyTracker,
    dirty: &'a mut DirtyQueue,
}

impl<'a> RenderScope<'a> {
    pub(crate) fn new(
        signals: &'a mut SignalStore,
        tracker: &'a mut DependencyTracker,
        dirty: &'a mut DirtyQueue,
    ) -> Self {
        Self {
            signals,
            tracker,
            dirty,
        }
    }

    /// Read a signal, registering the evaluating node as a subscriber.
    pub fn read(&mut self, signal: SignalId) -> Result<Value> {
        if let Some(node) = self.tracker.record(signal) {
            self.signals.subscribe(signal, node)?;
        }
        Ok(self.signals.value(signal)?.clone())
    }

    /// Read a signal without establishing a dependency edge.
    pub fn read_untracked(&self, signal: SignalId) -> Result<Value> {
        Ok(self.signals.value(signal)?.clone())
    }

    /// Write a signal. Woken dependents join the current update cycle.
    pub fn write(&mut self, signal: SignalId, value: Value) -> Result<()> {
        if let Some(woken) = self.signals.set(signal, value)? {
            self.dirty.extend(woken);
        }
        Ok(())
    }
}

/// Signal access for an event handler.
pub struct UpdateScope<'a> {
    signals: &'a mut SignalStore,
    dirty: &'a mut DirtyQueue,
}

impl<'a> UpdateScope<'a> {
    pub(crate) fn new(signals: &'a mut SignalStore, dirty: &'a mut DirtyQueue) -> Self {
        Self { signals, dirty }
    }

    /// Read a signal's current value.
    pub fn read(&self, signal: SignalId) -> Result<Value> {
        Ok(self.signals.value(signal)?.clone())
    }

    /// Write a signal. All writes in one handler batch into a single
    /// recompute pass; dependents observe only the final value.
    pub fn write(&mut self, signal: SignalId, value: Value) -> Result<()> {
        if let Some(woken) = self.signals.set(signal, value)? {
            self.dirty.extend(woken);
        }
        Ok(())
    }
}
