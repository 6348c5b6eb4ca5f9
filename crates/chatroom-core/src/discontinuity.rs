//! Discontinuity fan-out.
//!
//! A discontinuity means the channel re-attached without resuming, so events
//! published during the gap may have been missed. Features subscribe here to
//! reset their cursors; applications subscribe through
//! [`Room::on_discontinuity`](crate::Room::on_discontinuity) to refetch state.

use std::fmt;

use crate::{
    error::{ErrorCode, ErrorInfo},
    listeners::{Listeners, Subscription},
};

/// Notification that a continuity break was detected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscontinuityEvent {
    /// Marker error whose cause is the reason reported by the channel.
    pub error: ErrorInfo,
}

/// Emits discontinuity events to subscribed features and applications.
pub struct DiscontinuityEmitter {
    listeners: Listeners<DiscontinuityEvent>,
}

impl DiscontinuityEmitter {
    /// Create an emitter with no listeners.
    pub fn new() -> Self {
        Self { listeners: Listeners::new() }
    }

    /// Register a listener.
    pub fn on(
        &self,
        listener: impl Fn(&DiscontinuityEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.listeners.add(listener)
    }

    /// Emit a discontinuity, wrapping `reason` in a "discontinuity detected"
    /// marker.
    pub fn emit(&self, reason: Option<ErrorInfo>) {
        let marker = ErrorInfo::from_code(ErrorCode::RoomDiscontinuity, "discontinuity detected");
        let error = match reason {
            Some(reason) => marker.with_cause(reason),
            None => marker,
        };

        tracing::info!(%error, listeners = self.listeners.len(), "discontinuity detected");
        self.listeners.emit(&DiscontinuityEvent { error });
    }

    /// Remove every listener.
    pub fn off_all(&self) {
        self.listeners.clear();
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl Default for DiscontinuityEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DiscontinuityEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscontinuityEmitter").field("listeners", &self.listeners.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;

    #[test]
    fn emit_wraps_reason() {
        let emitter = DiscontinuityEmitter::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let _sub = emitter.on(move |event| s.lock().push(event.clone()));

        emitter.emit(Some(ErrorInfo::new(80_002, 500, "connection lost")));

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].error.code, ErrorCode::RoomDiscontinuity.as_u32());
        assert_eq!(seen[0].error.message, "discontinuity detected");
        assert_eq!(seen[0].error.cause.as_ref().map(|c| c.code), Some(80_002));
    }

    #[test]
    fn emit_without_reason_has_no_cause() {
        let emitter = DiscontinuityEmitter::new();
        let seen = Arc::new(Mutex::new(None));
        let s = Arc::clone(&seen);
        let _sub = emitter.on(move |event| *s.lock() = Some(event.error.clone()));

        emitter.emit(None);

        assert!(seen.lock().as_ref().is_some_and(|e| e.cause.is_none()));
    }

    #[test]
    fn off_all_silences_listeners() {
        let emitter = DiscontinuityEmitter::new();
        let seen = Arc::new(Mutex::new(0));
        let s = Arc::clone(&seen);
        let _sub = emitter.on(move |_| *s.lock() += 1);

        emitter.off_all();
        emitter.emit(None);

        assert_eq!(*seen.lock(), 0);
        assert_eq!(emitter.listener_count(), 0);
    }
}
