//! Delivery of evaluation events to the application.
use crate::EvaluationEvent;

/// A trait for handing evaluation events to your analytics pipeline. Implementations own
/// batching, flushing and delivery.
pub trait EventProcessor {
    /// Accepts an evaluation event.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use flagsync::{EventProcessor, EvaluationEvent};
    /// struct MyEventProcessor;
    ///
    /// impl EventProcessor for MyEventProcessor {
    ///     fn send_event(&self, event: EvaluationEvent) {
    ///         // Queue the event for delivery here
    ///     }
    /// }
    /// ```
    ///
    /// # Notes
    ///
    /// This method is called before the evaluated value is returned to the caller, so it should
    /// not block the calling thread. It should not panic either.
    fn send_event(&self, event: EvaluationEvent);
}

pub(crate) struct NoopEventProcessor;
impl EventProcessor for NoopEventProcessor {
    fn send_event(&self, _event: EvaluationEvent) {}
}

impl<T: Fn(EvaluationEvent)> EventProcessor for T {
    fn send_event(&self, event: EvaluationEvent) {
        self(event);
    }
}
