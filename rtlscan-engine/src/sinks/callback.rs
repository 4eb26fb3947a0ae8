use rtlscan_messages::StatusEvent;

use super::EventSink;

/// Hands each event to a closure.
///
/// This is the bridge into GUI toolkits: the closure typically posts the
/// event to the toolkit's own queue and requests a repaint.
pub struct CallbackSink<F> {
    callback: F,
}

impl<F> CallbackSink<F>
where
    F: Fn(StatusEvent) -> bool + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> std::fmt::Debug for CallbackSink<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackSink").finish_non_exhaustive()
    }
}

impl<F> EventSink for CallbackSink<F>
where
    F: Fn(StatusEvent) -> bool + Send + Sync,
{
    fn push(&self, event: StatusEvent) -> bool {
        (self.callback)(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_callback_sink_forwards() {
        let seen = Mutex::new(Vec::new());
        let sink = CallbackSink::new(|event: StatusEvent| {
            seen.lock().unwrap().push(event.is_terminal());
            true
        });

        assert!(sink.push(StatusEvent::Starting));
        assert!(sink.push(StatusEvent::Stopped));
        assert_eq!(*seen.lock().unwrap(), vec![false, true]);
    }
}
