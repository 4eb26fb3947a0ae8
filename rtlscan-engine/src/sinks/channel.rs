use flume::Sender;
use log::debug;
use rtlscan_messages::StatusEvent;

use super::EventSink;

/// Sends events down a flume channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    event_tx: Sender<StatusEvent>,
}

impl ChannelSink {
    pub fn new(event_tx: Sender<StatusEvent>) -> Self {
        Self { event_tx }
    }

    /// A sink plus the unbounded receiver that drains it.
    pub fn unbounded() -> (Self, flume::Receiver<StatusEvent>) {
        let (event_tx, event_rx) = flume::unbounded();
        (Self::new(event_tx), event_rx)
    }
}

impl EventSink for ChannelSink {
    fn push(&self, event: StatusEvent) -> bool {
        // Blocks on a bounded channel, giving backpressure if the caller is behind
        match self.event_tx.send(event) {
            Ok(()) => true,
            Err(_) => {
                debug!("Event receiver gone, dropping event");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_sink_delivers_in_order() {
        let (sink, event_rx) = ChannelSink::unbounded();
        assert!(sink.push(StatusEvent::Starting));
        assert!(sink.push(StatusEvent::Progress(50.0)));

        assert!(matches!(event_rx.try_recv(), Ok(StatusEvent::Starting)));
        assert!(matches!(event_rx.try_recv(), Ok(StatusEvent::Progress(p)) if p == 50.0));
    }

    #[test]
    fn test_channel_sink_reports_disconnect() {
        let (sink, event_rx) = ChannelSink::unbounded();
        drop(event_rx);
        assert!(!sink.push(StatusEvent::Stopped));
    }
}
