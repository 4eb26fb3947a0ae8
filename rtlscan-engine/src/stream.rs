use flume::{Receiver, RecvError, RecvTimeoutError, TryRecvError};
use rtlscan_messages::StatusEvent;
use std::time::Duration;

/// Events of one sweep, ending with its terminal event.
#[derive(Debug)]
pub struct EventStream {
    event_rx: Receiver<StatusEvent>,
    ended: bool,
}

impl EventStream {
    pub(crate) fn new(event_rx: Receiver<StatusEvent>) -> Self {
        Self {
            event_rx,
            ended: false,
        }
    }

    /// Block for the next event.
    pub fn recv(&mut self) -> Result<StatusEvent, RecvError> {
        let event = self.event_rx.recv()?;
        self.ended |= event.is_terminal();
        Ok(event)
    }

    pub fn recv_timeout(&mut self, timeout: Duration) -> Result<StatusEvent, RecvTimeoutError> {
        let event = self.event_rx.recv_timeout(timeout)?;
        self.ended |= event.is_terminal();
        Ok(event)
    }

    pub fn try_recv(&mut self) -> Result<StatusEvent, TryRecvError> {
        let event = self.event_rx.try_recv()?;
        self.ended |= event.is_terminal();
        Ok(event)
    }

    /// Whether the terminal event has been received.
    pub fn is_ended(&self) -> bool {
        self.ended
    }
}

impl Iterator for EventStream {
    type Item = StatusEvent;

    fn next(&mut self) -> Option<StatusEvent> {
        if self.ended {
            return None;
        }
        self.recv().ok()
    }
}
