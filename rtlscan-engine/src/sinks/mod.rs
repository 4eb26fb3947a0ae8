//! Where status events go.
//!
//! The engine only ever pushes into an [`EventSink`]; the caller decides
//! whether that is a channel it polls or a bridge into a GUI event loop.

mod callback;
mod channel;

pub use callback::CallbackSink;
pub use channel::ChannelSink;

use rtlscan_messages::StatusEvent;

pub trait EventSink: Send + Sync {
    /// Deliver an event. Returns `false` once nobody is listening any more.
    fn push(&self, event: StatusEvent) -> bool;
}

impl<T: EventSink + ?Sized> EventSink for std::sync::Arc<T> {
    fn push(&self, event: StatusEvent) -> bool {
        (**self).push(event)
    }
}
