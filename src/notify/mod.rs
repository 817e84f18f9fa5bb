//! Terminal notifications.
//!
//! Every transfer ends with exactly one event on one of two logical
//! channels: `completed` (payload: the annotated `TransferInfo`) or `error`
//! (payload: a `TransferError`). Events use the Event Grid schema and are
//! also logged under the `transferscan::notify` tracing target.

mod eventgrid;
mod events;
mod memory;
mod publisher;

pub use eventgrid::EventGridPublisher;
pub use events::{
    emit_completed, emit_error, emit_lost, EventEnvelope, EventKind, DATA_VERSION, EVENT_SUBJECT,
};
pub use memory::MemoryPublisher;
pub use publisher::{ChannelEndpoint, Delivery, EventPublisher, NotificationPublisher};
