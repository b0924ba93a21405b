//! Correlation broker: request/reply over topic-based pub/sub.
//!
//! A [`CorrelationBroker`] publishes each `DispatchRequest` keyed by its
//! trace id and blocks the caller on a per-trace single-slot channel until
//! the matching `DispatchResponse` arrives on the response topic or the
//! timeout fires.

pub mod broker;
pub mod error;
pub mod memory;
pub mod registry;
pub mod transport;

pub use {
    broker::{BrokerConfig, CorrelationBroker},
    error::{Error, Result},
    memory::MemoryBus,
    registry::{Delivery, Waiter, WaiterRegistry},
    transport::{PayloadStream, PubSubTransport},
};
