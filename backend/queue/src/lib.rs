//! Work queue transports.
//!
//! - [`amqp`]: RabbitMQ over AMQP 0-9-1, the production transport
//! - [`memory`]: an in-process queue with the same contract

pub mod amqp;
pub mod memory;

pub use amqp::{AmqpConsumer, AmqpPublisher, AmqpSettings};
pub use memory::{MemoryConsumer, MemoryQueue};
