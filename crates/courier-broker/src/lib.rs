//! # courier-broker
//!
//! Queue transport for Courier services: a [`Broker`] abstraction with an AMQP
//! implementation (lapin) and an in-process one, plus the correlation RPC
//! client, the matching responder loop and the batch detail fetcher built on
//! top of it.

pub mod amqp;
pub mod batch;
pub mod broker;
pub mod memory;
pub mod responder;
pub mod rpc;

mod error;

pub use amqp::AmqpBroker;
pub use batch::{BatchDetailFetcher, DetailsBatch};
pub use broker::{Broker, Envelope};
pub use error::{BrokerError, RpcError};
pub use memory::MemoryBroker;
pub use rpc::RpcClient;
