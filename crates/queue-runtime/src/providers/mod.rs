//! Queue provider implementations.
//!
//! This module contains concrete implementations of the `QueueProvider` and
//! `MessageReceiver` traits for the supported brokers.

pub mod azure;
pub mod memory;

pub use azure::AzureServiceBusProvider;
pub use memory::InMemoryProvider;
