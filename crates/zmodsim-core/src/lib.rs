//! Modbus TCP slave simulator core.
//!
//! This crate provides:
//! - [`frame`] MBAP/PDU wire codec
//! - [`store`] bounded, type-partitioned register banks with serialized access
//! - [`protocol`] function-code dispatch, validation, and exception mapping
//! - [`autoincrement`] background workers that mutate a configured register subset
//! - [`server`] the TCP listener and per-connection client handler
//! - [`supervisor`] process lifecycle: start workers and listener, join on shutdown

pub mod autoincrement;
pub mod frame;
pub mod protocol;
pub mod server;
pub mod store;
pub mod supervisor;

pub use frame::MbapHeader;
pub use protocol::Engine;
pub use store::RegisterStore;
pub use supervisor::Supervisor;
