//! Skill SDK core — payload classification, execution context, dispatch,
//! and handler chaining for event-driven skills on a serverless messaging
//! transport. Hosts register handlers, feed transport envelopes in, and the
//! SDK publishes exactly one status per invocation.

pub mod audit;
pub mod chain;
pub mod clients;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod envelope;
pub mod handler;
pub mod payload;
pub mod steps;
