//! HTTP ingress adapters.

pub mod webhook;

pub use webhook::{serve, webhook_app};
