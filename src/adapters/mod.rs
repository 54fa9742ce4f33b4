//! Adapters: storage, HTTP ingress, and forge clients.

pub mod forge;
pub mod http;
pub mod sqlite;
