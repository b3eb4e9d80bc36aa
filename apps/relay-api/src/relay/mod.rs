pub mod chat;
pub mod registry;
pub mod server;
pub mod service;
