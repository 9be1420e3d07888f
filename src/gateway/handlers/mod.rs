// Handlers module - edge endpoint handlers

pub mod proxy;

pub use proxy::proxy_handler;
