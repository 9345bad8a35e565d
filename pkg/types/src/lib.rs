pub mod address;
pub mod config;
pub mod endpoint;
pub mod event;
pub mod probe;
pub mod service;
pub mod thirdparty;
