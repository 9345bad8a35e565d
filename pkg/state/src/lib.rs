pub mod client;
pub mod cluster;
pub mod memory;
pub mod registry;
