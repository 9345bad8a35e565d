pub mod discoverer;
pub mod etcd;
pub mod static_list;

pub use discoverer::{Discoverer, DiscovererFactory, EtcdDiscovererFactory};
pub use etcd::EtcdDiscoverer;
pub use static_list::StaticDiscoverer;
