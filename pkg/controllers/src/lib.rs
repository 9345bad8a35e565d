pub mod subset;
pub mod thirdparty;
pub mod tpprobe;

pub use thirdparty::{ReconcileState, ReconcilerConfig, ThirdPartier, ThirdPartySources};
pub use tpprobe::TpProber;
