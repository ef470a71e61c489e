pub mod caller;
pub mod metrics;
