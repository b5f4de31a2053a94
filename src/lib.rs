pub mod aggregator;
pub mod banner;
pub mod config;
pub mod consts;
pub mod error;
pub mod provider;
pub mod queue;
pub mod resilience;
pub mod server;
pub mod store;
pub mod types;
pub mod worker;
