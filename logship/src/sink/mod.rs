mod base;
pub mod clickhouse;
pub mod elasticsearch;
pub mod factory;
pub mod memory;
pub mod postgres;

pub use base::Sink;
