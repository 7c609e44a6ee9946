//! Demo order-processing service built on the quiesce shutdown core.

pub mod http;
pub mod ids;
pub mod orders;
