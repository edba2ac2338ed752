//! Pipeline services: the generator invoker, both sinks, the dual-write
//! check, and the orchestrator that ties them together.

pub mod consistency;
pub mod database_sink;
pub mod file_sink;
pub mod generator;
pub mod pipeline;
