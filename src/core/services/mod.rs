pub mod aggregator;
pub mod fanout_hub;
pub mod listener_registry;
pub mod listener_supervisor;
