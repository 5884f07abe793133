pub mod event_source;
pub mod persistence;
pub mod runner;
