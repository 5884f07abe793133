pub mod api;
pub mod event_source;
pub mod storage;
