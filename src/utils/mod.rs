pub mod backoff;
pub mod error;
pub mod logger;
pub mod scheduler;
