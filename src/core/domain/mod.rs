pub mod broadcaster;
pub mod donor;
pub mod gift;
pub mod source_event;
