pub mod memory_storage;
