//! Adapters implementing the domain ports.

pub mod file_lock;
pub mod in_memory;
pub mod lock;
pub mod log_notifier;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
pub mod whatsapp;
