#![forbid(unsafe_code)]

pub mod repository;
pub mod sqlite;

pub use repository::{
    HistoryEntry, HistoryRow, InMemoryRepository, SessionHistoryRepository, Storage, StorageError,
};
