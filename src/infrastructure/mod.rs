pub mod block_store;
pub mod config;
pub mod error;
pub mod rest_block_store;
pub mod sqlite_block_store;
pub mod storage;
