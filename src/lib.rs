pub mod catalog;
pub mod clock;
pub mod compactor;
pub mod config;
pub mod console;
pub mod desk;
pub mod dto;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod retry;
pub mod wal;
