//! StreamGrid core: a multi-stream viewing grid.
//!
//! Stream classification, grid geometry and placement, the player pool, the
//! debounced edit/save pipeline and saved-grid storage. `session` ties them
//! into one event loop that a host UI drives through `protocol`.

pub mod classify;
pub mod config;
pub mod coordinator;
pub mod debounce;
pub mod error;
pub mod exchange;
pub mod geometry;
pub mod model;
pub mod network;
pub mod placement;
pub mod platform;
pub mod pool;
pub mod protocol;
pub mod repository;
pub mod session;
pub mod storage;
pub mod store;
