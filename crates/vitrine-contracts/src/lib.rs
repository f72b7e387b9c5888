pub mod chat;
pub mod error;
pub mod events;
pub mod library;
pub mod models;
pub mod runs;
pub mod scene;
pub mod session;
pub mod storage;
