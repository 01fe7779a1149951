pub mod auth;
pub mod catalog;
pub mod functions;
pub mod policies;
pub mod secrets;
pub mod settings;
pub mod storage;
