pub mod local;
pub mod migration;
