pub mod items;
pub mod migrations;
pub mod passwords;
pub mod verifications;
