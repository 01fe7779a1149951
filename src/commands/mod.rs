pub mod migration;

pub use migration::MigrationService;
