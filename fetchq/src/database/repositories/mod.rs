//! Repository traits and sqlx implementations.

pub mod settings;
pub mod transfer;

pub use settings::{SettingsRepository, SqlxSettingsRepository};
pub use transfer::{SqlxTransferRepository, TransferRepository};
