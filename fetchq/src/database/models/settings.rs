//! Settings row models.

use sqlx::FromRow;

/// Row model for the `categories` table: a category name mapped to the
/// directory completed transfers are written into.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct CategoryDbModel {
    pub name: String,
    pub path: String,
}
