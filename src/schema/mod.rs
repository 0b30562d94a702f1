pub mod columns;
pub mod dictionary;

pub use columns::{resolve, resolve_index, ColumnRoles};
pub use dictionary::FieldDictionary;
