//! Table schemas and the registry that persists them.

mod registry;
mod table;

pub use registry::SchemaRegistry;
pub use table::{ColumnDef, ColumnType, TableDef};
