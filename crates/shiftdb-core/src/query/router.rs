//! Per-table routing state.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::storage::Database;

/// Where a migrating table's unmigrated rows still live.
#[derive(Clone)]
pub struct SourceRef {
    /// Database holding the source table. May be the destination
    /// database itself or a separately opened file.
    pub database: Arc<Database>,
    /// Source table name inside that database.
    pub table: String,
}

impl fmt::Debug for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceRef")
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

/// How statements against a table should execute.
#[derive(Debug, Clone, Default)]
pub enum TableRoute {
    /// The table is not migrating; execute against it directly.
    #[default]
    Direct,
    /// The table is migrating; reads union the destination with the
    /// source, writes go to the destination and consume stale source
    /// copies.
    UnionWithSource(SourceRef),
}

impl TableRoute {
    /// Whether this route bypasses migration handling.
    pub fn is_direct(&self) -> bool {
        matches!(self, TableRoute::Direct)
    }
}

/// Shared map from table name to its current route.
///
/// The dispatcher flips routes as migrations register and finish;
/// statement execution reads them. Tables without an entry are direct.
#[derive(Debug, Default)]
pub struct TableRouter {
    routes: DashMap<String, TableRoute>,
}

impl TableRouter {
    /// Create a router with every table direct.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current route for a table.
    pub fn route(&self, table: &str) -> TableRoute {
        self.routes
            .get(table)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// Whether statements against `table` can skip migration handling.
    pub fn is_direct(&self, table: &str) -> bool {
        self.routes
            .get(table)
            .map_or(true, |entry| entry.value().is_direct())
    }

    pub(crate) fn set_route(&self, table: &str, route: TableRoute) {
        debug!(table = %table, direct = route.is_direct(), "Table route changed");
        self.routes.insert(table.to_string(), route);
    }
}
