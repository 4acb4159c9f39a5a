//! Statement interception for migrating tables.

use std::sync::Arc;

use shiftdb_proto::Statement;

use super::router::{SourceRef, TableRoute, TableRouter};

/// A statement tagged with how it must execute.
#[derive(Debug, Clone)]
pub enum RoutedStatement {
    /// The table is not migrating; run the statement as written.
    Direct(Statement),
    /// A read against a migrating table; serve it from the union of
    /// destination and source.
    UnionRead {
        /// The original statement.
        statement: Statement,
        /// Where unmigrated rows still live.
        source: SourceRef,
    },
    /// A write against a migrating table; apply it to the destination
    /// and consume any stale source copy.
    WriteThrough {
        /// The original statement.
        statement: Statement,
        /// Where stale copies may still live.
        source: SourceRef,
    },
}

/// Decides per statement whether migration handling applies.
///
/// Interception is pure rewriting: it consults the router and tags the
/// statement, but never touches storage itself.
#[derive(Debug, Clone)]
pub struct QueryInterceptor {
    router: Arc<TableRouter>,
}

impl QueryInterceptor {
    /// Create an interceptor over the shared routing table.
    pub fn new(router: Arc<TableRouter>) -> Self {
        Self { router }
    }

    /// Cheap check for the common case of a non-migrating table.
    pub fn needs_rewrite(&self, statement: &Statement) -> bool {
        !self.router.is_direct(statement.table())
    }

    /// Tag a statement with its execution route.
    pub fn rewrite(&self, statement: Statement) -> RoutedStatement {
        match self.router.route(statement.table()) {
            TableRoute::Direct => RoutedStatement::Direct(statement),
            TableRoute::UnionWithSource(source) => {
                if statement.is_read() {
                    RoutedStatement::UnionRead { statement, source }
                } else {
                    RoutedStatement::WriteThrough { statement, source }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Database, DatabaseConfig};
    use shiftdb_proto::{Delete, Insert, Select, Value};

    fn union_router(table: &str, source_table: &str) -> Arc<TableRouter> {
        let router = Arc::new(TableRouter::new());
        let database = Arc::new(Database::open(DatabaseConfig::temporary()).unwrap());
        router.set_route(
            table,
            TableRoute::UnionWithSource(SourceRef {
                database,
                table: source_table.to_string(),
            }),
        );
        router
    }

    #[test]
    fn test_direct_tables_pass_through() {
        let interceptor = QueryInterceptor::new(Arc::new(TableRouter::new()));
        let statement = Statement::from(Select::new("accounts"));
        assert!(!interceptor.needs_rewrite(&statement));
        assert!(matches!(
            interceptor.rewrite(statement),
            RoutedStatement::Direct(_)
        ));
    }

    #[test]
    fn test_reads_become_union_reads() {
        let interceptor = QueryInterceptor::new(union_router("accounts", "accounts_old"));
        let statement = Statement::from(Select::new("accounts").with_key(Value::Integer(1)));
        assert!(interceptor.needs_rewrite(&statement));
        match interceptor.rewrite(statement) {
            RoutedStatement::UnionRead { source, .. } => {
                assert_eq!(source.table, "accounts_old");
            }
            other => panic!("expected a union read, got {other:?}"),
        }
    }

    #[test]
    fn test_writes_become_write_through() {
        let interceptor = QueryInterceptor::new(union_router("accounts", "accounts_old"));
        let insert = Statement::from(Insert::new("accounts").with_row(vec![Value::Integer(1)]));
        assert!(matches!(
            interceptor.rewrite(insert),
            RoutedStatement::WriteThrough { .. }
        ));
        let delete = Statement::from(Delete::new("accounts", Value::Integer(1)));
        assert!(matches!(
            interceptor.rewrite(delete),
            RoutedStatement::WriteThrough { .. }
        ));
    }

    #[test]
    fn test_untouched_tables_stay_direct_alongside_unions() {
        let interceptor = QueryInterceptor::new(union_router("accounts", "accounts_old"));
        let statement = Statement::from(Select::new("orders"));
        assert!(!interceptor.needs_rewrite(&statement));
    }
}
