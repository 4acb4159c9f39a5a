//! Statement routing and execution.
//!
//! Every statement passes through the interceptor, which consults the
//! router to decide whether the target table is migrating. Direct
//! statements execute as written; statements against migrating tables
//! are rewritten into union reads or write-throughs.

mod executor;
mod interceptor;
mod router;

pub use executor::StatementExecutor;
pub use interceptor::{QueryInterceptor, RoutedStatement};
pub use router::{SourceRef, TableRoute, TableRouter};
