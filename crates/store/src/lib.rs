pub mod assemble;
pub mod context;
pub mod db;
pub mod dialect;
pub mod memory;
pub mod planner;
pub mod pool;
pub mod predicate;
pub mod reader;
pub mod row;
pub mod schema;
pub mod service;
pub mod sql;

pub use context::{CancelHandle, RequestContext};
pub use db::DuckStore;
pub use dialect::Dialect;
pub use memory::MemoryStore;
pub use pool::PoolOptions;
pub use reader::{SpanStore, TraceSearch};
pub use row::SpanRow;
pub use service::TraceReader;
