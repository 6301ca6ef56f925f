pub mod span;
pub mod trace;

pub use span::{Attributes, SpanEvent, SpanRecord};
pub use trace::{DependencyLink, Trace};
