//! Execution engine: transactions, statement execution, relationship resolution.

mod crud;
mod relations;
mod retry;
mod rows;
pub use crud::{CrudService, ListPage};
pub use relations::{Embed, RelationResolver};
pub use retry::{begin, RetryPolicy};
pub use rows::{decode_row, Row};
