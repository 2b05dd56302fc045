pub mod driver;
pub mod error;
pub mod filter;
pub mod schema;
pub mod store;
pub mod translate;
pub mod types;

pub use driver::{Driver, SqliteDriver};
pub use error::{FieldStoreError, Result};
pub use filter::{parse, Predicate};
pub use schema::{CollectionDefinition, FieldDefinition, SchemaSnapshot};
pub use store::{Order, Query, Record, Rows, Store};
pub use translate::{translate, SqlFragment};
pub use types::{Dialect, FieldType, ScalarType, Value};
