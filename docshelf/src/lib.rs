pub mod codec;
pub mod document;
pub mod error;
pub mod options;
pub mod query;
pub mod schema;
pub mod store;
pub mod system_db;
pub mod validation;

pub use codec::{Codec, Compression};
pub use document::{Document, Record, Value};
pub use error::{DocShelfError, Result};
pub use options::{IdStrategy, StoreOptions};
pub use query::{compile, Filter};
pub use schema::{parse_schema, parse_schema_str, DefinedType, Field, Schema};
pub use store::{Cursor, Distance, Query, SearchResults, SortOrder, Store};
pub use system_db::SystemDb;
