//! Row mapping and Avro encoding.

mod avro;
mod schema;

pub use avro::RowMapper;
pub use schema::{DEFAULT_TIMESTAMP_FORMAT, FieldConfig, FieldType, SchemaConfig};
