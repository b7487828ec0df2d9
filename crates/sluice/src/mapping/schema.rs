//! Record layout: which typed field each CSV column becomes.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::ConfigError;

/// Layout used to parse timestamp columns (`MM/DD/YY-hh:mm:ss`, UTC).
pub const DEFAULT_TIMESTAMP_FORMAT: &str = "%m/%d/%y-%H:%M:%S";

/// Supported column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// Parsed with the schema's timestamp format into Unix seconds (Avro `long`).
    Timestamp,
    Long,
    Int,
    String,
    /// IPv4 or IPv6 address as raw octets (Avro `bytes`).
    Ip,
}

impl FieldType {
    pub fn avro_type(&self) -> &'static str {
        match self {
            FieldType::Timestamp | FieldType::Long => "long",
            FieldType::Int => "int",
            FieldType::String => "string",
            FieldType::Ip => "bytes",
        }
    }
}

/// One column of the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Empty cells become null; non-nullable fields get the type's zero value instead.
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

impl FieldConfig {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            nullable: true,
        }
    }
}

/// Positional mapping from CSV columns to a named Avro record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchemaConfig {
    #[serde(default = "default_record_name")]
    pub name: String,
    #[serde(default = "default_fields")]
    pub fields: Vec<FieldConfig>,
    #[serde(default = "default_timestamp_format")]
    pub timestamp_format: String,
}

fn default_record_name() -> String {
    "hits".to_string()
}

/// The call-detail `hits` layout.
fn default_fields() -> Vec<FieldConfig> {
    vec![
        FieldConfig::new("start_time", FieldType::Timestamp),
        FieldConfig::new("end_time", FieldType::Timestamp),
        FieldConfig::new("mobile_phone", FieldType::Long),
    ]
}

fn default_timestamp_format() -> String {
    DEFAULT_TIMESTAMP_FORMAT.to_string()
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            name: default_record_name(),
            fields: default_fields(),
            timestamp_format: default_timestamp_format(),
        }
    }
}

impl SchemaConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fields.is_empty() {
            return Err(ConfigError::EmptySchema);
        }
        let mut seen = HashSet::new();
        for field in &self.fields {
            if !seen.insert(field.name.as_str()) {
                return Err(ConfigError::DuplicateField {
                    name: field.name.clone(),
                });
            }
        }
        Ok(())
    }
}
