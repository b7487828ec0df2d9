//! Row to Avro datum, and back.

use apache_avro::types::Value;
use apache_avro::{Schema, from_avro_datum, to_avro_datum};
use chrono::NaiveDateTime;
use serde_json::json;
use sluice_core::emit;
use sluice_core::metrics::events::RowMappingDefaulted;
use snafu::prelude::*;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tracing::warn;

use super::schema::{FieldConfig, FieldType, SchemaConfig};
use crate::error::{DecodeSnafu, EncodeSnafu, MappingError, SchemaSnafu};
use crate::source::Row;

/// Converts rows into Avro records for one schema.
#[derive(Debug, Clone)]
pub struct RowMapper {
    config: SchemaConfig,
    schema: Schema,
}

impl RowMapper {
    pub fn new(config: SchemaConfig) -> Result<Self, MappingError> {
        let schema = Schema::parse(&schema_json(&config)).context(SchemaSnafu)?;
        Ok(Self { config, schema })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Build the record for `row`, column by column.
    ///
    /// Missing or empty cells are null. Cells that fail to parse are replaced by
    /// the type's zero value (`0`, or `0.0.0.0` for addresses) and logged.
    pub fn map_row(&self, row: &Row) -> Value {
        let fields = self
            .config
            .fields
            .iter()
            .enumerate()
            .map(|(index, field)| (field.name.clone(), self.convert(field, row.get(index))))
            .collect();
        Value::Record(fields)
    }

    /// Map `row` and serialize it as a bare Avro datum.
    pub fn encode(&self, row: &Row) -> Result<Vec<u8>, MappingError> {
        to_avro_datum(&self.schema, self.map_row(row)).context(EncodeSnafu)
    }

    /// Deserialize a datum into CSV cells in schema order.
    ///
    /// The payload must be exactly one datum in its canonical encoding: trailing
    /// bytes, or bytes the reader skipped over leniently, are rejected.
    pub fn decode(&self, payload: &[u8]) -> Result<Vec<String>, MappingError> {
        let mut remaining = payload;
        let value = from_avro_datum(&self.schema, &mut remaining, None).context(DecodeSnafu)?;
        if !remaining.is_empty() {
            return Err(MappingError::Corrupt {
                message: format!("{} trailing bytes after datum", remaining.len()),
            });
        }
        let canonical = to_avro_datum(&self.schema, value.clone()).context(EncodeSnafu)?;
        if canonical != payload {
            return Err(MappingError::Corrupt {
                message: "datum does not re-encode to the same bytes".to_string(),
            });
        }

        let Value::Record(fields) = value else {
            return Err(MappingError::UnexpectedValue {
                field: self.config.name.clone(),
                message: format!("expected a record, got {value:?}"),
            });
        };

        fields
            .iter()
            .map(|(name, value)| {
                render(value).ok_or_else(|| MappingError::UnexpectedValue {
                    field: name.clone(),
                    message: format!("{value:?}"),
                })
            })
            .collect()
    }

    fn convert(&self, field: &FieldConfig, cell: Option<&str>) -> Value {
        let value = match cell.filter(|cell| !cell.is_empty()) {
            None if field.nullable => return Value::Union(0, Box::new(Value::Null)),
            None => zero(field.field_type),
            Some(text) => self.parse(field, text),
        };
        if field.nullable {
            Value::Union(1, Box::new(value))
        } else {
            value
        }
    }

    fn parse(&self, field: &FieldConfig, text: &str) -> Value {
        let parsed = match field.field_type {
            FieldType::Timestamp => NaiveDateTime::parse_from_str(text, &self.config.timestamp_format)
                .map(|t| Value::Long(t.and_utc().timestamp()))
                .map_err(|e| e.to_string()),
            FieldType::Long => text.parse::<i64>().map(Value::Long).map_err(|e| e.to_string()),
            FieldType::Int => text.parse::<i32>().map(Value::Int).map_err(|e| e.to_string()),
            FieldType::String => Ok(Value::String(text.to_string())),
            FieldType::Ip => text
                .parse::<IpAddr>()
                .map(|ip| Value::Bytes(ip_octets(ip)))
                .map_err(|e| e.to_string()),
        };

        parsed.unwrap_or_else(|error| {
            warn!(field = %field.name, value = text, %error, "Unparseable value, using default");
            emit!(RowMappingDefaulted {
                field: field.name.clone(),
            });
            zero(field.field_type)
        })
    }
}

fn schema_json(config: &SchemaConfig) -> serde_json::Value {
    let fields: Vec<_> = config
        .fields
        .iter()
        .map(|field| {
            let avro_type = field.field_type.avro_type();
            if field.nullable {
                json!({ "name": field.name, "type": ["null", avro_type] })
            } else {
                json!({ "name": field.name, "type": avro_type })
            }
        })
        .collect();

    json!({
        "type": "record",
        "name": config.name,
        "fields": fields,
    })
}

fn zero(field_type: FieldType) -> Value {
    match field_type {
        FieldType::Timestamp | FieldType::Long => Value::Long(0),
        FieldType::Int => Value::Int(0),
        FieldType::String => Value::String(String::new()),
        FieldType::Ip => Value::Bytes(vec![0; 4]),
    }
}

fn ip_octets(ip: IpAddr) -> Vec<u8> {
    match ip {
        IpAddr::V4(v4) => v4.octets().to_vec(),
        IpAddr::V6(v6) => v6.octets().to_vec(),
    }
}

fn render(value: &Value) -> Option<String> {
    match value {
        Value::Null => Some(String::new()),
        Value::Union(_, inner) => render(inner),
        Value::Long(v) => Some(v.to_string()),
        Value::Int(v) => Some(v.to_string()),
        Value::String(s) => Some(s.clone()),
        Value::Bytes(octets) => match octets.len() {
            4 => <[u8; 4]>::try_from(octets.as_slice())
                .ok()
                .map(|o| Ipv4Addr::from(o).to_string()),
            16 => <[u8; 16]>::try_from(octets.as_slice())
                .ok()
                .map(|o| Ipv6Addr::from(o).to_canonical().to_string()),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hits() -> RowMapper {
        sluice_core::metrics::init_test();
        RowMapper::new(SchemaConfig::default()).unwrap()
    }

    fn field(value: &Value, name: &str) -> Value {
        let Value::Record(fields) = value else {
            panic!("expected record");
        };
        fields.iter().find(|(n, _)| n == name).unwrap().1.clone()
    }

    #[test]
    fn test_hits_row_maps_to_unix_seconds() {
        let mapper = hits();
        let row: Row = ["01/02/20-03:04:05", "01/02/20-04:05:06", "5551234567"].into_iter().collect();

        let value = mapper.map_row(&row);
        assert_eq!(field(&value, "start_time"), Value::Union(1, Box::new(Value::Long(1577934245))));
        assert_eq!(field(&value, "end_time"), Value::Union(1, Box::new(Value::Long(1577937906))));
        assert_eq!(field(&value, "mobile_phone"), Value::Union(1, Box::new(Value::Long(5551234567))));
    }

    #[test]
    fn test_short_row_leaves_trailing_fields_null() {
        let mapper = hits();
        let row: Row = ["01/02/20-03:04:05"].into_iter().collect();

        let value = mapper.map_row(&row);
        assert_eq!(field(&value, "end_time"), Value::Union(0, Box::new(Value::Null)));
        assert_eq!(field(&value, "mobile_phone"), Value::Union(0, Box::new(Value::Null)));
    }

    #[test]
    fn test_unparseable_values_fall_back_to_zero() {
        let mapper = hits();
        let row: Row = ["yesterday", "", "not-a-number"].into_iter().collect();

        let value = mapper.map_row(&row);
        assert_eq!(field(&value, "start_time"), Value::Union(1, Box::new(Value::Long(0))));
        assert_eq!(field(&value, "end_time"), Value::Union(0, Box::new(Value::Null)));
        assert_eq!(field(&value, "mobile_phone"), Value::Union(1, Box::new(Value::Long(0))));
    }

    #[test]
    fn test_encode_then_decode_gives_csv_cells() {
        let mapper = hits();
        let row: Row = ["01/02/20-03:04:05", "", "5551234567"].into_iter().collect();

        let payload = mapper.encode(&row).unwrap();
        assert_eq!(mapper.decode(&payload).unwrap(), vec!["1577934245", "", "5551234567"]);
    }

    #[test]
    fn test_non_nullable_and_ip_fields() {
        sluice_core::metrics::init_test();
        let mapper = RowMapper::new(SchemaConfig {
            name: "sessions".to_string(),
            fields: vec![
                FieldConfig {
                    nullable: false,
                    ..FieldConfig::new("client", FieldType::Ip)
                },
                FieldConfig::new("peer", FieldType::Ip),
                FieldConfig {
                    nullable: false,
                    ..FieldConfig::new("port", FieldType::Int)
                },
                FieldConfig::new("note", FieldType::String),
            ],
            ..SchemaConfig::default()
        })
        .unwrap();

        let row: Row = ["10.1.2.3", "::1", "", "hello"].into_iter().collect();
        let payload = mapper.encode(&row).unwrap();
        assert_eq!(mapper.decode(&payload).unwrap(), vec!["10.1.2.3", "::1", "0", "hello"]);

        let bad: Row = ["nonsense"].into_iter().collect();
        let payload = mapper.encode(&bad).unwrap();
        assert_eq!(mapper.decode(&payload).unwrap(), vec!["0.0.0.0", "", "0", ""]);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let mapper = hits();
        assert!(mapper.decode(&[0xff, 0xff, 0xff]).is_err());
        assert!(mapper.decode(&[]).is_err());
    }

    #[test]
    fn test_decode_rejects_trailing_bytes() {
        let mapper = hits();
        let row: Row = ["", "", "7"].into_iter().collect();
        let mut payload = mapper.encode(&row).unwrap();
        assert_eq!(mapper.decode(&payload).unwrap(), vec!["", "", "7"]);

        payload.extend_from_slice(&[0xde, 0xad]);
        assert!(matches!(mapper.decode(&payload), Err(MappingError::Corrupt { .. })));
    }
}
