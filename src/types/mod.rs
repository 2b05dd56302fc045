use crate::error::{FieldStoreError, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Scalar logical types. List fields are lists of one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarType {
    String,
    Int,
    Float,
    Boolean,
    Datetime,
    Blob,
}

/// Logical field type enumeration. The schema store persists these as text
/// tags ("string", "list_int", ...) and the translator maps them to backend
/// column types per dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Scalar(ScalarType),
    List(ScalarType),
}

impl FieldType {
    pub const STRING: FieldType = FieldType::Scalar(ScalarType::String);
    pub const INT: FieldType = FieldType::Scalar(ScalarType::Int);
    pub const FLOAT: FieldType = FieldType::Scalar(ScalarType::Float);
    pub const BOOLEAN: FieldType = FieldType::Scalar(ScalarType::Boolean);
    pub const DATETIME: FieldType = FieldType::Scalar(ScalarType::Datetime);
    pub const BLOB: FieldType = FieldType::Scalar(ScalarType::Blob);

    /// Stable text tag used in the `_fields` meta table.
    pub fn tag(&self) -> String {
        match self {
            FieldType::Scalar(s) => scalar_tag(*s).to_string(),
            FieldType::List(s) => format!("list_{}", scalar_tag(*s)),
        }
    }

    /// Parse a text tag back into a field type. Unknown tags are the one
    /// place `UnsupportedType` can surface from persisted state.
    pub fn from_tag(tag: &str) -> Result<FieldType> {
        if let Some(item) = tag.strip_prefix("list_") {
            return Ok(FieldType::List(scalar_from_tag(item)?));
        }
        Ok(FieldType::Scalar(scalar_from_tag(tag)?))
    }

    pub fn is_list(&self) -> bool {
        matches!(self, FieldType::List(_))
    }

    /// Backend column type for this logical type.
    pub fn column_type(&self, dialect: Dialect) -> &'static str {
        match (self, dialect) {
            (FieldType::List(_), Dialect::Sqlite) => "TEXT",
            (FieldType::List(_), Dialect::Postgres) => "JSONB",
            (FieldType::Scalar(s), d) => scalar_column_type(*s, d),
        }
    }
}

impl Serialize for FieldType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.tag())
    }
}

impl<'de> Deserialize<'de> for FieldType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        FieldType::from_tag(&tag).map_err(serde::de::Error::custom)
    }
}

fn scalar_tag(s: ScalarType) -> &'static str {
    match s {
        ScalarType::String => "string",
        ScalarType::Int => "int",
        ScalarType::Float => "float",
        ScalarType::Boolean => "boolean",
        ScalarType::Datetime => "datetime",
        ScalarType::Blob => "blob",
    }
}

fn scalar_from_tag(tag: &str) -> Result<ScalarType> {
    match tag {
        "string" => Ok(ScalarType::String),
        "int" => Ok(ScalarType::Int),
        "float" => Ok(ScalarType::Float),
        "boolean" => Ok(ScalarType::Boolean),
        "datetime" => Ok(ScalarType::Datetime),
        "blob" => Ok(ScalarType::Blob),
        other => Err(FieldStoreError::UnsupportedType(other.to_string())),
    }
}

fn scalar_column_type(s: ScalarType, dialect: Dialect) -> &'static str {
    match (s, dialect) {
        (ScalarType::String, _) => "TEXT",
        (ScalarType::Int, Dialect::Sqlite) => "INTEGER",
        (ScalarType::Int, Dialect::Postgres) => "BIGINT",
        (ScalarType::Float, Dialect::Sqlite) => "REAL",
        (ScalarType::Float, Dialect::Postgres) => "DOUBLE PRECISION",
        (ScalarType::Boolean, Dialect::Sqlite) => "INTEGER",
        (ScalarType::Boolean, Dialect::Postgres) => "BOOLEAN",
        (ScalarType::Datetime, Dialect::Sqlite) => "TEXT",
        (ScalarType::Datetime, Dialect::Postgres) => "TIMESTAMP",
        (ScalarType::Blob, Dialect::Sqlite) => "BLOB",
        (ScalarType::Blob, Dialect::Postgres) => "BYTEA",
    }
}

/// SQL dialect of a backend driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Postgres,
}

impl Dialect {
    /// Positional parameter placeholder, 1-based.
    pub fn placeholder(&self, n: usize) -> String {
        match self {
            Dialect::Sqlite => format!("?{n}"),
            Dialect::Postgres => format!("${n}"),
        }
    }
}

/// A runtime value for a field. Every non-null value carries its own type
/// tag so validation is a finite match instead of runtime introspection.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    String(String),
    Int(i64),
    Float(f64),
    Boolean(bool),
    Datetime(NaiveDateTime),
    Blob(Vec<u8>),
    List(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Whether this value is acceptable for a field of the given type.
    /// Null is always acceptable here; nullability is checked separately.
    /// Int values are accepted for float fields (widening only).
    pub fn matches_type(&self, field_type: FieldType) -> bool {
        match (self, field_type) {
            (Value::Null, _) => true,
            (Value::String(_), FieldType::Scalar(ScalarType::String)) => true,
            (Value::Int(_), FieldType::Scalar(ScalarType::Int)) => true,
            (Value::Int(_), FieldType::Scalar(ScalarType::Float)) => true,
            (Value::Float(_), FieldType::Scalar(ScalarType::Float)) => true,
            (Value::Boolean(_), FieldType::Scalar(ScalarType::Boolean)) => true,
            (Value::Datetime(_), FieldType::Scalar(ScalarType::Datetime)) => true,
            (Value::Blob(_), FieldType::Scalar(ScalarType::Blob)) => true,
            (Value::List(items), FieldType::List(item_type)) => items
                .iter()
                .all(|v| !v.is_null() && v.matches_type(FieldType::Scalar(item_type))),
            _ => false,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::String(_) => "string",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Boolean(_) => "boolean",
            Value::Datetime(_) => "datetime",
            Value::Blob(_) => "blob",
            Value::List(_) => "list",
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(dt: NaiveDateTime) -> Self {
        Value::Datetime(dt)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

/// Encode a typed value into the form bound to a SQL parameter.
/// Lists become JSON text (TEXT on SQLite, cast to JSONB on PostgreSQL),
/// datetimes become ISO-8601 text. Scalars pass through.
pub fn encode(field_type: FieldType, value: &Value) -> Result<Value> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    if !value.matches_type(field_type) {
        return Err(FieldStoreError::Validation(format!(
            "value of type {} does not match field type {}",
            value.type_name(),
            field_type.tag()
        )));
    }
    match (field_type, value) {
        (FieldType::List(item_type), Value::List(items)) => {
            let encoded: Vec<serde_json::Value> = items
                .iter()
                .map(|v| scalar_to_json(item_type, v))
                .collect::<Result<_>>()?;
            Ok(Value::String(serde_json::to_string(&encoded)?))
        }
        (FieldType::Scalar(ScalarType::Datetime), Value::Datetime(dt)) => {
            Ok(Value::String(dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string()))
        }
        // Int literal against a float field: widen before binding so both
        // dialects compare as floating point.
        (FieldType::Scalar(ScalarType::Float), Value::Int(n)) => Ok(Value::Float(*n as f64)),
        _ => Ok(value.clone()),
    }
}

/// Decode a raw column value back into a typed value. The raw value is
/// whatever the driver surfaced (Int/Float/String/Blob/Null) with no type
/// information; the field type drives the interpretation.
pub fn decode(field_type: FieldType, raw: Value) -> Result<Value> {
    if raw.is_null() {
        return Ok(Value::Null);
    }
    match field_type {
        FieldType::List(item_type) => {
            let text = match raw {
                Value::String(s) => s,
                other => {
                    return Err(FieldStoreError::Validation(format!(
                        "expected encoded list, got {}",
                        other.type_name()
                    )))
                }
            };
            let parsed: Vec<serde_json::Value> = serde_json::from_str(&text)?;
            let items = parsed
                .into_iter()
                .map(|j| scalar_from_json(item_type, j))
                .collect::<Result<_>>()?;
            Ok(Value::List(items))
        }
        FieldType::Scalar(ScalarType::Boolean) => match raw {
            Value::Boolean(b) => Ok(Value::Boolean(b)),
            Value::Int(n) => Ok(Value::Boolean(n != 0)),
            other => Err(decode_mismatch("boolean", &other)),
        },
        FieldType::Scalar(ScalarType::Datetime) => match raw {
            Value::Datetime(dt) => Ok(Value::Datetime(dt)),
            Value::String(s) => Ok(Value::Datetime(parse_datetime(&s)?)),
            other => Err(decode_mismatch("datetime", &other)),
        },
        FieldType::Scalar(ScalarType::Float) => match raw {
            Value::Float(f) => Ok(Value::Float(f)),
            Value::Int(n) => Ok(Value::Float(n as f64)),
            other => Err(decode_mismatch("float", &other)),
        },
        FieldType::Scalar(ScalarType::Int) => match raw {
            Value::Int(n) => Ok(Value::Int(n)),
            other => Err(decode_mismatch("int", &other)),
        },
        FieldType::Scalar(ScalarType::String) => match raw {
            Value::String(s) => Ok(Value::String(s)),
            other => Err(decode_mismatch("string", &other)),
        },
        FieldType::Scalar(ScalarType::Blob) => match raw {
            Value::Blob(b) => Ok(Value::Blob(b)),
            other => Err(decode_mismatch("blob", &other)),
        },
    }
}

fn decode_mismatch(expected: &str, got: &Value) -> FieldStoreError {
    FieldStoreError::Validation(format!(
        "cannot decode {} column from {} value",
        expected,
        got.type_name()
    ))
}

pub(crate) fn parse_datetime(s: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
        .map_err(|e| FieldStoreError::Validation(format!("invalid datetime '{s}': {e}")))
}

fn scalar_to_json(item_type: ScalarType, value: &Value) -> Result<serde_json::Value> {
    let json = match (item_type, value) {
        (ScalarType::String, Value::String(s)) => serde_json::Value::String(s.clone()),
        (ScalarType::Int, Value::Int(n)) => serde_json::Value::from(*n),
        (ScalarType::Float, Value::Float(f)) => serde_json::Value::from(*f),
        (ScalarType::Float, Value::Int(n)) => serde_json::Value::from(*n as f64),
        (ScalarType::Boolean, Value::Boolean(b)) => serde_json::Value::Bool(*b),
        (ScalarType::Datetime, Value::Datetime(dt)) => {
            serde_json::Value::String(dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
        }
        _ => {
            return Err(FieldStoreError::Validation(format!(
                "list item of type {} does not match item type {}",
                value.type_name(),
                scalar_tag(item_type)
            )))
        }
    };
    Ok(json)
}

fn scalar_from_json(item_type: ScalarType, json: serde_json::Value) -> Result<Value> {
    let value = match (item_type, json) {
        (ScalarType::String, serde_json::Value::String(s)) => Value::String(s),
        (ScalarType::Int, serde_json::Value::Number(n)) => {
            Value::Int(n.as_i64().ok_or_else(|| {
                FieldStoreError::Validation("list item is not an integer".to_string())
            })?)
        }
        (ScalarType::Float, serde_json::Value::Number(n)) => {
            Value::Float(n.as_f64().ok_or_else(|| {
                FieldStoreError::Validation("list item is not a float".to_string())
            })?)
        }
        (ScalarType::Boolean, serde_json::Value::Bool(b)) => Value::Boolean(b),
        (ScalarType::Datetime, serde_json::Value::String(s)) => {
            Value::Datetime(parse_datetime(&s)?)
        }
        (t, other) => {
            return Err(FieldStoreError::Validation(format!(
                "list item {other} does not match item type {}",
                scalar_tag(t)
            )))
        }
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_tag_round_trip() {
        for ft in [
            FieldType::STRING,
            FieldType::INT,
            FieldType::FLOAT,
            FieldType::BOOLEAN,
            FieldType::DATETIME,
            FieldType::BLOB,
            FieldType::List(ScalarType::String),
            FieldType::List(ScalarType::Datetime),
        ] {
            assert_eq!(FieldType::from_tag(&ft.tag()).unwrap(), ft);
        }
    }

    #[test]
    fn test_unknown_tag_rejected() {
        assert!(matches!(
            FieldType::from_tag("decimal"),
            Err(FieldStoreError::UnsupportedType(_))
        ));
        assert!(matches!(
            FieldType::from_tag("list_object"),
            Err(FieldStoreError::UnsupportedType(_))
        ));
    }

    #[test]
    fn test_matches_type() {
        assert!(Value::from("x").matches_type(FieldType::STRING));
        assert!(Value::Int(3).matches_type(FieldType::INT));
        assert!(Value::Int(3).matches_type(FieldType::FLOAT));
        assert!(!Value::Float(3.0).matches_type(FieldType::INT));
        assert!(Value::Null.matches_type(FieldType::BOOLEAN));
        assert!(Value::from(vec!["a", "b"]).matches_type(FieldType::List(ScalarType::String)));
        assert!(!Value::from(vec!["a"]).matches_type(FieldType::List(ScalarType::Int)));
    }

    #[test]
    fn test_list_encode_preserves_order() {
        let ft = FieldType::List(ScalarType::String);
        let value = Value::from(vec!["x", "y", "z"]);
        let encoded = encode(ft, &value).unwrap();
        assert_eq!(encoded, Value::String("[\"x\",\"y\",\"z\"]".to_string()));
        assert_eq!(decode(ft, encoded).unwrap(), value);
    }

    #[test]
    fn test_datetime_round_trip() {
        let dt = NaiveDate::from_ymd_opt(2018, 5, 23)
            .unwrap()
            .and_hms_micro_opt(12, 41, 33, 540)
            .unwrap();
        let encoded = encode(FieldType::DATETIME, &Value::Datetime(dt)).unwrap();
        assert_eq!(decode(FieldType::DATETIME, encoded).unwrap(), Value::Datetime(dt));
    }

    #[test]
    fn test_encode_widens_int_for_float_field() {
        assert_eq!(
            encode(FieldType::FLOAT, &Value::Int(4)).unwrap(),
            Value::Float(4.0)
        );
    }

    #[test]
    fn test_encode_rejects_mismatch() {
        assert!(matches!(
            encode(FieldType::INT, &Value::from("nope")),
            Err(FieldStoreError::Validation(_))
        ));
    }

    #[test]
    fn test_boolean_decodes_from_integer() {
        assert_eq!(
            decode(FieldType::BOOLEAN, Value::Int(1)).unwrap(),
            Value::Boolean(true)
        );
        assert_eq!(
            decode(FieldType::BOOLEAN, Value::Int(0)).unwrap(),
            Value::Boolean(false)
        );
    }

    #[test]
    fn test_column_types() {
        assert_eq!(FieldType::INT.column_type(Dialect::Sqlite), "INTEGER");
        assert_eq!(FieldType::INT.column_type(Dialect::Postgres), "BIGINT");
        assert_eq!(
            FieldType::List(ScalarType::String).column_type(Dialect::Sqlite),
            "TEXT"
        );
        assert_eq!(
            FieldType::List(ScalarType::String).column_type(Dialect::Postgres),
            "JSONB"
        );
    }
}
