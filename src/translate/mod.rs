//! Predicate-to-SQL translation.
//!
//! Walks a parsed predicate tree together with the active schema snapshot
//! and emits a dialect-specific, fully parameterized WHERE fragment.
//! Literals are never interpolated into SQL text. Dialect differences
//! (placeholder style, list containment, boolean binding) are confined to
//! this module and the driver.

use crate::error::{FieldStoreError, Result};
use crate::filter::{CompareOp, FieldRef, Literal, Predicate};
use crate::schema::{quote_ident, FieldDefinition, SchemaSnapshot};
use crate::types::{encode, parse_datetime, Dialect, FieldType, ScalarType, Value};

/// A translated SQL condition plus its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlFragment {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Translate a predicate for a query over `collection`.
/// Parameter placeholders start at 1.
pub fn translate(
    predicate: &Predicate,
    collection: &str,
    snapshot: &SchemaSnapshot,
    dialect: Dialect,
) -> Result<SqlFragment> {
    translate_from(predicate, collection, snapshot, dialect, 0)
}

/// As `translate`, but with placeholders starting after `param_offset`
/// already-bound parameters (used when the condition is appended to a
/// statement that binds its own parameters first).
pub(crate) fn translate_from(
    predicate: &Predicate,
    collection: &str,
    snapshot: &SchemaSnapshot,
    dialect: Dialect,
    param_offset: usize,
) -> Result<SqlFragment> {
    // Verify the collection exists before walking the tree.
    snapshot.collection(collection)?;

    let mut t = Translator {
        collection,
        snapshot,
        dialect,
        params: Vec::new(),
        next_param: param_offset + 1,
    };
    let sql = t.emit(predicate)?;
    log::debug!("translated filter for '{collection}': {sql}");
    Ok(SqlFragment { sql, params: t.params })
}

struct Translator<'a> {
    collection: &'a str,
    snapshot: &'a SchemaSnapshot,
    dialect: Dialect,
    params: Vec<Value>,
    next_param: usize,
}

impl<'a> Translator<'a> {
    fn emit(&mut self, predicate: &Predicate) -> Result<String> {
        match predicate {
            Predicate::All => Ok("1 = 1".to_string()),
            Predicate::Not(inner) => Ok(format!("NOT ({})", self.emit(inner)?)),
            Predicate::And(left, right) => {
                Ok(format!("({} AND {})", self.emit(left)?, self.emit(right)?))
            }
            Predicate::Or(left, right) => {
                Ok(format!("({} OR {})", self.emit(left)?, self.emit(right)?))
            }
            Predicate::Comparison { field, op, literal } => {
                self.emit_comparison(field, *op, literal)
            }
        }
    }

    fn bind(&mut self, value: Value) -> String {
        self.params.push(value);
        let placeholder = self.dialect.placeholder(self.next_param);
        self.next_param += 1;
        placeholder
    }

    fn resolve(&self, field_ref: &FieldRef) -> Result<&'a FieldDefinition> {
        let collection = field_ref.collection.as_deref().unwrap_or(self.collection);
        let field = self.snapshot.resolve(collection, &field_ref.name)?;
        if collection != self.collection {
            return Err(FieldStoreError::Validation(format!(
                "field '{}.{}' does not belong to the queried collection '{}'",
                collection, field_ref.name, self.collection
            )));
        }
        Ok(field)
    }

    fn emit_comparison(
        &mut self,
        field_ref: &FieldRef,
        op: CompareOp,
        literal: &Literal,
    ) -> Result<String> {
        let field = self.resolve(field_ref)?;
        let column = quote_ident(&field.name);

        // NULL comparisons use tri-state SQL semantics.
        if matches!(literal, Literal::Null) {
            return match op {
                CompareOp::Eq => Ok(format!("{column} IS NULL")),
                CompareOp::Ne => Ok(format!("{column} IS NOT NULL")),
                other => Err(FieldStoreError::Validation(format!(
                    "operator {} cannot compare against null",
                    other.symbol()
                ))),
            };
        }

        match op {
            CompareOp::In => self.emit_in(field, &column, literal),
            CompareOp::Contains => self.emit_contains(field, &column, literal),
            CompareOp::Eq | CompareOp::Ne | CompareOp::Lt | CompareOp::Le | CompareOp::Gt
            | CompareOp::Ge => {
                if field.field_type.is_list()
                    && !matches!(op, CompareOp::Eq | CompareOp::Ne)
                {
                    return Err(FieldStoreError::Validation(format!(
                        "operator {} is not defined for list field '{}'",
                        op.symbol(),
                        field.name
                    )));
                }
                let value = coerce_literal(field, literal)?;
                let encoded = encode(field.field_type, &value)?;
                let placeholder = self.bind(encoded);
                Ok(format!("{column} {} {placeholder}", sql_operator(op)))
            }
        }
    }

    /// `field IN [a, b, ...]`. An empty list is always false. A null in
    /// the list additionally matches rows where the field is null.
    fn emit_in(&mut self, field: &FieldDefinition, column: &str, literal: &Literal) -> Result<String> {
        let items = match literal {
            Literal::List(items) => items,
            _ => {
                return Err(FieldStoreError::Validation(
                    "IN requires a list literal".to_string(),
                ))
            }
        };
        if field.field_type.is_list() {
            return Err(FieldStoreError::Validation(format!(
                "IN is not defined for list field '{}'; use CONTAINS",
                field.name
            )));
        }
        if items.is_empty() {
            return Ok("1 = 0".to_string());
        }

        let mut match_null = false;
        let mut placeholders = Vec::new();
        for item in items {
            if matches!(item, Literal::Null) {
                match_null = true;
                continue;
            }
            let value = coerce_literal(field, item)?;
            let encoded = encode(field.field_type, &value)?;
            placeholders.push(self.bind(encoded));
        }

        let condition = if placeholders.is_empty() {
            format!("{column} IS NULL")
        } else {
            let in_clause = format!("{column} IN ({})", placeholders.join(", "));
            if match_null {
                format!("({in_clause} OR {column} IS NULL)")
            } else {
                in_clause
            }
        };
        Ok(condition)
    }

    /// `field CONTAINS x`: list membership for list fields, substring
    /// match for string fields.
    fn emit_contains(
        &mut self,
        field: &FieldDefinition,
        column: &str,
        literal: &Literal,
    ) -> Result<String> {
        match field.field_type {
            FieldType::List(item_type) => {
                let item_field = FieldType::Scalar(item_type);
                let value = coerce_scalar(item_type, &field.name, literal)?;
                match self.dialect {
                    Dialect::Sqlite => {
                        let encoded = encode(item_field, &value)?;
                        let placeholder = self.bind(encoded);
                        Ok(format!(
                            "EXISTS (SELECT 1 FROM json_each({column}) WHERE json_each.value = {placeholder})"
                        ))
                    }
                    Dialect::Postgres => {
                        // JSONB containment against a one-element array.
                        let json = single_element_json(item_type, &value)?;
                        let placeholder = self.bind(Value::String(json));
                        Ok(format!("{column} @> {placeholder}::jsonb"))
                    }
                }
            }
            FieldType::Scalar(ScalarType::String) => {
                let needle = match literal {
                    Literal::String(s) => s,
                    other => {
                        return Err(FieldStoreError::Validation(format!(
                            "CONTAINS on string field '{}' requires a string literal, got {other:?}",
                            field.name
                        )))
                    }
                };
                let pattern = format!("%{}%", escape_like(needle));
                let placeholder = self.bind(Value::String(pattern));
                Ok(format!("{column} LIKE {placeholder} ESCAPE '\\'"))
            }
            _ => Err(FieldStoreError::Validation(format!(
                "CONTAINS is not defined for field '{}' of type {}",
                field.name,
                field.field_type.tag()
            ))),
        }
    }

}

fn sql_operator(op: CompareOp) -> &'static str {
    match op {
        CompareOp::Eq => "=",
        CompareOp::Ne => "<>",
        CompareOp::Lt => "<",
        CompareOp::Le => "<=",
        CompareOp::Gt => ">",
        CompareOp::Ge => ">=",
        CompareOp::In | CompareOp::Contains => unreachable!("handled separately"),
    }
}

/// Convert a parsed literal into a typed value for the given field,
/// applying the allowed coercions (int → float, ISO-8601 string →
/// datetime). Anything else is a type mismatch.
fn coerce_literal(field: &FieldDefinition, literal: &Literal) -> Result<Value> {
    match field.field_type {
        FieldType::Scalar(scalar) => coerce_scalar(scalar, &field.name, literal),
        FieldType::List(item_type) => match literal {
            Literal::List(items) => {
                let values = items
                    .iter()
                    .map(|item| {
                        if matches!(item, Literal::Null) {
                            return Err(FieldStoreError::Validation(format!(
                                "list literal for field '{}' cannot contain null",
                                field.name
                            )));
                        }
                        coerce_scalar(item_type, &field.name, item)
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(Value::List(values))
            }
            other => Err(mismatch(&field.name, field.field_type, other)),
        },
    }
}

fn coerce_scalar(scalar: ScalarType, field_name: &str, literal: &Literal) -> Result<Value> {
    let field_type = FieldType::Scalar(scalar);
    match (scalar, literal) {
        (ScalarType::String, Literal::String(s)) => Ok(Value::String(s.clone())),
        (ScalarType::Int, Literal::Int(n)) => Ok(Value::Int(*n)),
        (ScalarType::Float, Literal::Int(n)) => Ok(Value::Float(*n as f64)),
        (ScalarType::Float, Literal::Float(f)) => Ok(Value::Float(*f)),
        (ScalarType::Boolean, Literal::Boolean(b)) => Ok(Value::Boolean(*b)),
        (ScalarType::Datetime, Literal::String(s)) => Ok(Value::Datetime(parse_datetime(s)?)),
        (_, other) => Err(mismatch(field_name, field_type, other)),
    }
}

fn mismatch(field_name: &str, field_type: FieldType, literal: &Literal) -> FieldStoreError {
    FieldStoreError::Validation(format!(
        "literal {literal:?} cannot be compared with field '{field_name}' of type {}",
        field_type.tag()
    ))
}

/// Escape LIKE wildcards so CONTAINS matches the needle literally.
fn escape_like(needle: &str) -> String {
    let mut out = String::with_capacity(needle.len());
    for c in needle.chars() {
        if c == '\\' || c == '%' || c == '_' {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn single_element_json(item_type: ScalarType, value: &Value) -> Result<String> {
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
            return Err(FieldStoreError::Validation(
                "unsupported list item in containment".to_string(),
            ))
        }
    };
    Ok(serde_json::to_string(&serde_json::Value::Array(vec![json]))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::parse;
    use crate::schema::CollectionDefinition;
    use pretty_assertions::assert_eq;

    fn snapshot() -> SchemaSnapshot {
        let mut snapshot = SchemaSnapshot::default();
        snapshot.collections.insert(
            "scans".to_string(),
            CollectionDefinition {
                name: "scans".to_string(),
                fields: vec![
                    FieldDefinition::new("name", FieldType::STRING).not_null(),
                    FieldDefinition::new("format", FieldType::STRING).indexed(),
                    FieldDefinition::new("age", FieldType::INT),
                    FieldDefinition::new("score", FieldType::FLOAT),
                    FieldDefinition::new("acquired", FieldType::DATETIME),
                    FieldDefinition::new("valid", FieldType::BOOLEAN),
                    FieldDefinition::new("tags", FieldType::List(ScalarType::String)),
                ],
                primary_key: "name".to_string(),
            },
        );
        snapshot
    }

    fn sqlite(filter: &str) -> SqlFragment {
        translate(&parse(filter).unwrap(), "scans", &snapshot(), Dialect::Sqlite).unwrap()
    }

    fn postgres(filter: &str) -> SqlFragment {
        translate(&parse(filter).unwrap(), "scans", &snapshot(), Dialect::Postgres).unwrap()
    }

    #[test]
    fn test_simple_equality() {
        let f = sqlite("format == \"NIFTI\"");
        assert_eq!(f.sql, "\"format\" = ?1");
        assert_eq!(f.params, vec![Value::from("NIFTI")]);

        let f = postgres("format == \"NIFTI\"");
        assert_eq!(f.sql, "\"format\" = $1");
        assert_eq!(f.params, vec![Value::from("NIFTI")]);
    }

    #[test]
    fn test_boolean_and_numeric_params() {
        let f = sqlite("valid == true AND age >= 18");
        assert_eq!(f.sql, "(\"valid\" = ?1 AND \"age\" >= ?2)");
        assert_eq!(f.params, vec![Value::Boolean(true), Value::Int(18)]);
    }

    #[test]
    fn test_int_literal_widens_for_float_field() {
        let f = sqlite("score > 4");
        assert_eq!(f.sql, "\"score\" > ?1");
        assert_eq!(f.params, vec![Value::Float(4.0)]);
    }

    #[test]
    fn test_null_tri_state() {
        assert_eq!(sqlite("format == null").sql, "\"format\" IS NULL");
        assert_eq!(sqlite("format != NULL").sql, "\"format\" IS NOT NULL");
        assert!(translate(
            &parse("format > null").unwrap(),
            "scans",
            &snapshot(),
            Dialect::Sqlite
        )
        .is_err());
    }

    #[test]
    fn test_not_and_or_nesting() {
        let f = sqlite("(format == \"NIFTI\" OR NOT format == \"DICOM\")");
        assert_eq!(f.sql, "(\"format\" = ?1 OR NOT (\"format\" = ?2))");
        assert_eq!(f.params, vec![Value::from("NIFTI"), Value::from("DICOM")]);
    }

    #[test]
    fn test_in_list() {
        let f = sqlite("format IN [\"DICOM\", \"NIFTI\"]");
        assert_eq!(f.sql, "\"format\" IN (?1, ?2)");
        assert_eq!(f.params, vec![Value::from("DICOM"), Value::from("NIFTI")]);

        let f = postgres("format IN [\"DICOM\", \"NIFTI\"]");
        assert_eq!(f.sql, "\"format\" IN ($1, $2)");
    }

    #[test]
    fn test_in_empty_list_is_always_false() {
        let f = sqlite("format IN []");
        assert_eq!(f.sql, "1 = 0");
        assert!(f.params.is_empty());
    }

    #[test]
    fn test_in_with_null_matches_null_rows() {
        let f = sqlite("valid IN [false, null]");
        assert_eq!(f.sql, "(\"valid\" IN (?1) OR \"valid\" IS NULL)");
        assert_eq!(f.params, vec![Value::Boolean(false)]);

        let f = sqlite("valid IN [null]");
        assert_eq!(f.sql, "\"valid\" IS NULL");
    }

    #[test]
    fn test_list_contains_sqlite() {
        let f = sqlite("tags CONTAINS \"b\"");
        assert_eq!(
            f.sql,
            "EXISTS (SELECT 1 FROM json_each(\"tags\") WHERE json_each.value = ?1)"
        );
        assert_eq!(f.params, vec![Value::from("b")]);
    }

    #[test]
    fn test_list_contains_postgres() {
        let f = postgres("tags CONTAINS \"b\"");
        assert_eq!(f.sql, "\"tags\" @> $1::jsonb");
        assert_eq!(f.params, vec![Value::from("[\"b\"]")]);
    }

    #[test]
    fn test_string_contains_is_escaped_like() {
        let f = sqlite("name CONTAINS \"50%_a\\\\b\"");
        assert_eq!(f.sql, "\"name\" LIKE ?1 ESCAPE '\\'");
        assert_eq!(f.params, vec![Value::from("%50\\%\\_a\\\\b%")]);
    }

    #[test]
    fn test_list_equality_compares_encoded_form() {
        let f = sqlite("tags == [\"b\", \"c\", \"d\"]");
        assert_eq!(f.sql, "\"tags\" = ?1");
        assert_eq!(f.params, vec![Value::from("[\"b\",\"c\",\"d\"]")]);

        let f = sqlite("tags != [\"b\", \"c\", \"d\"]");
        assert_eq!(f.sql, "\"tags\" <> ?1");
    }

    #[test]
    fn test_ordering_on_list_field_rejected() {
        assert!(translate(
            &parse("tags > [\"a\"]").unwrap(),
            "scans",
            &snapshot(),
            Dialect::Sqlite
        )
        .is_err());
    }

    #[test]
    fn test_datetime_literal_coerced() {
        let f = sqlite("acquired < \"2018-05-23T12:41:33\"");
        assert_eq!(f.sql, "\"acquired\" < ?1");
        assert_eq!(f.params, vec![Value::from("2018-05-23T12:41:33")]);
    }

    #[test]
    fn test_type_mismatch_rejected() {
        for filter in [
            "age == \"old\"",
            "format == 3",
            "valid == 1",
            "age == 2.5",
            "tags CONTAINS 5",
        ] {
            let err = translate(
                &parse(filter).unwrap(),
                "scans",
                &snapshot(),
                Dialect::Sqlite,
            )
            .unwrap_err();
            assert!(
                matches!(err, FieldStoreError::Validation(_)),
                "{filter} should be a validation error, got {err:?}"
            );
        }
    }

    #[test]
    fn test_unknown_field() {
        let err = translate(
            &parse("ghost == 1").unwrap(),
            "scans",
            &snapshot(),
            Dialect::Sqlite,
        )
        .unwrap_err();
        assert!(matches!(err, FieldStoreError::UnknownField { .. }));
    }

    #[test]
    fn test_qualified_field_must_match_collection() {
        let f = sqlite("scans.age > 21");
        assert_eq!(f.sql, "\"age\" > ?1");

        let err = translate(
            &parse("other.age > 21").unwrap(),
            "scans",
            &snapshot(),
            Dialect::Sqlite,
        )
        .unwrap_err();
        assert!(matches!(err, FieldStoreError::UnknownCollection(_)));
    }

    #[test]
    fn test_all_predicate() {
        let f = sqlite("ALL");
        assert_eq!(f.sql, "1 = 1");
        assert!(f.params.is_empty());
    }

    #[test]
    fn test_indexed_column_never_function_wrapped() {
        // Scalar comparisons on an indexed column keep the bare column on
        // the left-hand side.
        for filter in ["format == \"x\"", "format < \"x\"", "format IN [\"x\"]"] {
            let f = sqlite(filter);
            assert!(f.sql.starts_with("\"format\""), "{}", f.sql);
        }
    }

    #[test]
    fn test_param_offset() {
        let f = translate_from(
            &parse("age > 18").unwrap(),
            "scans",
            &snapshot(),
            Dialect::Postgres,
            2,
        )
        .unwrap();
        assert_eq!(f.sql, "\"age\" > $3");
    }
}
