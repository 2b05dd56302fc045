//! Schema definitions and the schema store.
//!
//! Collection definitions are persisted in two meta tables (`_collections`
//! and `_fields`) alongside the data tables they describe. The meta tables
//! are the single source of truth for field types; the query translator
//! never infers a type from data. All schema mutations run inside one
//! backend transaction so storage structures are never half-provisioned.

use crate::driver::{with_transaction, Driver};
use crate::error::{FieldStoreError, Result};
use crate::types::{decode, encode, FieldType, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Definition of a single field in a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub indexed: bool,
    #[serde(skip)]
    pub default: Option<Value>,
}

fn default_true() -> bool {
    true
}

impl FieldDefinition {
    pub fn new(name: &str, field_type: FieldType) -> Self {
        FieldDefinition {
            name: name.to_string(),
            field_type,
            nullable: true,
            unique: false,
            indexed: false,
            default: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }
}

/// Definition of a collection: an ordered set of fields plus the name of
/// the primary-key field.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionDefinition {
    pub name: String,
    pub fields: Vec<FieldDefinition>,
    pub primary_key: String,
}

impl CollectionDefinition {
    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }
}

/// All collection definitions at a point in time. Re-read from the meta
/// tables after any schema mutation; internally consistent by construction.
#[derive(Debug, Clone, Default)]
pub struct SchemaSnapshot {
    pub collections: HashMap<String, CollectionDefinition>,
}

impl SchemaSnapshot {
    pub fn collection(&self, name: &str) -> Result<&CollectionDefinition> {
        self.collections
            .get(name)
            .ok_or_else(|| FieldStoreError::UnknownCollection(name.to_string()))
    }

    /// Resolve a field name against a collection, failing with
    /// `UnknownField` if it does not exist.
    pub fn resolve<'a>(&'a self, collection: &str, field: &str) -> Result<&'a FieldDefinition> {
        let def = self.collection(collection)?;
        def.field(field).ok_or_else(|| FieldStoreError::UnknownField {
            collection: collection.to_string(),
            field: field.to_string(),
        })
    }
}

/// Valid SQL identifier: letters, digits, underscores, not starting with a
/// digit. Enforced at schema-creation time so names can be safely quoted
/// into DDL and generated queries.
pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{name}\"")
}

const CREATE_META_TABLES: &str = "
    CREATE TABLE IF NOT EXISTS _collections (
        name TEXT PRIMARY KEY,
        primary_key TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS _fields (
        collection TEXT NOT NULL,
        name TEXT NOT NULL,
        type TEXT NOT NULL,
        nullable INTEGER NOT NULL,
        is_unique INTEGER NOT NULL,
        indexed INTEGER NOT NULL,
        default_json TEXT,
        removed INTEGER NOT NULL,
        position INTEGER NOT NULL,
        PRIMARY KEY (collection, name)
    );
";

/// Create the meta tables if they do not exist yet.
pub fn initialize<D: Driver + ?Sized>(driver: &D) -> Result<()> {
    for statement in CREATE_META_TABLES.split(';') {
        let sql = statement.trim();
        if !sql.is_empty() {
            driver.execute(sql, &[])?;
        }
    }
    Ok(())
}

/// Create a collection: meta rows, backing table and secondary indexes,
/// all in one transaction.
pub fn create_collection<D: Driver + ?Sized>(
    driver: &D,
    name: &str,
    fields: &[FieldDefinition],
    primary_key: &str,
) -> Result<()> {
    validate_collection(name, fields, primary_key)?;

    if collection_exists(driver, name)? {
        return Err(FieldStoreError::DuplicateCollection(name.to_string()));
    }

    // The primary key is implicitly non-nullable. SQLite accepts NULL in a
    // non-INTEGER PRIMARY KEY column, which would allow several NULL-keyed
    // rows that no key lookup can reach.
    let fields: Vec<FieldDefinition> = fields
        .iter()
        .cloned()
        .map(|mut field| {
            if field.name == primary_key {
                field.nullable = false;
            }
            field
        })
        .collect();

    log::debug!("creating collection '{name}' with {} fields", fields.len());
    let p = |n| driver.dialect().placeholder(n);
    with_transaction(driver, || {
        driver.execute(
            &format!(
                "INSERT INTO _collections (name, primary_key) VALUES ({}, {})",
                p(1),
                p(2)
            ),
            &[Value::from(name), Value::from(primary_key)],
        )?;
        for (position, field) in fields.iter().enumerate() {
            insert_field_row(driver, name, field, position as i64)?;
        }

        let mut columns = Vec::new();
        for field in &fields {
            let mut col = format!(
                "{} {}",
                quote_ident(&field.name),
                field.field_type.column_type(driver.dialect())
            );
            if field.name == primary_key {
                col.push_str(" PRIMARY KEY NOT NULL");
            } else if !field.nullable {
                col.push_str(" NOT NULL");
            }
            columns.push(col);
        }
        driver.execute(
            &format!("CREATE TABLE {} ({})", quote_ident(name), columns.join(", ")),
            &[],
        )?;

        for field in &fields {
            if field.name == primary_key {
                continue;
            }
            if field.unique {
                driver.execute(&unique_index_sql(name, &field.name), &[])?;
            } else if field.indexed {
                driver.execute(&index_sql(name, &field.name), &[])?;
            }
        }
        Ok(())
    })
}

/// Add a field to an existing collection. Existing record data is
/// untouched; the new column is backfilled with the default if present.
/// Re-adding a previously removed field with a different type fails:
/// field types are immutable for the life of the collection.
pub fn add_field<D: Driver + ?Sized>(
    driver: &D,
    collection: &str,
    field: &FieldDefinition,
) -> Result<()> {
    if !collection_exists(driver, collection)? {
        return Err(FieldStoreError::UnknownCollection(collection.to_string()));
    }
    validate_field(collection, field)?;

    let tombstone = field_row(driver, collection, &field.name)?;
    if let Some((existing_type, removed)) = &tombstone {
        if !removed {
            return Err(FieldStoreError::InvalidField {
                collection: collection.to_string(),
                message: format!("field '{}' already exists", field.name),
            });
        }
        if *existing_type != field.field_type {
            return Err(FieldStoreError::InvalidField {
                collection: collection.to_string(),
                message: format!(
                    "field '{}' was previously removed with type {}; re-adding with type {} \
                     requires dropping the collection",
                    field.name,
                    existing_type.tag(),
                    field.field_type.tag()
                ),
            });
        }
    }

    log::debug!("adding field '{}.{}'", collection, field.name);
    let p = |n| driver.dialect().placeholder(n);
    with_transaction(driver, || {
        let position = next_position(driver, collection)?;
        if tombstone.is_some() {
            driver.execute(
                &format!(
                    "UPDATE _fields SET removed = 0, nullable = {}, is_unique = {}, \
                     indexed = {}, default_json = {}, position = {} \
                     WHERE collection = {} AND name = {}",
                    p(1),
                    p(2),
                    p(3),
                    p(4),
                    p(5),
                    p(6),
                    p(7)
                ),
                &[
                    Value::Int(i64::from(field.nullable)),
                    Value::Int(i64::from(field.unique)),
                    Value::Int(i64::from(field.indexed)),
                    default_to_json(field)?,
                    Value::Int(position),
                    Value::from(collection),
                    Value::from(field.name.as_str()),
                ],
            )?;
        } else {
            insert_field_row(driver, collection, field, position)?;
        }

        // SQLite cannot add a column with UNIQUE/NOT NULL constraints, so
        // added columns get constraint-free DDL on both dialects;
        // uniqueness comes from an index, nullability from write
        // validation.
        driver.execute(
            &format!(
                "ALTER TABLE {} ADD COLUMN {} {}",
                quote_ident(collection),
                quote_ident(&field.name),
                field.field_type.column_type(driver.dialect())
            ),
            &[],
        )?;
        if let Some(default) = &field.default {
            let encoded = encode(field.field_type, default)?;
            driver.execute(
                &format!(
                    "UPDATE {} SET {} = {}",
                    quote_ident(collection),
                    quote_ident(&field.name),
                    p(1)
                ),
                &[encoded],
            )?;
        }
        if field.unique {
            driver.execute(&unique_index_sql(collection, &field.name), &[])?;
        } else if field.indexed {
            driver.execute(&index_sql(collection, &field.name), &[])?;
        }
        Ok(())
    })
}

/// Remove a field. Stored values for the field are permanently discarded.
/// A tombstone row keeps the field's type so it cannot be re-added with a
/// different one.
pub fn remove_field<D: Driver + ?Sized>(
    driver: &D,
    collection: &str,
    field_name: &str,
) -> Result<()> {
    let primary_key = collection_primary_key(driver, collection)?
        .ok_or_else(|| FieldStoreError::UnknownCollection(collection.to_string()))?;
    if field_name == primary_key {
        return Err(FieldStoreError::InvalidField {
            collection: collection.to_string(),
            message: format!("cannot remove primary-key field '{field_name}'"),
        });
    }
    match field_row(driver, collection, field_name)? {
        None | Some((_, true)) => {
            return Err(FieldStoreError::UnknownField {
                collection: collection.to_string(),
                field: field_name.to_string(),
            })
        }
        Some((_, false)) => {}
    }

    log::debug!("removing field '{collection}.{field_name}'");
    let p = |n| driver.dialect().placeholder(n);
    with_transaction(driver, || {
        driver.execute(
            &format!(
                "UPDATE _fields SET removed = 1 WHERE collection = {} AND name = {}",
                p(1),
                p(2)
            ),
            &[Value::from(collection), Value::from(field_name)],
        )?;
        // Indexes must go before the column on SQLite.
        driver.execute(
            &format!("DROP INDEX IF EXISTS {}", quote_ident(&index_name(collection, field_name))),
            &[],
        )?;
        driver.execute(
            &format!(
                "DROP INDEX IF EXISTS {}",
                quote_ident(&unique_index_name(collection, field_name))
            ),
            &[],
        )?;
        driver.execute(
            &format!(
                "ALTER TABLE {} DROP COLUMN {}",
                quote_ident(collection),
                quote_ident(field_name)
            ),
            &[],
        )?;
        Ok(())
    })
}

/// Drop a collection: schema rows (tombstones included) and the backing
/// table, cascading to all stored records.
pub fn drop_collection<D: Driver + ?Sized>(driver: &D, name: &str) -> Result<()> {
    if !collection_exists(driver, name)? {
        return Err(FieldStoreError::UnknownCollection(name.to_string()));
    }

    log::debug!("dropping collection '{name}'");
    let p = |n| driver.dialect().placeholder(n);
    with_transaction(driver, || {
        driver.execute(
            &format!("DELETE FROM _fields WHERE collection = {}", p(1)),
            &[Value::from(name)],
        )?;
        driver.execute(
            &format!("DELETE FROM _collections WHERE name = {}", p(1)),
            &[Value::from(name)],
        )?;
        driver.execute(&format!("DROP TABLE {}", quote_ident(name)), &[])?;
        Ok(())
    })
}

/// Read the full schema from the meta tables.
pub fn snapshot<D: Driver + ?Sized>(driver: &D) -> Result<SchemaSnapshot> {
    let mut collections = HashMap::new();
    for row in driver.query("SELECT name, primary_key FROM _collections", &[])? {
        let name = string_cell(&row, 0)?;
        let primary_key = string_cell(&row, 1)?;
        collections.insert(
            name.clone(),
            CollectionDefinition {
                name,
                fields: Vec::new(),
                primary_key,
            },
        );
    }

    let rows = driver.query(
        "SELECT collection, name, type, nullable, is_unique, indexed, default_json \
         FROM _fields WHERE removed = 0 ORDER BY collection, position",
        &[],
    )?;
    for row in rows {
        let collection = string_cell(&row, 0)?;
        let field_type = FieldType::from_tag(&string_cell(&row, 2)?)?;
        let default = match &row[6] {
            Value::Null => None,
            Value::String(json) => Some(default_from_json(field_type, json)?),
            other => {
                return Err(FieldStoreError::Backend(format!(
                    "unexpected default_json value of type {}",
                    other.type_name()
                )))
            }
        };
        let field = FieldDefinition {
            name: string_cell(&row, 1)?,
            field_type,
            nullable: bool_cell(&row, 3)?,
            unique: bool_cell(&row, 4)?,
            indexed: bool_cell(&row, 5)?,
            default,
        };
        if let Some(def) = collections.get_mut(&collection) {
            def.fields.push(field);
        }
    }

    Ok(SchemaSnapshot { collections })
}

// ── Validation ───────────────────────────────────────────────────

fn validate_collection(name: &str, fields: &[FieldDefinition], primary_key: &str) -> Result<()> {
    if !is_identifier(name) || name.starts_with('_') {
        return Err(FieldStoreError::Validation(format!(
            "'{name}' is not a valid collection name"
        )));
    }
    if fields.is_empty() {
        return Err(FieldStoreError::InvalidField {
            collection: name.to_string(),
            message: "a collection needs at least one field".to_string(),
        });
    }
    let mut seen = std::collections::HashSet::new();
    for field in fields {
        if !seen.insert(field.name.as_str()) {
            return Err(FieldStoreError::InvalidField {
                collection: name.to_string(),
                message: format!("duplicate field name '{}'", field.name),
            });
        }
        validate_field(name, field)?;
    }
    if !seen.contains(primary_key) {
        return Err(FieldStoreError::InvalidField {
            collection: name.to_string(),
            message: format!("primary key '{primary_key}' is not among the fields"),
        });
    }
    Ok(())
}

fn validate_field(collection: &str, field: &FieldDefinition) -> Result<()> {
    if !is_identifier(&field.name) || field.name.starts_with('_') {
        return Err(FieldStoreError::InvalidField {
            collection: collection.to_string(),
            message: format!("'{}' is not a valid field name", field.name),
        });
    }
    if let Some(default) = &field.default {
        if default.is_null() {
            return Err(FieldStoreError::InvalidField {
                collection: collection.to_string(),
                message: format!("default for '{}' cannot be null", field.name),
            });
        }
        if !default.matches_type(field.field_type) {
            return Err(FieldStoreError::InvalidField {
                collection: collection.to_string(),
                message: format!(
                    "default for '{}' has type {}, field type is {}",
                    field.name,
                    default.type_name(),
                    field.field_type.tag()
                ),
            });
        }
        if matches!(default, Value::Blob(_)) {
            return Err(FieldStoreError::InvalidField {
                collection: collection.to_string(),
                message: format!("blob field '{}' cannot carry a default", field.name),
            });
        }
    }
    Ok(())
}

// ── Meta-table plumbing ──────────────────────────────────────────

fn collection_exists<D: Driver + ?Sized>(driver: &D, name: &str) -> Result<bool> {
    Ok(collection_primary_key(driver, name)?.is_some())
}

pub(crate) fn collection_primary_key<D: Driver + ?Sized>(
    driver: &D,
    name: &str,
) -> Result<Option<String>> {
    let rows = driver.query(
        &format!(
            "SELECT primary_key FROM _collections WHERE name = {}",
            driver.dialect().placeholder(1)
        ),
        &[Value::from(name)],
    )?;
    match rows.into_iter().next() {
        Some(row) => Ok(Some(string_cell(&row, 0)?)),
        None => Ok(None),
    }
}

/// Returns (type, removed) for a field row, tombstoned or not.
fn field_row<D: Driver + ?Sized>(
    driver: &D,
    collection: &str,
    name: &str,
) -> Result<Option<(FieldType, bool)>> {
    let rows = driver.query(
        &format!(
            "SELECT type, removed FROM _fields WHERE collection = {} AND name = {}",
            driver.dialect().placeholder(1),
            driver.dialect().placeholder(2)
        ),
        &[Value::from(collection), Value::from(name)],
    )?;
    match rows.into_iter().next() {
        Some(row) => Ok(Some((
            FieldType::from_tag(&string_cell(&row, 0)?)?,
            bool_cell(&row, 1)?,
        ))),
        None => Ok(None),
    }
}

fn next_position<D: Driver + ?Sized>(driver: &D, collection: &str) -> Result<i64> {
    let rows = driver.query(
        &format!(
            "SELECT MAX(position) FROM _fields WHERE collection = {}",
            driver.dialect().placeholder(1)
        ),
        &[Value::from(collection)],
    )?;
    match rows.into_iter().next() {
        Some(row) => match row[0] {
            Value::Int(n) => Ok(n + 1),
            _ => Ok(0),
        },
        None => Ok(0),
    }
}

fn insert_field_row<D: Driver + ?Sized>(
    driver: &D,
    collection: &str,
    field: &FieldDefinition,
    position: i64,
) -> Result<()> {
    let p = |n| driver.dialect().placeholder(n);
    driver.execute(
        &format!(
            "INSERT INTO _fields (collection, name, type, nullable, is_unique, indexed, \
             default_json, removed, position) VALUES ({}, {}, {}, {}, {}, {}, {}, 0, {})",
            p(1),
            p(2),
            p(3),
            p(4),
            p(5),
            p(6),
            p(7),
            p(8)
        ),
        &[
            Value::from(collection),
            Value::from(field.name.as_str()),
            Value::from(field.field_type.tag()),
            Value::Int(i64::from(field.nullable)),
            Value::Int(i64::from(field.unique)),
            Value::Int(i64::from(field.indexed)),
            default_to_json(field)?,
            Value::Int(position),
        ],
    )?;
    Ok(())
}

fn default_to_json(field: &FieldDefinition) -> Result<Value> {
    match &field.default {
        None => Ok(Value::Null),
        Some(default) => {
            let encoded = encode(field.field_type, default)?;
            let json = match encoded {
                Value::Int(n) => serde_json::Value::from(n),
                Value::Float(f) => serde_json::Value::from(f),
                Value::Boolean(b) => serde_json::Value::Bool(b),
                Value::String(s) => serde_json::Value::String(s),
                other => {
                    return Err(FieldStoreError::Validation(format!(
                        "cannot persist default of type {}",
                        other.type_name()
                    )))
                }
            };
            Ok(Value::String(serde_json::to_string(&json)?))
        }
    }
}

fn default_from_json(field_type: FieldType, json: &str) -> Result<Value> {
    let parsed: serde_json::Value = serde_json::from_str(json)?;
    let raw = match parsed {
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::Float(n.as_f64().unwrap_or_default())
            }
        }
        serde_json::Value::Bool(b) => Value::Boolean(b),
        serde_json::Value::String(s) => Value::String(s),
        other => {
            return Err(FieldStoreError::Backend(format!(
                "unexpected persisted default: {other}"
            )))
        }
    };
    decode(field_type, raw)
}

fn string_cell(row: &[Value], index: usize) -> Result<String> {
    match &row[index] {
        Value::String(s) => Ok(s.clone()),
        other => Err(FieldStoreError::Backend(format!(
            "expected text in meta table, got {}",
            other.type_name()
        ))),
    }
}

fn bool_cell(row: &[Value], index: usize) -> Result<bool> {
    match &row[index] {
        Value::Int(n) => Ok(*n != 0),
        Value::Boolean(b) => Ok(*b),
        other => Err(FieldStoreError::Backend(format!(
            "expected flag in meta table, got {}",
            other.type_name()
        ))),
    }
}

fn index_name(collection: &str, field: &str) -> String {
    format!("idx_{collection}_{field}")
}

fn unique_index_name(collection: &str, field: &str) -> String {
    format!("uq_{collection}_{field}")
}

fn index_sql(collection: &str, field: &str) -> String {
    format!(
        "CREATE INDEX {} ON {} ({})",
        quote_ident(&index_name(collection, field)),
        quote_ident(collection),
        quote_ident(field)
    )
}

fn unique_index_sql(collection: &str, field: &str) -> String {
    format!(
        "CREATE UNIQUE INDEX {} ON {} ({})",
        quote_ident(&unique_index_name(collection, field)),
        quote_ident(collection),
        quote_ident(field)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::SqliteDriver;
    use crate::types::ScalarType;

    fn driver() -> SqliteDriver {
        let d = SqliteDriver::open_in_memory().unwrap();
        initialize(&d).unwrap();
        d
    }

    fn user_fields() -> Vec<FieldDefinition> {
        vec![
            FieldDefinition::new("name", FieldType::STRING).not_null(),
            FieldDefinition::new("age", FieldType::INT).indexed(),
            FieldDefinition::new("email", FieldType::STRING).unique(),
            FieldDefinition::new("tags", FieldType::List(ScalarType::String)),
        ]
    }

    #[test]
    fn test_create_and_snapshot_round_trip() {
        let d = driver();
        create_collection(&d, "users", &user_fields(), "name").unwrap();

        let snap = snapshot(&d).unwrap();
        let users = snap.collection("users").unwrap();
        assert_eq!(users.primary_key, "name");
        assert_eq!(users.field_names(), vec!["name", "age", "email", "tags"]);
        assert_eq!(users.field("age").unwrap().field_type, FieldType::INT);
        assert!(users.field("age").unwrap().indexed);
        assert!(users.field("email").unwrap().unique);
    }

    #[test]
    fn test_duplicate_collection_rejected() {
        let d = driver();
        create_collection(&d, "users", &user_fields(), "name").unwrap();
        let err = create_collection(&d, "users", &user_fields(), "name").unwrap_err();
        assert!(matches!(err, FieldStoreError::DuplicateCollection(_)));
    }

    #[test]
    fn test_duplicate_field_names_rejected() {
        let d = driver();
        let fields = vec![
            FieldDefinition::new("name", FieldType::STRING),
            FieldDefinition::new("name", FieldType::INT),
        ];
        let err = create_collection(&d, "users", &fields, "name").unwrap_err();
        assert!(matches!(err, FieldStoreError::InvalidField { .. }));
    }

    #[test]
    fn test_primary_key_must_be_a_field() {
        let d = driver();
        let fields = vec![FieldDefinition::new("name", FieldType::STRING)];
        let err = create_collection(&d, "users", &fields, "id").unwrap_err();
        assert!(matches!(err, FieldStoreError::InvalidField { .. }));
    }

    #[test]
    fn test_invalid_identifiers_rejected() {
        let d = driver();
        let fields = vec![FieldDefinition::new("name", FieldType::STRING)];
        assert!(create_collection(&d, "users; DROP TABLE x", &fields, "name").is_err());
        assert!(create_collection(&d, "_users", &fields, "name").is_err());

        let bad_field = vec![FieldDefinition::new("na me", FieldType::STRING)];
        assert!(create_collection(&d, "users", &bad_field, "na me").is_err());
    }

    #[test]
    fn test_mismatched_default_rejected() {
        let d = driver();
        let fields = vec![
            FieldDefinition::new("name", FieldType::STRING),
            FieldDefinition::new("age", FieldType::INT).with_default(Value::from("young")),
        ];
        let err = create_collection(&d, "users", &fields, "name").unwrap_err();
        assert!(matches!(err, FieldStoreError::InvalidField { .. }));
    }

    #[test]
    fn test_add_field_preserves_existing_rows() {
        let d = driver();
        create_collection(&d, "users", &user_fields(), "name").unwrap();
        d.execute("INSERT INTO \"users\" (\"name\") VALUES (?1)", &[Value::from("alice")])
            .unwrap();

        add_field(
            &d,
            "users",
            &FieldDefinition::new("score", FieldType::FLOAT).with_default(Value::Float(1.5)),
        )
        .unwrap();

        let rows = d
            .query("SELECT \"name\", \"score\" FROM \"users\"", &[])
            .unwrap();
        assert_eq!(rows, vec![vec![Value::from("alice"), Value::Float(1.5)]]);

        let snap = snapshot(&d).unwrap();
        let users = snap.collection("users").unwrap();
        assert_eq!(users.field("score").unwrap().default, Some(Value::Float(1.5)));
    }

    #[test]
    fn test_add_existing_field_rejected() {
        let d = driver();
        create_collection(&d, "users", &user_fields(), "name").unwrap();
        let err = add_field(&d, "users", &FieldDefinition::new("age", FieldType::INT)).unwrap_err();
        assert!(matches!(err, FieldStoreError::InvalidField { .. }));
    }

    #[test]
    fn test_remove_field_discards_values() {
        let d = driver();
        create_collection(&d, "users", &user_fields(), "name").unwrap();
        remove_field(&d, "users", "age").unwrap();

        let snap = snapshot(&d).unwrap();
        assert!(snap.collection("users").unwrap().field("age").is_none());

        // Column is physically gone.
        assert!(d.query("SELECT \"age\" FROM \"users\"", &[]).is_err());
    }

    #[test]
    fn test_field_type_immutable_across_remove_and_readd() {
        let d = driver();
        create_collection(&d, "users", &user_fields(), "name").unwrap();
        remove_field(&d, "users", "age").unwrap();

        let err =
            add_field(&d, "users", &FieldDefinition::new("age", FieldType::STRING)).unwrap_err();
        assert!(matches!(err, FieldStoreError::InvalidField { .. }));

        // Same type is fine.
        add_field(&d, "users", &FieldDefinition::new("age", FieldType::INT)).unwrap();
        let snap = snapshot(&d).unwrap();
        assert_eq!(
            snap.collection("users").unwrap().field("age").unwrap().field_type,
            FieldType::INT
        );
    }

    #[test]
    fn test_type_change_allowed_after_drop() {
        let d = driver();
        create_collection(&d, "users", &user_fields(), "name").unwrap();
        remove_field(&d, "users", "age").unwrap();
        drop_collection(&d, "users").unwrap();

        let fields = vec![
            FieldDefinition::new("name", FieldType::STRING),
            FieldDefinition::new("age", FieldType::STRING),
        ];
        create_collection(&d, "users", &fields, "name").unwrap();
        let snap = snapshot(&d).unwrap();
        assert_eq!(
            snap.collection("users").unwrap().field("age").unwrap().field_type,
            FieldType::STRING
        );
    }

    #[test]
    fn test_primary_key_implicitly_not_null() {
        let d = driver();
        // "name" is left at the nullable default here.
        let fields = vec![
            FieldDefinition::new("name", FieldType::STRING),
            FieldDefinition::new("age", FieldType::INT),
        ];
        create_collection(&d, "users", &fields, "name").unwrap();

        let snap = snapshot(&d).unwrap();
        assert!(!snap.collection("users").unwrap().field("name").unwrap().nullable);

        // The column constraint holds even below the validation layer.
        let err = d
            .execute(
                "INSERT INTO \"users\" (\"name\", \"age\") VALUES (NULL, ?1)",
                &[Value::Int(1)],
            )
            .unwrap_err();
        assert!(matches!(err, FieldStoreError::Backend(_)));
    }

    #[test]
    fn test_remove_primary_key_rejected() {
        let d = driver();
        create_collection(&d, "users", &user_fields(), "name").unwrap();
        let err = remove_field(&d, "users", "name").unwrap_err();
        assert!(matches!(err, FieldStoreError::InvalidField { .. }));
    }

    #[test]
    fn test_remove_unknown_field() {
        let d = driver();
        create_collection(&d, "users", &user_fields(), "name").unwrap();
        let err = remove_field(&d, "users", "nope").unwrap_err();
        assert!(matches!(err, FieldStoreError::UnknownField { .. }));
    }

    #[test]
    fn test_drop_collection() {
        let d = driver();
        create_collection(&d, "users", &user_fields(), "name").unwrap();
        drop_collection(&d, "users").unwrap();

        let snap = snapshot(&d).unwrap();
        assert!(snap.collection("users").is_err());
        assert!(d.query("SELECT * FROM \"users\"", &[]).is_err());

        let err = drop_collection(&d, "users").unwrap_err();
        assert!(matches!(err, FieldStoreError::UnknownCollection(_)));
    }

    #[test]
    fn test_unknown_collection_operations() {
        let d = driver();
        assert!(matches!(
            add_field(&d, "ghosts", &FieldDefinition::new("x", FieldType::INT)),
            Err(FieldStoreError::UnknownCollection(_))
        ));
        assert!(matches!(
            remove_field(&d, "ghosts", "x"),
            Err(FieldStoreError::UnknownCollection(_))
        ));
    }

    #[test]
    fn test_field_definition_serde_shape() {
        let field = FieldDefinition::new("tags", FieldType::List(ScalarType::String)).unique();
        assert_eq!(
            serde_json::to_value(&field).unwrap(),
            serde_json::json!({
                "name": "tags",
                "type": "list_string",
                "nullable": true,
                "unique": true,
                "indexed": false,
            })
        );

        // Sparse input: flags take their defaults. Typed defaults are not
        // part of this shape; they are persisted in the meta tables.
        let parsed: FieldDefinition =
            serde_json::from_value(serde_json::json!({ "name": "age", "type": "int" })).unwrap();
        assert_eq!(parsed, FieldDefinition::new("age", FieldType::INT));

        assert!(serde_json::from_value::<FieldDefinition>(
            serde_json::json!({ "name": "x", "type": "decimal" })
        )
        .is_err());
    }

    #[test]
    fn test_snapshot_resolve() {
        let d = driver();
        create_collection(&d, "users", &user_fields(), "name").unwrap();
        let snap = snapshot(&d).unwrap();

        assert!(snap.resolve("users", "age").is_ok());
        assert!(matches!(
            snap.resolve("users", "ghost"),
            Err(FieldStoreError::UnknownField { .. })
        ));
        assert!(matches!(
            snap.resolve("ghosts", "age"),
            Err(FieldStoreError::UnknownCollection(_))
        ));
    }
}
