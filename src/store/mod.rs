//! Record access layer.
//!
//! `Store` ties a driver, the schema store, the filter parser and the
//! translator together behind one typed API. All record values are
//! validated against the schema snapshot before any SQL is built, and
//! multi-row writes run inside a single transaction.

use crate::driver::{with_transaction, Driver};
use crate::error::{FieldStoreError, Result};
use crate::filter::parse;
use crate::schema::{self, quote_ident, FieldDefinition, SchemaSnapshot};
use crate::translate::{translate_from, SqlFragment};
use crate::types::{decode, encode, Value};
use std::collections::BTreeMap;

/// One stored record: field name to typed value. Fields whose stored
/// value is NULL come back as `Value::Null`.
pub type Record = BTreeMap<String, Value>;

/// Sort direction for `Query::order_by`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

/// A select over one collection: optional filter expression, projection,
/// ordering and limit. Field names are resolved against the schema when
/// the query runs.
#[derive(Debug, Clone, Default)]
pub struct Query {
    filter: Option<String>,
    fields: Option<Vec<String>>,
    order: Vec<(String, Order)>,
    limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Query::default()
    }

    /// Restrict results to records matching a filter expression, e.g.
    /// `format == "NIFTI" AND age > 20`.
    pub fn filter(mut self, expression: &str) -> Self {
        self.filter = Some(expression.to_string());
        self
    }

    /// Project only the named fields instead of the full record.
    pub fn fields(mut self, fields: &[&str]) -> Self {
        self.fields = Some(fields.iter().map(|f| f.to_string()).collect());
        self
    }

    pub fn order_by(mut self, field: &str, order: Order) -> Self {
        self.order.push((field.to_string(), order));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Lazily decoded query results. Each row is decoded against the field
/// types captured when the query ran.
pub struct Rows {
    fields: Vec<FieldDefinition>,
    rows: std::vec::IntoIter<Vec<Value>>,
}

impl Iterator for Rows {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        let row = self.rows.next()?;
        let mut record = Record::new();
        for (field, raw) in self.fields.iter().zip(row) {
            match decode(field.field_type, raw) {
                Ok(value) => {
                    record.insert(field.name.clone(), value);
                }
                Err(e) => return Some(Err(e)),
            }
        }
        Some(Ok(record))
    }
}

/// Typed record store over one backend connection. Not shareable across
/// threads; open one store per connection.
pub struct Store<D: Driver> {
    driver: D,
    schema: SchemaSnapshot,
}

impl<D: Driver> Store<D> {
    /// Provision the meta tables if needed and load the current schema.
    pub fn new(driver: D) -> Result<Self> {
        schema::initialize(&driver)?;
        let snapshot = schema::snapshot(&driver)?;
        Ok(Store { driver, schema: snapshot })
    }

    pub fn schema(&self) -> &SchemaSnapshot {
        &self.schema
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    // ── Schema mutations ─────────────────────────────────────────

    pub fn create_collection(
        &mut self,
        name: &str,
        fields: &[FieldDefinition],
        primary_key: &str,
    ) -> Result<()> {
        schema::create_collection(&self.driver, name, fields, primary_key)?;
        self.reload_schema()
    }

    pub fn add_field(&mut self, collection: &str, field: &FieldDefinition) -> Result<()> {
        schema::add_field(&self.driver, collection, field)?;
        self.reload_schema()
    }

    pub fn remove_field(&mut self, collection: &str, field: &str) -> Result<()> {
        schema::remove_field(&self.driver, collection, field)?;
        self.reload_schema()
    }

    pub fn drop_collection(&mut self, name: &str) -> Result<()> {
        schema::drop_collection(&self.driver, name)?;
        self.reload_schema()
    }

    fn reload_schema(&mut self) -> Result<()> {
        self.schema = schema::snapshot(&self.driver)?;
        Ok(())
    }

    // ── Writes ───────────────────────────────────────────────────

    /// Insert one record. Missing fields take their default, or NULL when
    /// nullable; a missing non-nullable field without a default is an
    /// error before any SQL runs.
    pub fn insert(&self, collection: &str, record: Record) -> Result<()> {
        let (sql, params) = self.insert_statement(collection, &record)?;
        self.driver
            .execute(&sql, &params)
            .map_err(|e| attach_collection(collection, e))?;
        Ok(())
    }

    /// Insert several records in one transaction. If any record fails
    /// validation or violates a constraint, none are stored.
    pub fn insert_many(&self, collection: &str, records: &[Record]) -> Result<()> {
        let mut statements = Vec::with_capacity(records.len());
        for record in records {
            statements.push(self.insert_statement(collection, record)?);
        }
        with_transaction(&self.driver, || {
            for (sql, params) in &statements {
                self.driver
                    .execute(sql, params)
                    .map_err(|e| attach_collection(collection, e))?;
            }
            Ok(())
        })
    }

    /// Update one record by primary key. Returns false if no record has
    /// that key.
    pub fn update(&self, collection: &str, key: &Value, changes: &Record) -> Result<bool> {
        let def = self.schema.collection(collection)?;
        let (set_sql, mut params) = self.set_clause(collection, changes)?;

        let pk = self.schema.resolve(collection, &def.primary_key)?;
        let encoded_key = encode(pk.field_type, key)?;
        let placeholder = self.driver.dialect().placeholder(params.len() + 1);
        params.push(encoded_key);

        let sql = format!(
            "UPDATE {} SET {} WHERE {} = {}",
            quote_ident(collection),
            set_sql,
            quote_ident(&def.primary_key),
            placeholder
        );
        let affected = self
            .driver
            .execute(&sql, &params)
            .map_err(|e| attach_collection(collection, e))?;
        Ok(affected > 0)
    }

    /// Update every record matching a filter expression. Returns the
    /// number of records changed.
    pub fn update_where(&self, collection: &str, filter: &str, changes: &Record) -> Result<usize> {
        let predicate = parse(filter)?;
        let (set_sql, mut params) = self.set_clause(collection, changes)?;
        let fragment = translate_from(
            &predicate,
            collection,
            &self.schema,
            self.driver.dialect(),
            params.len(),
        )?;
        params.extend(fragment.params);

        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            quote_ident(collection),
            set_sql,
            fragment.sql
        );
        self.driver
            .execute(&sql, &params)
            .map_err(|e| attach_collection(collection, e))
    }

    /// Delete one record by primary key. Returns false if no record has
    /// that key.
    pub fn delete(&self, collection: &str, key: &Value) -> Result<bool> {
        let def = self.schema.collection(collection)?;
        let pk = self.schema.resolve(collection, &def.primary_key)?;
        let encoded_key = encode(pk.field_type, key)?;
        let sql = format!(
            "DELETE FROM {} WHERE {} = {}",
            quote_ident(collection),
            quote_ident(&def.primary_key),
            self.driver.dialect().placeholder(1)
        );
        let affected = self.driver.execute(&sql, &[encoded_key])?;
        Ok(affected > 0)
    }

    /// Delete every record matching a filter expression. Returns the
    /// number of records removed.
    pub fn delete_where(&self, collection: &str, filter: &str) -> Result<usize> {
        let fragment = self.where_fragment(collection, filter)?;
        let sql = format!(
            "DELETE FROM {} WHERE {}",
            quote_ident(collection),
            fragment.sql
        );
        self.driver.execute(&sql, &fragment.params)
    }

    // ── Reads ────────────────────────────────────────────────────

    /// Fetch one record by primary key.
    pub fn get(&self, collection: &str, key: &Value) -> Result<Option<Record>> {
        let def = self.schema.collection(collection)?;
        let pk = self.schema.resolve(collection, &def.primary_key)?;
        let encoded_key = encode(pk.field_type, key)?;

        let fields = def.fields.clone();
        let columns: Vec<String> = fields.iter().map(|f| quote_ident(&f.name)).collect();
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = {}",
            columns.join(", "),
            quote_ident(collection),
            quote_ident(&def.primary_key),
            self.driver.dialect().placeholder(1)
        );
        let raw = self.driver.query(&sql, &[encoded_key])?;
        let mut rows = Rows { fields, rows: raw.into_iter() };
        rows.next().transpose()
    }

    /// Run a query, returning a lazily decoded row iterator.
    pub fn select(&self, collection: &str, query: &Query) -> Result<Rows> {
        let def = self.schema.collection(collection)?;

        let fields: Vec<FieldDefinition> = match &query.fields {
            None => def.fields.clone(),
            Some(names) => names
                .iter()
                .map(|name| self.schema.resolve(collection, name).cloned())
                .collect::<Result<_>>()?,
        };
        let columns: Vec<String> = fields.iter().map(|f| quote_ident(&f.name)).collect();

        let mut sql = format!(
            "SELECT {} FROM {}",
            columns.join(", "),
            quote_ident(collection)
        );
        let mut params = Vec::new();
        if let Some(filter) = &query.filter {
            let fragment = self.where_fragment(collection, filter)?;
            sql.push_str(" WHERE ");
            sql.push_str(&fragment.sql);
            params = fragment.params;
        }
        if !query.order.is_empty() {
            let mut terms = Vec::with_capacity(query.order.len());
            for (name, order) in &query.order {
                self.schema.resolve(collection, name)?;
                let direction = match order {
                    Order::Asc => "ASC",
                    Order::Desc => "DESC",
                };
                terms.push(format!("{} {}", quote_ident(name), direction));
            }
            sql.push_str(" ORDER BY ");
            sql.push_str(&terms.join(", "));
        }
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let raw = self.driver.query(&sql, &params)?;
        Ok(Rows { fields, rows: raw.into_iter() })
    }

    /// Count the records matching a filter expression. `"ALL"` counts the
    /// whole collection.
    pub fn count(&self, collection: &str, filter: &str) -> Result<usize> {
        let fragment = self.where_fragment(collection, filter)?;
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {}",
            quote_ident(collection),
            fragment.sql
        );
        let rows = self.driver.query(&sql, &fragment.params)?;
        match rows.into_iter().next().and_then(|r| r.into_iter().next()) {
            Some(Value::Int(n)) => Ok(n as usize),
            other => Err(FieldStoreError::Backend(format!(
                "unexpected COUNT result: {other:?}"
            ))),
        }
    }

    // ── Statement building ───────────────────────────────────────

    fn where_fragment(&self, collection: &str, filter: &str) -> Result<SqlFragment> {
        let predicate = parse(filter)?;
        translate_from(
            &predicate,
            collection,
            &self.schema,
            self.driver.dialect(),
            0,
        )
    }

    fn insert_statement(&self, collection: &str, record: &Record) -> Result<(String, Vec<Value>)> {
        let def = self.schema.collection(collection)?;
        for name in record.keys() {
            self.schema.resolve(collection, name)?;
        }

        let mut columns = Vec::with_capacity(def.fields.len());
        let mut params = Vec::with_capacity(def.fields.len());
        for field in &def.fields {
            let value = match record.get(&field.name) {
                Some(v) => v.clone(),
                None => match &field.default {
                    Some(default) => default.clone(),
                    None => Value::Null,
                },
            };
            self.check_value(collection, field, &value)?;
            columns.push(quote_ident(&field.name));
            params.push(encode(field.field_type, &value)?);
        }

        let placeholders: Vec<String> = (1..=params.len())
            .map(|n| self.driver.dialect().placeholder(n))
            .collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(collection),
            columns.join(", "),
            placeholders.join(", ")
        );
        Ok((sql, params))
    }

    fn set_clause(&self, collection: &str, changes: &Record) -> Result<(String, Vec<Value>)> {
        if changes.is_empty() {
            return Err(FieldStoreError::Validation(
                "update requires at least one field change".to_string(),
            ));
        }
        let mut assignments = Vec::with_capacity(changes.len());
        let mut params = Vec::with_capacity(changes.len());
        for (name, value) in changes {
            let field = self.schema.resolve(collection, name)?;
            self.check_value(collection, field, value)?;
            let placeholder = self.driver.dialect().placeholder(params.len() + 1);
            assignments.push(format!("{} = {}", quote_ident(name), placeholder));
            params.push(encode(field.field_type, value)?);
        }
        Ok((assignments.join(", "), params))
    }

    // Nullability added after table creation is not a column constraint,
    // so it is enforced here for every write path.
    fn check_value(&self, collection: &str, field: &FieldDefinition, value: &Value) -> Result<()> {
        if value.is_null() {
            if !field.nullable {
                return Err(FieldStoreError::Validation(format!(
                    "field '{}.{}' is not nullable",
                    collection, field.name
                )));
            }
            return Ok(());
        }
        if !value.matches_type(field.field_type) {
            return Err(FieldStoreError::Validation(format!(
                "value of type {} does not match field '{}.{}' of type {}",
                value.type_name(),
                collection,
                field.name,
                field.field_type.tag()
            )));
        }
        Ok(())
    }
}

fn attach_collection(collection: &str, e: FieldStoreError) -> FieldStoreError {
    match e {
        FieldStoreError::UniquenessViolation { message, .. } => {
            FieldStoreError::UniquenessViolation {
                collection: collection.to_string(),
                message,
            }
        }
        other => other,
    }
}
