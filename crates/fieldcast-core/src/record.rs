//! Records — one value (or null) per schema column.

use std::sync::Arc;

use serde_json::{Map, Number};

use crate::column::{Column, Value, ValueError};
use crate::schema::Schema;

const FIELD_SEPARATOR: char = ',';
const ESCAPE: char = '\\';

/// A mutable assignment of values to the columns of exactly one schema.
///
/// Every store goes through the column contract, so a record never holds a
/// value its column would reject. Required columns may still be unset while
/// the record is being filled in; encoding refuses such a record.
#[derive(Debug, Clone)]
pub struct Record {
    schema: Arc<Schema>,
    values: Vec<Option<Value>>,
}

impl Record {
    pub fn new(schema: Arc<Schema>) -> Self {
        let values = vec![None; schema.len()];
        Self { schema, values }
    }

    pub(crate) fn from_values(schema: Arc<Schema>, values: Vec<Option<Value>>) -> Self {
        Self { schema, values }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Stored values in wire order.
    pub fn values(&self) -> &[Option<Value>] {
        &self.values
    }

    fn index(&self, name: &str) -> Result<usize, ValueError> {
        self.schema
            .index_of(name)
            .ok_or_else(|| ValueError::UnknownColumn(name.to_string()))
    }

    // ── Access ──

    pub fn get(&self, name: &str) -> Result<Option<&Value>, ValueError> {
        let i = self.index(name)?;
        Ok(self.values[i].as_ref())
    }

    /// `None` for a null value or an index past the last column.
    pub fn get_at(&self, index: usize) -> Option<&Value> {
        self.values.get(index).and_then(Option::as_ref)
    }

    pub fn get_for(&self, column: &Column) -> Result<Option<&Value>, ValueError> {
        let i = self.compatible_index(column)?;
        Ok(self.values[i].as_ref())
    }

    /// Canonical text of the value, `None` when null.
    pub fn get_text(&self, name: &str) -> Result<Option<String>, ValueError> {
        let i = self.index(name)?;
        match &self.values[i] {
            Some(v) => self.schema.columns()[i].to_text(v).map(Some),
            None => Ok(None),
        }
    }

    /// Derive the value of a virtual column from its current source value.
    pub fn virtual_value(&self, name: &str) -> Result<Option<Value>, ValueError> {
        let (source, column) = self
            .schema
            .find_virtual(name)
            .ok_or_else(|| ValueError::UnknownColumn(name.to_string()))?;
        match &self.values[source] {
            Some(v) => column.derive(v),
            None => Ok(None),
        }
    }

    // ── Mutation ──

    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<(), ValueError> {
        self.set_optional(name, Some(value.into()))
    }

    pub fn set_optional(&mut self, name: &str, value: Option<Value>) -> Result<(), ValueError> {
        let i = self.index(name)?;
        self.store(i, value)
    }

    pub fn set_at(&mut self, index: usize, value: Option<Value>) -> Result<(), ValueError> {
        if index >= self.values.len() {
            return Err(ValueError::UnknownColumn(format!("#{index}")));
        }
        self.store(index, value)
    }

    /// Store through a column definition, which must be the schema's own.
    pub fn set_for(&mut self, column: &Column, value: Option<Value>) -> Result<(), ValueError> {
        let i = self.compatible_index(column)?;
        self.store(i, value)
    }

    /// Null the column. Fails on required columns.
    pub fn clear(&mut self, name: &str) -> Result<(), ValueError> {
        self.set_optional(name, None)
    }

    /// Parse `text` with the column's text form and store it.
    pub fn parse_and_set(&mut self, name: &str, text: &str) -> Result<(), ValueError> {
        let i = self.index(name)?;
        let value = self.schema.columns()[i].parse_optional(text)?;
        self.values[i] = value;
        Ok(())
    }

    fn compatible_index(&self, column: &Column) -> Result<usize, ValueError> {
        match self.schema.index_of(column.name()) {
            Some(i) if self.schema.columns()[i] == *column => Ok(i),
            _ => Err(ValueError::UnknownColumn(column.name().to_string())),
        }
    }

    fn store(&mut self, index: usize, value: Option<Value>) -> Result<(), ValueError> {
        self.schema.columns()[index].check(value.as_ref())?;
        self.values[index] = value;
        Ok(())
    }

    // ── Completeness ──

    /// Required columns that are still null.
    pub fn missing_required(&self) -> Vec<&str> {
        self.schema
            .columns()
            .iter()
            .zip(&self.values)
            .filter(|(c, v)| !c.is_optional() && v.is_none())
            .map(|(c, _)| c.name())
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.missing_required().is_empty()
    }

    // ── Text ──

    /// Comma-separated values in wire order. Null is the empty field.
    pub fn to_text(&self) -> String {
        let fields: Vec<String> = self
            .schema
            .columns()
            .iter()
            .zip(&self.values)
            .map(|(column, value)| match value {
                Some(v) => column.to_text(v).map(|t| escape(&t)).unwrap_or_default(),
                None => String::new(),
            })
            .collect();
        fields.join(",")
    }

    pub fn parse_text(schema: &Arc<Schema>, text: &str) -> Result<Record, ValueError> {
        let mut record = Record::new(Arc::clone(schema));
        if schema.is_empty() && text.is_empty() {
            return Ok(record);
        }
        let fields = split_fields(text);
        if fields.len() != schema.len() {
            return Err(ValueError::Parse {
                column: schema.name().to_string(),
                input: text.to_string(),
                reason: format!("expected {} fields, got {}", schema.len(), fields.len()),
            });
        }
        for (i, field) in fields.iter().enumerate() {
            let value = schema.columns()[i].parse_optional(field)?;
            record.values[i] = value;
        }
        Ok(record)
    }

    // ── JSON ──

    /// Every column plus every derivable virtual column, keyed by name.
    pub fn to_json(&self) -> serde_json::Value {
        let mut object = Map::new();
        for (column, value) in self.schema.columns().iter().zip(&self.values) {
            object.insert(column.name().to_string(), json_value(value.as_ref()));
        }
        for (_, virt) in self.schema.virtual_columns() {
            let derived = self.virtual_value(virt.name()).ok().flatten();
            object.insert(virt.name().to_string(), json_value(derived.as_ref()));
        }
        serde_json::Value::Object(object)
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        (Arc::ptr_eq(&self.schema, &other.schema) || *self.schema == *other.schema)
            && self.values == other.values
    }
}

fn json_value(value: Option<&Value>) -> serde_json::Value {
    match value {
        None => serde_json::Value::Null,
        Some(Value::Bool(b)) => serde_json::Value::Bool(*b),
        Some(Value::Int(v)) => serde_json::Value::Number((*v).into()),
        Some(Value::Float(v)) => Number::from_f64(*v)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Some(Value::Text(s)) => serde_json::Value::String(s.clone()),
        Some(Value::Record(r)) => r.to_json(),
    }
}

fn escape(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    for c in field.chars() {
        if c == FIELD_SEPARATOR || c == ESCAPE {
            out.push(ESCAPE);
        }
        out.push(c);
    }
    out
}

fn split_fields(text: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        match c {
            ESCAPE => current.push(chars.next().unwrap_or(ESCAPE)),
            FIELD_SEPARATOR => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}
