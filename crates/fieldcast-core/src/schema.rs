//! Schemas — ordered, name-unique column sets and the record codec.
//!
//! A schema is mutable while it is being built and sealed the first time it
//! is used for encoding or decoding (or nested inside a record column). From
//! then on its column order is the canonical wire order.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bitio::{BitIoError, BitReader, BitWriter};
use crate::column::{Column, Value, ValueError, VirtualColumn};
use crate::digest::Hasher;
use crate::record::Record;

// ── Identity ──────────────────────────────────────────────────────────────────

/// Stable identifier of a schema: the model it belongs to plus its own
/// (schema-id, version) pair. Carried in every part header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SchemaId {
    pub model_id: u32,
    pub schema_id: u16,
    pub version: u16,
}

impl SchemaId {
    pub const fn new(model_id: u32, schema_id: u16, version: u16) -> Self {
        Self {
            model_id,
            schema_id,
            version,
        }
    }
}

impl fmt::Display for SchemaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}v{}", self.model_id, self.schema_id, self.version)
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Schema construction failures. Construction aborts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    #[error("invalid column name {0:?}")]
    InvalidColumnName(String),

    #[error("duplicate column name \"{0}\"")]
    DuplicateColumn(String),

    #[error("schema {0} is sealed")]
    Sealed(SchemaId),

    #[error("invalid restriction: {0}")]
    InvalidRestriction(String),

    #[error("no column named \"{0}\" to factor out")]
    UnknownColumn(String),
}

/// Whole-record encode/decode failures. A partial result is never returned.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CodecError {
    #[error(transparent)]
    Value(#[from] ValueError),

    #[error(transparent)]
    Stream(#[from] BitIoError),

    #[error(transparent)]
    Definition(#[from] DefinitionError),

    #[error("record belongs to schema {actual}, expected {expected}")]
    SchemaMismatch { expected: SchemaId, actual: SchemaId },

    #[error("{bits} unread bits after the last column")]
    TrailingData { bits: usize },
}

// ── Factoring ─────────────────────────────────────────────────────────────────

/// Names of columns left off the wire because both ends know their values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FactoredColumns(BTreeSet<String>);

impl FactoredColumns {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>) -> Self {
        self.0.insert(name.into());
        self
    }

    pub fn insert(&mut self, name: impl Into<String>) -> bool {
        self.0.insert(name.into())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for FactoredColumns {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// Out-of-band values for factored-out columns, supplied by the receiver.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FactoredValues(BTreeMap<String, Option<Value>>);

impl FactoredValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(name.into(), Some(value.into()));
        self
    }

    pub fn with_null(mut self, name: impl Into<String>) -> Self {
        self.0.insert(name.into(), None);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Option<Value>) {
        self.0.insert(name.into(), value);
    }

    /// `None` if no value was supplied; `Some(None)` for an explicit null.
    pub fn get(&self, name: &str) -> Option<Option<&Value>> {
        self.0.get(name).map(Option::as_ref)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&Value>)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_ref()))
    }

    pub fn columns(&self) -> FactoredColumns {
        self.0.keys().cloned().collect()
    }

    /// Capture the sender-side values of `factored` from `record`.
    pub fn from_record(record: &Record, factored: &FactoredColumns) -> Result<Self, ValueError> {
        let mut values = Self::new();
        for name in factored.iter() {
            values.insert(name, record.get(name)?.cloned());
        }
        Ok(values)
    }
}

// ── Schema ────────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct Schema {
    id: SchemaId,
    name: String,
    columns: Vec<Column>,
    index: HashMap<String, usize>,
    sealed: AtomicBool,
}

impl Schema {
    pub fn new(id: SchemaId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            columns: Vec::new(),
            index: HashMap::new(),
            sealed: AtomicBool::new(false),
        }
    }

    pub fn with_columns<I>(id: SchemaId, name: impl Into<String>, columns: I) -> Result<Self, DefinitionError>
    where
        I: IntoIterator<Item = Column>,
    {
        let mut schema = Self::new(id, name);
        for column in columns {
            schema.add_column(column)?;
        }
        Ok(schema)
    }

    /// Append a column. Its name and the names of its virtual versions must
    /// not collide with any name already in the schema.
    pub fn add_column(&mut self, column: Column) -> Result<(), DefinitionError> {
        if self.is_sealed() {
            return Err(DefinitionError::Sealed(self.id));
        }
        let names = std::iter::once(column.name()).chain(column.virtual_versions().iter().map(VirtualColumn::name));
        for name in names {
            if self.has_name(name) {
                return Err(DefinitionError::DuplicateColumn(name.to_string()));
            }
        }
        self.index.insert(column.name().to_string(), self.columns.len());
        self.columns.push(column);
        Ok(())
    }

    fn has_name(&self, name: &str) -> bool {
        self.index.contains_key(name) || self.find_virtual(name).is_some()
    }

    /// Lock the column order. Idempotent.
    pub fn seal(&self) {
        self.sealed.store(true, Ordering::Release);
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    pub fn id(&self) -> SchemaId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.index_of(name).map(|i| &self.columns[i])
    }

    pub fn column_at(&self, index: usize) -> Option<&Column> {
        self.columns.get(index)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Virtual columns paired with the index of their source column.
    pub fn virtual_columns(&self) -> impl Iterator<Item = (usize, &VirtualColumn)> {
        self.columns
            .iter()
            .enumerate()
            .flat_map(|(i, c)| c.virtual_versions().iter().map(move |v| (i, v)))
    }

    pub fn find_virtual(&self, name: &str) -> Option<(usize, &VirtualColumn)> {
        self.virtual_columns().find(|(_, v)| v.name() == name)
    }

    // ── Sizes and factoring ──

    pub fn minimum_size(&self) -> usize {
        self.columns.iter().map(Column::minimum_size).sum()
    }

    pub fn maximum_size(&self) -> usize {
        self.columns.iter().map(Column::maximum_size).sum()
    }

    /// Min/max wire size in bits once `factored` columns are left off.
    pub fn size_bounds(&self, factored: &FactoredColumns) -> Result<(usize, usize), DefinitionError> {
        let (stored, _) = self.partition(factored)?;
        Ok((
            stored.iter().map(|c| c.minimum_size()).sum(),
            stored.iter().map(|c| c.maximum_size()).sum(),
        ))
    }

    /// Split the columns into (stored, factored out), both in wire order.
    pub fn partition(&self, factored: &FactoredColumns) -> Result<(Vec<&Column>, Vec<&Column>), DefinitionError> {
        self.check_factoring(factored)?;
        Ok(self.columns.iter().partition(|c| !factored.contains(c.name())))
    }

    fn check_factoring(&self, factored: &FactoredColumns) -> Result<(), DefinitionError> {
        match factored.iter().find(|name| self.index_of(name).is_none()) {
            Some(name) => Err(DefinitionError::UnknownColumn(name.to_string())),
            None => Ok(()),
        }
    }

    /// Exact number of bits [`encode`](Self::encode) writes before padding.
    pub fn encoded_size(&self, record: &Record, factored: &FactoredColumns) -> Result<usize, CodecError> {
        self.check_record(record)?;
        self.check_factoring(factored)?;
        let mut bits = 0;
        for (column, value) in self.columns.iter().zip(record.values()) {
            if !factored.contains(column.name()) {
                bits += column.encoded_size(value.as_ref())?;
            }
        }
        Ok(bits)
    }

    /// BLAKE3 over the id, the name and every column specification in wire order.
    pub fn fingerprint(&self) -> [u8; 32] {
        let mut hasher = Hasher::new();
        hasher.update(self.id.to_string().as_bytes());
        hasher.update(b"\n");
        hasher.update(self.name.as_bytes());
        for column in &self.columns {
            hasher.update(b"\n");
            hasher.update(column.specification().as_bytes());
            if let crate::column::ColumnKind::Record(nested) = column.kind() {
                hasher.update(&nested.fingerprint());
            }
        }
        hasher.finalize()
    }

    // ── Codec ──

    fn check_record(&self, record: &Record) -> Result<(), CodecError> {
        let other = record.schema();
        if std::ptr::eq(self, other.as_ref()) || self == other.as_ref() {
            Ok(())
        } else {
            Err(CodecError::SchemaMismatch {
                expected: self.id,
                actual: other.id(),
            })
        }
    }

    /// Serialize `record`, skipping `factored` columns. Seals the schema.
    pub fn encode(&self, record: &Record, factored: &FactoredColumns) -> Result<Vec<u8>, CodecError> {
        let mut writer = BitWriter::new();
        self.write_record(record, factored, &mut writer)?;
        Ok(writer.finish())
    }

    pub fn write_record(
        &self,
        record: &Record,
        factored: &FactoredColumns,
        writer: &mut BitWriter,
    ) -> Result<(), CodecError> {
        self.check_record(record)?;
        self.check_factoring(factored)?;
        self.seal();
        for (column, value) in self.columns.iter().zip(record.values()) {
            if !factored.contains(column.name()) {
                column.write_value(value.as_ref(), writer)?;
            }
        }
        Ok(())
    }

    /// Deserialize a record, then attach the out-of-band `factored` values.
    ///
    /// Every column named in `factored` is skipped on the wire. Padding must
    /// be shorter than a byte and all zero.
    pub fn decode(schema: &Arc<Schema>, bytes: &[u8], factored: &FactoredValues) -> Result<Record, CodecError> {
        let omitted = factored.columns();
        schema.check_factoring(&omitted)?;
        schema.seal();

        let mut reader = BitReader::new(bytes);
        let mut record = Self::read_values(schema, &mut reader, &omitted)?;

        let trailing = reader.bits_remaining();
        if trailing >= 8 || reader.read_bits(trailing)? != 0 {
            return Err(CodecError::TrailingData { bits: trailing });
        }

        for (name, value) in factored.iter() {
            record.set_optional(name, value.cloned())?;
        }
        Ok(record)
    }

    pub(crate) fn read_values(
        schema: &Arc<Schema>,
        reader: &mut BitReader<'_>,
        omitted: &FactoredColumns,
    ) -> Result<Record, CodecError> {
        let mut values = Vec::with_capacity(schema.columns.len());
        for column in &schema.columns {
            if omitted.contains(column.name()) {
                values.push(None);
            } else {
                values.push(column.read_value(reader)?);
            }
        }
        Ok(Record::from_values(Arc::clone(schema), values))
    }
}

impl Clone for Schema {
    /// The copy starts unsealed.
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            name: self.name.clone(),
            columns: self.columns.clone(),
            index: self.index.clone(),
            sealed: AtomicBool::new(false),
        }
    }
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.name == other.name && self.columns == other.columns
    }
}
