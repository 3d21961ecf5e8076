//! Column model — typed, named, validating codecs for one record attribute.
//!
//! A [`Column`] pairs a sanitised name and an optionality flag with a
//! [`ColumnKind`], the closed set of value kinds the wire format knows how to
//! pack. Every kind knows its own validation rules, its bit layout and its
//! canonical text form. Optional columns spend exactly one presence bit in
//! front of the value; a cleared presence bit means no value bits follow.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::bitio::{bits_for, BitReader, BitWriter};
use crate::record::Record;
use crate::schema::{CodecError, DefinitionError, FactoredColumns, Schema};

/// Replacement for characters that may not appear in a column name.
pub const NAME_REPLACEMENT: char = '_';

// ── Values ────────────────────────────────────────────────────────────────────

/// A concrete value held by a record column.
///
/// `Choice` columns hold `Text`; `Record` columns hold a nested record.
/// Floats compare by bit pattern, so NaN equals NaN and `0.0` differs from `-0.0`.
#[derive(Debug, Clone)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Record(Box<Record>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Record(_) => "record",
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Value::Record(r) => Some(r),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => {
                a.to_bits() == b.to_bits() || (a.is_nan() && b.is_nan())
            }
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Record(a), Value::Record(b)) => a == b,
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Record> for Value {
    fn from(v: Record) -> Self {
        Value::Record(Box::new(v))
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Per-value failures. The offending input is rejected; the record stays usable.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValueError {
    #[error("missing value for required column \"{column}\"")]
    MissingRequired { column: String },

    #[error("column \"{column}\" expects {expected}, got {actual}")]
    TypeMismatch {
        column: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("invalid value for column \"{column}\": {reason}")]
    Invalid { column: String, reason: String },

    #[error("cannot parse {input:?} for column \"{column}\": {reason}")]
    Parse {
        column: String,
        input: String,
        reason: String,
    },

    #[error("no column named \"{0}\"")]
    UnknownColumn(String),
}

fn invalid(column: &str, reason: impl Into<String>) -> ValueError {
    ValueError::Invalid {
        column: column.to_string(),
        reason: reason.into(),
    }
}

// ── Kinds ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegerEncoding {
    /// Unsigned offset from the range minimum.
    Offset,
    /// Fixed-width two's complement.
    TwosComplement,
}

/// Inclusive integer domain and how it is packed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegerSpec {
    min: i64,
    max: i64,
    encoding: IntegerEncoding,
}

impl IntegerSpec {
    /// Any value in `min..=max`, packed in the fewest bits that cover the span.
    pub fn range(min: i64, max: i64) -> Result<Self, DefinitionError> {
        if min > max {
            return Err(DefinitionError::InvalidRestriction(format!(
                "integer range {min}..={max} is empty"
            )));
        }
        Ok(Self {
            min,
            max,
            encoding: IntegerEncoding::Offset,
        })
    }

    /// A fixed `width`-bit integer, signed (two's complement) or unsigned.
    pub fn bits(width: usize, signed: bool) -> Result<Self, DefinitionError> {
        if signed {
            if width == 0 || width > 64 {
                return Err(DefinitionError::InvalidRestriction(format!(
                    "signed integer width {width} outside 1..=64"
                )));
            }
            let max = ((1i128 << (width - 1)) - 1) as i64;
            Ok(Self {
                min: -max - 1,
                max,
                encoding: IntegerEncoding::TwosComplement,
            })
        } else {
            if width == 0 || width > 63 {
                return Err(DefinitionError::InvalidRestriction(format!(
                    "unsigned integer width {width} outside 1..=63"
                )));
            }
            Ok(Self {
                min: 0,
                max: ((1u64 << width) - 1) as i64,
                encoding: IntegerEncoding::Offset,
            })
        }
    }

    pub fn min(&self) -> i64 {
        self.min
    }

    pub fn max(&self) -> i64 {
        self.max
    }

    pub fn encoding(&self) -> IntegerEncoding {
        self.encoding
    }

    fn span(&self) -> u64 {
        (self.max as i128 - self.min as i128) as u64
    }

    pub fn width(&self) -> usize {
        match self.encoding {
            IntegerEncoding::Offset => bits_for(self.span()),
            IntegerEncoding::TwosComplement => bits_for(self.max as u64) + 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    /// 7 bits per character; only ASCII text is accepted.
    Ascii7,
}

impl TextEncoding {
    fn unit_bits(self) -> usize {
        match self {
            TextEncoding::Utf8 => 8,
            TextEncoding::Ascii7 => 7,
        }
    }
}

/// Length-prefixed text: `bits_for(max_len)` length bits, then the content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSpec {
    max_len: u32,
    encoding: TextEncoding,
}

impl TextSpec {
    pub fn new(max_len: u32, encoding: TextEncoding) -> Self {
        Self { max_len, encoding }
    }

    pub fn max_len(&self) -> u32 {
        self.max_len
    }

    pub fn encoding(&self) -> TextEncoding {
        self.encoding
    }

    fn length_bits(&self) -> usize {
        bits_for(self.max_len as u64)
    }
}

/// The closed set of column kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnKind {
    Boolean,
    Integer(IntegerSpec),
    Float { double: bool },
    Text(TextSpec),
    Choice(Vec<String>),
    Record(Arc<Schema>),
}

impl ColumnKind {
    pub fn integer_range(min: i64, max: i64) -> Result<Self, DefinitionError> {
        IntegerSpec::range(min, max).map(ColumnKind::Integer)
    }

    pub fn integer_bits(width: usize, signed: bool) -> Result<Self, DefinitionError> {
        IntegerSpec::bits(width, signed).map(ColumnKind::Integer)
    }

    pub fn text(max_len: u32) -> Self {
        ColumnKind::Text(TextSpec::new(max_len, TextEncoding::Utf8))
    }

    pub fn ascii(max_len: u32) -> Self {
        ColumnKind::Text(TextSpec::new(max_len, TextEncoding::Ascii7))
    }

    /// Options must be non-empty and distinct. The empty string is not an
    /// option since it reads back as null in the text form.
    pub fn choice<I, S>(options: I) -> Result<Self, DefinitionError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let options: Vec<String> = options.into_iter().map(Into::into).collect();
        if options.is_empty() {
            return Err(DefinitionError::InvalidRestriction(
                "choice column needs at least one option".into(),
            ));
        }
        for (i, option) in options.iter().enumerate() {
            if option.is_empty() {
                return Err(DefinitionError::InvalidRestriction(
                    "choice options must be non-empty".into(),
                ));
            }
            if options[..i].contains(option) {
                return Err(DefinitionError::InvalidRestriction(format!(
                    "duplicate choice option \"{option}\""
                )));
            }
        }
        Ok(ColumnKind::Choice(options))
    }

    /// Composite kind holding records of `schema`. Seals the nested schema.
    pub fn record(schema: Arc<Schema>) -> Self {
        schema.seal();
        ColumnKind::Record(schema)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ColumnKind::Boolean => "boolean",
            ColumnKind::Integer(_) => "integer",
            ColumnKind::Float { .. } => "float",
            ColumnKind::Text(_) | ColumnKind::Choice(_) => "text",
            ColumnKind::Record(_) => "record",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ColumnKind::Boolean => "Boolean",
            ColumnKind::Integer(_) => "Integer",
            ColumnKind::Float { .. } => "Float",
            ColumnKind::Text(_) => "Text",
            ColumnKind::Choice(_) => "Choice",
            ColumnKind::Record(_) => "Record",
        }
    }

    fn restriction(&self) -> String {
        match self {
            ColumnKind::Boolean => String::new(),
            ColumnKind::Integer(spec) => match spec.encoding {
                IntegerEncoding::Offset => format!("; {}..={}", spec.min, spec.max),
                IntegerEncoding::TwosComplement => {
                    format!("; {}..={} two's complement", spec.min, spec.max)
                }
            },
            ColumnKind::Float { double } => {
                if *double {
                    "; double".into()
                } else {
                    "; single".into()
                }
            }
            ColumnKind::Text(spec) => match spec.encoding {
                TextEncoding::Utf8 => format!("; max {} utf8", spec.max_len),
                TextEncoding::Ascii7 => format!("; max {} ascii7", spec.max_len),
            },
            ColumnKind::Choice(options) => format!("; {}", options.join("|")),
            ColumnKind::Record(schema) => format!("; schema {}", schema.id()),
        }
    }

    pub fn min_bits(&self) -> usize {
        match self {
            ColumnKind::Boolean => 1,
            ColumnKind::Integer(spec) => spec.width(),
            ColumnKind::Float { double } => float_bits(*double),
            ColumnKind::Text(spec) => spec.length_bits(),
            ColumnKind::Choice(options) => bits_for(options.len() as u64 - 1),
            ColumnKind::Record(schema) => schema.minimum_size(),
        }
    }

    pub fn max_bits(&self) -> usize {
        match self {
            ColumnKind::Text(spec) => {
                spec.length_bits() + spec.max_len as usize * spec.encoding.unit_bits()
            }
            ColumnKind::Record(schema) => schema.maximum_size(),
            other => other.min_bits(),
        }
    }

    fn value_bits(&self, value: &Value) -> Result<usize, CodecError> {
        match (self, value) {
            (ColumnKind::Text(spec), Value::Text(s)) => {
                Ok(spec.length_bits() + text_len(spec, s) * spec.encoding.unit_bits())
            }
            (ColumnKind::Record(schema), Value::Record(r)) => {
                schema.encoded_size(r, &FactoredColumns::none())
            }
            (kind, _) => Ok(kind.min_bits()),
        }
    }

    fn check_type(&self, column: &str, value: &Value) -> Result<(), ValueError> {
        let matches = matches!(
            (self, value),
            (ColumnKind::Boolean, Value::Bool(_))
                | (ColumnKind::Integer(_), Value::Int(_))
                | (ColumnKind::Float { .. }, Value::Float(_))
                | (ColumnKind::Text(_), Value::Text(_))
                | (ColumnKind::Choice(_), Value::Text(_))
                | (ColumnKind::Record(_), Value::Record(_))
        );
        if matches {
            Ok(())
        } else {
            Err(ValueError::TypeMismatch {
                column: column.to_string(),
                expected: self.type_name(),
                actual: value.type_name(),
            })
        }
    }

    fn validate(&self, column: &str, value: &Value) -> Result<(), ValueError> {
        self.check_type(column, value)?;
        match (self, value) {
            (ColumnKind::Integer(spec), Value::Int(v)) => {
                if *v < spec.min || *v > spec.max {
                    return Err(invalid(
                        column,
                        format!("{v} outside {}..={}", spec.min, spec.max),
                    ));
                }
            }
            (ColumnKind::Float { double: false }, Value::Float(v)) => {
                if !v.is_nan() && (*v as f32) as f64 != *v {
                    return Err(invalid(
                        column,
                        format!("{v} is not representable in single precision"),
                    ));
                }
            }
            (ColumnKind::Text(spec), Value::Text(s)) => {
                if spec.encoding == TextEncoding::Ascii7 && !s.is_ascii() {
                    return Err(invalid(column, "text contains non-ASCII characters"));
                }
                let len = text_len(spec, s);
                if len > spec.max_len as usize {
                    return Err(invalid(
                        column,
                        format!("length {len} exceeds maximum {}", spec.max_len),
                    ));
                }
            }
            (ColumnKind::Choice(options), Value::Text(s)) => {
                if !options.contains(s) {
                    return Err(invalid(column, format!("\"{s}\" is not one of the options")));
                }
            }
            (ColumnKind::Record(schema), Value::Record(record)) => {
                if !Arc::ptr_eq(schema, record.schema()) && **schema != **record.schema() {
                    return Err(invalid(
                        column,
                        format!(
                            "nested record belongs to schema {}, expected {}",
                            record.schema().id(),
                            schema.id()
                        ),
                    ));
                }
                if let Some(missing) = record.missing_required().first() {
                    return Err(invalid(
                        column,
                        format!("nested record is missing required column \"{missing}\""),
                    ));
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn write(&self, column: &str, value: &Value, writer: &mut BitWriter) -> Result<(), CodecError> {
        match (self, value) {
            (ColumnKind::Boolean, Value::Bool(b)) => writer.write_bit(*b)?,
            (ColumnKind::Integer(spec), Value::Int(v)) => match spec.encoding {
                IntegerEncoding::Offset => {
                    let offset = (*v as i128 - spec.min as i128) as u64;
                    writer.write_bits(offset, spec.width())?
                }
                IntegerEncoding::TwosComplement => writer.write_signed(*v, spec.width())?,
            },
            (ColumnKind::Float { double: true }, Value::Float(v)) => {
                writer.write_bits(v.to_bits(), 64)?
            }
            (ColumnKind::Float { double: false }, Value::Float(v)) => {
                writer.write_bits((*v as f32).to_bits() as u64, 32)?
            }
            (ColumnKind::Text(spec), Value::Text(s)) => {
                writer.write_bits(text_len(spec, s) as u64, spec.length_bits())?;
                match spec.encoding {
                    TextEncoding::Utf8 => writer.write_bytes(s.as_bytes())?,
                    TextEncoding::Ascii7 => {
                        for byte in s.bytes() {
                            writer.write_bits(byte as u64, 7)?;
                        }
                    }
                }
            }
            (ColumnKind::Choice(options), Value::Text(s)) => {
                let index = options
                    .iter()
                    .position(|o| o == s)
                    .ok_or_else(|| invalid(column, format!("\"{s}\" is not one of the options")))?;
                writer.write_bits(index as u64, self.min_bits())?
            }
            (ColumnKind::Record(schema), Value::Record(record)) => {
                schema.write_record(record, &FactoredColumns::none(), writer)?
            }
            (kind, value) => {
                return Err(ValueError::TypeMismatch {
                    column: column.to_string(),
                    expected: kind.type_name(),
                    actual: value.type_name(),
                }
                .into())
            }
        }
        Ok(())
    }

    fn read(&self, column: &str, reader: &mut BitReader<'_>) -> Result<Value, CodecError> {
        let value = match self {
            ColumnKind::Boolean => Value::Bool(reader.read_bit()?),
            ColumnKind::Integer(spec) => match spec.encoding {
                IntegerEncoding::Offset => {
                    let offset = reader.read_bits(spec.width())?;
                    let v = spec.min as i128 + offset as i128;
                    if v > spec.max as i128 {
                        return Err(invalid(
                            column,
                            format!("decoded {v} outside {}..={}", spec.min, spec.max),
                        )
                        .into());
                    }
                    Value::Int(v as i64)
                }
                IntegerEncoding::TwosComplement => Value::Int(reader.read_signed(spec.width())?),
            },
            ColumnKind::Float { double: true } => {
                Value::Float(f64::from_bits(reader.read_bits(64)?))
            }
            ColumnKind::Float { double: false } => {
                Value::Float(f32::from_bits(reader.read_bits(32)? as u32) as f64)
            }
            ColumnKind::Text(spec) => {
                let len = reader.read_bits(spec.length_bits())? as usize;
                if len > spec.max_len as usize {
                    return Err(invalid(
                        column,
                        format!("decoded length {len} exceeds maximum {}", spec.max_len),
                    )
                    .into());
                }
                let text = match spec.encoding {
                    TextEncoding::Utf8 => String::from_utf8(reader.read_bytes(len)?)
                        .map_err(|e| invalid(column, format!("invalid UTF-8: {e}")))?,
                    TextEncoding::Ascii7 => {
                        let mut s = String::with_capacity(len);
                        for _ in 0..len {
                            s.push(reader.read_bits(7)? as u8 as char);
                        }
                        s
                    }
                };
                Value::Text(text)
            }
            ColumnKind::Choice(options) => {
                let index = reader.read_bits(self.min_bits())? as usize;
                let option = options.get(index).ok_or_else(|| {
                    invalid(column, format!("choice index {index} out of range"))
                })?;
                Value::Text(option.clone())
            }
            ColumnKind::Record(schema) => {
                let record = Schema::read_values(schema, reader, &FactoredColumns::none())?;
                Value::Record(Box::new(record))
            }
        };
        Ok(value)
    }

    fn parse(&self, column: &str, text: &str) -> Result<Value, ValueError> {
        let fail = |reason: String| ValueError::Parse {
            column: column.to_string(),
            input: text.to_string(),
            reason,
        };
        match self {
            ColumnKind::Boolean => match text.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(Value::Bool(true)),
                "false" | "0" => Ok(Value::Bool(false)),
                _ => Err(fail("expected true or false".into())),
            },
            ColumnKind::Integer(_) => text
                .trim()
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|e| fail(e.to_string())),
            ColumnKind::Float { .. } => text
                .trim()
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|e| fail(e.to_string())),
            ColumnKind::Text(_) | ColumnKind::Choice(_) => Ok(Value::Text(text.to_string())),
            ColumnKind::Record(schema) => Record::parse_text(schema, text)
                .map(|r| Value::Record(Box::new(r)))
                .map_err(|e| fail(e.to_string())),
        }
    }

    fn to_text(&self, value: &Value) -> String {
        match value {
            Value::Bool(b) => b.to_string(),
            Value::Int(v) => v.to_string(),
            Value::Float(v) => v.to_string(),
            Value::Text(s) => s.clone(),
            Value::Record(r) => r.to_text(),
        }
    }
}

fn float_bits(double: bool) -> usize {
    if double {
        64
    } else {
        32
    }
}

fn text_len(spec: &TextSpec, s: &str) -> usize {
    match spec.encoding {
        TextEncoding::Utf8 => s.len(),
        TextEncoding::Ascii7 => s.chars().count(),
    }
}

// ── Virtual columns ───────────────────────────────────────────────────────────

/// Pure derivation from a source value to a virtual value.
pub type ValueMapper = Arc<dyn Fn(&Value) -> Option<Value> + Send + Sync>;

/// A column whose value is computed from its source column on every read.
///
/// The target definition types the derived value; nothing is ever stored
/// or transmitted for it.
#[derive(Clone)]
pub struct VirtualColumn {
    target: Column,
    mapper: ValueMapper,
}

impl VirtualColumn {
    pub fn target(&self) -> &Column {
        &self.target
    }

    pub fn name(&self) -> &str {
        self.target.name()
    }

    /// Derive the virtual value from a present source value.
    pub fn derive(&self, source: &Value) -> Result<Option<Value>, ValueError> {
        let derived = (self.mapper)(source);
        self.target.check(derived.as_ref())?;
        Ok(derived)
    }
}

impl fmt::Debug for VirtualColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualColumn")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

impl PartialEq for VirtualColumn {
    fn eq(&self, other: &Self) -> bool {
        self.target == other.target
    }
}

// ── Column ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    name: String,
    optional: bool,
    kind: ColumnKind,
    virtuals: Vec<VirtualColumn>,
}

impl Column {
    pub fn new(
        name: impl Into<String>,
        kind: ColumnKind,
        optional: bool,
    ) -> Result<Self, DefinitionError> {
        let name = name.into();
        if !is_valid_name(&name) {
            return Err(DefinitionError::InvalidColumnName(name));
        }
        Ok(Self {
            name,
            optional,
            kind,
            virtuals: Vec::new(),
        })
    }

    pub fn boolean(name: impl Into<String>, optional: bool) -> Result<Self, DefinitionError> {
        Self::new(name, ColumnKind::Boolean, optional)
    }

    pub fn integer(
        name: impl Into<String>,
        width: usize,
        signed: bool,
        optional: bool,
    ) -> Result<Self, DefinitionError> {
        Self::new(name, ColumnKind::integer_bits(width, signed)?, optional)
    }

    pub fn integer_range(
        name: impl Into<String>,
        min: i64,
        max: i64,
        optional: bool,
    ) -> Result<Self, DefinitionError> {
        Self::new(name, ColumnKind::integer_range(min, max)?, optional)
    }

    pub fn float(
        name: impl Into<String>,
        double: bool,
        optional: bool,
    ) -> Result<Self, DefinitionError> {
        Self::new(name, ColumnKind::Float { double }, optional)
    }

    pub fn text(
        name: impl Into<String>,
        max_len: u32,
        optional: bool,
    ) -> Result<Self, DefinitionError> {
        Self::new(name, ColumnKind::text(max_len), optional)
    }

    pub fn ascii(
        name: impl Into<String>,
        max_len: u32,
        optional: bool,
    ) -> Result<Self, DefinitionError> {
        Self::new(name, ColumnKind::ascii(max_len), optional)
    }

    pub fn choice<I, S>(
        name: impl Into<String>,
        options: I,
        optional: bool,
    ) -> Result<Self, DefinitionError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(name, ColumnKind::choice(options)?, optional)
    }

    pub fn record(
        name: impl Into<String>,
        schema: Arc<Schema>,
        optional: bool,
    ) -> Result<Self, DefinitionError> {
        Self::new(name, ColumnKind::record(schema), optional)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    pub fn kind(&self) -> &ColumnKind {
        &self.kind
    }

    // ── Validation ──

    /// Check a non-null value against the declared type and restrictions.
    pub fn validate(&self, value: &Value) -> Result<(), ValueError> {
        self.kind.validate(&self.name, value)
    }

    /// Nullability first, then [`validate`](Self::validate).
    pub fn check(&self, value: Option<&Value>) -> Result<(), ValueError> {
        match value {
            None if self.optional => Ok(()),
            None => Err(ValueError::MissingRequired {
                column: self.name.clone(),
            }),
            Some(v) => self.validate(v),
        }
    }

    pub fn is_valid_value(&self, value: Option<&Value>) -> bool {
        self.check(value).is_ok()
    }

    // ── Binary ──

    pub fn write_value(
        &self,
        value: Option<&Value>,
        writer: &mut BitWriter,
    ) -> Result<(), CodecError> {
        self.check(value)?;
        if self.optional {
            writer.write_bit(value.is_some())?;
        }
        match value {
            Some(v) => self.kind.write(&self.name, v, writer),
            None => Ok(()),
        }
    }

    pub fn read_value(&self, reader: &mut BitReader<'_>) -> Result<Option<Value>, CodecError> {
        if self.optional && !reader.read_bit()? {
            return Ok(None);
        }
        let value = self.kind.read(&self.name, reader)?;
        self.validate(&value)?;
        Ok(Some(value))
    }

    /// Encode a single value into its own zero-padded byte buffer.
    pub fn to_bytes(&self, value: Option<&Value>) -> Result<Vec<u8>, CodecError> {
        let mut writer = BitWriter::new();
        self.write_value(value, &mut writer)?;
        Ok(writer.finish())
    }

    pub fn from_bytes(&self, bytes: &[u8]) -> Result<Option<Value>, CodecError> {
        self.read_value(&mut BitReader::new(bytes))
    }

    /// The value as a receiver would see it after a binary round trip.
    pub fn value_as_stored_binary(
        &self,
        value: Option<&Value>,
    ) -> Result<Option<Value>, CodecError> {
        self.from_bytes(&self.to_bytes(value)?)
    }

    // ── Text ──

    pub fn parse(&self, text: &str) -> Result<Value, ValueError> {
        let value = self.kind.parse(&self.name, text)?;
        self.validate(&value)?;
        Ok(value)
    }

    /// Like [`parse`](Self::parse), but the empty string means null.
    pub fn parse_optional(&self, text: &str) -> Result<Option<Value>, ValueError> {
        if text.is_empty() {
            self.check(None)?;
            return Ok(None);
        }
        self.parse(text).map(Some)
    }

    pub fn to_text(&self, value: &Value) -> Result<String, ValueError> {
        self.kind.check_type(&self.name, value)?;
        Ok(self.kind.to_text(value))
    }

    // ── Sizes ──

    /// Minimum encoded size in bits, presence bit included.
    pub fn minimum_size(&self) -> usize {
        if self.optional {
            1
        } else {
            self.kind.min_bits()
        }
    }

    /// Maximum encoded size in bits, presence bit included.
    pub fn maximum_size(&self) -> usize {
        self.optional as usize + self.kind.max_bits()
    }

    pub fn is_variable_size(&self) -> bool {
        self.optional || self.kind.min_bits() != self.kind.max_bits()
    }

    /// Bits actually spent on `value` by [`write_value`](Self::write_value).
    pub fn encoded_size(&self, value: Option<&Value>) -> Result<usize, CodecError> {
        let value_bits = match value {
            Some(v) => self.kind.value_bits(v)?,
            None => 0,
        };
        Ok(self.optional as usize + value_bits)
    }

    pub fn specification(&self) -> String {
        let mut spec = format!(
            "{}Column:{} [{}; {}{} bits{}]",
            self.kind.label(),
            self.name,
            if self.optional { "optional" } else { "required" },
            self.minimum_size(),
            if self.is_variable_size() {
                format!("-{}", self.maximum_size())
            } else {
                String::new()
            },
            self.kind.restriction(),
        );
        for v in &self.virtuals {
            spec.push_str(&format!(" +virtual({})", v.target.specification()));
        }
        spec
    }

    // ── Virtual versions ──

    /// Attach a derived column computed from this column's value.
    pub fn add_virtual_version<F>(&mut self, target: Column, mapper: F) -> Result<(), DefinitionError>
    where
        F: Fn(&Value) -> Option<Value> + Send + Sync + 'static,
    {
        if target.name == self.name || self.virtual_version(&target.name).is_some() {
            return Err(DefinitionError::DuplicateColumn(target.name));
        }
        self.virtuals.push(VirtualColumn {
            target,
            mapper: Arc::new(mapper),
        });
        Ok(())
    }

    pub fn virtual_versions(&self) -> &[VirtualColumn] {
        &self.virtuals
    }

    pub fn virtual_version(&self, target_name: &str) -> Option<&VirtualColumn> {
        self.virtuals.iter().find(|v| v.name() == target_name)
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}Column:{}", self.kind.label(), self.name)
    }
}

// ── Names ─────────────────────────────────────────────────────────────────────

fn is_illegal_name_char(c: char) -> bool {
    c.is_control()
        || matches!(
            c,
            '.' | ','
                | '?'
                | '!'
                | ':'
                | ';'
                | '\''
                | '"'
                | '/'
                | '\\'
                | '@'
                | '('
                | ')'
                | '['
                | ']'
                | '{'
                | '}'
                | '&'
                | '%'
                | '$'
                | '£'
                | '+'
                | '*'
                | '#'
                | '|'
                | '~'
                | ' '
        )
}

/// Deterministically turn `name` into a legal column name.
///
/// Illegal characters become `_`, except trailing ones which are dropped.
/// A leading `-` counts as illegal. A result that does not start with a
/// letter or `_` gets a `_` prefix.
pub fn sanitise_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 1);
    let mut pending = 0usize;
    for c in name.chars() {
        if is_illegal_name_char(c) || (c == '-' && out.is_empty()) {
            pending += 1;
            continue;
        }
        out.extend(std::iter::repeat(NAME_REPLACEMENT).take(pending));
        pending = 0;
        out.push(c);
    }
    if !out.starts_with(|c: char| c.is_alphabetic() || c == NAME_REPLACEMENT) {
        out.insert(0, NAME_REPLACEMENT);
    }
    out
}

pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && sanitise_name(name) == name
}
