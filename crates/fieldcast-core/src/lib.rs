//! fieldcast-core — typed record model, bit-level codec and part wire format.
//! All other Fieldcast crates depend on this one.

pub mod bitio;
pub mod column;
pub mod config;
pub mod digest;
pub mod record;
pub mod schema;
pub mod wire;

pub use column::{Column, ColumnKind, Value, ValueError};
pub use config::{FieldcastConfig, ReceiveSettings, TransmissionSettings};
pub use record::Record;
pub use schema::{CodecError, DefinitionError, FactoredColumns, FactoredValues, Schema, SchemaId};
