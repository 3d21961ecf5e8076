//! Model resolution — mapping a part's schema identifier back to a schema.
//!
//! A receiver that only holds the (model, schema, version) triple from a
//! part header asks a [`ModelProvider`] for the schema and for the columns
//! it has to supply out of band. [`ModelCatalog`] is the in-process
//! provider; anything backed by a project store can implement the trait.

use std::sync::Arc;

use dashmap::DashMap;
use fieldcast_core::config::TransmissionSettings;
use fieldcast_core::schema::{DefinitionError, FactoredColumns, Schema, SchemaId};
use thiserror::Error;

/// What a receiver needs to decode a payload of one schema.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub schema: Arc<Schema>,
    /// Columns left off the wire, to be supplied by the caller.
    pub factored: FactoredColumns,
}

/// The identifier is not known locally. Always recoverable: supply the
/// schema and retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unknown model {id}")]
pub struct UnknownModel {
    pub id: SchemaId,
}

pub trait ModelProvider: Send + Sync {
    fn resolve(&self, id: &SchemaId) -> Result<Resolved, UnknownModel>;

    /// Per-schema transmission settings. `None` means use the caller's defaults.
    fn settings_for(&self, _schema: &Schema) -> Option<TransmissionSettings> {
        None
    }
}

// ── Catalog ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("schema {id} is already registered with a different definition")]
    Conflict { id: SchemaId },

    #[error(transparent)]
    Definition(#[from] DefinitionError),
}

struct CatalogEntry {
    schema: Arc<Schema>,
    factored: FactoredColumns,
    fingerprint: [u8; 32],
    settings: Option<TransmissionSettings>,
}

/// Concurrent in-memory model provider keyed by [`SchemaId`].
pub struct ModelCatalog {
    models: DashMap<SchemaId, CatalogEntry>,
    default_settings: TransmissionSettings,
}

impl ModelCatalog {
    pub fn new() -> Self {
        Self::with_default_settings(TransmissionSettings::default())
    }

    pub fn with_default_settings(default_settings: TransmissionSettings) -> Self {
        Self {
            models: DashMap::new(),
            default_settings,
        }
    }

    /// Register `schema` with the columns both ends know a priori. Seals it.
    ///
    /// Registering the same definition again is a no-op.
    pub fn register(&self, schema: Arc<Schema>, factored: FactoredColumns) -> Result<(), CatalogError> {
        self.insert(schema, factored, None)
    }

    pub fn register_with_settings(
        &self,
        schema: Arc<Schema>,
        factored: FactoredColumns,
        settings: TransmissionSettings,
    ) -> Result<(), CatalogError> {
        self.insert(schema, factored, Some(settings))
    }

    fn insert(
        &self,
        schema: Arc<Schema>,
        factored: FactoredColumns,
        settings: Option<TransmissionSettings>,
    ) -> Result<(), CatalogError> {
        schema.partition(&factored)?;
        schema.seal();
        let id = schema.id();
        let fingerprint = schema.fingerprint();

        match self.models.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(mut existing) => {
                let entry = existing.get_mut();
                if entry.fingerprint != fingerprint || entry.factored != factored {
                    tracing::warn!(
                        schema = %id,
                        registered = hex::encode(&entry.fingerprint[..8]),
                        offered = hex::encode(&fingerprint[..8]),
                        "conflicting schema registration refused"
                    );
                    return Err(CatalogError::Conflict { id });
                }
                if settings.is_some() {
                    entry.settings = settings;
                }
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                tracing::info!(
                    schema = %id,
                    name = schema.name(),
                    columns = schema.len(),
                    factored = factored.len(),
                    fingerprint = hex::encode(&fingerprint[..8]),
                    "schema registered"
                );
                slot.insert(CatalogEntry {
                    schema,
                    factored,
                    fingerprint,
                    settings,
                });
            }
        }
        Ok(())
    }

    pub fn unregister(&self, id: &SchemaId) -> bool {
        self.models.remove(id).is_some()
    }

    pub fn contains(&self, id: &SchemaId) -> bool {
        self.models.contains_key(id)
    }

    pub fn ids(&self) -> Vec<SchemaId> {
        let mut ids: Vec<SchemaId> = self.models.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelProvider for ModelCatalog {
    fn resolve(&self, id: &SchemaId) -> Result<Resolved, UnknownModel> {
        self.models
            .get(id)
            .map(|e| Resolved {
                schema: Arc::clone(&e.schema),
                factored: e.factored.clone(),
            })
            .ok_or(UnknownModel { id: *id })
    }

    fn settings_for(&self, schema: &Schema) -> Option<TransmissionSettings> {
        let settings = self
            .models
            .get(&schema.id())
            .and_then(|e| e.settings.clone())
            .unwrap_or_else(|| self.default_settings.clone());
        Some(settings)
    }
}
