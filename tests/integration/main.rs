//! Fieldcast integration test harness.
//!
//! Everything runs in process: records go through an `Outbox`, parts cross
//! a `MemoryTransport` or a tokio channel, and come back out of an `Inbox`.
//!
//!   cargo test --test integration
//!
//! Set `RUST_LOG=fieldcast_services=debug` to see protocol events.

use std::sync::{Arc, Once};

use anyhow::Result;
use fieldcast_core::column::Column;
use fieldcast_core::config::{ReceiveSettings, TransmissionSettings};
use fieldcast_core::{FactoredColumns, Record, Schema, SchemaId, Value};
use fieldcast_services::{Inbox, ModelCatalog, Outbox, TransmissionIds};

mod concurrency;
mod fragmentation;
mod resolution;
mod roundtrip;

// ── Harness ───────────────────────────────────────────────────────────────────

static TRACING: Once = Once::new();

/// Install a test writer subscriber once per process.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub const SURVEY: SchemaId = SchemaId::new(42, 1, 3);
pub const LOCATION: SchemaId = SchemaId::new(42, 2, 1);

/// Nested location schema used by the survey's composite column.
pub fn location_schema() -> Result<Arc<Schema>> {
    let schema = Schema::with_columns(
        LOCATION,
        "location",
        [
            Column::integer_range("lat_e4", -900_000, 900_000, false)?,
            Column::integer_range("lon_e4", -1_800_000, 1_800_000, false)?,
            Column::float("accuracy", false, true)?,
        ],
    )?;
    Ok(Arc::new(schema))
}

/// A field survey exercising every column kind, a factored device id and a
/// virtual column.
pub fn survey_schema() -> Result<Arc<Schema>> {
    let mut age = Column::integer("age", 8, false, false)?;
    age.add_virtual_version(Column::choice("age_group", ["child", "adult"], false)?, |v| {
        v.as_int()
            .map(|a| Value::from(if a < 18 { "child" } else { "adult" }))
    })?;

    let schema = Schema::with_columns(
        SURVEY,
        "household_survey",
        [
            Column::ascii("device_id", 16, false)?,
            age,
            Column::boolean("consent", false)?,
            Column::choice("water_source", ["well", "river", "tap", "rain"], true)?,
            Column::integer("temperature", 12, true, true)?,
            Column::float("ph", true, true)?,
            Column::text("remarks", 120, true)?,
            Column::record("location", location_schema()?, true)?,
        ],
    )?;
    Ok(Arc::new(schema))
}

pub fn survey_factored() -> FactoredColumns {
    FactoredColumns::none().with("device_id")
}

pub fn location() -> Result<Record> {
    let mut loc = Record::new(location_schema()?);
    loc.set("lat_e4", -12_345)?;
    loc.set("lon_e4", 367_890)?;
    loc.set("accuracy", 4.5)?;
    Ok(loc)
}

pub fn full_survey(schema: &Arc<Schema>) -> Result<Record> {
    let mut r = Record::new(Arc::clone(schema));
    r.set("device_id", "tab-0042")?;
    r.set("age", 34)?;
    r.set("consent", true)?;
    r.set("water_source", "river")?;
    r.set("temperature", -17)?;
    r.set("ph", 6.8)?;
    r.set("remarks", "boil before drinking, well is dry since may")?;
    r.set("location", location()?)?;
    Ok(r)
}

/// Sender and receiver sharing one catalog, parts capped at `part_capacity`.
pub fn endpoints(part_capacity: usize) -> Result<(Arc<ModelCatalog>, Outbox, Inbox)> {
    let catalog = Arc::new(ModelCatalog::with_default_settings(TransmissionSettings {
        part_capacity,
        destination: "+15550142".into(),
        ..TransmissionSettings::default()
    }));
    catalog.register(survey_schema()?, survey_factored())?;
    let outbox = Outbox::with_ids(
        catalog.clone(),
        TransmissionSettings::default(),
        TransmissionIds::starting_at(1),
    );
    let inbox = Inbox::new(catalog.clone(), &ReceiveSettings::default());
    Ok((catalog, outbox, inbox))
}
