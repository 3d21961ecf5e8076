use std::sync::Arc;

use fieldcast_core::column::Column;
use fieldcast_core::{FactoredColumns, FactoredValues, Record, Schema, SchemaId, Value};

use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Record codec — round trip, bit-exactness, boundary sizes
// ══════════════════════════════════════════════════════════════════════════════

fn device() -> FactoredValues {
    FactoredValues::new().with("device_id", "tab-0042")
}

#[test]
fn test_full_record_round_trip() -> Result<()> {
    init_tracing();
    let schema = survey_schema()?;
    let record = full_survey(&schema)?;

    let bytes = schema.encode(&record, &survey_factored())?;
    let decoded = Schema::decode(&schema, &bytes, &device())?;

    assert_eq!(decoded, record);
    assert_eq!(decoded.get("location")?, record.get("location")?);
    assert_eq!(decoded.virtual_value("age_group")?, Some(Value::from("adult")));
    Ok(())
}

#[test]
fn test_nulls_survive_round_trip() -> Result<()> {
    let schema = survey_schema()?;
    let mut record = Record::new(Arc::clone(&schema));
    record.set("device_id", "tab-0042")?;
    record.set("age", 9)?;
    record.set("consent", false)?;
    assert!(record.is_complete());

    let bytes = schema.encode(&record, &survey_factored())?;
    let decoded = Schema::decode(&schema, &bytes, &device())?;

    assert_eq!(decoded, record);
    for name in ["water_source", "temperature", "ph", "remarks", "location"] {
        assert_eq!(decoded.get(name)?, None, "{name} should be null");
    }
    assert_eq!(decoded.virtual_value("age_group")?, Some(Value::from("child")));
    Ok(())
}

#[test]
fn test_encoding_is_deterministic_and_sized_exactly() -> Result<()> {
    let schema = survey_schema()?;
    let record = full_survey(&schema)?;
    let factored = survey_factored();

    let first = schema.encode(&record, &factored)?;
    let second = schema.encode(&record, &factored)?;
    assert_eq!(first, second);

    let mut bits = 0;
    for (column, value) in schema.columns().iter().zip(record.values()) {
        if !factored.contains(column.name()) {
            bits += column.encoded_size(value.as_ref())?;
        }
    }
    assert_eq!(schema.encoded_size(&record, &factored)?, bits);
    assert_eq!(first.len(), bits.div_ceil(8));

    // factoring out device_id saves exactly its encoded size
    let unfactored = schema.encoded_size(&record, &FactoredColumns::none())?;
    let device_bits = schema
        .column("device_id")
        .map(|c| c.encoded_size(record.get("device_id").ok().flatten()))
        .transpose()?
        .unwrap_or(0);
    assert_eq!(unfactored, bits + device_bits);
    Ok(())
}

/// One required 8-bit integer and one optional string: {42, null} is 9 bits.
#[test]
fn test_boundary_record_is_nine_bits() -> Result<()> {
    let schema = Arc::new(Schema::with_columns(
        SchemaId::new(1, 1, 1),
        "boundary",
        [
            Column::integer("n", 8, false, false)?,
            Column::text("s", 32, true)?,
        ],
    )?);
    let mut record = Record::new(Arc::clone(&schema));
    record.set("n", 42)?;

    let none = FactoredColumns::none();
    assert_eq!(schema.encoded_size(&record, &none)?, 9);
    let bytes = schema.encode(&record, &none)?;
    assert_eq!(bytes, [42, 0]);

    let decoded = Schema::decode(&schema, &bytes, &FactoredValues::new())?;
    assert_eq!(decoded.get("n")?, Some(&Value::Int(42)));
    assert_eq!(decoded.get("s")?, None);
    Ok(())
}

#[test]
fn test_size_bounds_cover_actual_sizes() -> Result<()> {
    let schema = survey_schema()?;
    let factored = survey_factored();
    let (min, max) = schema.size_bounds(&factored)?;
    let full = schema.encoded_size(&full_survey(&schema)?, &factored)?;
    assert!(min <= full && full <= max, "{min} <= {full} <= {max}");
    Ok(())
}

#[test]
fn test_text_and_json_exports() -> Result<()> {
    let schema = survey_schema()?;
    let record = full_survey(&schema)?;

    let text = record.to_text();
    assert!(text.starts_with("tab-0042,34,true,river,"));
    assert_eq!(Record::parse_text(&schema, &text)?, record);

    let json = record.to_json();
    assert_eq!(json["age"], serde_json::json!(34));
    assert_eq!(json["age_group"], serde_json::json!("adult"));
    assert_eq!(json["location"]["lat_e4"], serde_json::json!(-12_345));
    assert!(json["remarks"].as_str().is_some_and(|s| s.contains(',')));
    Ok(())
}

#[test]
fn test_copies_are_independent() -> Result<()> {
    let schema = survey_schema()?;
    let original = full_survey(&schema)?;
    let mut copy = original.clone();
    copy.set("remarks", "revised")?;
    copy.clear("location")?;

    assert_ne!(copy, original);
    assert!(original.get("location")?.is_some());
    Ok(())
}

#[test]
fn test_nan_readings_round_trip() -> Result<()> {
    let schema = Arc::new(Schema::with_columns(
        SchemaId::new(1, 2, 1),
        "sensor",
        [
            Column::float("wide", true, false)?,
            Column::float("narrow", false, true)?,
        ],
    )?);
    let mut record = Record::new(Arc::clone(&schema));
    record.set("wide", f64::NAN)?;
    record.set("narrow", f64::NAN)?;
    assert_eq!(record, record.clone());

    let none = FactoredColumns::none();
    let bytes = schema.encode(&record, &none)?;
    assert_eq!(schema.encoded_size(&record, &none)?, 64 + 1 + 32);
    assert_eq!(Schema::decode(&schema, &bytes, &FactoredValues::new())?, record);
    Ok(())
}
