use std::sync::Arc;

use fieldcast_core::config::{ReceiveSettings, TransmissionSettings};
use fieldcast_core::FactoredValues;
use fieldcast_services::{
    CatalogError, DecodeError, Inbox, MemoryTransport, ModelCatalog, ModelProvider, Outbox,
    Resolved, TransmissionKey, UnknownModel,
};

use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Model resolution — unknown models, retained payloads, custom providers
// ══════════════════════════════════════════════════════════════════════════════

/// A receiver that has never seen the survey schema keeps the payload until
/// the schema is supplied, then decodes it.
#[test]
fn test_unknown_model_keeps_payload_for_retry() -> Result<()> {
    init_tracing();
    let (_sender_catalog, outbox, _) = endpoints(140)?;
    let link = MemoryTransport::new(140);
    let schema = survey_schema()?;
    let record = full_survey(&schema)?;
    let id = outbox.send(&record, &link)?;

    let receiver_catalog = Arc::new(ModelCatalog::new());
    let inbox = Inbox::new(receiver_catalog.clone(), &ReceiveSettings::default());
    for (_, bytes) in link.take() {
        inbox.receive("+15550142", bytes)?;
    }
    let key = TransmissionKey::new("+15550142", id);
    let values = FactoredValues::new().with("device_id", "tab-0042");

    assert_eq!(
        inbox.decode(&key, &values),
        Err(DecodeError::UnknownModel(UnknownModel { id: SURVEY }))
    );
    let retained = inbox.raw_payload(&key).expect("payload retained");
    assert_eq!(retained.schema, SURVEY);
    assert_eq!(
        &retained.payload[..],
        &schema.encode(&record, &survey_factored())?[..]
    );

    receiver_catalog.register(survey_schema()?, survey_factored())?;
    assert_eq!(inbox.decode(&key, &values)?, record);
    assert!(inbox.raw_payload(&key).is_none());
    Ok(())
}

#[test]
fn test_unknown_model_message_names_the_identifier() {
    let catalog = ModelCatalog::new();
    let err = catalog.resolve(&SURVEY).unwrap_err();
    assert_eq!(err.id, SURVEY);
    assert_eq!(err.to_string(), "unknown model 42:1v3");
}

#[test]
fn test_new_version_needs_its_own_registration() -> Result<()> {
    let (catalog, _, _) = endpoints(140)?;

    // same identifier, different definition
    let changed = Arc::new(fieldcast_core::Schema::with_columns(
        SURVEY,
        "household_survey",
        [fieldcast_core::column::Column::boolean("consent", false)?],
    )?);
    assert!(matches!(
        catalog.register(changed, fieldcast_core::FactoredColumns::none()),
        Err(CatalogError::Conflict { id }) if id == SURVEY
    ));
    assert_eq!(catalog.ids(), vec![SURVEY]);
    Ok(())
}

/// Providers backed by something other than the catalog plug straight in.
struct FixedProvider {
    schema: Arc<fieldcast_core::Schema>,
    settings: TransmissionSettings,
}

impl ModelProvider for FixedProvider {
    fn resolve(&self, id: &fieldcast_core::SchemaId) -> Result<Resolved, UnknownModel> {
        if *id == self.schema.id() {
            Ok(Resolved {
                schema: Arc::clone(&self.schema),
                factored: survey_factored(),
            })
        } else {
            Err(UnknownModel { id: *id })
        }
    }

    fn settings_for(&self, _schema: &fieldcast_core::Schema) -> Option<TransmissionSettings> {
        Some(self.settings.clone())
    }
}

#[test]
fn test_custom_provider_supplies_settings() -> Result<()> {
    let provider = Arc::new(FixedProvider {
        schema: survey_schema()?,
        settings: TransmissionSettings {
            part_capacity: 40,
            destination: "relay-3".into(),
            ..TransmissionSettings::default()
        },
    });
    let outbox = Outbox::new(provider.clone(), TransmissionSettings::default());
    let inbox = Inbox::new(provider, &ReceiveSettings::default());

    let schema = survey_schema()?;
    let prepared = outbox.prepare(&full_survey(&schema)?)?;
    assert_eq!(prepared.destination, "relay-3");
    assert!(prepared.parts.iter().all(|p| p.wire_len() <= 40));

    for part in prepared.parts {
        inbox.receive_part("relay-3", part)?;
    }
    let key = TransmissionKey::new("relay-3", prepared.id);
    let values = FactoredValues::new().with("device_id", "tab-0042");
    assert_eq!(inbox.decode(&key, &values)?, full_survey(&schema)?);
    Ok(())
}
