use bytes::Bytes;
use fieldcast_core::wire::PART_HEADER_SIZE;
use fieldcast_core::FactoredValues;
use fieldcast_services::{
    split, Delivery, Integrity, MemoryTransport, Part, PartSink, Reassembler, ReceiveError,
    TransmissionKey, TransmissionState,
};

use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Splitting and reassembly — order, duplicates, loss, resend
// ══════════════════════════════════════════════════════════════════════════════

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + 3) as u8).collect()
}

/// Deliver `parts` in `order` (1-based indices) and return the completed payload.
fn deliver(r: &Reassembler, sender: &str, parts: &[Part], order: &[u16]) -> Option<Bytes> {
    let mut completed = None;
    for index in order {
        let part = parts[*index as usize - 1].clone();
        if let Ok(Delivery::Complete { payload, integrity }) = r.receive(sender, part) {
            assert_eq!(integrity, Integrity::Verified);
            assert!(completed.is_none(), "completed twice");
            completed = Some(payload);
        }
    }
    completed
}

/// 25 bytes at 10 per part: 3 parts of 10, 10 and 5, delivered 3, 1, 2.
#[test]
fn test_twenty_five_bytes_in_three_parts() {
    init_tracing();
    let data = payload(25);
    let parts = split(SURVEY, 7, &data, 10).unwrap();

    assert_eq!(parts.len(), 3);
    assert_eq!(
        parts.iter().map(|p| p.fragment.len()).collect::<Vec<_>>(),
        [10, 10, 5]
    );
    assert!(parts.iter().all(|p| p.total == 3 && p.transmission_id == 7));

    let r = Reassembler::with_limit(8);
    let key = TransmissionKey::new("field-a", 7);

    assert!(matches!(
        r.receive("field-a", parts[2].clone()),
        Ok(Delivery::Stored { received: 1, total: 3 })
    ));
    assert!(matches!(
        r.receive("field-a", parts[0].clone()),
        Ok(Delivery::Stored { received: 2, total: 3 })
    ));
    assert_eq!(r.state(&key), Some(TransmissionState::Collecting));
    assert_eq!(r.missing_parts(&key), Some(vec![2]));

    match r.receive("field-a", parts[1].clone()) {
        Ok(Delivery::Complete { payload, .. }) => assert_eq!(&payload[..], &data[..]),
        other => panic!("expected completion, got {other:?}"),
    }
    assert_eq!(r.state(&key), Some(TransmissionState::Complete));
}

#[test]
fn test_any_order_with_one_duplicate_reassembles() {
    let r = Reassembler::with_limit(64);
    for (id, (len, capacity)) in [(0, 1), (1, 1), (17, 4), (64, 64), (65, 64), (300, 7)]
        .into_iter()
        .enumerate()
    {
        let data = payload(len);
        let parts = split(SURVEY, id as u32, &data, capacity).unwrap();
        let total = parts.len() as u16;

        // reversed, with the middle part delivered twice
        let mut order: Vec<u16> = (1..=total).rev().collect();
        order.insert(order.len() / 2, (total + 1) / 2);
        let got = deliver(&r, "sender", &parts, &order)
            .unwrap_or_else(|| panic!("{len} bytes at {capacity} never completed"));
        assert_eq!(&got[..], &data[..], "{len} bytes at {capacity}");
    }
}

#[test]
fn test_late_parts_do_not_alter_completed_payload() {
    let data = payload(40);
    let parts = split(SURVEY, 9, &data, 16).unwrap();
    let r = Reassembler::with_limit(4);
    let key = TransmissionKey::new("s", 9);

    let got = deliver(&r, "s", &parts, &[1, 2, 3]).unwrap();
    for part in &parts {
        assert_eq!(r.receive("s", part.clone()), Ok(Delivery::AlreadyComplete));
    }
    let stored = r.payload(&key).unwrap();
    assert_eq!(stored.payload, got);
    assert_eq!(stored.integrity, Integrity::Verified);
}

#[test]
fn test_conflicting_total_is_dropped() {
    let r = Reassembler::with_limit(4);
    let parts = split(SURVEY, 3, &payload(30), 10).unwrap();
    r.receive("s", parts[0].clone()).unwrap();

    let mut liar = parts[1].clone();
    liar.total = 4;
    assert!(matches!(
        r.receive("s", liar),
        Err(ReceiveError::TotalConflict { id: 3, expected: 3, got: 4 })
    ));
    assert_eq!(r.missing_parts(&TransmissionKey::new("s", 3)), Some(vec![2, 3]));
}

#[test]
fn test_same_id_from_different_senders_is_separate() {
    let r = Reassembler::with_limit(4);
    let a = split(SURVEY, 1, b"first sender payload", 8).unwrap();
    let b = split(SURVEY, 1, b"second", 8).unwrap();

    assert_eq!(deliver(&r, "b", &b, &[1]).as_deref(), Some(&b"second"[..]));
    assert_eq!(r.state(&TransmissionKey::new("a", 1)), None);
    assert_eq!(
        deliver(&r, "a", &a, &[3, 2, 1]).as_deref(),
        Some(&b"first sender payload"[..])
    );
}

#[test]
fn test_abandoned_transmission_drops_further_parts() {
    let r = Reassembler::with_limit(4);
    let parts = split(SURVEY, 5, &payload(20), 10).unwrap();
    let key = TransmissionKey::new("s", 5);

    r.receive("s", parts[0].clone()).unwrap();
    assert!(r.abandon(&key));
    assert_eq!(r.state(&key), Some(TransmissionState::Abandoned));
    assert_eq!(r.receive("s", parts[1].clone()), Ok(Delivery::Dropped));
    assert!(r.payload(&key).is_none());

    assert!(r.forget(&key));
    assert_eq!(r.state(&key), None);
}

/// Lose every third part, ask for what is missing, resend exactly that.
#[test]
fn test_lossy_link_recovers_through_resend() -> Result<()> {
    init_tracing();
    let capacity = PART_HEADER_SIZE + 6;
    let (_catalog, outbox, inbox) = endpoints(capacity)?;
    let link = MemoryTransport::new(capacity);
    let schema = survey_schema()?;

    let id = outbox.send(&full_survey(&schema)?, &link)?;
    let sent = link.take();
    assert!(sent.len() > 3);
    assert!(sent.iter().all(|(dest, bytes)| dest == "+15550142" && bytes.len() <= capacity));

    for (i, (_, bytes)) in sent.into_iter().enumerate() {
        if i % 3 != 2 {
            inbox.receive("+15550199", bytes)?;
        }
    }
    let key = TransmissionKey::new("+15550199", id);
    let missing = inbox.missing_parts(&key).unwrap_or_default();
    assert!(!missing.is_empty());
    assert!(missing.iter().all(|i| i % 3 == 0));

    assert_eq!(outbox.resend(id, &missing, &link)?, missing.len());
    for (_, bytes) in link.take() {
        inbox.receive("+15550199", bytes)?;
    }
    assert_eq!(inbox.state(&key), Some(TransmissionState::Complete));

    let values = FactoredValues::new().with("device_id", "tab-0042");
    assert_eq!(inbox.decode(&key, &values)?, full_survey(&schema)?);
    assert!(outbox.acknowledge(id));
    assert!(outbox.pending().is_empty());
    Ok(())
}

#[test]
fn test_oversized_parts_never_reach_the_transport() -> Result<()> {
    let (_catalog, outbox, _inbox) = endpoints(140)?;
    let narrow = MemoryTransport::new(PART_HEADER_SIZE + 4);
    assert!(narrow.capacity() < 140);

    let schema = survey_schema()?;
    assert!(outbox.send(&full_survey(&schema)?, &narrow).is_err());
    assert!(narrow.is_empty());
    assert!(outbox.pending().is_empty());
    Ok(())
}

/// A transmission that stops receiving parts shows up as stalled with its
/// missing indices; nothing happens to it until the caller abandons it.
#[test]
fn test_stalled_transmissions_are_reported_not_abandoned() -> Result<()> {
    let capacity = PART_HEADER_SIZE + 20;
    let (_catalog, outbox, inbox) = endpoints(capacity)?;
    let schema = survey_schema()?;
    let prepared = outbox.prepare(&full_survey(&schema)?)?;
    let total = prepared.parts.len() as u16;
    inbox.receive_part("s", prepared.parts[0].clone())?;

    std::thread::sleep(std::time::Duration::from_millis(30));
    let stalled = inbox.stalled_for(std::time::Duration::from_millis(10));
    assert_eq!(stalled.len(), 1);
    assert_eq!(stalled[0].key, TransmissionKey::new("s", prepared.id));
    assert_eq!(stalled[0].schema, SURVEY);
    assert_eq!(stalled[0].missing, (2..=total).collect::<Vec<_>>());
    assert!(inbox.stalled().is_empty(), "default timeout is an hour");

    let key = &stalled[0].key;
    assert_eq!(inbox.state(key), Some(TransmissionState::Collecting));
    assert!(inbox.abandon(key));
    assert!(inbox.stalled_for(std::time::Duration::ZERO).is_empty());
    Ok(())
}
