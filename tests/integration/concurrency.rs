use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use bytes::Bytes;
use fieldcast_core::FactoredValues;
use fieldcast_services::{split, Delivery, Reassembler, TransmissionKey, TransmissionState};

use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Concurrency — independent transmissions in parallel, one completion each
// ══════════════════════════════════════════════════════════════════════════════

const SENDERS: usize = 8;

/// Eight senders, each with its own transmissions, delivered from eight
/// threads at once. Every transmission completes exactly once.
#[test]
fn test_parallel_senders_complete_independently() {
    init_tracing();
    let r = Reassembler::with_limit(SENDERS * 4);
    let completions = AtomicUsize::new(0);

    thread::scope(|s| {
        for n in 0..SENDERS {
            let r = &r;
            let completions = &completions;
            s.spawn(move || {
                let sender = format!("device-{n}");
                for id in 0..4u32 {
                    let data: Vec<u8> = (0..200).map(|i| (i as u8) ^ (n as u8) ^ (id as u8)).collect();
                    let mut parts = split(SURVEY, id, &data, 9).unwrap();
                    parts.reverse();
                    for part in parts {
                        if let Ok(Delivery::Complete { payload, .. }) = r.receive(&sender, part) {
                            assert_eq!(&payload[..], &data[..]);
                            completions.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                }
            });
        }
    });

    assert_eq!(completions.load(Ordering::SeqCst), SENDERS * 4);
    assert_eq!(r.len(), SENDERS * 4);
    for key in r.keys() {
        assert_eq!(r.state(&key), Some(TransmissionState::Complete));
    }
}

/// Every thread delivers every part of the same transmission. Only one
/// delivery may observe the completion.
#[test]
fn test_racing_duplicates_complete_once() {
    let r = Reassembler::with_limit(4);
    let data = vec![0x5Au8; 500];
    let parts = split(SURVEY, 77, &data, 10).unwrap();
    let completions = AtomicUsize::new(0);

    thread::scope(|s| {
        for t in 0..6 {
            let r = &r;
            let parts = &parts;
            let completions = &completions;
            s.spawn(move || {
                // each thread walks the parts from a different starting point
                let n = parts.len();
                for i in 0..n {
                    let part = parts[(i + t * 7) % n].clone();
                    if let Ok(Delivery::Complete { .. }) = r.receive("shared", part) {
                        completions.fetch_add(1, Ordering::SeqCst);
                    }
                }
            });
        }
    });

    assert_eq!(completions.load(Ordering::SeqCst), 1);
    let stored = r.payload(&TransmissionKey::new("shared", 77)).unwrap();
    assert_eq!(stored.payload, Bytes::from(data));
}

/// Full records from several threads through one outbox and one inbox.
#[test]
fn test_shared_pipeline_across_threads() -> Result<()> {
    let (_catalog, outbox, inbox) = endpoints(48)?;
    let schema = survey_schema()?;

    let keys: Vec<TransmissionKey> = thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|n| {
                let (outbox, inbox, schema) = (&outbox, &inbox, &schema);
                s.spawn(move || -> Result<TransmissionKey> {
                    let mut record = full_survey(schema)?;
                    record.set("age", 20 + n)?;
                    let prepared = outbox.prepare(&record)?;
                    let sender = format!("+1555010{n}");
                    for part in prepared.parts.into_iter().rev() {
                        inbox.receive_part(&sender, part)?;
                    }
                    Ok(TransmissionKey::new(sender, prepared.id))
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("sender thread panicked"))
            .collect::<Result<Vec<_>>>()
    })?;

    let values = FactoredValues::new().with("device_id", "tab-0042");
    let mut ages = Vec::new();
    for key in &keys {
        let record = inbox.decode(key, &values)?;
        ages.extend(record.get("age")?.and_then(|v| v.as_int()));
    }
    ages.sort_unstable();
    assert_eq!(ages, [20, 21, 22, 23]);
    assert!(inbox.reassembler().is_empty());
    assert_eq!(outbox.pending().len(), 4);
    Ok(())
}
