//! End-to-end behavior on the reference bar sequences, through the public
//! API only.

use swing_strata::config::{DetectorConfig, ReferenceConfig};
use swing_strata::detector::LegDetector;
use swing_strata::domain::{Bar, Direction, Scale};
use swing_strata::events::{EventKind, InvalidationRule, PruneReason};
use swing_strata::reference::ReferenceLayer;

fn bar(index: u64, o: f64, h: f64, l: f64, c: f64) -> Bar {
    Bar::new(index, index as i64 * 60_000, o, h, l, c)
}

fn drive(detector: &mut LegDetector, bars: &[Bar]) -> Vec<swing_strata::StructuralEvent> {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut events = Vec::new();
    for b in bars {
        events.extend(detector.advance(b).expect("valid bar"));
    }
    events
}

/// L1=100 -> H1=150 -> L2=120 -> H2=160: after flattening, one projected
/// bull leg 100 -> 160; the 150 -> 120 retrace survives as a projecting
/// dead sub-branch until staleness.
#[test]
fn scenario_one_single_projected_leg() {
    let mut detector = LegDetector::new(Scale::M, DetectorConfig::with_defaults());
    drive(
        &mut detector,
        &[
            bar(0, 106.0, 106.0, 100.0, 100.5),
            bar(1, 101.0, 150.0, 100.5, 148.0),
            bar(2, 148.0, 149.0, 120.0, 122.0),
            bar(3, 122.0, 160.0, 121.0, 158.0),
        ],
    );

    let projected = detector.flattened_view();
    assert_eq!(projected.len(), 1);
    assert_eq!(projected[0].direction, Direction::Bull);
    assert_eq!(projected[0].origin.price, 100.0);
    assert_eq!(projected[0].pivot.price, 160.0);

    let retrace_id = {
        let legs = detector.snapshot();
        let retrace = legs
            .iter()
            .find(|l| l.origin.price == 150.0 && l.pivot.price == 120.0)
            .expect("non-projecting sub-branch retained");
        assert!(!retrace.is_alive());
        retrace.id
    };

    // Staleness eventually removes the dead retrace: 3x its 30-point range
    // past its 150 origin means trade above 240.
    let events = drive(
        &mut detector,
        &[
            bar(4, 158.0, 200.0, 157.0, 199.0),
            bar(5, 199.0, 245.0, 198.0, 244.0),
        ],
    );
    assert!(events.iter().any(|e| matches!(
        e.kind,
        EventKind::LegPruned {
            leg_id,
            reason: PruneReason::StaleExtension,
        } if leg_id == retrace_id
    )));
}

/// H3=200 -> L3=150 -> H4=190 -> L4=160 -> H5=210: L4 -> H5 is pruned once
/// L3 -> H5 is available.
#[test]
fn scenario_two_inner_partner_pruned() {
    let mut detector = LegDetector::new(Scale::M, DetectorConfig::with_defaults());
    let events = drive(
        &mut detector,
        &[
            bar(0, 196.0, 200.0, 195.0, 199.0),
            bar(1, 199.0, 199.0, 150.0, 152.0),
            bar(2, 152.0, 190.0, 151.0, 188.0),
            bar(3, 188.0, 189.0, 160.0, 162.0),
            bar(4, 162.0, 210.0, 161.0, 208.0),
        ],
    );

    let legs = detector.snapshot();
    assert!(
        legs.iter()
            .any(|l| l.origin.price == 150.0 && l.pivot.price == 210.0)
    );
    assert!(
        !legs
            .iter()
            .any(|l| l.origin.price == 160.0 && l.pivot.price == 210.0)
    );

    // Both partners existed transiently within the bar.
    let created_inner = events.iter().any(|e| {
        matches!(e.kind, EventKind::LegCreated { origin, pivot, .. }
            if origin == 160.0 && pivot == 210.0)
    });
    assert!(created_inner, "inner partner must be created before pruning");
}

/// Bull swing origin=5000 pivot=5100: forms at close >= 5123.6; at L/XL a
/// close below 5090 invalidates via the soft rule while S/M strict would
/// already have invalidated on any trade below 5100.
#[test]
fn scenario_three_scale_dependent_invalidation() {
    let up = [
        bar(0, 5010.0, 5010.0, 5000.0, 5001.0),
        bar(1, 5001.0, 5100.0, 5000.5, 5098.0),
        bar(2, 5098.0, 5124.0, 5097.0, 5123.6), // forms: 0.236 x 100 past 5100
    ];
    // Trades below 5100 but closes at 5092: inside soft tolerance.
    let shallow_dip = bar(3, 5123.0, 5123.5, 5095.0, 5092.0);
    // Closes at 5089.0: beyond the 0.10 soft-close threshold.
    let soft_break = bar(4, 5092.0, 5093.0, 5088.0, 5089.0);

    let mut soft_detector = LegDetector::new(Scale::L, DetectorConfig::with_defaults());
    let mut soft_layer = ReferenceLayer::new(Scale::L, ReferenceConfig::with_defaults());
    let mut soft_events = Vec::new();
    for b in up.iter().chain([&shallow_dip, &soft_break]) {
        soft_detector.advance(b).unwrap();
        soft_events.extend(soft_layer.update(b, soft_detector.arena()));
    }
    let formed = soft_events
        .iter()
        .find(|e| matches!(e.kind, EventKind::SwingFormed { .. }))
        .expect("swing forms at 5123.6");
    assert_eq!(formed.bar_index, 2);
    let invalidation = soft_events
        .iter()
        .filter_map(|e| match e.kind {
            EventKind::Invalidation { rule, .. } => Some((e.bar_index, rule)),
            _ => None,
        })
        .next()
        .expect("soft invalidation fires");
    assert_eq!(invalidation, (4, InvalidationRule::SoftClose));

    let mut strict_detector = LegDetector::new(Scale::M, DetectorConfig::with_defaults());
    let mut strict_layer = ReferenceLayer::new(Scale::M, ReferenceConfig::with_defaults());
    let mut strict_events = Vec::new();
    for b in up.iter().chain([&shallow_dip]) {
        strict_detector.advance(b).unwrap();
        strict_events.extend(strict_layer.update(b, strict_detector.arena()));
    }
    let strict_invalidation = strict_events
        .iter()
        .filter_map(|e| match e.kind {
            EventKind::Invalidation { rule, .. } => Some((e.bar_index, rule)),
            _ => None,
        })
        .next()
        .expect("strict invalidation on the first trade below the pivot");
    assert_eq!(strict_invalidation, (3, InvalidationRule::Strict));
}

/// A close jumping from ratio 0.3 to 1.5 emits every intermediate level at
/// the same bar index, ascending.
#[test]
fn scenario_four_multi_level_crossing() {
    let mut detector = LegDetector::new(Scale::L, DetectorConfig::with_defaults());
    let mut layer = ReferenceLayer::new(Scale::L, ReferenceConfig::with_defaults());

    let bars = [
        bar(0, 5010.0, 5010.0, 5000.0, 5001.0),
        bar(1, 5001.0, 5100.0, 5000.5, 5098.0),
        bar(2, 5098.0, 5124.0, 5097.0, 5123.6),
        bar(3, 5123.6, 5131.0, 5120.0, 5130.0), // ratio 0.30
        bar(4, 5130.0, 5251.0, 5129.0, 5250.0), // ratio 1.50
    ];
    let mut events = Vec::new();
    for b in &bars {
        detector.advance(b).unwrap();
        events.extend(layer.update(b, detector.arena()));
    }

    // The swing under test is the one formed at bar 2 (5000 -> 5100).
    let swing_id = events
        .iter()
        .find_map(|e| match e.kind {
            EventKind::SwingFormed { swing_id, .. } if e.bar_index == 2 => Some(swing_id),
            _ => None,
        })
        .expect("reference swing forms at bar 2");

    let jump: Vec<f64> = events
        .iter()
        .filter(|e| e.bar_index == 4)
        .filter_map(|e| match e.kind {
            EventKind::LevelCross {
                swing_id: id,
                level_ratio,
                upward: true,
            } if id == swing_id => Some(level_ratio),
            _ => None,
        })
        .collect();
    assert_eq!(jump, vec![0.382, 0.5, 0.618, 1.0, 1.382]);
}
