//! End-to-end ramp sequencing against simulated SMUs.
//!
//! These tests run the full stack (session orchestration, per-rail ramping,
//! TSP command formatting) over recording mock adapters, and assert on the
//! exact command traffic each instrument saw.

use smu_ramp::adapters::mock::MockAdapterState;
use smu_ramp::adapters::MockAdapter;
use smu_ramp::error::RampError;
use smu_ramp::instrument::{shared, RailId, SmuChannel};
use smu_ramp::policy::{BiasTarget, DutVariant, PolicyViolation};
use smu_ramp::session::{BiasSession, RampOutcome, RampRequest};
use smu_ramp::telemetry::RampEvent;
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct Bench {
    session: BiasSession,
    hv: Arc<Mutex<MockAdapterState>>,
    pwell: Arc<Mutex<MockAdapterState>>,
    psub: Arc<Mutex<MockAdapterState>>,
}

/// Build a session over three emulated SMUs resting at the given magnitudes.
fn bench(variant: DutVariant, hv: f64, pwell: f64, psub: f64) -> Bench {
    let hv_adapter = MockAdapter::new().with_level(RailId::Hv.to_hardware(hv));
    let pwell_adapter = MockAdapter::new().with_level(RailId::Pwell.to_hardware(pwell));
    let psub_adapter = MockAdapter::new().with_level(RailId::Psub.to_hardware(psub));
    let (hv_state, pwell_state, psub_state) = (
        hv_adapter.state(),
        pwell_adapter.state(),
        psub_adapter.state(),
    );
    let session = BiasSession::new(
        shared(SmuChannel::new("hv", RailId::Hv, hv_adapter)),
        shared(SmuChannel::new("pwell", RailId::Pwell, pwell_adapter)),
        shared(SmuChannel::new("psub", RailId::Psub, psub_adapter)),
        variant,
    );
    Bench {
        session,
        hv: hv_state,
        pwell: pwell_state,
        psub: psub_state,
    }
}

/// Hardware levels written to one instrument, in order.
fn written_levels(state: &Arc<Mutex<MockAdapterState>>) -> Vec<f64> {
    state
        .lock()
        .unwrap()
        .log
        .iter()
        .filter_map(|cmd| cmd.strip_prefix("smu.source.level = "))
        .map(|v| v.parse::<f64>().unwrap())
        .collect()
}

fn command_count(state: &Arc<Mutex<MockAdapterState>>) -> usize {
    state.lock().unwrap().log.len()
}

/// The order rails started ramping, drained from the event stream.
fn started_rails(events: &mut smu_ramp::telemetry::EventReceiver) -> Vec<RailId> {
    let mut rails = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let RampEvent::RailStarted { rail, .. } = event {
            rails.push(rail);
        }
    }
    rails
}

fn instant_request(target: BiasTarget) -> RampRequest {
    RampRequest::new(target).with_delay(Duration::ZERO)
}

#[tokio::test(start_paused = true)]
async fn energizing_the_pair_ramps_pwell_before_psub() {
    let bench = bench(DutVariant::W8R4, 0.0, 0.0, 0.0);
    let mut events = bench.session.subscribe();

    let outcome = bench
        .session
        .ramp(&instant_request(BiasTarget::dc_pair(6.0, 4.0)))
        .await
        .unwrap();

    // HV is grounded first (a single re-apply), then pwell, then psub.
    assert_eq!(
        started_rails(&mut events),
        vec![RailId::Hv, RailId::Pwell, RailId::Psub]
    );

    // 13 pwell set-points from 0 to -6 in hardware volts.
    let pwell: Vec<f64> = written_levels(&bench.pwell);
    let expected: Vec<f64> = (0..=12).map(|i| -(i as f64) * 0.5).collect();
    assert_eq!(pwell, expected);

    // 9 psub set-points from 0 to -4.
    let psub: Vec<f64> = written_levels(&bench.psub);
    let expected: Vec<f64> = (0..=8).map(|i| -(i as f64) * 0.5).collect();
    assert_eq!(psub, expected);

    // The outcome reports operator-facing magnitudes, not hardware levels.
    let RampOutcome::Completed(reports) = outcome else {
        panic!("expected completion, got {outcome:?}");
    };
    let find = |rail| reports.iter().find(|r| r.rail == rail).unwrap();
    assert_eq!(find(RailId::Pwell).level, 6.0);
    assert_eq!(find(RailId::Psub).level, 4.0);
    assert_eq!(find(RailId::Hv).level, 0.0);
}

#[tokio::test(start_paused = true)]
async fn deenergizing_the_pair_ramps_psub_before_pwell() {
    let bench = bench(DutVariant::W8R4, 0.0, 6.0, 4.0);
    let mut events = bench.session.subscribe();

    let outcome = bench
        .session
        .ramp(&instant_request(BiasTarget::grounded()))
        .await
        .unwrap();
    assert!(matches!(outcome, RampOutcome::Completed(_)));

    // psub must be back at zero before pwell leaves its plateau.
    assert_eq!(
        started_rails(&mut events),
        vec![RailId::Psub, RailId::Pwell, RailId::Hv]
    );

    let psub = written_levels(&bench.psub);
    assert_eq!(psub.first(), Some(&-4.0));
    assert_eq!(psub.last(), Some(&0.0));
    let pwell = written_levels(&bench.pwell);
    assert_eq!(pwell.first(), Some(&-6.0));
    assert_eq!(pwell.last(), Some(&0.0));
    assert!(pwell.windows(2).all(|w| w[1] > w[0]));
}

#[tokio::test(start_paused = true)]
async fn switching_groups_grounds_the_pair_before_hv_moves() {
    let bench = bench(DutVariant::W8R4, 0.0, 6.0, 4.0);
    let mut events = bench.session.subscribe();

    let outcome = bench
        .session
        .ramp(&instant_request(BiasTarget::hv_only(20.0)))
        .await
        .unwrap();
    assert!(matches!(outcome, RampOutcome::Completed(_)));

    assert_eq!(
        started_rails(&mut events),
        vec![RailId::Psub, RailId::Pwell, RailId::Hv]
    );

    // HV walks 0 -> 20 in positive hardware volts, 41 set-points.
    let hv = written_levels(&bench.hv);
    assert_eq!(hv.len(), 41);
    assert_eq!(hv.first(), Some(&0.0));
    assert_eq!(hv.last(), Some(&20.0));
    assert!(hv.iter().all(|&v| v >= 0.0));
}

#[tokio::test(start_paused = true)]
async fn rejected_request_issues_zero_commands() {
    let bench = bench(DutVariant::W8R4, 0.0, 0.0, 0.0);

    // Both groups energized in one request.
    let outcome = bench
        .session
        .ramp(&instant_request(BiasTarget {
            hv: 10.0,
            pwell: 6.0,
            psub: 4.0,
        }))
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        RampOutcome::Rejected(PolicyViolation::BothGroupsEnergized)
    ));

    // psub above the W8R4 ceiling.
    let outcome = bench
        .session
        .ramp(&instant_request(BiasTarget::dc_pair(6.0, 5.0)))
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        RampOutcome::Rejected(PolicyViolation::PsubAboveVariantCeiling { .. })
    ));

    for state in [&bench.hv, &bench.pwell, &bench.psub] {
        assert_eq!(command_count(state), 0);
    }
}

#[tokio::test(start_paused = true)]
async fn variant_ceiling_is_honored_end_to_end() {
    // The same target that W8R4 refuses is accepted on W2R17.
    let bench = bench(DutVariant::W2R17, 0.0, 0.0, 0.0);
    let outcome = bench
        .session
        .ramp(&instant_request(BiasTarget::dc_pair(6.0, 5.0)))
        .await
        .unwrap();
    assert!(matches!(outcome, RampOutcome::Completed(_)));
    assert_eq!(written_levels(&bench.psub).last(), Some(&-5.0));
}

#[tokio::test(start_paused = true)]
async fn transport_failure_aborts_and_reports_resting_level() {
    let bench = bench(DutVariant::W8R4, 0.0, 0.0, 0.0);

    // pwell write sequence: read-back print, then per step a set and a
    // measure print. Index 5 is the set-point write for -1.0 V.
    bench.pwell.lock().unwrap().fail_on_write = Some(5);

    let err = bench
        .session
        .ramp(&instant_request(BiasTarget::dc_pair(6.0, 4.0)))
        .await
        .unwrap_err();

    match &err {
        RampError::Aborted {
            rail, last_applied, ..
        } => {
            assert_eq!(*rail, RailId::Pwell);
            assert_eq!(*last_applied, Some(0.5));
        }
        other => panic!("expected abort, got {other}"),
    }

    // The failed write is the end of pwell traffic, and psub never started.
    let pwell = written_levels(&bench.pwell);
    assert_eq!(pwell, vec![0.0, -0.5]);
    assert!(written_levels(&bench.psub).is_empty());
}

#[tokio::test(start_paused = true)]
async fn already_grounded_bench_accepts_hv_ramp() {
    let bench = bench(DutVariant::W8R6, 0.0, 0.0, 0.0);
    let outcome = bench
        .session
        .ramp(&instant_request(BiasTarget::hv_only(30.0)))
        .await
        .unwrap();

    let RampOutcome::Completed(reports) = outcome else {
        panic!("expected completion");
    };
    let hv = reports.iter().find(|r| r.rail == RailId::Hv).unwrap();
    assert_eq!(hv.level, 30.0);

    // 61 set-points for the full 0 -> 30 sweep.
    assert_eq!(written_levels(&bench.hv).len(), 61);
}
