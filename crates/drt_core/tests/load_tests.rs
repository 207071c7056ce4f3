mod support;

use drt_core::config::{DispatchConfig, RebalancingConfig, RelocationMatching};
use drt_core::model::RequestState;
use drt_core::test_helpers::{
    advance_until, assert_schedule_invariants, cell_at_distance, random_requests, test_cell,
};
use drt_core::RequestOutcome;
use rstest::rstest;
use support::drt_with_fleet;

#[rstest]
#[case::greedy(RelocationMatching::Greedy, 11)]
#[case::min_cost(RelocationMatching::MinCost, 23)]
fn random_day_keeps_every_schedule_valid(#[case] matching: RelocationMatching, #[case] seed: u64) {
    let vehicles: Vec<_> = (1..=12)
        .map(|id| (id, 4, cell_at_distance(test_cell(), id % 6)))
        .collect();
    let mut drt = drt_with_fleet(
        &vehicles,
        DispatchConfig::default(),
        RebalancingConfig {
            interval_secs: 900,
            matching,
            ..RebalancingConfig::default()
        },
        0,
    );

    let requests = random_requests(seed, 150, 8);
    let mut assigned = 0;
    for request in requests.iter().cloned() {
        let now = request.earliest_pickup;
        advance_until(&mut drt, now).expect("advance");
        if drt.rebalancing_due(now) {
            drt.rebalance(now);
        }
        if let RequestOutcome::Assigned(assignment) =
            drt.submit_request(request, now).expect("submit")
        {
            assert!(assignment.pickup_time >= now);
            assigned += 1;
        }
        for snapshot in drt.fleet().snapshots() {
            assert_schedule_invariants(&snapshot);
        }
    }
    assert!(assigned > 0);

    let end = 1_000_000;
    advance_until(&mut drt, end).expect("advance");
    drt.retry_unplanned(end);
    assert!(drt.unplanned().is_empty());
    assert!(drt.requests().is_empty());
    let finished = drt.drain_finished_requests();
    assert_eq!(finished.len(), 150);
    assert!(finished
        .iter()
        .any(|(_, state)| matches!(state, RequestState::Completed { .. })));
    for snapshot in drt.fleet().snapshots() {
        assert!(snapshot.schedule.tasks().len() <= 1);
        assert!(snapshot.schedule.boarded().is_empty());
    }
}
