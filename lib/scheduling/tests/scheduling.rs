// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! End-to-end scheduling scenarios over a static datastore: boundary cases,
//! snapshot isolation, profile iteration, and the response path.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use rudder_scheduling::framework::{
    AllProfilesPicker, Filter, ProfilePicker, SchedulerProfile, WeightedScorer,
};
use rudder_scheduling::plugins::affinity::AdapterAffinityTracker;
use rudder_scheduling::plugins::filter::{
    DecisionTreeFilter, LeastKvCacheFilter, LeastQueueFilter, LoraAffinityFilter, LowQueueFilter,
};
use rudder_scheduling::plugins::picker::RandomPicker;
use rudder_scheduling::types::{
    LlmRequest, LlmResponse, Pod, PodId, PodMetrics, ProfileResult, ResponseStatus,
};
use rudder_scheduling::{Datastore, Scheduler, SchedulerConfig, SchedulingError};

struct StaticDatastore {
    pods: Mutex<Vec<Pod>>,
}

impl StaticDatastore {
    fn new(pods: Vec<Pod>) -> Arc<Self> {
        Arc::new(Self {
            pods: Mutex::new(pods),
        })
    }

    fn replace(&self, pods: Vec<Pod>) {
        *self.pods.lock() = pods;
    }
}

impl Datastore for StaticDatastore {
    fn pod_get_all(&self) -> Vec<Pod> {
        self.pods.lock().clone()
    }
}

fn pod(name: &str, queue_depth: u64, kv: f64) -> Pod {
    Pod::new(
        PodId::new("default", name),
        PodMetrics {
            queue_depth,
            kv_cache_utilization: kv,
            ..Default::default()
        },
    )
}

fn pod_with_adapter(name: &str, adapter: &str, queue_depth: u64, kv: f64) -> Pod {
    let mut pod = pod(name, queue_depth, kv);
    pod.metrics.loaded_adapters.insert(adapter.to_string());
    pod
}

fn request(id: &str) -> Arc<LlmRequest> {
    Arc::new(LlmRequest::new(id, "llama-3"))
}

fn single_profile(name: &str, profile: SchedulerProfile) -> SchedulerConfig {
    let mut profiles = HashMap::new();
    profiles.insert(name.to_string(), Arc::new(profile));
    SchedulerConfig::new(Arc::new(AllProfilesPicker::new()), profiles)
}

#[test]
fn empty_fleet_fails_with_no_pods() {
    let scheduler = Scheduler::new(StaticDatastore::new(vec![]));

    let err = scheduler
        .schedule(&CancellationToken::new(), &request("req-1"))
        .unwrap_err();
    assert!(matches!(err, SchedulingError::NoPodsAvailable));
    assert_eq!(err.to_string(), "no pods available for the given request");
}

#[test]
fn single_pod_is_always_chosen() {
    // Saturated metrics make no difference when there is only one pod.
    let scheduler = Scheduler::new(StaticDatastore::new(vec![pod("p1", 500, 0.99)]));

    let results = scheduler
        .schedule(&CancellationToken::new(), &request("req-1"))
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results["default"].target_pod.id, PodId::new("default", "p1"));
}

#[test]
fn sheddable_request_is_shed_when_fleet_is_saturated() {
    let scheduler = Scheduler::new(StaticDatastore::new(vec![
        pod("p1", 0, 0.95),
        pod("p2", 0, 0.97),
    ]));

    let mut req = LlmRequest::new("req-1", "llama-3");
    req.sheddable = true;
    let err = scheduler
        .schedule(&CancellationToken::new(), &Arc::new(req))
        .unwrap_err();
    assert!(matches!(err, SchedulingError::NoPodsAvailable));
}

#[test]
fn low_queue_pod_wins_over_low_kv_pod() {
    let scheduler = Scheduler::new(StaticDatastore::new(vec![
        pod("p1", 0, 0.9),
        pod("p2", 50, 0.1),
    ]));

    let results = scheduler
        .schedule(&CancellationToken::new(), &request("req-1"))
        .unwrap();
    let target = &results["default"].target_pod;
    assert_eq!(target.id, PodId::new("default", "p1"));
    // Picker domain closure: the target is one of the snapshot pods.
    assert!(["p1", "p2"].contains(&target.id.name.as_str()));
}

#[test]
fn lora_affinity_branch_prefers_resident_adapter() {
    // Same tree as the default profile, with the affinity split pinned to
    // the deterministic side.
    let lora_affinity: Arc<dyn Filter> = Arc::new(LoraAffinityFilter::with_threshold(1.0));
    let least_queue: Arc<dyn Filter> = Arc::new(LeastQueueFilter::new());
    let least_kv: Arc<dyn Filter> = Arc::new(LeastKvCacheFilter::new());
    let tree = DecisionTreeFilter::with_branches(
        Arc::new(LowQueueFilter::new()),
        Some(DecisionTreeFilter::with_next(
            lora_affinity.clone(),
            DecisionTreeFilter::with_next(
                least_queue.clone(),
                DecisionTreeFilter::leaf(least_kv.clone()),
            ),
        )),
        Some(DecisionTreeFilter::with_next(
            least_queue,
            DecisionTreeFilter::with_next(lora_affinity, DecisionTreeFilter::leaf(least_kv)),
        )),
    );
    let profile = SchedulerProfile::new()
        .with_filters(vec![tree])
        .with_picker(Arc::new(RandomPicker::with_seed(7)));

    let scheduler = Scheduler::with_config(
        StaticDatastore::new(vec![
            pod_with_adapter("p1", "math", 10, 0.5),
            pod("p2", 10, 0.5),
        ]),
        single_profile("default", profile),
    );

    let mut req = LlmRequest::new("req-1", "llama-3");
    req.lora_adapter = Some("math".to_string());
    let results = scheduler
        .schedule(&CancellationToken::new(), &Arc::new(req))
        .unwrap();
    assert_eq!(results["default"].target_pod.id, PodId::new("default", "p1"));
}

/// Runs "triage" first, then "refine" only when triage landed on a pod in
/// the escalation set.
struct TriagePicker {
    escalate_on: HashSet<String>,
}

impl ProfilePicker for TriagePicker {
    fn name(&self) -> &str {
        "triage-then-refine"
    }

    fn pick(
        &self,
        _request: Option<&LlmRequest>,
        _profiles: &HashMap<String, Arc<SchedulerProfile>>,
        prior_results: &HashMap<String, ProfileResult>,
    ) -> Vec<String> {
        match prior_results.get("triage") {
            None => vec!["triage".to_string()],
            Some(result) if prior_results.len() == 1 => {
                if self.escalate_on.contains(&result.target_pod.id.name) {
                    vec!["refine".to_string()]
                } else {
                    Vec::new()
                }
            }
            Some(_) => Vec::new(),
        }
    }
}

#[test]
fn iterative_profile_picker_stages_profiles() {
    // p1 has the shortest queue, p2 the most KV headroom: triage (queue
    // banding) lands on p1, refine (KV banding) must run its own fresh
    // cycle and land on p2.
    let datastore = StaticDatastore::new(vec![pod("p1", 0, 0.9), pod("p2", 50, 0.1)]);

    let triage = SchedulerProfile::new()
        .with_filters(vec![Arc::new(LeastQueueFilter::new())])
        .with_picker(Arc::new(RandomPicker::with_seed(1)));
    let refine = SchedulerProfile::new()
        .with_filters(vec![Arc::new(LeastKvCacheFilter::new())])
        .with_picker(Arc::new(RandomPicker::with_seed(2)));

    let mut profiles = HashMap::new();
    profiles.insert("triage".to_string(), Arc::new(triage));
    profiles.insert("refine".to_string(), Arc::new(refine));

    let picker = TriagePicker {
        escalate_on: ["p1".to_string()].into_iter().collect(),
    };
    let scheduler = Scheduler::with_config(
        datastore,
        SchedulerConfig::new(Arc::new(picker), profiles),
    );

    let results = scheduler
        .schedule(&CancellationToken::new(), &request("req-1"))
        .unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results["triage"].target_pod.id, PodId::new("default", "p1"));
    assert_eq!(results["refine"].target_pod.id, PodId::new("default", "p2"));
}

/// Returns a different fleet on every call, to prove cycles after the first
/// never re-read the datastore.
struct ShrinkingDatastore {
    calls: Mutex<usize>,
}

impl Datastore for ShrinkingDatastore {
    fn pod_get_all(&self) -> Vec<Pod> {
        let mut calls = self.calls.lock();
        *calls += 1;
        if *calls == 1 {
            vec![pod("p1", 0, 0.1)]
        } else {
            Vec::new()
        }
    }
}

/// Runs "a" and "b" in separate iterations.
struct TwoStepPicker;

impl ProfilePicker for TwoStepPicker {
    fn name(&self) -> &str {
        "two-step"
    }

    fn pick(
        &self,
        _request: Option<&LlmRequest>,
        _profiles: &HashMap<String, Arc<SchedulerProfile>>,
        prior_results: &HashMap<String, ProfileResult>,
    ) -> Vec<String> {
        if prior_results.is_empty() {
            vec!["a".to_string()]
        } else if !prior_results.contains_key("b") {
            vec!["b".to_string()]
        } else {
            Vec::new()
        }
    }
}

#[test]
fn snapshot_is_isolated_from_datastore_updates() {
    let datastore = Arc::new(ShrinkingDatastore {
        calls: Mutex::new(0),
    });

    let mut profiles = HashMap::new();
    for name in ["a", "b"] {
        profiles.insert(
            name.to_string(),
            Arc::new(SchedulerProfile::new().with_picker(Arc::new(RandomPicker::with_seed(3)))),
        );
    }

    let scheduler =
        Scheduler::with_config(datastore, SchedulerConfig::new(Arc::new(TwoStepPicker), profiles));

    // Profile "b" runs in a second iteration, after the datastore has gone
    // empty; it must still see the entry snapshot and succeed.
    let results = scheduler
        .schedule(&CancellationToken::new(), &request("req-1"))
        .unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results["a"].target_pod.id, PodId::new("default", "p1"));
    assert_eq!(results["b"].target_pod.id, PodId::new("default", "p1"));
}

#[test]
fn failing_profile_aborts_whole_schedule() {
    // "impossible" filters everything out; the whole call must error even
    // though "possible" could have produced a result.
    let possible = SchedulerProfile::new().with_picker(Arc::new(RandomPicker::with_seed(4)));
    let impossible = SchedulerProfile::new()
        .with_filters(vec![Arc::new(LowQueueFilter::with_threshold(0))])
        .with_picker(Arc::new(RandomPicker::with_seed(4)));

    let mut profiles = HashMap::new();
    profiles.insert("possible".to_string(), Arc::new(possible));
    profiles.insert("impossible".to_string(), Arc::new(impossible));

    let scheduler = Scheduler::with_config(
        StaticDatastore::new(vec![pod("p1", 10, 0.1)]),
        SchedulerConfig::new(Arc::new(AllProfilesPicker::new()), profiles),
    );

    let err = scheduler
        .schedule(&CancellationToken::new(), &request("req-1"))
        .unwrap_err();
    assert!(matches!(err, SchedulingError::NoPodsAvailable));
}

#[test]
fn rescheduling_unchanged_fleet_is_idempotent() {
    let fleet = vec![pod("p1", 5, 0.3), pod("p2", 5, 0.3), pod("p3", 20, 0.9)];

    let run = || {
        let profile = SchedulerProfile::new()
            .with_filters(vec![Arc::new(LeastQueueFilter::new())])
            .with_picker(Arc::new(RandomPicker::with_seed(11)));
        let scheduler = Scheduler::with_config(
            StaticDatastore::new(fleet.clone()),
            single_profile("default", profile),
        );
        scheduler
            .schedule(&CancellationToken::new(), &request("req-1"))
            .unwrap()["default"]
            .target_pod
            .id
            .clone()
    };

    assert_eq!(run(), run());
}

#[test]
fn random_picker_is_uniform_over_tied_pods() {
    let profile = SchedulerProfile::new().with_picker(Arc::new(RandomPicker::new()));
    let scheduler = Scheduler::with_config(
        StaticDatastore::new(vec![pod("p1", 0, 0.0), pod("p2", 0, 0.0)]),
        single_profile("default", profile),
    );

    let mut counts: HashMap<String, usize> = HashMap::new();
    for i in 0..1000 {
        let results = scheduler
            .schedule(&CancellationToken::new(), &request(&format!("req-{i}")))
            .unwrap();
        *counts
            .entry(results["default"].target_pod.id.name.clone())
            .or_insert(0) += 1;
    }

    // Uniform split; a bound this loose fails with negligible probability.
    let p1 = counts.get("p1").copied().unwrap_or(0);
    let p2 = counts.get("p2").copied().unwrap_or(0);
    assert!(p1 >= 350, "p1 chosen {p1} times");
    assert!(p2 >= 350, "p2 chosen {p2} times");
}

#[test]
fn weighted_scorers_steer_the_pick() {
    // Queue strongly favors p1, KV mildly favors p2; with the queue scorer
    // weighted 3:1 the aggregate must favor p1.
    let profile = SchedulerProfile::new()
        .with_scorers(vec![
            WeightedScorer::new(
                Arc::new(rudder_scheduling::plugins::scorer::QueueScorer::new()),
                3,
            )
            .unwrap(),
            WeightedScorer::new(
                Arc::new(rudder_scheduling::plugins::scorer::KvCacheScorer::new()),
                1,
            )
            .unwrap(),
        ])
        .with_picker(Arc::new(RandomPicker::with_seed(5)));

    let scheduler = Scheduler::with_config(
        StaticDatastore::new(vec![pod("p1", 0, 0.6), pod("p2", 40, 0.2)]),
        single_profile("default", profile),
    );

    let results = scheduler
        .schedule(&CancellationToken::new(), &request("req-1"))
        .unwrap();
    assert_eq!(results["default"].target_pod.id, PodId::new("default", "p1"));
}

#[test]
fn on_response_releases_affinity_and_tolerates_unknown_target() {
    let tracker = Arc::new(AdapterAffinityTracker::new());
    let profile = SchedulerProfile::new()
        .with_picker(Arc::new(RandomPicker::with_seed(6)))
        .add_plugins(vec![Arc::new(
            WeightedScorer::new(tracker.clone(), 1).unwrap(),
        )])
        .unwrap();

    let datastore = StaticDatastore::new(vec![pod("p1", 0, 0.1)]);
    let scheduler = Scheduler::with_config(datastore.clone(), single_profile("default", profile));

    let mut req = LlmRequest::new("req-1", "llama-3");
    req.lora_adapter = Some("math".to_string());
    let results = scheduler
        .schedule(&CancellationToken::new(), &Arc::new(req))
        .unwrap();
    let target_name = results["default"].target_pod.id.to_string();
    assert_eq!(tracker.active_count(&PodId::new("default", "p1"), "math"), 1);

    let response = Arc::new(LlmResponse {
        request_id: "req-1".to_string(),
        model: "llama-3".to_string(),
        lora_adapter: Some("math".to_string()),
        status: ResponseStatus::Complete,
        prompt_tokens: 128,
        output_tokens: 64,
        latency: Duration::from_millis(180),
    });
    scheduler.on_response(&CancellationToken::new(), &response, &target_name);
    assert_eq!(tracker.active_count(&PodId::new("default", "p1"), "math"), 0);

    // A pod that has left the fleet is passed through as absent; the call
    // must not fail.
    datastore.replace(vec![]);
    scheduler.on_response(&CancellationToken::new(), &response, "default/p-gone");
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_requests_share_the_scheduler() {
    let scheduler = Arc::new(Scheduler::new(StaticDatastore::new(vec![
        pod("p1", 0, 0.1),
        pod("p2", 3, 0.2),
    ])));

    let mut handles = Vec::new();
    for i in 0..16 {
        let scheduler = scheduler.clone();
        handles.push(tokio::spawn(async move {
            scheduler
                .schedule(&CancellationToken::new(), &request(&format!("req-{i}")))
                .map(|results| results["default"].target_pod.id.clone())
        }));
    }

    for handle in handles {
        let target = handle.await.unwrap().unwrap();
        assert_eq!(target, PodId::new("default", "p1"));
    }
}
