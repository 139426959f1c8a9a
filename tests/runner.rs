use std::{collections::HashSet, path::PathBuf, sync::Arc, time::Duration};

use recipe_harness::{
    Context, Runner, TestCase, Verdict,
    backend::{MemoryBackend, TelemetryBackend},
    beat::{self, LoggingTestPod, PSP_CLUSTER_ROLE_NAME},
    cluster::{Call, Cluster, MemoryCluster},
    gate::{GatePolicy, SkipReason},
    predicate::{
        Query, has_event, has_event_from_beat, has_event_from_pod, has_message_containing,
        has_monitoring_event, no_event,
    },
    resource::Object,
    runner::{CaseError, Stage, teardown},
    test_util::trace_init,
};
use serde_json::json;
use tokio::time::Instant;

const VALIDATION_WINDOW: Duration = Duration::from_secs(30);

fn context() -> Context {
    let mut context = Context::new("gke", "1.29.2", "7.10.0", "e2e-mercury");
    context.recipes_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("test-data/recipes");
    context.timeouts.readiness_secs = 10;
    context.timeouts.validation_secs = VALIDATION_WINDOW.as_secs();
    context.timeouts.poll_interval_ms = 1_000;
    context
}

fn green_cluster() -> Arc<MemoryCluster> {
    Arc::new(MemoryCluster::new().with_status_on_apply("Beat", json!({ "health": "green" })))
}

fn runner(
    context: Context,
    cluster: &Arc<MemoryCluster>,
    backend: &Arc<MemoryBackend>,
) -> Runner {
    trace_init();
    Runner::new(
        context,
        Arc::clone(cluster) as Arc<dyn Cluster>,
        Arc::clone(backend) as Arc<dyn TelemetryBackend>,
    )
}

fn recipe_a() -> TestCase {
    TestCase::new("recipe-a", "a.yaml").customize(|builder| {
        builder.with_validations([
            has_event(Query::parse("event.dataset:flow").unwrap()),
            no_event(Query::parse("event.dataset:bad").unwrap()),
        ])
    })
}

#[tokio::test(start_paused = true)]
async fn recipe_passes_and_leaves_nothing_behind() {
    let cluster = green_cluster();
    let backend = Arc::new(MemoryBackend::new());
    backend.ingest_after(
        "packetbeat-7.10.0-2020.11.02",
        json!({ "event": { "dataset": "flow" } }),
        Duration::from_secs(8),
    );
    let runner = runner(context(), &cluster, &backend);

    let start = Instant::now();
    let report = runner.run(recipe_a()).await;

    assert!(report.is_passed(), "{:?}", report.verdict);
    assert_eq!(report.transitions.last(), Some(&Stage::TornDown));
    assert!(report.teardown_errors.is_empty());
    // The absence check watched its whole window.
    assert!(start.elapsed() >= VALIDATION_WINDOW);

    let kinds: Vec<_> = report.applied.iter().map(|key| key.kind.as_str()).collect();
    assert_eq!(kinds, ["Elasticsearch", "ServiceAccount", "Beat"]);
    for key in &report.applied {
        assert!(key.name.ends_with(&report.suffix), "{key} is not isolated");
        assert_eq!(key.namespace.as_deref(), Some("e2e-mercury"));
    }

    assert_eq!(cluster.applied(), report.applied);
    let mut deleted = cluster.deleted();
    deleted.reverse();
    assert_eq!(deleted, report.applied);
    assert!(cluster.objects().is_empty());
}

#[tokio::test(start_paused = true)]
async fn waits_for_the_primary_to_turn_green() {
    let cluster = Arc::new(
        MemoryCluster::new().with_status_on_apply("Beat", json!({ "health": "yellow" })),
    );
    let backend = Arc::new(MemoryBackend::new());
    backend.ingest("packetbeat-7.10.0", json!({ "event.dataset": "flow" }));
    let runner = runner(context(), &cluster, &backend);

    let operator = {
        let cluster = Arc::clone(&cluster);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(6)).await;
            let beat = cluster
                .objects()
                .into_iter()
                .find(|key| key.kind == "Beat")
                .expect("beat was applied");
            cluster.set_status(&beat, json!({ "health": "green" }));
            beat
        })
    };

    let report = runner.run(recipe_a()).await;
    let beat = operator.await.unwrap();

    assert!(report.is_passed(), "{:?}", report.verdict);
    assert_eq!(report.applied.last(), Some(&beat));
    assert!(!cluster.contains(&beat));
}

#[tokio::test(start_paused = true)]
async fn unwanted_events_fail_the_case() {
    let cluster = green_cluster();
    let backend = Arc::new(MemoryBackend::new());
    backend.ingest("packetbeat-7.10.0", json!({ "event.dataset": "flow" }));
    backend.ingest_after(
        "packetbeat-7.10.0",
        json!({ "event.dataset": "bad" }),
        Duration::from_secs(25),
    );
    let runner = runner(context(), &cluster, &backend);

    let report = runner.run(recipe_a()).await;

    let Some(CaseError::Validation { failures }) = report.error() else {
        panic!("expected a validation failure, got {:?}", report.verdict);
    };
    assert_eq!(failures.len(), 1);
    assert!(!failures[0].predicate.is_presence());
    assert!(cluster.objects().is_empty());
}

#[tokio::test(start_paused = true)]
async fn failed_primary_apply_removes_only_what_was_applied() {
    let cluster = green_cluster();
    cluster.fail_apply("Beat");
    let backend = Arc::new(MemoryBackend::new());
    let runner = runner(context(), &cluster, &backend);

    let report = runner.run(recipe_a()).await;

    let Some(CaseError::Apply { object, .. }) = report.error() else {
        panic!("expected an apply error, got {:?}", report.verdict);
    };
    assert_eq!(object.kind, "Beat");
    assert_eq!(
        report.transitions,
        [
            Stage::Init,
            Stage::GateCheck,
            Stage::Applying,
            Stage::Failed,
            Stage::TornDown
        ]
    );
    assert_eq!(report.applied.len(), 2);

    let mut deleted = cluster.deleted();
    deleted.reverse();
    assert_eq!(deleted, report.applied);
    assert!(cluster.objects().is_empty());
    assert_eq!(backend.queries(), 0);

    // Tearing down again finds nothing left to do and reports nothing.
    let errors = teardown(cluster.as_ref(), &report.applied, Duration::from_secs(10)).await;
    assert!(errors.is_empty());
}

#[tokio::test(start_paused = true)]
async fn gated_cases_never_touch_the_cluster() {
    let cluster = green_cluster();
    let backend = Arc::new(MemoryBackend::new());

    let mut old_stack = context();
    old_stack.stack_version = "7.9.3".into();
    let report = runner(old_stack, &cluster, &backend).run(recipe_a()).await;
    assert!(matches!(
        report.verdict,
        Verdict::Skipped(SkipReason::StackIncompatible { .. })
    ));
    assert_eq!(
        report.transitions,
        [Stage::Init, Stage::GateCheck, Stage::Skipped, Stage::TornDown]
    );

    let mut kind = context();
    kind.provider = "kind".into();
    kind.kubernetes_version = "1.12".into();
    let case = recipe_a().with_policy(
        GatePolicy::new("packetbeat").capability_gap("kind", "1.12", "http tracking"),
    );
    let report = runner(kind, &cluster, &backend).run(case).await;
    assert!(matches!(
        report.verdict,
        Verdict::Skipped(SkipReason::MissingCapability { .. })
    ));

    assert!(cluster.calls().is_empty());
    assert_eq!(backend.queries(), 0);
}

#[tokio::test(start_paused = true)]
async fn concurrent_cases_are_isolated() {
    let cluster = green_cluster();
    let backend = Arc::new(MemoryBackend::new());
    backend.ingest("packetbeat-7.10.0", json!({ "event.dataset": "flow" }));
    let runner = runner(context(), &cluster, &backend);

    let reports = runner.run_all((0..5).map(|_| recipe_a()).collect()).await;

    assert!(reports.iter().all(|report| report.is_passed()));
    let suffixes: HashSet<_> = reports.iter().map(|report| report.suffix.clone()).collect();
    assert_eq!(suffixes.len(), 5);

    let applied: Vec<_> = reports.iter().flat_map(|report| report.applied.clone()).collect();
    let distinct: HashSet<_> = applied.iter().collect();
    assert_eq!(applied.len(), 15);
    assert_eq!(distinct.len(), 15);

    assert!(cluster.objects().is_empty());
    let deletes = cluster
        .calls()
        .into_iter()
        .filter(|call| matches!(call, Call::Delete(_)))
        .count();
    assert_eq!(deletes, 15);
}

#[tokio::test(start_paused = true)]
async fn beat_recipes_check_shipped_logs() {
    let cluster = green_cluster();
    let backend = Arc::new(MemoryBackend::new());
    let runner = runner(context(), &cluster, &backend);

    let pod = LoggingTestPod::new("fb-autodiscover");
    backend.ingest_after(
        "filebeat-7.10.0",
        json!({
            "agent": { "type": "filebeat" },
            "kubernetes": { "pod": { "name": pod.name() } },
            "message": format!("2020-11-02T10:00:00Z {}", pod.logged),
        }),
        Duration::from_secs(3),
    );

    let (pod_name, logged) = (pod.name().to_owned(), pod.logged.clone());
    let report = beat::run_recipe(
        &runner,
        "filebeat",
        "filebeat_logs.yaml",
        move |builder| {
            builder
                .with_roles([PSP_CLUSTER_ROLE_NAME])
                .with_validations([
                    has_event_from_pod(&pod_name),
                    has_message_containing(&logged),
                ])
        },
        [pod.to_object().unwrap()],
    )
    .await;

    assert!(report.is_passed(), "{:?}", report.verdict);
    let kinds: Vec<_> = report.applied.iter().map(|key| key.kind.as_str()).collect();
    assert_eq!(
        kinds,
        [
            "Elasticsearch",
            "Kibana",
            "ServiceAccount",
            "Pod",
            "ClusterRoleBinding",
            "Beat"
        ]
    );
    assert_eq!(report.applied[3].namespace.as_deref(), Some("e2e-mercury"));
    assert!(cluster.objects().is_empty());
}

#[tokio::test(start_paused = true)]
async fn companion_beats_are_deployed_and_checked() {
    let cluster = green_cluster();
    let backend = Arc::new(MemoryBackend::new());
    backend.ingest(
        ".monitoring-es-7-2020.11.02",
        json!({ "type": "cluster_stats" }),
    );
    backend.ingest("metricbeat-7.10.0", json!({ "agent.type": "metricbeat" }));
    let runner = runner(context(), &cluster, &backend);

    let report = beat::run_recipe(
        &runner,
        "metricbeat",
        "stack_monitoring.yaml",
        |builder| {
            builder
                .with_roles([PSP_CLUSTER_ROLE_NAME])
                .with_validations([has_monitoring_event(
                    Query::parse("type:cluster_stats").unwrap(),
                )])
        },
        Vec::<Object>::new(),
    )
    .await;

    // Nothing shipped by filebeat yet.
    let Some(CaseError::Validation { failures }) = report.error() else {
        panic!("expected a validation failure, got {:?}", report.verdict);
    };
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].predicate, has_event_from_beat("filebeat"));

    let beats: Vec<_> = report
        .applied
        .iter()
        .filter(|key| key.kind == "Beat")
        .map(|key| key.name.strip_suffix(&format!("-{}", report.suffix)).unwrap())
        .collect();
    assert_eq!(beats, ["filebeat", "metricbeat"]);
    let bindings = report
        .applied
        .iter()
        .filter(|key| key.kind == "ClusterRoleBinding")
        .count();
    assert_eq!(bindings, 2);
    assert!(cluster.objects().is_empty());
}

#[tokio::test(start_paused = true)]
async fn auditbeat_is_skipped_on_kind() {
    let cluster = green_cluster();
    let backend = Arc::new(MemoryBackend::new());
    let mut context = context();
    context.provider = "kind".into();

    let report = beat::run_recipe(
        &runner(context, &cluster, &backend),
        "auditbeat",
        "filebeat_logs.yaml",
        |builder| builder,
        Vec::<Object>::new(),
    )
    .await;

    assert!(matches!(
        report.verdict,
        Verdict::Skipped(SkipReason::ExcludedProvider { ref provider, .. }) if provider == "kind"
    ));
    assert!(cluster.calls().is_empty());
}
