//! End-to-end passes against in-memory collaborators.
//!
//! Run with: `cargo test -p farm-tests --test pipeline_tests`

use farm_core::build_file::{BuildFile, FetchFailurePolicy};
use farm_core::error::BackendErrorKind;
use farm_core::target::Target;
use farm_jenkins::{GroovyScriptSink, XmlJobRenderer};
use farm_scheduler::report::PassFailure;
use farm_scheduler::{
    ApplyResult, BackendTarget, JobAction, JobNamer, PassContext, PassReport, PassStatus,
    PlanRequest, TargetFilter, plan_pass, run_pass,
};
use farm_tests::{
    BackendCall, BuildFileFixture, FailingBackend, InMemoryBackend, JsonRenderer, RecordingSink,
    StaticMetadataProvider, init_test_logging, pkg,
};
use pretty_assertions::assert_eq;
use serde_json::Value;
use std::collections::BTreeSet;
use tokio::sync::watch;

const BIN_VIEW: &str = "kinetic-bin_archlinux_rosarch_x86_64";
const IMPORT: &str = "kinetic__import-package";
const SYNC_TESTING: &str = "kinetic__sync-packages-to-testing__rosarch_x86_64";
const SYNC_MAIN: &str = "kinetic__sync-packages-to-main";

fn namer() -> JobNamer {
    JobNamer::new("kinetic", "default").unwrap()
}

fn x86_64() -> Target {
    Target::new("archlinux", "rosarch", "x86_64")
}

fn binary(package: &str) -> String {
    namer().binary(package, &x86_64())
}

fn ab_provider() -> StaticMetadataProvider {
    StaticMetadataProvider::new([pkg("a", &["b"]), pkg("b", &["glibc"])])
}

async fn run(
    request: PlanRequest<'_>,
    provider: &StaticMetadataProvider,
    backend: BackendTarget<'_>,
    prune: bool,
) -> PassReport {
    init_test_logging();
    let (_shutdown_tx, shutdown) = watch::channel(false);
    run_pass(PassContext {
        request,
        provider,
        renderer: &JsonRenderer,
        backend,
        prune,
        shutdown,
    })
    .await
    .unwrap()
}

async fn connected(
    build_file: &BuildFile,
    provider: &StaticMetadataProvider,
    backend: &InMemoryBackend,
    prune: bool,
) -> PassReport {
    run(
        PlanRequest::new(build_file),
        provider,
        BackendTarget::Live {
            backend,
            dry_run: false,
        },
        prune,
    )
    .await
}

fn payload(backend: &InMemoryBackend, name: &str) -> Value {
    serde_json::from_str(&backend.jobs()[name]).unwrap()
}

fn outcome<'a>(report: &'a PassReport, name: &str) -> &'a farm_scheduler::JobOutcome {
    report
        .outcomes
        .iter()
        .find(|o| o.name == name)
        .unwrap_or_else(|| panic!("no outcome for {name}"))
}

#[tokio::test]
async fn test_two_packages_one_target() {
    let build_file = BuildFileFixture::single_target(&["a", "b"]);
    let backend = InMemoryBackend::new();

    let report = connected(&build_file, &ab_provider(), &backend, false).await;

    assert_eq!(report.status, PassStatus::Succeeded);
    assert_eq!(report.order, ["b", "a"]);

    let expected: BTreeSet<String> = [
        binary("a"),
        binary("b"),
        IMPORT.to_string(),
        SYNC_TESTING.to_string(),
        SYNC_MAIN.to_string(),
    ]
    .into_iter()
    .collect();
    assert_eq!(backend.jobs().keys().cloned().collect::<BTreeSet<_>>(), expected);
    assert!(
        report
            .outcomes
            .iter()
            .all(|o| o.action == JobAction::Create && o.result == ApplyResult::Applied)
    );

    let a = payload(&backend, &binary("a"));
    assert_eq!(a["upstream"], serde_json::json!([binary("b")]));
    assert_eq!(a["children"], serde_json::json!([SYNC_TESTING]));
    assert_eq!(payload(&backend, &binary("b"))["upstream"], serde_json::json!([]));
    assert_eq!(
        payload(&backend, SYNC_TESTING)["upstream"],
        serde_json::json!([IMPORT])
    );
    assert_eq!(
        payload(&backend, IMPORT)["children"],
        serde_json::json!([SYNC_TESTING])
    );

    assert_eq!(backend.views().keys().collect::<Vec<_>>(), [BIN_VIEW]);
    assert_eq!(backend.connects(), 1);
    assert_eq!(backend.closes(), 1);
}

#[tokio::test]
async fn test_unknown_os_fails_before_any_mutation() {
    let build_file = BuildFileFixture::single_target(&["a", "b"]);
    let provider = ab_provider();
    let backend = InMemoryBackend::new();
    let request = PlanRequest {
        filter: TargetFilter {
            os_name: Some("windows".to_string()),
            ..TargetFilter::default()
        },
        ..PlanRequest::new(&build_file)
    };

    let report = run(
        request,
        &provider,
        BackendTarget::Live {
            backend: &backend,
            dry_run: false,
        },
        false,
    )
    .await;

    assert_eq!(report.status, PassStatus::FailedPrecondition);
    assert_eq!(
        report.failure,
        Some(PassFailure::Validation {
            field: "OS name".to_string(),
            value: "windows".to_string(),
            choices: vec!["archlinux".to_string()],
        })
    );
    assert_eq!(provider.fetch_count(), 0);
    assert!(backend.mutations().is_empty());
    assert_eq!(backend.closes(), 1);
}

#[tokio::test]
async fn test_stale_job_is_kept_without_prune() {
    let build_file = BuildFileFixture::single_target(&["a", "b"]);
    let backend = InMemoryBackend::new()
        .with_job(&binary("c"), "{}")
        .with_job("maintenance-cleanup", "{}");

    let report = connected(&build_file, &ab_provider(), &backend, false).await;

    let c = outcome(&report, &binary("c"));
    assert_eq!(c.action, JobAction::Stale);
    assert_eq!(c.result, ApplyResult::Noop);
    assert!(report.outcomes.iter().all(|o| o.name != "maintenance-cleanup"));
    assert!(backend.jobs().contains_key(&binary("c")));
    assert!(
        !backend
            .calls()
            .iter()
            .any(|call| matches!(call, BackendCall::DeleteJob(_)))
    );
    assert_eq!(report.status, PassStatus::Succeeded);
}

#[tokio::test]
async fn test_prune_deletes_only_owned_stale_jobs() {
    let build_file = BuildFileFixture::single_target(&["a", "b"]);
    let backend = InMemoryBackend::new()
        .with_job(&binary("c"), "{}")
        .with_job("kinetic_testing-bin_archlinux_rosarch_x86_64__c__archlinux_rosarch_x86_64__binary", "{}")
        .with_job("maintenance-cleanup", "{}");

    let report = connected(&build_file, &ab_provider(), &backend, true).await;

    let c = outcome(&report, &binary("c"));
    assert_eq!(c.action, JobAction::Delete);
    assert_eq!(c.result, ApplyResult::Applied);

    let jobs = backend.jobs();
    assert!(!jobs.contains_key(&binary("c")));
    assert!(jobs.contains_key("maintenance-cleanup"));
    assert!(jobs.contains_key(
        "kinetic_testing-bin_archlinux_rosarch_x86_64__c__archlinux_rosarch_x86_64__binary"
    ));
    assert_eq!(report.summary.delete, 1);
}

#[tokio::test]
async fn test_package_selection_with_prune_keeps_other_jobs() {
    let build_file = BuildFileFixture::single_target(&["a", "b"]);
    let provider = ab_provider();
    let backend = InMemoryBackend::new();
    connected(&build_file, &provider, &backend, false).await;
    backend.clear_calls();

    let request = PlanRequest {
        packages: vec!["a".to_string()],
        ..PlanRequest::new(&build_file)
    };
    let report = run(
        request,
        &provider,
        BackendTarget::Live {
            backend: &backend,
            dry_run: false,
        },
        true,
    )
    .await;

    assert_eq!(report.status, PassStatus::Succeeded);
    assert_eq!(report.order, ["b", "a"]);
    assert!(backend.job_mutations().is_empty(), "{:?}", backend.job_mutations());
    assert!(backend.jobs().contains_key(&binary("b")));
    assert!(report.outcomes.iter().all(|o| o.name != binary("b")));
    assert_eq!(outcome(&report, &binary("a")).action, JobAction::Unchanged);
    assert_eq!(
        payload(&backend, &binary("a"))["upstream"],
        serde_json::json!([binary("b")])
    );
}

#[tokio::test]
async fn test_target_filter_updates_only_matching_jobs() {
    let build_file = BuildFileFixture::with_arches(&["a", "b"], &["x86_64", "aarch64"]);
    let backend = InMemoryBackend::new();
    connected(&build_file, &ab_provider(), &backend, false).await;

    // `a` no longer depends on `b`, but only aarch64 is reconciled.
    let provider = StaticMetadataProvider::new([pkg("a", &[]), pkg("b", &[])]);
    let request = PlanRequest {
        filter: TargetFilter {
            arch: Some("aarch64".to_string()),
            ..TargetFilter::default()
        },
        ..PlanRequest::new(&build_file)
    };
    let report = run(
        request,
        &provider,
        BackendTarget::Live {
            backend: &backend,
            dry_run: false,
        },
        true,
    )
    .await;

    let aarch64 = Target::new("archlinux", "rosarch", "aarch64");
    let arm_a = namer().binary("a", &aarch64);
    assert_eq!(report.status, PassStatus::Succeeded);
    assert_eq!(outcome(&report, &arm_a).action, JobAction::Update);
    assert!(report.outcomes.iter().all(|o| o.name != binary("a")));
    assert_eq!(report.summary.delete, 0);

    assert_eq!(payload(&backend, &arm_a)["upstream"], serde_json::json!([]));
    assert_eq!(
        payload(&backend, &binary("a"))["upstream"],
        serde_json::json!([binary("b")])
    );
    assert_eq!(backend.jobs().len(), 2 * 2 + 2 + 2);
}

#[tokio::test]
async fn test_second_pass_changes_nothing() {
    let build_file = BuildFileFixture::single_target(&["a", "b"]);
    let provider = ab_provider();
    let backend = InMemoryBackend::new();

    connected(&build_file, &provider, &backend, true).await;
    backend.clear_calls();
    let report = connected(&build_file, &provider, &backend, true).await;

    assert!(backend.job_mutations().is_empty(), "{:?}", backend.job_mutations());
    assert!(
        report
            .outcomes
            .iter()
            .all(|o| o.action == JobAction::Unchanged)
    );
    assert_eq!(report.summary.unchanged, 5);
    assert_eq!(report.status, PassStatus::Succeeded);
}

#[tokio::test]
async fn test_changed_dependency_updates_job() {
    let build_file = BuildFileFixture::single_target(&["a", "b"]);
    let backend = InMemoryBackend::new();
    connected(&build_file, &ab_provider(), &backend, false).await;

    // `a` no longer depends on `b`.
    let provider = StaticMetadataProvider::new([pkg("a", &[]), pkg("b", &[])]);
    let report = connected(&build_file, &provider, &backend, false).await;

    assert_eq!(outcome(&report, &binary("a")).action, JobAction::Update);
    assert_eq!(outcome(&report, &binary("b")).action, JobAction::Unchanged);
    assert_eq!(payload(&backend, &binary("a"))["upstream"], serde_json::json!([]));
}

#[tokio::test]
async fn test_dry_run_never_mutates() {
    let build_file = BuildFileFixture::single_target(&["a", "b"]);
    let backend = InMemoryBackend::new().with_job(&binary("c"), "{}");

    let report = run(
        PlanRequest::new(&build_file),
        &ab_provider(),
        BackendTarget::Live {
            backend: &backend,
            dry_run: true,
        },
        true,
    )
    .await;

    assert_eq!(report.mode, "dry-run");
    assert!(backend.mutations().is_empty(), "{:?}", backend.mutations());
    assert!(backend.calls().contains(&BackendCall::ListJobs));
    assert_eq!(backend.closes(), 1);

    assert_eq!(report.summary.create, 5);
    assert_eq!(report.summary.delete, 1);
    assert!(
        report
            .outcomes
            .iter()
            .all(|o| o.result == ApplyResult::Planned)
    );
    assert!(report.views.iter().all(|v| v.result == ApplyResult::Planned));
    assert_eq!(report.status, PassStatus::Succeeded);
}

#[tokio::test]
async fn test_cycle_aborts_and_still_closes_session() {
    let build_file = BuildFileFixture::single_target(&["a", "b"]);
    let provider = StaticMetadataProvider::new([pkg("a", &["b"]), pkg("b", &["a"])]);
    let backend = InMemoryBackend::new();

    let report = connected(&build_file, &provider, &backend, false).await;

    assert_eq!(report.status, PassStatus::FailedPrecondition);
    match &report.failure {
        Some(PassFailure::Cycle { cycle }) => {
            let members: BTreeSet<&str> = cycle.iter().map(String::as_str).collect();
            assert_eq!(members, BTreeSet::from(["a", "b"]));
        }
        other => panic!("expected a cycle failure, got {other:?}"),
    }
    assert!(report.outcomes.is_empty());
    assert!(report.order.is_empty());
    assert!(backend.mutations().is_empty());
    assert_eq!(backend.closes(), 1);
}

#[tokio::test]
async fn test_fetch_failure_aborts_by_default() {
    let build_file = BuildFileFixture::single_target(&["a", "b"]);
    let provider = ab_provider().with_failure("b");
    let backend = InMemoryBackend::new();

    let report = connected(&build_file, &provider, &backend, false).await;

    assert_eq!(report.status, PassStatus::FailedPrecondition);
    assert!(matches!(
        &report.failure,
        Some(PassFailure::Fetch { package, .. }) if package == "b"
    ));
    assert!(backend.mutations().is_empty());
}

#[tokio::test]
async fn test_fetch_failure_excluded_on_request() {
    let mut build_file = BuildFileFixture::single_target(&["a", "b"]);
    build_file.farm.on_fetch_failure = FetchFailurePolicy::Exclude;
    let provider = ab_provider().with_failure("b");
    let backend = InMemoryBackend::new();

    let report = connected(&build_file, &provider, &backend, false).await;

    assert_eq!(report.status, PassStatus::Succeeded);
    assert_eq!(report.order, ["a"]);
    assert!(report.warnings.iter().any(|w| w.contains("Excluded package 'b'")));
    assert!(
        report
            .warnings
            .iter()
            .any(|w| w.contains("depends on excluded package 'b'"))
    );

    let jobs = backend.jobs();
    assert!(jobs.contains_key(&binary("a")));
    assert!(!jobs.contains_key(&binary("b")));
    assert_eq!(payload(&backend, &binary("a"))["upstream"], serde_json::json!([]));
}

#[tokio::test]
async fn test_unreachable_backend_is_a_precondition_failure() {
    let build_file = BuildFileFixture::single_target(&["a", "b"]);
    let provider = ab_provider();
    let backend = FailingBackend::unreachable();

    let report = run(
        PlanRequest::new(&build_file),
        &provider,
        BackendTarget::Live {
            backend: &backend,
            dry_run: false,
        },
        false,
    )
    .await;

    assert_eq!(report.status, PassStatus::FailedPrecondition);
    assert!(matches!(
        &report.failure,
        Some(PassFailure::Backend { kind: BackendErrorKind::Transient, .. })
    ));
    assert_eq!(provider.fetch_count(), 0);
}

#[tokio::test]
async fn test_job_failures_are_collected() {
    let build_file = BuildFileFixture::single_target(&["a", "b"]);
    let backend = InMemoryBackend::new().with_failing_job(&binary("a"));

    let report = connected(&build_file, &ab_provider(), &backend, false).await;

    assert_eq!(report.status, PassStatus::PartiallyFailed);
    let failed: Vec<&str> = report.failed_jobs().map(|o| o.name.as_str()).collect();
    assert_eq!(failed, [binary("a").as_str()]);
    let error = outcome(&report, &binary("a")).error.clone().unwrap();
    assert!(error.is_transient());

    assert_eq!(backend.jobs().len(), 4);
    assert_eq!(report.summary.failed, 1);
    assert_eq!(backend.closes(), 1);
}

#[tokio::test]
async fn test_cancelled_pass_skips_remaining_mutations() {
    init_test_logging();
    let build_file = BuildFileFixture::single_target(&["a", "b"]);
    let provider = ab_provider();
    let backend = InMemoryBackend::new();
    let (shutdown_tx, shutdown) = watch::channel(false);
    shutdown_tx.send(true).unwrap();

    let report = run_pass(PassContext {
        request: PlanRequest::new(&build_file),
        provider: &provider,
        renderer: &JsonRenderer,
        backend: BackendTarget::Live {
            backend: &backend,
            dry_run: false,
        },
        prune: false,
        shutdown,
    })
    .await
    .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.status, PassStatus::PartiallyFailed);
    assert!(
        report
            .outcomes
            .iter()
            .all(|o| o.result == ApplyResult::Skipped)
    );
    assert!(backend.mutations().is_empty());
    assert_eq!(backend.closes(), 1);
}

#[tokio::test]
async fn test_offline_script_mode() {
    let build_file = BuildFileFixture::single_target(&["a", "b"]);
    let sink = RecordingSink::new();

    let report = run(
        PlanRequest::new(&build_file),
        &ab_provider(),
        BackendTarget::Offline(Box::new(sink.clone())),
        true,
    )
    .await;

    assert_eq!(report.mode, "offline-script");
    assert_eq!(report.status, PassStatus::Succeeded);
    assert_eq!(report.summary.create, 5);
    assert!(report.warnings.iter().any(|w| w.contains("Prune ignored")));
    assert_eq!(sink.jobs().len(), 5);
    assert_eq!(sink.views().keys().collect::<Vec<_>>(), [BIN_VIEW]);
    assert_eq!(sink.finished(), 1);
}

#[tokio::test]
async fn test_offline_sink_failure_keeps_report() {
    let build_file = BuildFileFixture::single_target(&["a", "b"]);
    let sink = RecordingSink::new().with_failing_finish();

    let report = run(
        PlanRequest::new(&build_file),
        &ab_provider(),
        BackendTarget::Offline(Box::new(sink.clone())),
        false,
    )
    .await;

    assert_eq!(report.status, PassStatus::PartiallyFailed);
    assert!(matches!(
        &report.release_failure,
        Some(PassFailure::Other { message }) if message.contains("disk full")
    ));
    assert!(report.failure.is_none());
    assert_eq!(report.summary.create, 5);
    assert!(
        report
            .outcomes
            .iter()
            .all(|o| o.result == ApplyResult::Applied)
    );
    assert_eq!(sink.jobs().len(), 5);
    assert!(report.warnings.iter().any(|w| w.contains("Failed to release backend")));
}

#[tokio::test]
async fn test_offline_cycle_writes_no_script() {
    init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let build_file = BuildFileFixture::single_target(&["a", "b"]);
    let provider = StaticMetadataProvider::new([pkg("a", &["b"]), pkg("b", &["a"])]);
    let sink = GroovyScriptSink::create(dir.path()).await.unwrap();
    let (_shutdown_tx, shutdown) = watch::channel(false);

    let report = run_pass(PassContext {
        request: PlanRequest::new(&build_file),
        provider: &provider,
        renderer: &XmlJobRenderer::new(),
        backend: BackendTarget::Offline(Box::new(sink)),
        prune: false,
        shutdown,
    })
    .await
    .unwrap();

    assert_eq!(report.status, PassStatus::FailedPrecondition);
    assert!(!dir.path().join(farm_jenkins::script::SCRIPT_FILE).exists());

    let recording = RecordingSink::new();
    let report = run(
        PlanRequest::new(&build_file),
        &provider,
        BackendTarget::Offline(Box::new(recording.clone())),
        false,
    )
    .await;
    assert!(matches!(report.failure, Some(PassFailure::Cycle { .. })));
    assert_eq!(recording.finished(), 0);
    assert!(recording.jobs().is_empty());
}

#[tokio::test]
async fn test_offline_groovy_script() {
    init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let build_file = BuildFileFixture::single_target(&["a", "b"]);
    let provider = ab_provider();
    let sink = GroovyScriptSink::create(dir.path()).await.unwrap();
    let (_shutdown_tx, shutdown) = watch::channel(false);

    let report = run_pass(PassContext {
        request: PlanRequest::new(&build_file),
        provider: &provider,
        renderer: &XmlJobRenderer::new(),
        backend: BackendTarget::Offline(Box::new(sink)),
        prune: false,
        shutdown,
    })
    .await
    .unwrap();

    assert_eq!(report.status, PassStatus::Succeeded);
    let job = std::fs::read_to_string(dir.path().join("jobs").join(format!("{}.xml", binary("a"))))
        .unwrap();
    assert!(job.contains(&format!("<upstreamProjects>{}</upstreamProjects>", binary("b"))));

    let script =
        std::fs::read_to_string(dir.path().join(farm_jenkins::script::SCRIPT_FILE)).unwrap();
    assert!(script.contains(&format!("reconfigureJob('{}')", binary("a"))));
    assert!(script.contains(&format!("reconfigureView('{BIN_VIEW}')")));
}

#[tokio::test]
async fn test_source_jobs_are_standalone() {
    let build_file = BuildFileFixture::with_arches(&["a", "b"], &["x86_64", "source"]);
    let backend = InMemoryBackend::new();

    let report = connected(&build_file, &ab_provider(), &backend, false).await;
    assert_eq!(report.status, PassStatus::Succeeded);

    let source = Target::new("archlinux", "rosarch", "source");
    let source_a = namer().source("a", &source);
    let a = payload(&backend, &source_a);
    assert_eq!(a["kind"], "source");
    assert_eq!(a["upstream"], serde_json::json!([]));
    assert_eq!(a["children"], serde_json::json!([]));

    assert_eq!(
        backend.views().keys().cloned().collect::<Vec<_>>(),
        [BIN_VIEW.to_string(), namer().view(&source)]
    );
    assert_eq!(backend.jobs().len(), 7);
}

#[tokio::test]
async fn test_disabled_packages_render_disabled() {
    let mut build_file = BuildFileFixture::single_target(&["a", "b"]);
    build_file.disabled_packages = vec!["a".to_string()];
    let backend = InMemoryBackend::new();

    connected(&build_file, &ab_provider(), &backend, false).await;

    assert_eq!(payload(&backend, &binary("a"))["disabled"], true);
    assert_eq!(payload(&backend, &binary("b"))["disabled"], false);
}

#[tokio::test]
async fn test_plans_are_deterministic() {
    let build_file = BuildFileFixture::with_arches(&["a", "b", "c"], &["x86_64", "aarch64"]);
    let provider = StaticMetadataProvider::new([
        pkg("a", &["b", "c"]),
        pkg("b", &["c"]),
        pkg("c", &[]),
    ]);
    let request = PlanRequest::new(&build_file);

    let first = plan_pass(&request, &provider, Some(&JsonRenderer)).await.unwrap();
    let second = plan_pass(&request, &provider, Some(&JsonRenderer)).await.unwrap();

    assert_eq!(first.order, second.order);
    assert_eq!(first.graph, second.graph);
    assert_eq!(first.views, second.views);
    assert_eq!(first.order.order(), ["c", "b", "a"]);
    // Three packages on two arches, one sync job per arch, import and main.
    assert_eq!(first.graph.len(), 3 * 2 + 2 + 2);
}

#[tokio::test]
async fn test_report_serializes() {
    let build_file = BuildFileFixture::single_target(&["a", "b"]);
    let backend = InMemoryBackend::new();

    let report = connected(&build_file, &ab_provider(), &backend, false).await;
    let json = serde_json::to_value(&report).unwrap();

    assert_eq!(json["status"], "succeeded");
    assert_eq!(json["mode"], "connected");
    assert_eq!(json["summary"]["create"], 5);
    assert!(json.get("failure").is_none());
    assert!(json["pass_id"].as_str().is_some());
}
