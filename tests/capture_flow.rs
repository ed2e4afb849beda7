mod support;

use bytes::Bytes;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{self, Instant};

use support::{
    capabilities, inspection_id, transformer_id, CountingReleaseHook, RecordingNavigator,
    ScriptedApi, StaticIdentity, UploadScript, INSPECTION, TRANSFORMER,
};
use thermal_capture_core::{
    BaselineImage, CaptureContext, CaptureStatus, CaptureWorkflow, ConfigError, ControllerConfig,
    DownloadError, FetchError, ImageOrigin, ImageRole, InspectionStatus, SelectedFile, TakenAt, UploadError, UploadState,
    WeatherCondition, WorkflowError,
};

struct Harness {
    api: Arc<ScriptedApi>,
    navigator: Arc<RecordingNavigator>,
    hook: Arc<CountingReleaseHook>,
    workflow: CaptureWorkflow,
}

fn harness_with(config: ControllerConfig, identity: Arc<StaticIdentity>) -> Harness {
    let api = ScriptedApi::new();
    let navigator = RecordingNavigator::new();
    let hook = CountingReleaseHook::new();
    let workflow = CaptureWorkflow::with_release_hook(
        CaptureContext::new(transformer_id(), inspection_id()),
        config,
        capabilities(&api, &navigator, identity),
        hook.clone(),
    )
    .expect("valid config");
    Harness {
        api,
        navigator,
        hook,
        workflow,
    }
}

fn harness() -> Harness {
    harness_with(ControllerConfig::default(), StaticIdentity::anonymous())
}

fn thermal_file(name: &str) -> SelectedFile {
    SelectedFile::new(name, vec![0x89, b'P', b'N', b'G', 1, 2, 3, 4]).with_content_type("image/png")
}

async fn advance_to(origin: Instant, ms: u64) {
    time::sleep_until(origin + Duration::from_millis(ms)).await;
}

fn inspection_page() -> String {
    format!("/transformer/{TRANSFORMER}/inspection/{INSPECTION}")
}

#[tokio::test(start_paused = true)]
async fn fast_upload_still_shows_progress_for_minimum_duration() {
    let h = harness();
    h.api.push_upload(
        UploadScript::succeed_after(100)
            .progress(200, 200, Some(1_000))
            .progress(200, 1_000, Some(1_000)),
    );

    let mut rx = h.workflow.subscribe();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let origin = Instant::now();
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let percent = rx.borrow_and_update().progress_percent;
            sink.lock().unwrap().push((origin.elapsed(), percent));
        }
    });

    h.workflow.select_file(thermal_file("t1.png")).unwrap();
    assert_eq!(h.workflow.state(), UploadState::Uploading);
    assert_eq!(h.workflow.view().status, CaptureStatus::Uploading);

    // Real ratio took over and is held below 100 while the bar must stay up.
    advance_to(origin, 450).await;
    assert_eq!(h.workflow.view().progress_percent, 98);

    advance_to(origin, 2_190).await;
    let view = h.workflow.view();
    assert_eq!(view.upload_state, UploadState::Finishing);
    assert_eq!(view.progress_percent, 99);

    advance_to(origin, 2_210).await;
    let view = h.workflow.view();
    assert_eq!(view.upload_state, UploadState::Complete);
    assert_eq!(view.status, CaptureStatus::Completed);
    assert_eq!(view.progress_percent, 100);
    assert_eq!(view.inspection_status, InspectionStatus::Completed);
    let current = view.current_handle.expect("uploaded image shown");
    assert_eq!(current.role, ImageRole::CurrentUploaded);
    assert_eq!(current.origin, ImageOrigin::Uploaded);
    assert_eq!(
        h.api.status_updates(),
        vec![(inspection_id(), InspectionStatus::Completed)]
    );

    // Success is held before leaving the page.
    advance_to(origin, 3_090).await;
    assert!(h.navigator.calls().is_empty());
    advance_to(origin, 3_110).await;
    assert_eq!(h.navigator.calls(), vec![(inspection_page(), false)]);

    let seen = seen.lock().unwrap().clone();
    assert!(seen.windows(2).all(|w| w[0].1 <= w[1].1), "progress regressed: {seen:?}");
    assert!(seen
        .iter()
        .filter(|(at, _)| *at < Duration::from_millis(2_200))
        .all(|(_, p)| *p <= 99));
    let first_full = seen.iter().find(|(_, p)| *p == 100).expect("reached 100");
    assert!(first_full.0 >= Duration::from_millis(2_200));

    let metrics = h.workflow.metrics().snapshot();
    assert_eq!(metrics.uploads_started, 1);
    assert_eq!(metrics.uploads_completed, 1);
    assert_eq!(metrics.redirects_issued, 1);
    assert_eq!(h.workflow.pending_timers(), 0);
}

#[tokio::test(start_paused = true)]
async fn simulated_progress_advances_without_transfer_events() {
    let h = harness();
    h.api.push_upload(UploadScript::never());
    let origin = Instant::now();
    h.workflow.select_file(thermal_file("t1.png")).unwrap();

    advance_to(origin, 190).await;
    let first = h.workflow.view().progress_percent;
    assert!(first > 0);

    advance_to(origin, 60_000).await;
    let later = h.workflow.view().progress_percent;
    assert!(later > first);
    assert!(later <= 95);
    assert_eq!(h.workflow.state(), UploadState::Uploading);
}

#[tokio::test(start_paused = true)]
async fn coarse_transfer_signal_does_not_freeze_the_bar() {
    let h = harness();
    h.api
        .push_upload(UploadScript::never().progress(100, 10, Some(1_000)));
    let origin = Instant::now();
    h.workflow.select_file(thermal_file("t1.png")).unwrap();

    advance_to(origin, 150).await;
    assert_eq!(h.workflow.view().progress_percent, 1);

    advance_to(origin, 400).await;
    let early = h.workflow.view().progress_percent;
    assert!(early > 1, "{early}");

    advance_to(origin, 30_000).await;
    let later = h.workflow.view().progress_percent;
    assert!(later > early);
    assert_eq!(later, 95);
    assert_eq!(h.workflow.state(), UploadState::Uploading);
}

#[tokio::test(start_paused = true)]
async fn invalid_config_is_rejected_at_construction() {
    let api = ScriptedApi::new();
    let navigator = RecordingNavigator::new();
    let config = ControllerConfig {
        ramp_tick_ms: 0,
        ..ControllerConfig::default()
    };

    let result = CaptureWorkflow::new(
        CaptureContext::new(transformer_id(), inspection_id()),
        config,
        capabilities(&api, &navigator, StaticIdentity::anonymous()),
    );

    assert!(matches!(
        result,
        Err(ConfigError::InvalidValue {
            field: "ramp_tick_ms",
            ..
        })
    ));
    assert!(api.uploads().is_empty());
}

#[tokio::test(start_paused = true)]
async fn slow_upload_completes_without_ramp() {
    let h = harness();
    h.api.push_upload(UploadScript::succeed_after(3_000));
    let origin = Instant::now();
    h.workflow.select_file(thermal_file("t1.png")).unwrap();

    advance_to(origin, 2_990).await;
    assert_eq!(h.workflow.state(), UploadState::Uploading);
    assert!(h.workflow.view().progress_percent < 100);

    advance_to(origin, 3_001).await;
    let view = h.workflow.view();
    assert_eq!(view.upload_state, UploadState::Complete);
    assert_eq!(view.progress_percent, 100);

    advance_to(origin, 3_910).await;
    assert_eq!(h.navigator.calls(), vec![(inspection_page(), false)]);
}

#[tokio::test(start_paused = true)]
async fn rejected_upload_surfaces_status_and_stays() {
    let h = harness();
    h.api
        .push_upload(UploadScript::fail_after(300, UploadError::Rejected { status: 500 }));
    let origin = Instant::now();
    h.workflow.select_file(thermal_file("t1.png")).unwrap();

    advance_to(origin, 310).await;
    let view = h.workflow.view();
    assert_eq!(view.upload_state, UploadState::Error);
    assert_eq!(view.status, CaptureStatus::Error);
    let message = view.error_message.expect("error message");
    assert!(message.contains("500"), "{message}");
    // The picked image stays visible next to the error.
    assert_eq!(
        view.current_handle.map(|h| h.origin),
        Some(ImageOrigin::LocalPreview)
    );
    assert_eq!(h.workflow.pending_timers(), 0);

    advance_to(origin, 10_000).await;
    assert!(h.navigator.calls().is_empty());
    assert!(h.api.status_updates().is_empty());
    assert_eq!(h.workflow.view().inspection_status, InspectionStatus::InProgress);
    assert_eq!(h.workflow.metrics().snapshot().uploads_failed, 1);
}

#[tokio::test(start_paused = true)]
async fn network_failure_uses_generic_message() {
    let h = harness();
    h.api.push_upload(UploadScript::fail_after(
        50,
        UploadError::Transport {
            message: "connection reset".into(),
        },
    ));
    h.workflow.select_file(thermal_file("t1.png")).unwrap();
    time::sleep(Duration::from_millis(100)).await;

    assert_eq!(
        h.workflow.view().error_message.as_deref(),
        Some("Network error during upload")
    );
}

#[tokio::test(start_paused = true)]
async fn cancel_mid_upload_stops_timers_and_releases_images() {
    let h = harness();
    h.api
        .push_upload(UploadScript::never().progress(300, 100, Some(1_000)));
    let origin = Instant::now();
    h.workflow.select_file(thermal_file("t1.png")).unwrap();
    let preview = h
        .workflow
        .view()
        .current_handle
        .expect("preview registered");
    assert_eq!(preview.origin, ImageOrigin::LocalPreview);

    advance_to(origin, 1_000).await;
    assert_eq!(h.api.uploads_in_flight(), 1);
    assert!(h.workflow.cancel());
    assert!(!h.workflow.cancel());

    let view = h.workflow.view();
    assert_eq!(view.upload_state, UploadState::Cancelled);
    assert_eq!(view.status, CaptureStatus::Pending);
    assert!(view.current_handle.is_none());
    assert_eq!(h.workflow.pending_timers(), 0);
    assert!(h.hook.was_released(preview.id));
    {
        let registry = h.workflow.registry().lock();
        assert!(!registry.contains(ImageRole::CurrentPreview));
        assert!(!registry.contains(ImageRole::CurrentUploaded));
    }

    time::sleep(Duration::from_millis(10)).await;
    assert_eq!(h.api.uploads_in_flight(), 0);

    advance_to(origin, 30_000).await;
    assert_eq!(h.workflow.state(), UploadState::Cancelled);
    assert!(h.navigator.calls().is_empty());
    assert_eq!(h.workflow.metrics().snapshot().uploads_cancelled, 1);
}

#[tokio::test(start_paused = true)]
async fn cancel_without_session_is_a_no_op() {
    let h = harness();
    assert!(!h.workflow.cancel());
    assert_eq!(h.workflow.state(), UploadState::Idle);
}

#[tokio::test(start_paused = true)]
async fn reselecting_replaces_the_running_session() {
    let h = harness();
    h.api
        .push_upload(UploadScript::never().progress(100, 900, Some(1_000)));
    h.api.push_upload(UploadScript::succeed_after(1_000));
    let origin = Instant::now();

    let first = h.workflow.select_file(thermal_file("first.png")).unwrap();
    let first_preview = h.workflow.view().current_handle.unwrap();
    advance_to(origin, 500).await;
    let before = h.workflow.view().progress_percent;
    assert!((90..=95).contains(&before), "{before}");

    let second = h.workflow.select_file(thermal_file("second.png")).unwrap();
    assert_ne!(first, second);
    assert_eq!(h.workflow.session_id(), Some(second));
    assert!(h.hook.was_released(first_preview.id));
    assert_eq!(h.workflow.view().progress_percent, 0);

    time::sleep(Duration::from_millis(10)).await;
    assert_eq!(h.api.uploads_in_flight(), 1);

    // The fresh session keeps its own minimum duration.
    advance_to(origin, 2_690).await;
    assert_eq!(h.workflow.state(), UploadState::Finishing);
    advance_to(origin, 2_760).await;
    assert_eq!(h.workflow.state(), UploadState::Complete);
    advance_to(origin, 4_000).await;
    assert_eq!(h.navigator.calls().len(), 1);

    let names: Vec<String> = h.api.uploads().into_iter().map(|u| u.file_name).collect();
    assert_eq!(names, vec!["first.png".to_string(), "second.png".to_string()]);
    let metrics = h.workflow.metrics().snapshot();
    assert_eq!(metrics.uploads_started, 2);
    assert_eq!(metrics.uploads_cancelled, 1);
    assert_eq!(metrics.uploads_completed, 1);
}

#[tokio::test(start_paused = true)]
async fn upload_carries_weather_and_uploader() {
    let h = harness_with(ControllerConfig::default(), StaticIdentity::username("  alice "));
    h.api.push_upload(UploadScript::never());
    h.workflow.set_weather(WeatherCondition::Rainy);
    assert_eq!(h.workflow.view().weather, WeatherCondition::Rainy);

    h.workflow.select_file(thermal_file("t1.png")).unwrap();
    time::sleep(Duration::from_millis(1)).await;

    let uploads = h.api.uploads();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].uploader_name, "alice");
    assert_eq!(uploads[0].weather, WeatherCondition::Rainy);
    assert_eq!(uploads[0].transformer_id, transformer_id());
    assert_eq!(uploads[0].inspection_id, inspection_id());
    assert_eq!(uploads[0].size_bytes, 8);
}

#[tokio::test(start_paused = true)]
async fn anonymous_uploader_falls_back_to_configured_name() {
    let h = harness();
    h.api.push_upload(UploadScript::never());
    h.workflow.select_file(thermal_file("t1.png")).unwrap();
    time::sleep(Duration::from_millis(1)).await;

    assert_eq!(h.api.uploads()[0].uploader_name, "admin");
    assert_eq!(h.api.uploads()[0].weather, WeatherCondition::Sunny);
}

#[tokio::test(start_paused = true)]
async fn status_sync_failure_still_navigates() {
    let h = harness();
    h.api.push_upload(UploadScript::succeed_after(2_500));
    h.api.fail_status_sync(FetchError::Http { status: 503 });
    let origin = Instant::now();
    h.workflow.select_file(thermal_file("t1.png")).unwrap();

    advance_to(origin, 3_500).await;
    assert_eq!(h.navigator.calls(), vec![(inspection_page(), false)]);
    assert_eq!(h.workflow.view().inspection_status, InspectionStatus::Completed);
    assert_eq!(h.workflow.metrics().snapshot().status_syncs_failed, 1);
}

#[tokio::test(start_paused = true)]
async fn teardown_during_finish_ramp_cancels_everything() {
    let h = harness();
    h.api.push_upload(UploadScript::succeed_after(500));
    let origin = Instant::now();
    h.workflow.select_file(thermal_file("t1.png")).unwrap();

    advance_to(origin, 1_000).await;
    assert_eq!(h.workflow.state(), UploadState::Finishing);
    assert!(h.workflow.pending_tasks() > 0);

    h.workflow.teardown();
    h.workflow.teardown();
    assert_eq!(h.workflow.pending_tasks(), 0);
    assert_eq!(h.workflow.registry().lock().tracked_count(), 0);
    assert_eq!(h.hook.released().len(), 1);

    advance_to(origin, 10_000).await;
    assert!(h.navigator.calls().is_empty());
    assert!(h.api.status_updates().is_empty());
    assert_ne!(h.workflow.state(), UploadState::Complete);

    assert_eq!(
        h.workflow.select_file(thermal_file("late.png")),
        Err(WorkflowError::TornDown)
    );
}

#[tokio::test(start_paused = true)]
async fn dropping_the_workflow_aborts_the_transfer() {
    let h = harness();
    h.api.push_upload(UploadScript::never());
    h.workflow.select_file(thermal_file("t1.png")).unwrap();
    time::sleep(Duration::from_millis(10)).await;
    assert_eq!(h.api.uploads_in_flight(), 1);

    let Harness {
        api, hook, workflow, ..
    } = h;
    drop(workflow);
    time::sleep(Duration::from_millis(10)).await;
    assert_eq!(api.uploads_in_flight(), 0);
    assert_eq!(hook.released().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn file_validation_rejects_before_any_transfer() {
    let config = ControllerConfig {
        max_upload_bytes: 4,
        ..ControllerConfig::default()
    };
    let h = harness_with(config, StaticIdentity::anonymous());

    assert_eq!(
        h.workflow.select_file(SelectedFile::new("empty.png", Vec::new())),
        Err(WorkflowError::EmptyFile)
    );
    assert_eq!(
        h.workflow.select_file(thermal_file("big.png")),
        Err(WorkflowError::FileTooLarge { size: 8, max: 4 })
    );
    time::sleep(Duration::from_millis(10)).await;
    assert!(h.api.uploads().is_empty());
    assert_eq!(h.workflow.state(), UploadState::Idle);
}

#[test]
fn capture_context_requires_both_route_ids() {
    assert_eq!(
        CaptureContext::from_route(None, Some(INSPECTION)),
        Err(WorkflowError::MissingRouteIds)
    );
    assert_eq!(
        CaptureContext::from_route(Some(TRANSFORMER), Some("  ")),
        Err(WorkflowError::MissingRouteIds)
    );
    let context = CaptureContext::from_route(Some(TRANSFORMER), Some(INSPECTION)).unwrap();
    assert_eq!(context.route().inspection_path(), inspection_page());
}

#[tokio::test(start_paused = true)]
async fn baseline_preview_is_best_effort() {
    let h = harness();
    h.api.set_baseline(Ok(Some(BaselineImage {
        url: support::image_ref(support::BASELINE_URL),
        taken_at: Some(TakenAt::Text("2024-05-01T10:00:00Z".into())),
    })));

    h.api
        .set_download(support::BASELINE_URL, 40, Ok(Bytes::from_static(b"baseline")));

    let handle = h.workflow.load_baseline().await.expect("baseline handle");
    assert_eq!(handle.role, ImageRole::Baseline);
    assert_eq!(handle.origin, ImageOrigin::Downloaded);
    assert_eq!(handle.size_bytes, 8);
    assert_eq!(
        h.api.downloads_requested.lock().unwrap().clone(),
        vec![support::BASELINE_URL.to_string()]
    );
    let view = h.workflow.view();
    assert_eq!(view.baseline_handle, Some(handle));
    assert_eq!(
        view.baseline_taken_at,
        Some(TakenAt::Text("2024-05-01T10:00:00Z".into()))
    );

    let failing = harness();
    failing
        .api
        .set_baseline(Err(FetchError::Network {
            message: "offline".into(),
        }));
    assert!(failing.workflow.load_baseline().await.is_none());
    assert!(failing.workflow.view().baseline_handle.is_none());

    let unreachable = harness();
    unreachable.api.set_baseline(Ok(Some(BaselineImage {
        url: support::image_ref(support::BASELINE_URL),
        taken_at: None,
    })));
    unreachable
        .api
        .set_download(support::BASELINE_URL, 0, Err(DownloadError::Http { status: 404 }));
    assert!(unreachable.workflow.load_baseline().await.is_none());
    assert!(unreachable.workflow.view().baseline_handle.is_none());
    assert_eq!(unreachable.workflow.metrics().snapshot().downloads_failed, 1);
}

#[tokio::test(start_paused = true)]
async fn teardown_releases_downloaded_baseline() {
    let h = harness();
    h.api.set_baseline(Ok(Some(BaselineImage {
        url: support::image_ref(support::BASELINE_URL),
        taken_at: None,
    })));
    h.api
        .set_download(support::BASELINE_URL, 0, Ok(Bytes::from_static(b"baseline")));
    let handle = h.workflow.load_baseline().await.expect("baseline handle");

    h.workflow.teardown();

    assert_eq!(h.hook.released(), vec![(handle.id, ImageOrigin::Downloaded)]);
    assert_eq!(h.workflow.registry().lock().tracked_count(), 0);
}
