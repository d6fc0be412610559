use super::*;
use crate::backend::{BackendStatus, EventData, ManifestStatus, SimpleStatus};

async fn registered(downloader: &VodDownloader, ready: &CatalogItem, invocation: u64) -> InvocationId {
    let invocation = InvocationId(invocation);
    downloader
        .reserve_slot(
            invocation,
            InFlight {
                item_id: ready.id,
                content_id: ready.content_id.clone(),
                drm: true,
                queue_id: None,
            },
            None,
        )
        .await
        .unwrap();
    invocation
}

fn signal(invocation: InvocationId, status: ManifestStatus) -> BackendEvent {
    BackendEvent {
        invocation,
        status: BackendStatus::Manifest(status),
        data: EventData::default(),
    }
}

#[tokio::test]
async fn slot_is_released_once_at_the_first_terminal_status() {
    let (downloader, _temp_dir, _catalog) = create_test_downloader(hanging()).await;
    let ready = ready_item(&downloader, "S01_E0001").await;
    let invocation = registered(&downloader, &ready, 900).await;
    let mut events = downloader.subscribe();

    let mut counts = Vec::new();
    for status in [
        ManifestStatus::Ready,
        ManifestStatus::Downloading,
        ManifestStatus::Downloading,
        ManifestStatus::Error,
    ] {
        downloader.handle_backend_event(signal(invocation, status)).await;
        counts.push(downloader.in_flight_count().await);
    }
    assert_eq!(counts, vec![1, 1, 1, 0], "only the terminal status frees the slot");

    let stored = item(&downloader, ready.id).await;
    assert_eq!(stored.outcome_code, OutcomeCode::DownloadError);
    assert_eq!(stored.backend_status, 4);

    // a late duplicate must not touch the item or the registry
    let mut edited = stored.clone();
    edited.outcome_code = OutcomeCode::Eligible;
    downloader.db.save_item(&edited).await.unwrap();
    downloader.handle_backend_event(signal(invocation, ManifestStatus::Error)).await;
    assert_eq!(downloader.in_flight_count().await, 0);
    assert_eq!(item(&downloader, ready.id).await.outcome_code, OutcomeCode::Eligible);

    let mut failed = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, Event::Failed { .. }) {
            failed += 1;
        }
    }
    assert_eq!(failed, 1);
}

#[tokio::test]
async fn completion_records_size_and_emits_the_path() {
    let (downloader, _temp_dir, _catalog) = create_test_downloader(hanging()).await;
    let ready = ready_item(&downloader, "S01_E0001").await;
    let invocation = registered(&downloader, &ready, 901).await;
    let mut events = downloader.subscribe();

    let output = downloader.config.download.save_dir.join("Show.mp4");
    downloader
        .handle_backend_event(BackendEvent {
            invocation,
            status: BackendStatus::Manifest(ManifestStatus::Completed),
            data: EventData {
                filesize: Some(4096),
                filesize_str: Some("4.00 KB".to_string()),
                output_path: Some(output.clone()),
                ..Default::default()
            },
        })
        .await;

    let stored = item(&downloader, ready.id).await;
    assert!(stored.completed);
    assert_eq!(stored.outcome_code, OutcomeCode::Completed);
    assert_eq!(stored.filesize, Some(4096));
    assert!(stored.end_time.is_some());
    match events.recv().await.unwrap() {
        Event::Completed { item_id, path } => {
            assert_eq!(item_id, ready.id);
            assert_eq!(path, output);
        }
        other => panic!("expected Completed, got {other:?}"),
    }
}

#[tokio::test]
async fn user_stop_sets_the_abort_flag() {
    let (downloader, _temp_dir, _catalog) = create_test_downloader(hanging()).await;
    let ready = ready_item(&downloader, "S01_E0001").await;
    let invocation = registered(&downloader, &ready, 902).await;

    downloader
        .handle_backend_event(BackendEvent {
            invocation,
            status: BackendStatus::Simple(SimpleStatus::UserStop),
            data: EventData::default(),
        })
        .await;

    let stored = item(&downloader, ready.id).await;
    assert!(stored.user_aborted);
    assert_eq!(stored.outcome_code, OutcomeCode::UserStop);
    assert_eq!(stored.backend_status, 6);
}

#[tokio::test]
async fn packet_faults_keep_the_item_downloading() {
    let (downloader, _temp_dir, _catalog) = create_test_downloader(hanging()).await;
    let mut ready = ready_item(&downloader, "S01_E0001").await;
    ready.outcome_code = OutcomeCode::Downloading;
    downloader.db.save_item(&ready).await.unwrap();
    let invocation = registered(&downloader, &ready, 903).await;

    downloader
        .handle_backend_event(BackendEvent {
            invocation,
            status: BackendStatus::Simple(SimpleStatus::PfStop),
            data: EventData {
                packet_faults: Some(21),
                ..Default::default()
            },
        })
        .await;

    let stored = item(&downloader, ready.id).await;
    assert!(stored.transient_fault);
    assert_eq!(stored.packet_faults, 21);
    assert_eq!(stored.outcome_code, OutcomeCode::Downloading);
    assert_eq!(downloader.in_flight_count().await, 0);
}

#[tokio::test]
async fn progress_is_broadcast_for_live_invocations_only() {
    let (downloader, _temp_dir, _catalog) = create_test_downloader(hanging()).await;
    let ready = ready_item(&downloader, "S01_E0001").await;
    let invocation = registered(&downloader, &ready, 904).await;
    let mut events = downloader.subscribe();

    downloader
        .handle_backend_event(BackendEvent {
            invocation,
            status: BackendStatus::Manifest(ManifestStatus::Downloading),
            data: EventData {
                percent: Some(42.0),
                ..Default::default()
            },
        })
        .await;
    downloader
        .handle_backend_event(signal(InvocationId(999), ManifestStatus::Downloading))
        .await;

    match events.try_recv().unwrap() {
        Event::Progress { item_id, percent } => {
            assert_eq!(item_id, ready.id);
            assert_eq!(percent, Some(42.0));
        }
        other => panic!("expected Progress, got {other:?}"),
    }
    assert!(events.try_recv().is_err(), "unknown invocations are ignored");
}
