mod common;

use common::{
    drain, flat_frame, test_config, textured_frame, CenteredDetector, FixedExtractor, TestContext,
};
use facelock_session::{
    AesGcmCipher, DropReason, FailureReason, FrameRejection, IdentityStore, MemoryIdentityStore,
    Orchestrator, ReplaySource, SessionError, SessionEvent, SessionMode, SessionState,
    SqliteIdentityStore,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

fn enroll(name: &str) -> SessionMode {
    SessionMode::Enroll { name: name.to_string() }
}

#[tokio::test]
async fn test_authenticate_without_identities_fails_fast() {
    let ctx = TestContext::new().await;

    let err = ctx.handle.start(SessionMode::Authenticate, None).await.unwrap_err();
    assert!(matches!(err, SessionError::NoIdentitiesEnrolled));
    assert_eq!(
        ctx.handle.state(),
        SessionState::Failed {
            reason: FailureReason::NoIdentitiesEnrolled
        }
    );

    let stats = ctx.handle.stats().await.unwrap();
    assert_eq!(stats.processed, 0);
    assert_eq!(ctx.detector.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_start_requires_configuration() {
    let handle = Orchestrator::builder()
        .config(test_config())
        .detector(Arc::new(CenteredDetector::default()))
        .extractor(Arc::new(FixedExtractor::new(vec![1.0, 0.0])))
        .store(Arc::new(MemoryIdentityStore::new()))
        .cipher(Arc::new(AesGcmCipher::new(b"k")))
        .build()
        .unwrap();

    let err = handle.start(enroll("ada"), None).await.unwrap_err();
    assert!(matches!(err, SessionError::NotConfigured));
    assert_eq!(handle.state(), SessionState::NotConfigured);

    // Stop and cancel are no-ops before configuration.
    handle.stop().await.unwrap();
    handle.cancel().await.unwrap();
    assert_eq!(handle.state(), SessionState::NotConfigured);
}

#[test]
fn test_build_reports_missing_component() {
    let result = Orchestrator::builder()
        .detector(Arc::new(CenteredDetector::default()))
        .store(Arc::new(MemoryIdentityStore::new()))
        .build();
    let Err(err) = result else {
        panic!("build should fail without an extractor");
    };
    assert!(matches!(err, SessionError::MissingComponent("embedding extractor")));
}

#[tokio::test(start_paused = true)]
async fn test_session_times_out_without_acceptable_frames() {
    let mut ctx = TestContext::new().await;
    ctx.handle.start(enroll("ada"), Some(Duration::from_secs(5))).await.unwrap();

    let mut all = ctx.handle.subscribe();
    ctx.feed_frame(flat_frame(1)).await;
    assert!(drain(&mut all).iter().any(|e| matches!(
        e,
        SessionEvent::FrameRejected {
            sequence: 1,
            reason: FrameRejection::LowQuality { .. }
        }
    )));

    let state = ctx.handle.wait_for_state(|s| s.is_terminal()).await.unwrap();
    assert_eq!(
        state,
        SessionState::Failed {
            reason: FailureReason::Timeout
        }
    );
    assert!(ctx.store.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_enrollment_completes_at_required_samples() {
    let mut ctx = TestContext::new().await;
    let mut all = ctx.handle.subscribe();
    ctx.handle.start(enroll("ada"), None).await.unwrap();
    assert_eq!(
        ctx.handle.state(),
        SessionState::UserRegistration {
            name: "ada".into(),
            collected: 0,
            required: 5
        }
    );

    for sequence in 1..=4 {
        ctx.feed(sequence).await;
    }
    assert_eq!(
        ctx.handle.state(),
        SessionState::UserRegistration {
            name: "ada".into(),
            collected: 4,
            required: 5
        }
    );

    ctx.feed(5).await;
    let SessionState::Completed {
        identity,
        display_name,
        enrolled,
    } = ctx.handle.state()
    else {
        panic!("expected completion, got {:?}", ctx.handle.state());
    };
    assert!(enrolled);
    assert_eq!(display_name, "ada");

    let records = ctx.store.list().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].metadata.id, identity);
    assert_eq!(records[0].metadata.sample_count, 5);

    // Frames after completion are ignored.
    let dropped = ctx.feed(6).await;
    assert_eq!(
        dropped,
        SessionEvent::FrameDropped {
            sequence: 6,
            reason: DropReason::Inactive
        }
    );
    let stats = ctx.handle.stats().await.unwrap();
    assert_eq!(stats.processed, 5);
    assert_eq!(stats.ignored, 1);
    assert_eq!(stats.received, 6);

    let events = drain(&mut all);
    let progress: Vec<usize> = events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::EnrollmentProgress(p) => Some(p.collected),
            _ => None,
        })
        .collect();
    assert_eq!(progress, vec![1, 2, 3, 4, 5]);

    let guidance: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::Guidance(g) => Some(*g),
            _ => None,
        })
        .collect();
    assert!(!guidance.is_empty());
    assert!(guidance.windows(2).all(|w| w[0] != w[1]));
}

#[tokio::test]
async fn test_authenticates_enrolled_identity() {
    let mut ctx = TestContext::new().await;
    ctx.handle.start(enroll("ada"), None).await.unwrap();
    for sequence in 1..=5 {
        ctx.feed(sequence).await;
    }
    let SessionState::Completed { identity: enrolled_id, .. } = ctx.handle.state() else {
        panic!("enrollment did not complete");
    };

    ctx.handle.start(SessionMode::Authenticate, None).await.unwrap();
    assert_eq!(ctx.handle.state(), SessionState::Scanning);
    ctx.feed(6).await;

    assert_eq!(
        ctx.handle.state(),
        SessionState::Completed {
            identity: enrolled_id.clone(),
            display_name: "ada".into(),
            enrolled: false,
        }
    );

    let stats = ctx.handle.identity_statistics(&enrolled_id).await.unwrap().unwrap();
    assert_eq!(stats.comparisons, 1);
    assert_eq!(stats.successful_matches, 1);
    assert!(ctx.handle.identity_statistics("nobody").await.unwrap().is_none());
}

#[tokio::test]
async fn test_ambiguous_match_is_rejected_and_scanning_resumes() {
    let mut ctx = TestContext::new().await;
    ctx.seed_identity("ada", &[vec![0.95, (1.0f32 - 0.95 * 0.95).sqrt(), 0.0]]).await;
    ctx.seed_identity("bob", &[vec![0.92, 0.0, (1.0f32 - 0.92 * 0.92).sqrt()]]).await;

    let mut all = ctx.handle.subscribe();
    ctx.handle.start(SessionMode::Authenticate, None).await.unwrap();
    ctx.feed(1).await;

    assert!(drain(&mut all).iter().any(|e| matches!(
        e,
        SessionEvent::FrameRejected {
            sequence: 1,
            reason: FrameRejection::Ambiguous { .. }
        }
    )));
    assert_eq!(ctx.handle.state(), SessionState::Scanning);
}

#[tokio::test]
async fn test_auto_mode_enrolls_unknown_face() {
    let mut ctx = TestContext::new().await;
    ctx.seed_identity("ada", &[vec![1.0, 0.0, 0.0]]).await;
    ctx.extractor.set(vec![0.0, 1.0, 0.0]);

    let mut all = ctx.handle.subscribe();
    ctx.handle.start(SessionMode::Auto, None).await.unwrap();
    ctx.feed(1).await;

    let switched = drain(&mut all)
        .into_iter()
        .find_map(|e| match e {
            SessionEvent::ModeSwitched { name } => Some(name),
            _ => None,
        })
        .expect("mode switch event");
    assert!(switched.starts_with("user-"));
    assert_eq!(
        ctx.handle.state(),
        SessionState::UserRegistration {
            name: switched.clone(),
            collected: 1,
            required: 5
        }
    );

    for sequence in 2..=5 {
        ctx.feed(sequence).await;
    }
    let SessionState::Completed {
        display_name, enrolled, ..
    } = ctx.handle.state()
    else {
        panic!("auto enrollment did not complete");
    };
    assert!(enrolled);
    assert_eq!(display_name, switched);
    assert_eq!(ctx.handle.list_identities().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_auto_mode_matches_known_face() {
    let mut ctx = TestContext::new().await;
    let id = ctx.seed_identity("ada", &[vec![1.0, 0.0, 0.0]]).await;

    ctx.handle.start(SessionMode::Auto, None).await.unwrap();
    ctx.feed(1).await;
    assert_eq!(
        ctx.handle.state(),
        SessionState::Completed {
            identity: id,
            display_name: "ada".into(),
            enrolled: false
        }
    );
}

#[tokio::test]
async fn test_frames_dropped_while_pipeline_busy() {
    let mut ctx = TestContext::with(
        test_config(),
        FixedExtractor::slow(vec![1.0, 0.0, 0.0], Duration::from_millis(150)),
    )
    .await;
    let mut all = ctx.handle.subscribe();
    ctx.handle.start(enroll("ada"), None).await.unwrap();

    assert!(ctx.handle.submit_frame(textured_frame(1)));
    assert!(ctx.handle.submit_frame(textured_frame(2)));
    assert!(ctx.handle.submit_frame(textured_frame(3)));
    common::wait_for_event(&mut ctx.events, |e| {
        matches!(e, SessionEvent::FrameHandled { sequence: 1 })
    })
    .await;

    let stats = ctx.handle.stats().await.unwrap();
    assert_eq!(stats.received, 3);
    assert_eq!(stats.processed, 1);
    assert_eq!(stats.dropped_busy, 2);

    let busy: Vec<u64> = drain(&mut all)
        .into_iter()
        .filter_map(|e| match e {
            SessionEvent::FrameDropped {
                sequence,
                reason: DropReason::Busy,
            } => Some(sequence),
            _ => None,
        })
        .collect();
    assert_eq!(busy, vec![2, 3]);
}

#[tokio::test]
async fn test_cancel_discards_in_flight_result() {
    let ctx = TestContext::with(
        test_config(),
        FixedExtractor::slow(vec![1.0, 0.0, 0.0], Duration::from_millis(100)),
    )
    .await;
    ctx.seed_identity("ada", &[vec![1.0, 0.0, 0.0]]).await;
    let mut all = ctx.handle.subscribe();

    ctx.handle.start(SessionMode::Authenticate, None).await.unwrap();
    assert!(ctx.handle.submit_frame(textured_frame(1)));
    ctx.handle.wait_for_state(|s| *s == SessionState::Processing).await.unwrap();

    ctx.handle.cancel().await.unwrap();
    ctx.handle.cancel().await.unwrap();
    assert_eq!(ctx.handle.state(), SessionState::Cancelled);

    tokio::time::sleep(Duration::from_millis(300)).await;
    let stats = ctx.handle.stats().await.unwrap();
    assert_eq!(stats.discarded, 1);
    assert_eq!(stats.processed, 0);
    assert_eq!(ctx.handle.state(), SessionState::Cancelled);

    let events = drain(&mut all);
    let cancellations = events
        .iter()
        .filter(|e| matches!(e, SessionEvent::StateChanged { to: SessionState::Cancelled, .. }))
        .count();
    assert_eq!(cancellations, 1);
    assert!(!events.iter().any(|e| matches!(e, SessionEvent::FrameHandled { .. })));

    ctx.handle.stop().await.unwrap();
    ctx.handle.stop().await.unwrap();
    assert_eq!(ctx.handle.state(), SessionState::Ready);

    // The reclaimed pipeline serves the next session.
    ctx.handle.start(SessionMode::Authenticate, None).await.unwrap();
    assert_eq!(ctx.handle.state(), SessionState::Scanning);
}

#[tokio::test]
async fn test_repeated_collaborator_failures_end_session() {
    let mut ctx = TestContext::new().await;
    ctx.handle.start(enroll("ada"), None).await.unwrap();

    ctx.extractor.fail(true);
    for sequence in 1..=4 {
        ctx.feed(sequence).await;
    }
    ctx.extractor.fail(false);
    ctx.feed(5).await;
    ctx.extractor.fail(true);
    for sequence in 6..=9 {
        ctx.feed(sequence).await;
    }
    assert_eq!(
        ctx.handle.state(),
        SessionState::UserRegistration {
            name: "ada".into(),
            collected: 1,
            required: 5
        }
    );

    ctx.feed(10).await;
    assert_eq!(
        ctx.handle.state(),
        SessionState::Failed {
            reason: FailureReason::CollaboratorFailure
        }
    );
}

#[tokio::test]
async fn test_best_recent_frame_tracks_face_quality() {
    let mut ctx = TestContext::new().await;
    assert!(ctx.handle.best_recent_frame().await.unwrap().is_none());

    ctx.handle.start(enroll("ada"), None).await.unwrap();
    ctx.feed(1).await;
    ctx.feed(2).await;

    let best = ctx.handle.best_recent_frame().await.unwrap().expect("annotated frame");
    assert!(matches!(best.frame.sequence, 1 | 2));
    assert!(best.face_quality.unwrap() > 0.0);
}

#[tokio::test]
async fn test_delete_identity() {
    let ctx = TestContext::new().await;
    let id = ctx.seed_identity("ada", &[vec![1.0, 0.0, 0.0]]).await;

    let listed = ctx.handle.list_identities().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].display_name, "ada");

    assert!(ctx.handle.delete_identity(&id).await.unwrap());
    assert!(!ctx.handle.delete_identity(&id).await.unwrap());
    assert!(ctx.handle.list_identities().await.unwrap().is_empty());

    let err = ctx.handle.start(SessionMode::Authenticate, None).await.unwrap_err();
    assert!(matches!(err, SessionError::NoIdentitiesEnrolled));
}

#[tokio::test]
async fn test_unavailable_capture_fails_configuration() {
    common::init_tracing();
    let handle = Orchestrator::builder()
        .config(test_config())
        .detector(Arc::new(CenteredDetector::default()))
        .extractor(Arc::new(FixedExtractor::new(vec![1.0, 0.0])))
        .store(Arc::new(MemoryIdentityStore::new()))
        .cipher(Arc::new(AesGcmCipher::new(b"k")))
        .capture(Arc::new(ReplaySource::new(Vec::new(), Duration::from_millis(10))))
        .build()
        .unwrap();

    let err = handle.configure().await.unwrap_err();
    assert!(matches!(err, SessionError::Capture(_)));
    assert_eq!(
        handle.state(),
        SessionState::Failed {
            reason: FailureReason::CaptureUnavailable
        }
    );
    assert!(matches!(handle.start(enroll("ada"), None).await, Err(SessionError::NotConfigured)));
}

#[tokio::test(start_paused = true)]
async fn test_replayed_capture_drives_enrollment() {
    common::init_tracing();
    let store = Arc::new(MemoryIdentityStore::new());
    let frames = (1..=12).map(textured_frame).collect();
    let handle = Orchestrator::builder()
        .config(test_config())
        .detector(Arc::new(CenteredDetector::default()))
        .extractor(Arc::new(FixedExtractor::new(vec![0.2, 0.4, 0.9])))
        .store(store.clone())
        .cipher(Arc::new(AesGcmCipher::new(b"replay")))
        .capture(Arc::new(ReplaySource::new(frames, Duration::from_millis(50))))
        .build()
        .unwrap();

    handle.configure().await.unwrap();
    handle.start(enroll("replay"), None).await.unwrap();

    let state = handle.wait_for_state(|s| s.is_terminal()).await.unwrap();
    assert!(matches!(
        state,
        SessionState::Completed { enrolled: true, ref display_name, .. } if display_name == "replay"
    ));

    let records = store.list().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].metadata.sample_count, 5);
    assert!(handle.stats().await.unwrap().processed >= 5);
}

#[tokio::test]
async fn test_enrollment_survives_restart_with_sqlite() {
    common::init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("identities.db");
    let key = b"sqlite-integration";

    let build = |store: Arc<SqliteIdentityStore>| {
        Orchestrator::builder()
            .config(test_config())
            .detector(Arc::new(CenteredDetector::default()))
            .extractor(Arc::new(FixedExtractor::new(vec![0.3, 0.1, 0.8, 0.5])))
            .store(store)
            .cipher(Arc::new(AesGcmCipher::new(key)))
            .build()
            .unwrap()
    };

    let first = build(Arc::new(SqliteIdentityStore::open(&path).await.unwrap()));
    let mut events = first.subscribe();
    first.configure().await.unwrap();
    first.start(enroll("ada"), None).await.unwrap();
    for sequence in 1..=5 {
        assert!(first.submit_frame(textured_frame(sequence)));
        common::wait_for_event(&mut events, |e| {
            matches!(e, SessionEvent::FrameHandled { sequence: s } if *s == sequence)
        })
        .await;
    }
    let SessionState::Completed { identity, .. } = first.state() else {
        panic!("enrollment did not complete");
    };
    drop(first);

    let second = build(Arc::new(SqliteIdentityStore::open(&path).await.unwrap()));
    let mut events = second.subscribe();
    second.configure().await.unwrap();
    second.start(SessionMode::Authenticate, None).await.unwrap();
    assert!(second.submit_frame(textured_frame(1)));
    common::wait_for_event(&mut events, |e| {
        matches!(e, SessionEvent::FrameHandled { sequence: 1 })
    })
    .await;

    assert_eq!(
        second.state(),
        SessionState::Completed {
            identity,
            display_name: "ada".into(),
            enrolled: false
        }
    );
}
