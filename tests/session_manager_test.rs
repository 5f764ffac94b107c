mod common;

use colabri_session::session::Ineligible;
use colabri_session::ws::PresenceStore;
use colabri_session::{ChannelKind, DocumentKind, Evaluation, SessionError, SessionManager, SessionState};
use common::{eventually, metadata, room, session_config, user, FakeNetwork};
use std::sync::Arc;
use std::time::Duration;

const FULL_TEARDOWN: [&str; 7] = [
    "leave-ephemeral",
    "leave-persistent",
    "destroy-persistent",
    "destroy-ephemeral",
    "cleanup-persistent",
    "cleanup-ephemeral",
    "destroy-connection",
];

fn manager(net: &Arc<FakeNetwork>) -> SessionManager {
    SessionManager::new(session_config(), net.connector())
}

async fn settle(manager: &SessionManager) -> SessionState {
    let mut state = manager.state();
    for _ in 0..200 {
        if state != SessionState::Connecting {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        state = manager.state();
    }
    state
}

fn tail(events: &[String], n: usize) -> Vec<&str> {
    events[events.len().saturating_sub(n)..].iter().map(String::as_str).collect()
}

#[tokio::test]
async fn missing_metadata_attempts_no_connection() {
    let net = FakeNetwork::new();
    let session = manager(&net);

    let outcome = session.evaluate(None, Some(&user()), &room());

    assert_eq!(outcome, Evaluation::Ineligible(Ineligible::MissingMetadata));
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(session.wait_settled().await, SessionState::Idle);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(net.opened(), 0);
    assert!(!session.view().is_connected());
}

#[tokio::test]
async fn connect_publishes_view_and_unmount_tears_down_in_order() {
    let net = FakeNetwork::new();
    let session = manager(&net);
    let mut context = session.subscribe();
    let metadata = metadata(DocumentKind::ColabStatement);

    assert_eq!(session.evaluate(Some(&metadata), Some(&user()), &room()), Evaluation::Started);
    let document = context
        .wait_connected(Duration::from_secs(2))
        .await
        .expect("view published");

    assert_eq!(session.state(), SessionState::Connected);
    assert_eq!(context.current().document_id.as_deref(), Some("d1"));
    assert_eq!(document.metadata, metadata);
    let local = document.presence.local().expect("own presence announced");
    assert_eq!(local.user, "u1");
    assert_eq!(
        net.events(),
        vec!["open", "ready", "join-persistent", "join-ephemeral"]
    );

    session.teardown().await;

    assert!(!context.is_connected());
    assert_eq!(context.current().document_id, None);
    assert_eq!(session.state(), SessionState::TornDown);
    assert_eq!(tail(&net.events(), FULL_TEARDOWN.len()), FULL_TEARDOWN.to_vec());
    assert_eq!(net.live(), 0);

    // A second unmount changes nothing
    session.teardown().await;
    assert_eq!(net.events().len(), 4 + FULL_TEARDOWN.len());
}

#[tokio::test]
async fn ready_failure_joins_nothing_and_surfaces_connection_failure() {
    let net = FakeNetwork::new();
    net.fail_ready();
    let session = manager(&net);
    let metadata = metadata(DocumentKind::ColabStatement);

    session.evaluate(Some(&metadata), Some(&user()), &room());

    match session.wait_settled().await {
        SessionState::Failed(e) => assert!(e.is_connection_failure(), "unexpected error {e}"),
        other => panic!("expected a failed session, got {other:?}"),
    }
    assert_eq!(net.count("join-persistent") + net.count("join-ephemeral"), 0);
    assert_eq!(net.live(), 0);
    assert!(!session.view().is_connected());

    // No automatic retry
    assert_eq!(
        session.evaluate(Some(&metadata), Some(&user()), &room()),
        Evaluation::AlreadyStarted
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(net.opened(), 1);
}

#[tokio::test]
async fn ready_timeout_fails_with_connection_failure() {
    let net = FakeNetwork::new();
    let _gate = net.hold_ready();
    let mut config = session_config();
    config.connect_timeout = Duration::from_millis(100);
    let session = SessionManager::new(config, net.connector());

    session.evaluate(Some(&metadata(DocumentKind::ColabStatement)), Some(&user()), &room());

    match session.wait_settled().await {
        SessionState::Failed(e) => {
            assert!(e.is_connection_failure(), "unexpected error {e}");
            assert!(e.to_string().contains("not ready after 100ms"), "unexpected error {e}");
        }
        other => panic!("expected a failed session, got {other:?}"),
    }
    assert_eq!(net.count("ready-timeout"), 1);
    assert_eq!(net.count("join-persistent") + net.count("join-ephemeral"), 0);
    assert_eq!(net.live(), 0);
    assert!(!session.view().is_connected());
}

#[tokio::test]
async fn unanswered_join_times_out_and_releases_the_joined_channel() {
    let net = FakeNetwork::new();
    net.silent_join(ChannelKind::Ephemeral);
    let mut config = session_config();
    config.join_timeout = Duration::from_millis(100);
    let session = SessionManager::new(config, net.connector());

    session.evaluate(Some(&metadata(DocumentKind::ColabStatement)), Some(&user()), &room());

    match session.wait_settled().await {
        SessionState::Failed(SessionError::JoinFailure { kind, reason, .. }) => {
            assert_eq!(kind, ChannelKind::Ephemeral);
            assert_eq!(reason, "no reply after 100ms");
        }
        other => panic!("expected a join failure, got {other:?}"),
    }
    assert_eq!(
        tail(&net.events(), 5),
        vec![
            "leave-persistent",
            "destroy-persistent",
            "cleanup-persistent",
            "cleanup-ephemeral",
            "destroy-connection",
        ]
    );
    assert_eq!(net.count("leave-ephemeral"), 0);
    assert_eq!(net.live(), 0);
}

#[tokio::test]
async fn failed_ephemeral_join_releases_only_what_was_joined() {
    let net = FakeNetwork::new();
    net.fail_join(ChannelKind::Ephemeral);
    let session = manager(&net);
    let metadata = metadata(DocumentKind::ColabStatement);

    session.evaluate(Some(&metadata), Some(&user()), &room());

    match settle(&session).await {
        SessionState::Failed(e) => assert!(e.is_join_failure(), "unexpected error {e}"),
        other => panic!("expected a failed session, got {other:?}"),
    }
    assert_eq!(
        net.events(),
        vec![
            "open",
            "ready",
            "join-persistent",
            "join-ephemeral",
            "leave-persistent",
            "destroy-persistent",
            "cleanup-persistent",
            "cleanup-ephemeral",
            "destroy-connection",
        ]
    );
    assert_eq!(net.count("leave-ephemeral"), 0);
    assert_eq!(net.live(), 0);
    assert!(!session.view().is_connected());

    // Nothing left to release
    session.teardown().await;
    assert_eq!(net.count("destroy-connection"), 1);
}

#[tokio::test]
async fn repeated_evaluation_connects_once() {
    let net = FakeNetwork::new();
    let session = manager(&net);
    let metadata = metadata(DocumentKind::ColabStatement);

    let outcomes: Vec<_> = (0..10)
        .map(|_| session.evaluate(Some(&metadata), Some(&user()), &room()))
        .collect();

    assert_eq!(outcomes[0], Evaluation::Started);
    assert!(outcomes[1..].iter().all(|o| *o == Evaluation::AlreadyStarted));
    assert_eq!(settle(&session).await, SessionState::Connected);
    assert_eq!(net.opened(), 1);
    assert_eq!(net.count("join-persistent"), 1);
    assert_eq!(net.count("join-ephemeral"), 1);

    // Still latched after connecting
    assert_eq!(
        session.evaluate(Some(&metadata), Some(&user()), &room()),
        Evaluation::AlreadyStarted
    );
    session.teardown().await;
}

#[tokio::test]
async fn teardown_during_connect_never_publishes() {
    let net = FakeNetwork::new();
    let gate = net.hold_ready();
    let session = Arc::new(manager(&net));
    let mut context = session.subscribe();
    let metadata = metadata(DocumentKind::ColabStatement);

    session.evaluate(Some(&metadata), Some(&user()), &room());
    assert!(eventually(|| net.opened() == 1).await);

    let unmount = tokio::spawn({
        let session = session.clone();
        async move { session.teardown().await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!unmount.is_finished());

    gate.notify_one();
    tokio::time::timeout(Duration::from_secs(2), unmount)
        .await
        .expect("teardown settles")
        .expect("teardown task");

    assert_eq!(session.state(), SessionState::TornDown);
    assert_eq!(net.live(), 0);
    assert_eq!(tail(&net.events(), FULL_TEARDOWN.len()), FULL_TEARDOWN.to_vec());
    assert!(
        tokio::time::timeout(Duration::from_millis(50), context.changed())
            .await
            .is_err(),
        "no view may be published after unmount"
    );
    assert!(!context.is_connected());
}

#[tokio::test]
async fn teardown_before_evaluate_prevents_connecting() {
    let net = FakeNetwork::new();
    let session = manager(&net);
    let metadata = metadata(DocumentKind::ColabStatement);

    session.teardown().await;

    assert_eq!(
        session.evaluate(Some(&metadata), Some(&user()), &room()),
        Evaluation::AlreadyStarted
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(net.opened(), 0);
}

#[tokio::test]
async fn failing_step_does_not_stop_the_rest_of_teardown() {
    let net = FakeNetwork::new();
    net.fail_leave(ChannelKind::Ephemeral);
    let session = manager(&net);
    let metadata = metadata(DocumentKind::ColabStatement);

    session.evaluate(Some(&metadata), Some(&user()), &room());
    assert_eq!(settle(&session).await, SessionState::Connected);
    session.teardown().await;

    assert_eq!(tail(&net.events(), FULL_TEARDOWN.len()), FULL_TEARDOWN.to_vec());
    assert_eq!(net.live(), 0);
    assert_eq!(session.state(), SessionState::TornDown);
}

#[tokio::test]
async fn dropping_the_manager_tears_down() {
    let net = FakeNetwork::new();
    let metadata = metadata(DocumentKind::ColabStatement);
    let presence: Arc<PresenceStore>;
    {
        let session = manager(&net);
        let mut context = session.subscribe();
        session.evaluate(Some(&metadata), Some(&user()), &room());
        presence = context
            .wait_connected(Duration::from_secs(2))
            .await
            .expect("view published")
            .presence
            .clone();
        assert!(presence.local().is_some());
    }

    // Closed by the time drop returns, the ordered release follows in the background
    assert_eq!(net.live(), 0);
    assert_eq!(net.count("abort-connection"), 1);
    assert!(eventually(|| net.count("destroy-connection") == 1).await);
    assert_eq!(tail(&net.events(), FULL_TEARDOWN.len()), FULL_TEARDOWN.to_vec());
    assert_eq!(net.live(), 0);
    assert!(presence.all().is_empty());
}

#[tokio::test]
async fn remount_after_connect_never_overlaps_connections() {
    let net = FakeNetwork::new();
    let metadata = metadata(DocumentKind::ColabStatement);

    let first = manager(&net);
    let mut first_ctx = first.subscribe();
    first.evaluate(Some(&metadata), Some(&user()), &room());
    first_ctx
        .wait_connected(Duration::from_secs(2))
        .await
        .expect("first mount connects");
    drop(first);
    assert_eq!(net.live(), 0);

    let second = manager(&net);
    let mut context = second.subscribe();
    second.evaluate(Some(&metadata), Some(&user()), &room());
    context
        .wait_connected(Duration::from_secs(2))
        .await
        .expect("second mount connects");

    assert_eq!(net.max_live(), 1);
    assert_eq!(net.opened(), 2);
    // The first mount's ordered release still ran
    assert!(eventually(|| net.count("destroy-connection") == 1).await);

    second.teardown().await;
    assert_eq!(net.live(), 0);
    assert_eq!(net.max_live(), 1);
}

#[tokio::test]
async fn remount_during_connect_never_overlaps_connections() {
    let net = FakeNetwork::new();
    let gate = net.hold_ready();
    let metadata = metadata(DocumentKind::ColabStatement);

    let first = manager(&net);
    first.evaluate(Some(&metadata), Some(&user()), &room());
    assert!(eventually(|| net.opened() == 1).await);
    drop(first);
    assert_eq!(net.live(), 0);

    let second = manager(&net);
    let mut context = second.subscribe();
    second.evaluate(Some(&metadata), Some(&user()), &room());
    assert!(eventually(|| net.opened() == 2).await);
    gate.notify_waiters();
    context
        .wait_connected(Duration::from_secs(2))
        .await
        .expect("second mount connects");

    assert_eq!(net.max_live(), 1);
    // Only the second mount got as far as joining
    assert_eq!(net.count("join-persistent"), 1);
    assert_eq!(net.count("join-ephemeral"), 1);

    second.teardown().await;
    assert_eq!(net.live(), 0);
}

#[tokio::test]
async fn drop_before_the_connect_runs_opens_nothing() {
    let net = FakeNetwork::new();
    let session = manager(&net);

    session.evaluate(Some(&metadata(DocumentKind::ColabStatement)), Some(&user()), &room());
    drop(session);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(net.opened(), 0);
    assert_eq!(net.max_live(), 0);
}

#[tokio::test]
async fn only_configured_kinds_are_collaborative() {
    let net = FakeNetwork::new();
    let session = manager(&net);

    let sheet = metadata(DocumentKind::ColabSheet);
    assert_eq!(
        session.evaluate(Some(&sheet), Some(&user()), &room()),
        Evaluation::Ineligible(Ineligible::UnsupportedKind(DocumentKind::ColabSheet))
    );
    let statement = metadata(DocumentKind::ColabStatement);
    assert_eq!(
        session.evaluate(Some(&statement), None, &room()),
        Evaluation::Ineligible(Ineligible::MissingUser)
    );
    assert_eq!(session.state(), SessionState::Idle);

    let mut config = session_config();
    config.collaborative_kinds.push(DocumentKind::ColabSheet);
    let sheets = SessionManager::new(config, net.connector());
    assert_eq!(sheets.evaluate(Some(&sheet), Some(&user()), &room()), Evaluation::Started);
    assert_eq!(settle(&sheets).await, SessionState::Connected);
    sheets.teardown().await;
    assert_eq!(net.live(), 0);
}

#[tokio::test]
async fn room_cleanup_can_be_disabled() {
    let net = FakeNetwork::new();
    let mut config = session_config();
    config.cleanup_rooms = false;
    let session = SessionManager::new(config, net.connector());
    let metadata = metadata(DocumentKind::ColabStatement);

    session.evaluate(Some(&metadata), Some(&user()), &room());
    assert_eq!(settle(&session).await, SessionState::Connected);
    session.teardown().await;

    assert_eq!(net.count("cleanup-persistent") + net.count("cleanup-ephemeral"), 0);
    assert_eq!(
        tail(&net.events(), 5),
        vec![
            "leave-ephemeral",
            "leave-persistent",
            "destroy-persistent",
            "destroy-ephemeral",
            "destroy-connection",
        ]
    );
}
