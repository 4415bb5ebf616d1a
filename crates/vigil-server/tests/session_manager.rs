use tokio::sync::mpsc;
use vigil_server::session::{
    now_ms, SendOutcome, Session, SessionManager, LIVENESS_TIMEOUT_MS, SEND_QUEUE_CAPACITY,
};

fn new_manager() -> (
    std::sync::Arc<SessionManager>,
    mpsc::Receiver<vigil_server::session::StatusEvent>,
) {
    let (tx, rx) = mpsc::channel(64);
    (SessionManager::new(tx), rx)
}

#[tokio::test]
async fn at_most_one_session_per_probe() {
    let (manager, _events) = new_manager();

    let (a, _rx_a) = Session::new("p1");
    let (b, _rx_b) = Session::new("p1");

    manager.register(a.clone());
    assert_eq!(manager.count(), 1);

    manager.register(b.clone());
    assert_eq!(manager.count(), 1, "re-register must displace, not add");

    // The displaced session is closed; the new one is live.
    assert!(a.is_closed());
    assert!(a.cancel_token().is_cancelled());
    assert!(!b.is_closed());
}

#[tokio::test]
async fn displaced_session_cannot_unregister_its_replacement() {
    let (manager, _events) = new_manager();

    let (a, _rx_a) = Session::new("p1");
    let (b, _rx_b) = Session::new("p1");
    manager.register(a.clone());
    manager.register(b.clone());

    // A's pumps exit after displacement and call unregister; identity
    // check keeps B registered.
    manager.unregister(&a);
    assert_eq!(manager.count(), 1);
    assert!(manager.contains("p1"));
    assert!(!b.is_closed());

    manager.unregister(&b);
    assert_eq!(manager.count(), 0);
    assert!(b.is_closed());
}

#[tokio::test]
async fn send_to_routes_to_the_current_session() {
    let (manager, _events) = new_manager();

    let (a, mut rx_a) = Session::new("p1");
    let (b, mut rx_b) = Session::new("p1");
    manager.register(a);
    manager.register(b);

    assert_eq!(
        manager.send_to("p1", "frame-1".to_string()),
        SendOutcome::Sent
    );
    assert_eq!(rx_b.recv().await.unwrap(), "frame-1");
    assert!(rx_a.try_recv().is_err());

    assert_eq!(
        manager.send_to("nope", "frame-2".to_string()),
        SendOutcome::NotFound
    );
}

#[tokio::test]
async fn full_queue_drops_frames_without_teardown() {
    let (manager, _events) = new_manager();

    let (session, _rx) = Session::new("p1");
    manager.register(session.clone());

    for i in 0..SEND_QUEUE_CAPACITY {
        assert_eq!(
            manager.send_to("p1", format!("frame-{i}")),
            SendOutcome::Sent
        );
    }
    assert_eq!(
        manager.send_to("p1", "overflow".to_string()),
        SendOutcome::QueueFull
    );

    // Overflow is not fatal: the session stays registered and open.
    assert!(manager.contains("p1"));
    assert!(!session.is_closed());
}

#[tokio::test]
async fn broadcast_is_best_effort() {
    let (manager, _events) = new_manager();

    let (a, mut rx_a) = Session::new("p1");
    let (b, _rx_b) = Session::new("p2");
    manager.register(a);
    manager.register(b.clone());

    // Fill p2's queue so the broadcast drops for it only.
    for _ in 0..SEND_QUEUE_CAPACITY {
        b.enqueue("filler".to_string());
    }

    manager.broadcast("hello");
    assert_eq!(rx_a.recv().await.unwrap(), "hello");
    assert_eq!(manager.count(), 2);
}

#[tokio::test]
async fn eviction_boundary_is_exactly_the_timeout() {
    let (manager, _events) = new_manager();

    let (fresh, _rx1) = Session::new("fresh");
    let t0 = now_ms();
    fresh.touch(t0);
    manager.register(fresh.clone());

    // One millisecond short of the cutoff: kept.
    assert_eq!(manager.evict_stale(t0 + LIVENESS_TIMEOUT_MS - 1), 0);
    assert!(manager.contains("fresh"));

    // Exactly at the cutoff: evicted and closed.
    assert_eq!(manager.evict_stale(t0 + LIVENESS_TIMEOUT_MS), 1);
    assert!(!manager.contains("fresh"));
    assert!(fresh.is_closed());
}

#[tokio::test]
async fn eviction_revalidates_after_a_concurrent_reconnect() {
    let (manager, _events) = new_manager();

    let (stale, _rx1) = Session::new("p1");
    let t0 = now_ms();
    stale.touch(t0);
    manager.register(stale);

    // The probe reconnects before the sweep runs; the sweep must not evict
    // the fresh replacement.
    let (fresh, _rx2) = Session::new("p1");
    fresh.touch(t0 + LIVENESS_TIMEOUT_MS);
    manager.register(fresh.clone());

    assert_eq!(manager.evict_stale(t0 + LIVENESS_TIMEOUT_MS), 0);
    assert!(manager.contains("p1"));
    assert!(!fresh.is_closed());
}

#[tokio::test]
async fn status_events_track_connectivity() {
    let (manager, mut events) = new_manager();

    let (session, _rx) = Session::new("p1");
    session.touch(now_ms());
    manager.register(session.clone());

    let online = events.recv().await.unwrap();
    assert_eq!(online.probe_id, "p1");
    assert!(online.online);

    manager.unregister(&session);
    let offline = events.recv().await.unwrap();
    assert_eq!(offline.probe_id, "p1");
    assert!(!offline.online);
}

#[tokio::test]
async fn eviction_emits_an_offline_event() {
    let (manager, mut events) = new_manager();

    let (session, _rx) = Session::new("p1");
    let t0 = now_ms();
    session.touch(t0);
    manager.register(session);
    let _ = events.recv().await.unwrap(); // online

    manager.evict_stale(t0 + LIVENESS_TIMEOUT_MS + 1);
    let offline = events.recv().await.unwrap();
    assert!(!offline.online);
}

#[tokio::test]
async fn close_is_idempotent() {
    let (session, _rx) = Session::new("p1");
    session.close();
    session.close();
    assert!(session.is_closed());
}

#[tokio::test]
async fn last_active_is_monotonic() {
    let (session, _rx) = Session::new("p1");
    let t0 = now_ms();
    session.touch(t0 + 5_000);
    session.touch(t0 + 3_000);
    assert_eq!(session.last_active_ms(), t0 + 5_000);
}
