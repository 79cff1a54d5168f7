//! Lifecycle behaviour of a session over the in-memory transport.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use assert_matches::assert_matches;
use bytes::Bytes;
use parking_lot::Mutex;
use tether_client::{
    AlwaysReconnect, BoxError, Endpoint, ErrorKind, ReconnectDecision, STALE_CLOSE_REASON, Session,
    SessionError, SessionState, TransportError, handler_fn, policy_fn,
};
use tether_core::CloseCode;
use tether_core::transport::memory::MemoryDialer;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use common::{CountingHooks, recording_handler, spawn_session, wait_for_state};

// ── Inbound delivery ────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn handler_sees_every_message_in_order_without_overlap() {
    const N: usize = 50;
    let dialer = MemoryDialer::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let in_flight = Arc::new(AtomicBool::new(false));
    let overlapped = Arc::new(AtomicBool::new(false));

    let handler = {
        let (seen, in_flight, overlapped) =
            (Arc::clone(&seen), Arc::clone(&in_flight), Arc::clone(&overlapped));
        handler_fn(move |payload: Bytes| {
            let (seen, in_flight, overlapped) =
                (Arc::clone(&seen), Arc::clone(&in_flight), Arc::clone(&overlapped));
            async move {
                if in_flight.swap(true, Ordering::SeqCst) {
                    overlapped.store(true, Ordering::SeqCst);
                }
                tokio::time::sleep(Duration::from_millis(3)).await;
                seen.lock().push(payload);
                in_flight.store(false, Ordering::SeqCst);
                Ok::<(), BoxError>(())
            }
        })
    };

    let session = Session::builder(dialer.clone(), "mem://feed")
        .handler(handler)
        .build();
    let cancel = CancellationToken::new();
    let run = spawn_session(&session, &cancel);

    let peer = dialer.next_peer().await.unwrap();
    for i in 0..N {
        assert!(peer.send(format!("{i}")));
    }
    while seen.lock().len() < N {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    peer.close(CloseCode::Normal, "done");

    let err = run.await.unwrap().unwrap_err();
    assert_matches!(
        err,
        SessionError::Read(TransportError::Closed { code: CloseCode::Normal, .. })
    );
    let expected: Vec<Bytes> = (0..N).map(|i| Bytes::from(format!("{i}"))).collect();
    assert_eq!(*seen.lock(), expected);
    assert!(!overlapped.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn handler_error_ends_connection_with_that_error() {
    let dialer = MemoryDialer::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let handler = {
        let seen = Arc::clone(&seen);
        handler_fn(move |payload: Bytes| {
            let seen = Arc::clone(&seen);
            async move {
                seen.lock().push(payload.clone());
                if payload == "3" {
                    return Err(BoxError::from("boom at 3"));
                }
                Ok::<(), BoxError>(())
            }
        })
    };
    let hooks = CountingHooks::default();
    let session = Session::builder(dialer.clone(), "mem://feed")
        .handler(handler)
        .hooks(hooks.clone())
        .build();
    let run = spawn_session(&session, &CancellationToken::new());

    let peer = dialer.next_peer().await.unwrap();
    for i in 1..=5 {
        assert!(peer.send(format!("{i}")));
    }

    let err = run.await.unwrap().unwrap_err();
    assert_matches!(&err, SessionError::Handler(e) if e.to_string() == "boom at 3");
    assert_eq!(
        *seen.lock(),
        vec![Bytes::from("1"), Bytes::from("2"), Bytes::from("3")]
    );
    assert_eq!(hooks.closes(), 1);
    assert_eq!(
        peer.close_frame(),
        Some((CloseCode::InternalError, "app closing".into()))
    );
    assert!(!session.is_connected());
    assert_eq!(session.state(), SessionState::Closed);
}

// ── Stale detection ─────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn silence_without_timeout_never_closes() {
    let dialer = MemoryDialer::new();
    let session = Session::builder(dialer.clone(), "mem://quiet").build();
    let cancel = CancellationToken::new();
    let run = spawn_session(&session, &cancel);

    let peer = dialer.next_peer().await.unwrap();
    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert!(!peer.is_closed());
    assert!(session.is_connected());

    cancel.cancel();
    assert!(run.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn silent_connection_closed_once_after_grace() {
    let dialer = MemoryDialer::new();
    let hooks = CountingHooks::default();
    let session = Session::builder(dialer.clone(), "mem://quiet")
        .stale_timeout(Duration::from_secs(5))
        .stale_grace(Duration::from_secs(60))
        .hooks(hooks.clone())
        .build();
    let start = Instant::now();
    let run = spawn_session(&session, &CancellationToken::new());

    let peer = dialer.next_peer().await.unwrap();
    tokio::time::sleep(Duration::from_secs(59)).await;
    assert!(!peer.is_closed(), "closed inside the grace window");

    let err = run.await.unwrap().unwrap_err();
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(60), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(62), "{elapsed:?}");
    assert_matches!(
        err,
        SessionError::Read(TransportError::Closed { code: CloseCode::GoingAway, ref reason })
            if reason == STALE_CLOSE_REASON
    );
    assert_eq!(
        peer.close_frame(),
        Some((CloseCode::GoingAway, STALE_CLOSE_REASON.into()))
    );
    assert_eq!(hooks.closes(), 1);
}

#[tokio::test(start_paused = true)]
async fn traffic_then_silence_closes_after_timeout() {
    let dialer = MemoryDialer::new();
    let (handler, mut received) = recording_handler();
    let session = Session::builder(dialer.clone(), "mem://feed")
        .handler(handler)
        .stale_timeout(Duration::from_secs(5))
        .build();
    let run = spawn_session(&session, &CancellationToken::new());

    let peer = dialer.next_peer().await.unwrap();
    assert!(peer.send("tick"));
    let _ = received.recv().await.unwrap();
    let heard_at = Instant::now();

    let err = run.await.unwrap().unwrap_err();
    let silent = heard_at.elapsed();
    assert!(silent > Duration::from_secs(5), "{silent:?}");
    assert!(silent <= Duration::from_secs(7), "{silent:?}");
    assert_eq!(err.kind(), ErrorKind::Read);
}

// ── Reconnect policy and attempts ───────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn declining_policy_returns_first_error_after_one_dial() {
    let dialer = MemoryDialer::new();
    dialer.set_refusing(true);
    let session = Session::builder(dialer.clone(), "mem://down").build();

    let err = session.start(CancellationToken::new()).await.unwrap_err();
    assert_matches!(
        err,
        SessionError::Dial { ref endpoint, source: TransportError::Refused(_) } if endpoint == "mem://down"
    );
    assert_eq!(dialer.dial_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn ceiling_bounds_dials_when_policy_always_retries() {
    let dialer = MemoryDialer::new();
    dialer.set_refusing(true);
    let session = Session::builder(dialer.clone(), "mem://down")
        .reconnect_policy(AlwaysReconnect)
        .max_attempts(4)
        .build();

    let err = session.start(CancellationToken::new()).await.unwrap_err();
    assert_matches!(err, SessionError::AttemptsExhausted { attempts: 4 });
    assert_eq!(dialer.dial_count(), 4);
}

#[tokio::test(start_paused = true)]
async fn exhaustion_bypasses_policy() {
    let dialer = MemoryDialer::new();
    dialer.set_refusing(true);
    let consulted = Arc::new(AtomicU32::new(0));
    let policy = {
        let consulted = Arc::clone(&consulted);
        policy_fn(move |_err: &SessionError| {
            let _ = consulted.fetch_add(1, Ordering::SeqCst);
            ReconnectDecision::NOW
        })
    };
    let session = Session::builder(dialer.clone(), "mem://down")
        .reconnect_policy(policy)
        .max_attempts(2)
        .build();

    let err = session.start(CancellationToken::new()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AttemptsExhausted);
    // Two dial errors reach the policy; the exhaustion itself does not.
    assert_eq!(consulted.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn two_failed_dials_then_connect_resets_attempts() {
    let dialer = MemoryDialer::new();
    dialer.fail_next(TransportError::Refused("down".into()));
    dialer.fail_next(TransportError::Refused("still down".into()));

    let observed = Arc::new(Mutex::new(Vec::new()));
    let policy = {
        let observed = Arc::clone(&observed);
        policy_fn(move |err: &SessionError| {
            observed.lock().push(err.kind());
            ReconnectDecision::NOW
        })
    };
    let session = Session::builder(dialer.clone(), "mem://flaky")
        .reconnect_policy(policy)
        .max_attempts(5)
        .build();
    let cancel = CancellationToken::new();
    let run = spawn_session(&session, &cancel);

    let _peer = dialer.next_peer().await.unwrap();
    wait_for_state(&session, SessionState::Connected).await;

    assert_eq!(dialer.dial_count(), 3);
    assert_eq!(*observed.lock(), vec![ErrorKind::Dial, ErrorKind::Dial]);
    assert_eq!(session.attempts(), 0);
    assert!(session.is_connected());

    cancel.cancel();
    assert!(run.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn reconnects_after_connection_loss_with_fresh_endpoint() {
    let dialer = MemoryDialer::new();
    let resolved = Arc::new(AtomicU32::new(0));
    let endpoint = {
        let resolved = Arc::clone(&resolved);
        Endpoint::dynamic(move || {
            let n = resolved.fetch_add(1, Ordering::SeqCst);
            Ok(format!("mem://shard-{n}"))
        })
    };
    let (handler, mut received) = recording_handler();
    let hooks = CountingHooks::default();
    let session = Session::builder(dialer.clone(), endpoint)
        .handler(handler)
        .hooks(hooks.clone())
        .reconnect_policy(AlwaysReconnect)
        .build();
    let cancel = CancellationToken::new();
    let run = spawn_session(&session, &cancel);

    let first = dialer.next_peer().await.unwrap();
    assert!(first.send("a"));
    assert_eq!(received.recv().await.unwrap(), Bytes::from("a"));
    drop(first);

    let second = dialer.next_peer().await.unwrap();
    assert!(second.send("b"));
    assert_eq!(received.recv().await.unwrap(), Bytes::from("b"));

    assert_eq!(dialer.endpoints(), vec!["mem://shard-0", "mem://shard-1"]);
    assert_eq!(hooks.opens(), 2);
    assert_eq!(hooks.closes(), 1);

    cancel.cancel();
    assert!(run.await.unwrap().is_ok());
    assert_eq!(hooks.closes(), 2);
}

#[tokio::test(start_paused = true)]
async fn resolver_and_options_failures_are_dial_errors() {
    let dialer = MemoryDialer::new();
    let session = Session::builder(
        dialer.clone(),
        Endpoint::dynamic(|| Err("no shards".into())),
    )
    .build();
    let err = session.start(CancellationToken::new()).await.unwrap_err();
    assert_matches!(err, SessionError::Endpoint(_));
    assert_eq!(err.kind(), ErrorKind::Dial);

    let session = Session::builder(dialer.clone(), "mem://x")
        .dial_options_fn(|| Err("token expired".into()))
        .build();
    let err = session.start(CancellationToken::new()).await.unwrap_err();
    assert_matches!(err, SessionError::DialOptions(_));
    assert_eq!(dialer.dial_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn dial_options_rebuilt_for_every_dial() {
    let dialer = MemoryDialer::new();
    dialer.set_refusing(true);
    let built = Arc::new(AtomicU32::new(0));
    let session = {
        let built = Arc::clone(&built);
        Session::builder(dialer.clone(), "mem://x")
            .dial_options_fn(move || {
                let n = built.fetch_add(1, Ordering::SeqCst);
                Ok(tether_core::DialOptions::default().header("x-attempt", n.to_string()))
            })
            .reconnect_policy(AlwaysReconnect)
            .max_attempts(3)
            .build()
    };
    let _ = session.start(CancellationToken::new()).await;

    let headers: Vec<String> = dialer
        .dial_options()
        .into_iter()
        .map(|o| o.headers[0].1.clone())
        .collect();
    assert_eq!(headers, vec!["0", "1", "2"]);
}

// ── Keepalive ───────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn failed_probe_ends_connection_as_read_error() {
    let dialer = MemoryDialer::new();
    let session = Session::builder(dialer.clone(), "mem://feed")
        .keepalive_interval(Duration::from_secs(5))
        .build();
    let start = Instant::now();
    let run = spawn_session(&session, &CancellationToken::new());

    let peer = dialer.next_peer().await.unwrap();
    tokio::time::sleep(Duration::from_secs(12)).await;
    assert_eq!(peer.probes(), 2);
    peer.fail_probes(true);

    let err = run.await.unwrap().unwrap_err();
    assert_matches!(err, SessionError::Read(TransportError::Timeout(_)));
    assert_eq!(peer.probes(), 3);
    assert!(start.elapsed() >= Duration::from_secs(15));
}

// ── Lifecycle hooks ─────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn on_open_failure_skips_on_close() {
    let dialer = MemoryDialer::new();
    let hooks = CountingHooks {
        fail_open: true,
        ..CountingHooks::default()
    };
    let retried = Arc::new(AtomicBool::new(false));
    let policy = {
        let retried = Arc::clone(&retried);
        policy_fn(move |_err: &SessionError| {
            if retried.swap(true, Ordering::SeqCst) {
                ReconnectDecision::STOP
            } else {
                ReconnectDecision::NOW
            }
        })
    };
    let session = Session::builder(dialer.clone(), "mem://feed")
        .hooks(hooks.clone())
        .reconnect_policy(policy)
        .build();

    let run = spawn_session(&session, &CancellationToken::new());
    let first = dialer.next_peer().await.unwrap();
    let second = dialer.next_peer().await.unwrap();

    let err = run.await.unwrap().unwrap_err();
    assert_matches!(err, SessionError::OnOpen(_));
    assert_eq!(hooks.opens(), 2);
    assert_eq!(hooks.closes(), 0);
    assert!(first.is_closed());
    assert!(second.is_closed());
    assert!(!session.is_connected());
}

#[tokio::test(start_paused = true)]
async fn on_open_error_is_returned_when_policy_declines() {
    let dialer = MemoryDialer::new();
    let hooks = CountingHooks {
        fail_open: true,
        ..CountingHooks::default()
    };
    let session = Session::builder(dialer.clone(), "mem://feed")
        .hooks(hooks)
        .build();
    let err = session.start(CancellationToken::new()).await.unwrap_err();
    assert_matches!(&err, SessionError::OnOpen(e) if e.to_string() == "refusing to open");
    assert_eq!(err.kind(), ErrorKind::Lifecycle);
}

#[tokio::test(start_paused = true)]
async fn on_close_error_does_not_replace_terminating_error() {
    let dialer = MemoryDialer::new();
    let hooks = CountingHooks {
        fail_close: true,
        ..CountingHooks::default()
    };
    let session = Session::builder(dialer.clone(), "mem://feed")
        .hooks(hooks.clone())
        .build();
    let run = spawn_session(&session, &CancellationToken::new());

    let peer = dialer.next_peer().await.unwrap();
    wait_for_state(&session, SessionState::Connected).await;
    drop(peer);

    let err = run.await.unwrap().unwrap_err();
    assert_matches!(err, SessionError::Read(TransportError::ConnectionLost));
    assert_eq!(hooks.closes(), 1);
}

#[tokio::test(start_paused = true)]
async fn on_open_can_write_to_new_connection() {
    let dialer = MemoryDialer::new();
    let hooks = CountingHooks {
        subscribe: Some(serde_json::json!({"op": "subscribe", "channel": "trades"})),
        ..CountingHooks::default()
    };
    let session = Session::builder(dialer.clone(), "mem://feed")
        .hooks(hooks)
        .build();
    let cancel = CancellationToken::new();
    let run = spawn_session(&session, &cancel);

    let peer = dialer.next_peer().await.unwrap();
    let sent = peer.recv().await.unwrap();
    let value: serde_json::Value = serde_json::from_slice(&sent).unwrap();
    assert_eq!(value["op"], "subscribe");

    cancel.cancel();
    assert!(run.await.unwrap().is_ok());
}

// ── Cancellation and stop ───────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn cancellation_returns_ok_and_runs_on_close_once() {
    let dialer = MemoryDialer::new();
    let hooks = CountingHooks::default();
    let session = Session::builder(dialer.clone(), "mem://feed")
        .hooks(hooks.clone())
        .keepalive_interval(Duration::from_secs(1))
        .stale_timeout(Duration::from_secs(30))
        .reconnect_policy(AlwaysReconnect)
        .build();
    let cancel = CancellationToken::new();
    let run = spawn_session(&session, &cancel);

    let peer = dialer.next_peer().await.unwrap();
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(hooks.opens(), 1);

    cancel.cancel();
    let result = tokio::time::timeout(Duration::from_secs(1), run)
        .await
        .expect("start did not return promptly")
        .unwrap();
    assert!(result.is_ok());
    assert_eq!(hooks.closes(), 1);
    assert_eq!(
        peer.close_frame(),
        Some((CloseCode::Normal, "client closing".into()))
    );
    assert_eq!(dialer.dial_count(), 1);
    assert!(!session.is_connected());
}

#[tokio::test(start_paused = true)]
async fn cancellation_aborts_backoff_sleep() {
    let dialer = MemoryDialer::new();
    dialer.set_refusing(true);
    let session = Session::builder(dialer.clone(), "mem://down")
        .reconnect_policy(policy_fn(|_: &SessionError| {
            ReconnectDecision::after(Duration::from_secs(3600))
        }))
        .build();
    let cancel = CancellationToken::new();
    let start = Instant::now();
    let run = spawn_session(&session, &cancel);

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(dialer.dial_count(), 1);
    cancel.cancel();

    assert!(run.await.unwrap().is_ok());
    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(dialer.dial_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancellation_during_dial_returns_ok() {
    let dialer = MemoryDialer::new();
    dialer.hang_next();
    let session = Session::builder(dialer.clone(), "mem://slow").build();
    let cancel = CancellationToken::new();
    let run = spawn_session(&session, &cancel);

    tokio::time::sleep(Duration::from_millis(10)).await;
    cancel.cancel();
    assert!(run.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn stop_closes_with_going_away_and_is_idempotent() {
    let dialer = MemoryDialer::new();
    let session = Session::builder(dialer.clone(), "mem://feed").build();
    let run = spawn_session(&session, &CancellationToken::new());

    let peer = dialer.next_peer().await.unwrap();
    wait_for_state(&session, SessionState::Connected).await;

    session.stop("").await.unwrap();
    session.stop("again").await.unwrap();

    let err = run.await.unwrap().unwrap_err();
    assert_matches!(
        err,
        SessionError::Read(TransportError::Closed { code: CloseCode::GoingAway, ref reason })
            if reason == "going away"
    );
    assert_eq!(
        peer.close_frame(),
        Some((CloseCode::GoingAway, "going away".into()))
    );
    // Stopping with nothing connected is a no-op.
    session.stop("late").await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn second_start_is_rejected() {
    let dialer = MemoryDialer::new();
    let session = Session::builder(dialer.clone(), "mem://feed").build();
    let cancel = CancellationToken::new();
    let run = spawn_session(&session, &cancel);
    let _peer = dialer.next_peer().await.unwrap();
    wait_for_state(&session, SessionState::Connected).await;

    assert_matches!(
        session.start(CancellationToken::new()).await,
        Err(SessionError::AlreadyRunning)
    );

    cancel.cancel();
    assert!(run.await.unwrap().is_ok());

    // Once the first run has returned the session can be started again.
    let cancel = CancellationToken::new();
    let run = spawn_session(&session, &cancel);
    let _peer = dialer.next_peer().await.unwrap();
    cancel.cancel();
    assert!(run.await.unwrap().is_ok());
    assert_eq!(dialer.dial_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn state_transitions_are_observable() {
    let dialer = MemoryDialer::new();
    let session = Session::builder(dialer.clone(), "mem://feed").build();
    assert_eq!(session.state(), SessionState::Idle);

    let mut states = session.subscribe_state();
    let cancel = CancellationToken::new();
    let run = spawn_session(&session, &cancel);

    let peer = dialer.next_peer().await.unwrap();
    let _ = states
        .wait_for(|s| *s == SessionState::Connected)
        .await
        .unwrap();
    drop(peer);
    let _ = states
        .wait_for(|s| *s == SessionState::Closed)
        .await
        .unwrap();

    assert!(run.await.unwrap().is_err());
}
