mod support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rconlink_session::{
    CommandOutcome, CorrelationMode, ErrorClass, RconClient, RconError, Session, SessionState,
    TimeoutPhase, TokenPlacement,
};
use serde_json::{json, Value};
use support::{fail, ok, ok_body, Action, FakeServer};
use tokio::time::Instant;

const TIMEOUT: Duration = Duration::from_secs(3);

fn reference_data_server() -> impl Fn(&support::Request) -> Action + Send + Sync + 'static {
    |request| match request.command.as_str() {
        "GetClientReferenceData" => ok(Value::String(
            json!({"name": request.body["name"], "parameters": ["SectorIndex", "LayoutName"]})
                .to_string(),
        )),
        "ChangeMap" => {
            let map = request.body["MapId"].as_str().unwrap_or_default();
            if map.ends_with("_warfare") {
                ok(Value::Null)
            } else {
                fail(
                    400,
                    &format!("Invalid map id {map}"),
                    json!({"mapId": map}),
                )
            }
        }
        _ => ok(request.body.clone()),
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test]
async fn login_returns_token_and_session_is_ready() {
    let server = FakeServer::echo().await;
    let session = Session::connect(Arc::new(server.descriptor()), Instant::now() + TIMEOUT)
        .await
        .unwrap();
    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(session.token().unwrap().as_str(), "tok-1");
    assert!(session.is_ready());
}

#[tokio::test]
async fn reference_data_after_login_needs_no_relogin() {
    let server = FakeServer::start(reference_data_server()).await;
    let client = RconClient::new(server.descriptor());
    client.connect(TIMEOUT).await.unwrap();

    let outcome = client
        .execute(
            "GetClientReferenceData",
            json!({"name": "SetSectorLayout"}),
            TIMEOUT,
        )
        .await
        .unwrap();
    let value = outcome.into_result().unwrap();
    assert_eq!(value["name"], "SetSectorLayout");
    assert_eq!(value["parameters"][1], "LayoutName");
    assert_eq!(server.logins(), 1);
    assert_eq!(client.connect_attempts(), 1);
}

#[tokio::test]
async fn invalid_map_is_a_business_failure() {
    let server = FakeServer::start(reference_data_server()).await;
    let client = RconClient::new(server.descriptor());

    let outcome = client
        .execute("ChangeMap", json!({"MapId": "not-a-real-map"}), TIMEOUT)
        .await
        .unwrap();
    let CommandOutcome::Rejected(failure) = outcome else {
        panic!("expected rejection, got {outcome:?}");
    };
    assert_eq!(failure.code, Some(400));
    assert!(failure.message.contains("not-a-real-map"));
    assert_eq!(failure.detail["mapId"], "not-a-real-map");

    // Not retried, session kept.
    assert_eq!(server.count("ChangeMap"), 1);
    assert!(client.is_connected().await);
}

#[tokio::test]
async fn killed_connection_reconnects_once_and_succeeds() {
    let server = FakeServer::echo().await;
    let client = RconClient::new(server.descriptor());
    client.connect(TIMEOUT).await.unwrap();

    server.kill_connections();
    settle().await;

    let outcome = client
        .execute("Echo", json!({"n": 1}), TIMEOUT)
        .await
        .unwrap();
    assert_eq!(outcome, CommandOutcome::Completed(json!({"n": 1, "Token": "tok-2"})));
    assert_eq!(client.connect_attempts(), 2);
    assert_eq!(server.logins(), 2);
}

#[tokio::test]
async fn killed_connection_with_refused_relogin_is_command_failed() {
    let server = FakeServer::echo().await;
    let client = RconClient::new(server.descriptor());
    client.connect(TIMEOUT).await.unwrap();

    server.kill_connections();
    server.set_accept_login(false);
    settle().await;

    let err = client
        .execute("Echo", json!({}), TIMEOUT)
        .await
        .unwrap_err();
    match &err {
        RconError::CommandFailed { source, .. } => {
            assert!(matches!(**source, RconError::Authentication { .. }));
        }
        other => panic!("expected CommandFailed, got {other:?}"),
    }
    assert_eq!(err.class(), ErrorClass::Authentication);
    assert_eq!(client.connect_attempts(), 2);
    assert_eq!(server.count("Echo"), 0);
}

#[tokio::test]
async fn one_transport_failure_is_retried() {
    let calls = Arc::new(AtomicUsize::new(0));
    let server = FakeServer::start({
        let calls = Arc::clone(&calls);
        move |request| {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Action::Drop
            } else {
                ok(json!({"attempt": request.connection}))
            }
        }
    })
    .await;
    let client = RconClient::new(server.descriptor());

    let outcome = client.execute("Flaky", Value::Null, TIMEOUT).await.unwrap();
    assert_eq!(outcome, CommandOutcome::Completed(json!({"attempt": 2})));
    assert_eq!(server.count("Flaky"), 2);
    assert_eq!(client.connect_attempts(), 2);
}

#[tokio::test]
async fn two_transport_failures_stop_without_a_third_attempt() {
    let server = FakeServer::start(|_| Action::Drop).await;
    let client = RconClient::new(server.descriptor());

    let err = client
        .execute("Flaky", Value::Null, TIMEOUT)
        .await
        .unwrap_err();
    match &err {
        RconError::CommandFailed {
            command, attempts, source,
        } => {
            assert_eq!(command, "Flaky");
            assert_eq!(*attempts, 2);
            assert!(matches!(**source, RconError::Transport(_)));
        }
        other => panic!("expected CommandFailed, got {other:?}"),
    }
    assert_eq!(server.count("Flaky"), 2);
    assert_eq!(client.connect_attempts(), 2);
}

#[tokio::test]
async fn initial_connect_failure_is_connection_error() {
    let addr = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let client = RconClient::new(rconlink_session::ConnectionDescriptor::new(
        addr.ip().to_string(),
        addr.port(),
        rconlink_session::Credentials::password("x"),
    ));
    let err = client.execute("Echo", Value::Null, TIMEOUT).await.unwrap_err();
    assert!(matches!(err, RconError::Connection { .. }), "{err:?}");
    assert_eq!(err.class(), ErrorClass::Unreachable);
    assert_eq!(client.connect_attempts(), 1);
}

#[tokio::test]
async fn wrong_password_is_authentication_error() {
    let server = FakeServer::echo().await;
    let descriptor = server.descriptor();
    let descriptor = rconlink_session::ConnectionDescriptor {
        credentials: rconlink_session::Credentials::password("wrong"),
        ..descriptor
    };
    let client = RconClient::new(descriptor);
    let err = client.execute("Echo", Value::Null, TIMEOUT).await.unwrap_err();
    assert!(matches!(err, RconError::Authentication { code: Some(401), .. }), "{err:?}");
    assert_eq!(server.logins(), 1);
}

#[tokio::test]
async fn stale_token_triggers_one_relogin() {
    let server = FakeServer::echo().await;
    let client = RconClient::new(server.descriptor());
    client.connect(TIMEOUT).await.unwrap();

    server.reject_token_once();
    let outcome = client.execute("Echo", json!({"x": 1}), TIMEOUT).await.unwrap();
    assert!(outcome.is_completed());
    assert_eq!(server.logins(), 2);
    assert_eq!(server.count("Echo"), 2);
}

#[tokio::test]
async fn concurrent_callers_are_serialized() {
    let server = FakeServer::echo().await;
    let client = Arc::new(RconClient::new(server.descriptor()));

    let tasks: Vec<_> = (0..16)
        .map(|n| {
            let client = Arc::clone(&client);
            tokio::spawn(async move {
                let outcome = client
                    .execute("Echo", json!({"n": n}), Duration::from_secs(10))
                    .await
                    .unwrap();
                (n, outcome.into_result().unwrap())
            })
        })
        .collect();

    for task in tasks {
        let (n, value) = task.await.unwrap();
        assert_eq!(value["n"], n);
    }

    let requests = server.requests();
    assert_eq!(requests.len(), 16);
    assert!(requests.iter().all(|r| r.connection == 1));
    let mut seen: Vec<i64> = requests.iter().map(|r| r.body["n"].as_i64().unwrap()).collect();
    seen.sort_unstable();
    assert_eq!(seen, (0..16).collect::<Vec<_>>());
    assert_eq!(server.logins(), 1);
}

#[tokio::test]
async fn response_timeout_releases_the_critical_section() {
    let server = FakeServer::start(|request| match request.command.as_str() {
        "Slow" => Action::Delay(Duration::from_millis(800), ok_body(Value::Null)),
        _ => ok(json!("fast")),
    })
    .await;
    let client = Arc::new(RconClient::new(server.descriptor()));
    client.connect(TIMEOUT).await.unwrap();

    let slow = tokio::spawn({
        let client = Arc::clone(&client);
        async move {
            client
                .execute("Slow", Value::Null, Duration::from_millis(100))
                .await
        }
    });
    settle().await;

    let started = std::time::Instant::now();
    let fast = client.execute("Fast", Value::Null, TIMEOUT).await.unwrap();
    assert_eq!(fast, CommandOutcome::Completed(json!("fast")));
    assert!(started.elapsed() < Duration::from_millis(700));

    let err = slow.await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        RconError::Timeout {
            phase: TimeoutPhase::Response,
            ..
        }
    ));
}

#[tokio::test]
async fn lock_wait_is_bounded_by_the_caller_timeout() {
    let server = FakeServer::start(|_| Action::Delay(Duration::from_millis(400), ok_body(Value::Null))).await;
    let client = Arc::new(RconClient::new(server.descriptor()));
    client.connect(TIMEOUT).await.unwrap();

    let holder = tokio::spawn({
        let client = Arc::clone(&client);
        async move { client.execute("Slow", Value::Null, TIMEOUT).await }
    });
    settle().await;

    let err = client
        .execute("Queued", Value::Null, Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(err, RconError::Timeout { phase: TimeoutPhase::Lock, .. }));

    // The queued caller left no trace; the holder completes normally.
    assert!(holder.await.unwrap().unwrap().is_completed());
    assert_eq!(server.count("Queued"), 0);
}

#[tokio::test]
async fn cancelled_caller_does_not_receive_or_steal_responses() {
    let server = FakeServer::start(|request| match request.command.as_str() {
        "Slow" => Action::Delay(Duration::from_millis(200), ok_body(json!("slow"))),
        _ => ok(json!("fast")),
    })
    .await;
    let client = RconClient::new(server.descriptor());
    client.connect(TIMEOUT).await.unwrap();

    let cancelled = tokio::time::timeout(
        Duration::from_millis(50),
        client.execute("Slow", Value::Null, TIMEOUT),
    )
    .await;
    assert!(cancelled.is_err());

    let outcome = client.execute("Fast", Value::Null, TIMEOUT).await.unwrap();
    assert_eq!(outcome, CommandOutcome::Completed(json!("fast")));
    assert_eq!(client.connect_attempts(), 1);
}

#[tokio::test]
async fn malformed_response_is_a_protocol_error_with_raw_payload() {
    let server = FakeServer::start(|_| Action::Raw(Bytes::from_static(br#"{"hello":"world"}"#))).await;
    let client = RconClient::new(server.descriptor());

    let err = client.execute("Odd", Value::Null, TIMEOUT).await.unwrap_err();
    assert!(matches!(err, RconError::Protocol { .. }), "{err:?}");
    assert_eq!(err.raw_payload(), Some(r#"{"hello":"world"}"#));
    assert_eq!(server.count("Odd"), 1);
}

#[tokio::test]
async fn malformed_response_reaches_caller_with_explicit_ids() {
    let server = FakeServer::start(|_| Action::Raw(Bytes::from_static(br#"{"hello":"world"}"#))).await;
    let descriptor = server
        .descriptor()
        .with_correlation(CorrelationMode::explicit());
    let client = RconClient::new(descriptor);

    let started = Instant::now();
    let err = client.execute("Odd", Value::Null, TIMEOUT).await.unwrap_err();
    assert!(matches!(err, RconError::Protocol { .. }), "{err:?}");
    assert_eq!(err.raw_payload(), Some(r#"{"hello":"world"}"#));
    assert!(started.elapsed() < TIMEOUT);
}

#[tokio::test]
async fn reply_without_id_is_a_protocol_error_with_explicit_ids() {
    let raw = br#"{"statusCode":200,"statusMessage":"OK","contentBody":1}"#;
    let server = FakeServer::start(move |_| Action::Raw(Bytes::from_static(raw))).await;
    let descriptor = server
        .descriptor()
        .with_correlation(CorrelationMode::explicit());
    let client = RconClient::new(descriptor);

    let err = client.execute("NoId", Value::Null, TIMEOUT).await.unwrap_err();
    assert!(matches!(err, RconError::Protocol { .. }), "{err:?}");
    assert_eq!(err.raw_payload(), Some(std::str::from_utf8(raw).unwrap()));

    // The link itself is fine; the next command reuses it.
    assert!(client.is_connected().await);
    assert_eq!(client.connect_attempts(), 1);
}

#[tokio::test]
async fn oversized_frame_surfaces_as_framing_error() {
    let server = FakeServer::start(|_| Action::Wire(vec![0xff, 0xff, 0xff, 0xff])).await;
    let client = RconClient::new(server.descriptor());

    let err = client.execute("Huge", Value::Null, TIMEOUT).await.unwrap_err();
    assert!(matches!(err, RconError::Framing(_)), "{err:?}");
    assert_eq!(err.class(), ErrorClass::Protocol);
    assert_eq!(server.count("Huge"), 1);
}

#[tokio::test]
async fn header_placement_keeps_token_out_of_body() {
    let server = FakeServer::echo().await;
    let descriptor = server
        .descriptor()
        .with_token_placement(TokenPlacement::header());
    let client = RconClient::new(descriptor);

    client.execute("Echo", json!({"a": 1}), TIMEOUT).await.unwrap();
    let request = &server.requests()[0];
    assert!(request.body.get("Token").is_none());
    assert_eq!(request.envelope["authToken"], "tok-1");
    assert_eq!(request.envelope["version"], 2);
}

#[tokio::test]
async fn body_placement_injects_token() {
    let server = FakeServer::echo().await;
    let client = RconClient::new(server.descriptor());

    client.execute("Echo", json!({"a": 1}), TIMEOUT).await.unwrap();
    let request = &server.requests()[0];
    assert_eq!(request.body["Token"], "tok-1");
    assert!(request.envelope.get("authToken").is_none());
}

#[tokio::test]
async fn explicit_correlation_round_trips_ids() {
    let server = FakeServer::echo().await;
    let descriptor = server
        .descriptor()
        .with_correlation(CorrelationMode::explicit());
    let client = RconClient::new(descriptor);

    for n in 0..3 {
        let outcome = client.execute("Echo", json!({"n": n}), TIMEOUT).await.unwrap();
        assert!(outcome.is_completed());
    }
    let ids: Vec<u64> = server
        .requests()
        .iter()
        .map(|r| r.envelope["requestId"].as_u64().unwrap())
        .collect();
    // Login took id 1.
    assert_eq!(ids, vec![2, 3, 4]);
}

#[tokio::test]
async fn explicit_correlation_ignores_foreign_ids() {
    let server = FakeServer::start(|_| {
        Action::Reply(json!({"statusCode": 200, "contentBody": "x", "requestId": 999}))
    })
    .await;
    let descriptor = server
        .descriptor()
        .with_correlation(CorrelationMode::explicit());
    let client = RconClient::new(descriptor);

    let err = client
        .execute("Echo", Value::Null, Duration::from_millis(300))
        .await
        .unwrap_err();
    assert!(matches!(err, RconError::Timeout { phase: TimeoutPhase::Response, .. }), "{err:?}");
}

#[tokio::test]
async fn close_drains_and_refuses_new_work() {
    let server = FakeServer::echo().await;
    let client = RconClient::new(server.descriptor());
    client.connect(TIMEOUT).await.unwrap();
    assert_eq!(client.state().await, SessionState::Ready);

    client.close().await;
    client.close().await;
    assert_eq!(client.state().await, SessionState::Disconnected);

    let err = client.execute("Echo", Value::Null, TIMEOUT).await.unwrap_err();
    assert!(matches!(err, RconError::Closed));
}

#[tokio::test]
async fn discovery_is_cached_and_failure_is_non_fatal() {
    let server = FakeServer::start(|request| match request.command.as_str() {
        "GetDisplayableCommands" => ok(json!({"entries": [{"iD": "ChangeMap"}, {"iD": "SetSectorLayout"}]})),
        _ => ok(Value::Null),
    })
    .await;
    let client = RconClient::new(server.descriptor());

    let catalogue = client.catalogue(TIMEOUT).await.unwrap();
    assert!(catalogue.supports("ChangeMap"));
    assert_eq!(
        client.check_command("SetSectorLayout", TIMEOUT).await,
        rconlink_session::CommandCheck::Known
    );
    assert_eq!(
        client
            .resolve_command(&["ChangeMapNow", "ChangeMap"], TIMEOUT)
            .await
            .as_deref(),
        Some("ChangeMap")
    );
    assert_eq!(server.count("GetDisplayableCommands"), 1);

    let failing = FakeServer::start(|_| fail(404, "unknown command", Value::Null)).await;
    let client = RconClient::new(failing.descriptor());
    assert!(client.catalogue(TIMEOUT).await.is_none());
    assert_eq!(
        client.check_command("Anything", TIMEOUT).await,
        rconlink_session::CommandCheck::Unverified
    );
    assert_eq!(failing.count("GetDisplayableCommands"), 1);
}

fn push_frame() -> Bytes {
    // A raw frame outside the envelope flow gets an answer nobody asked for.
    let frame = serde_json::to_vec(&json!({
        "command": "Echo",
        "version": 2,
        "body": {"Token": "tok-1", "push": true},
    }))
    .unwrap();
    Bytes::from(frame)
}

#[tokio::test]
async fn unmatched_frames_are_available_to_receive() {
    let server = FakeServer::echo().await;
    let descriptor = server
        .descriptor()
        .with_correlation(CorrelationMode::explicit());
    let mut session = Session::connect(Arc::new(descriptor), Instant::now() + TIMEOUT)
        .await
        .unwrap();

    session
        .send(push_frame(), Instant::now() + TIMEOUT)
        .await
        .unwrap();
    let raw = session.receive(Instant::now() + TIMEOUT).await.unwrap();
    let value: Value = serde_json::from_slice(&raw).unwrap();
    assert_eq!(value["contentBody"]["push"], true);
    assert!(session.is_ready());

    session.close().await;
    session.close().await;
    assert_eq!(session.state(), SessionState::Disconnected);
}

#[tokio::test]
async fn stray_frame_on_ordered_link_marks_session_lost() {
    let server = FakeServer::echo().await;
    let mut session = Session::connect(Arc::new(server.descriptor()), Instant::now() + TIMEOUT)
        .await
        .unwrap();

    session
        .send(push_frame(), Instant::now() + TIMEOUT)
        .await
        .unwrap();
    let raw = session.receive(Instant::now() + TIMEOUT).await.unwrap();
    let value: Value = serde_json::from_slice(&raw).unwrap();
    assert_eq!(value["contentBody"]["push"], true);
    assert!(!session.is_ready());

    let err = session
        .execute("Echo", serde_json::Map::new(), Instant::now() + TIMEOUT)
        .await
        .unwrap_err();
    assert!(matches!(err, RconError::Transport(_)), "{err:?}");
    session.close().await;
}

#[tokio::test]
async fn stalled_write_is_a_send_timeout() {
    let server = FakeServer::start(|_| {
        Action::Delay(Duration::from_secs(5), ok_body(Value::Null))
    })
    .await;
    let mut session = Session::connect(Arc::new(server.descriptor()), Instant::now() + TIMEOUT)
        .await
        .unwrap();

    // The server stops reading while it sits on this request.
    let err = session
        .execute("Stall", serde_json::Map::new(), Instant::now() + Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(matches!(err, RconError::Timeout { phase: TimeoutPhase::Response, .. }), "{err:?}");

    let big = Bytes::from(vec![b' '; 24 * 1024 * 1024]);
    let err = session
        .send(big, Instant::now() + Duration::from_millis(300))
        .await
        .unwrap_err();
    assert!(matches!(err, RconError::Timeout { phase: TimeoutPhase::Send, .. }), "{err:?}");
    assert!(!session.is_ready());
    session.close().await;
}
