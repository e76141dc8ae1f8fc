//! Session behavior against an in-memory transport.

mod common;

use common::{Call, FakeTransport, HEARTBEAT};
use std::time::Duration;
use stomp_topic::{
    Credentials, ReceiveOptions, SEPARATOR, Session, SessionConfig, SessionError, TransportError,
};

fn config() -> SessionConfig {
    SessionConfig::new(
        "broker.example",
        61613,
        "/topic/test",
        Credentials::new("alice", "hunter2"),
    )
}

fn unpaced() -> ReceiveOptions {
    ReceiveOptions::default().pace(Duration::ZERO)
}

fn framed(body: &str) -> String {
    format!("{}\n{}\n", body, SEPARATOR)
}

#[tokio::test]
async fn connect_failure_reports_user_host_port_but_not_password() {
    let transport = FakeTransport::new().failing_connect();
    let err = match Session::connect(config(), transport).await {
        Ok(_) => panic!("connect should fail"),
        Err(e) => e,
    };
    match &err {
        SessionError::Connection {
            username,
            host,
            port,
            source,
        } => {
            assert_eq!(username, "alice");
            assert_eq!(host, "broker.example");
            assert_eq!(*port, 61613);
            assert!(matches!(source, TransportError::Io(_)));
        }
        other => panic!("expected Connection, got {:?}", other),
    }
    let msg = err.to_string();
    assert!(msg.contains("alice@broker.example:61613"));
    assert!(!msg.contains("hunter2"));
    assert!(!format!("{:?}", err).contains("hunter2"));
}

#[tokio::test]
async fn send_publishes_once_to_bound_destination() {
    let transport = FakeTransport::new();
    let log = transport.log();
    let mut session = Session::connect(config(), transport).await.expect("connect");

    let payload = "\n  <event id=\"1\"/>\n";
    session.send(payload).await.expect("send");

    assert_eq!(
        log.calls(),
        vec![
            Call::Connect {
                username: "alice".into()
            },
            Call::Publish {
                destination: "/topic/test".into(),
                payload: payload.into()
            },
        ]
    );
}

#[tokio::test]
async fn send_failure_is_a_send_error() {
    let transport = FakeTransport::new().failing_publish_after(0);
    let mut session = Session::connect(config(), transport).await.expect("connect");
    match session.send("x").await {
        Err(SessionError::Send { destination, .. }) => assert_eq!(destination, "/topic/test"),
        other => panic!("expected Send error, got {:?}", other),
    }
}

#[tokio::test]
async fn single_shot_writes_first_message_and_tears_down() {
    // The fake blocks forever after "first", so returning proves only one
    // message was awaited.
    let transport = FakeTransport::new().with_messages(["first"]);
    let log = transport.log();
    let session = Session::connect(config(), transport).await.expect("connect");

    let mut sink: Vec<u8> = Vec::new();
    let summary = session
        .receive(&mut sink, &unpaced(), std::future::pending())
        .await
        .expect("receive");

    assert_eq!(String::from_utf8(sink).unwrap(), "first\n");
    assert_eq!(summary.written, 1);
    assert_eq!(
        &log.calls()[1..],
        &[
            Call::Subscribe("/topic/test".into()),
            Call::Unsubscribe("/topic/test".into()),
            Call::Disconnect,
        ]
    );
}

#[tokio::test]
async fn single_shot_never_filters() {
    let transport = FakeTransport::new().with_messages([HEARTBEAT]);
    let session = Session::connect(config(), transport).await.expect("connect");

    let mut sink: Vec<u8> = Vec::new();
    session
        .receive(
            &mut sink,
            &unpaced().filter_heartbeats(true),
            std::future::pending(),
        )
        .await
        .expect("receive");
    assert_eq!(String::from_utf8(sink).unwrap(), format!("{}\n", HEARTBEAT));
}

#[tokio::test]
async fn single_shot_shutdown_before_message_still_tears_down() {
    let transport = FakeTransport::new();
    let log = transport.log();
    let session = Session::connect(config(), transport).await.expect("connect");

    let mut sink: Vec<u8> = Vec::new();
    let summary = session
        .receive(&mut sink, &unpaced(), async {})
        .await
        .expect("receive");

    assert_eq!(summary.written, 0);
    assert!(sink.is_empty());
    assert_eq!(log.calls().last(), Some(&Call::Disconnect));
}

#[tokio::test]
async fn continuous_with_filter_drops_heartbeats() {
    let transport =
        FakeTransport::new().with_messages([HEARTBEAT, "plain one", HEARTBEAT, "plain two"]);
    let drained = transport.drained();
    let log = transport.log();
    let session = Session::connect(config().continuous(true), transport)
        .await
        .expect("connect");

    let mut sink: Vec<u8> = Vec::new();
    let summary = session
        .receive(
            &mut sink,
            &unpaced().filter_heartbeats(true),
            async move { drained.notified().await },
        )
        .await
        .expect("receive");

    let out = String::from_utf8(sink).unwrap();
    assert_eq!(out, format!("{}{}", framed("plain one"), framed("plain two")));
    assert!(!out.contains("<hb"));
    assert_eq!(summary.written, 2);
    assert_eq!(summary.discarded, 2);
    assert_eq!(summary.heartbeats, 2);
    assert_eq!(log.calls().last(), Some(&Call::Disconnect));
}

#[tokio::test]
async fn continuous_without_filter_writes_everything() {
    let bodies = [HEARTBEAT, "plain one", HEARTBEAT];
    let transport = FakeTransport::new().with_messages(bodies);
    let drained = transport.drained();
    let session = Session::connect(config().continuous(true), transport)
        .await
        .expect("connect");

    let mut sink: Vec<u8> = Vec::new();
    let summary = session
        .receive(&mut sink, &unpaced(), async move { drained.notified().await })
        .await
        .expect("receive");

    let expected: String = bodies.iter().map(|b| framed(b)).collect();
    assert_eq!(String::from_utf8(sink).unwrap(), expected);
    assert_eq!(summary.written, 3);
    assert_eq!(summary.discarded, 0);
    assert_eq!(summary.heartbeats, 2);
}

#[tokio::test]
async fn continuous_without_filter_passes_malformed_markup_through() {
    let bodies = ["<hb><unclosed></hb>", HEARTBEAT, "plain"];
    let transport = FakeTransport::new().with_messages(bodies);
    let drained = transport.drained();
    let session = Session::connect(config().continuous(true), transport)
        .await
        .expect("connect");

    let mut sink: Vec<u8> = Vec::new();
    let summary = session
        .receive(&mut sink, &unpaced(), async move { drained.notified().await })
        .await
        .expect("receive");

    let expected: String = bodies.iter().map(|b| framed(b)).collect();
    assert_eq!(String::from_utf8(sink).unwrap(), expected);
    assert_eq!(summary.written, 3);
    assert_eq!(summary.heartbeats, 1);
}

#[tokio::test]
async fn continuous_filter_fails_loudly_on_malformed_xml() {
    let transport =
        FakeTransport::new().with_messages(["plain", "<hb><unclosed></hb>", "never read"]);
    let log = transport.log();
    let session = Session::connect(config().continuous(true), transport)
        .await
        .expect("connect");

    let mut sink: Vec<u8> = Vec::new();
    let err = session
        .receive(
            &mut sink,
            &unpaced().filter_heartbeats(true),
            std::future::pending(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, SessionError::Parse(_)), "got {:?}", err);
    assert_eq!(String::from_utf8(sink).unwrap(), framed("plain"));
    let calls = log.calls();
    assert!(calls.contains(&Call::Unsubscribe("/topic/test".into())));
    assert_eq!(calls.last(), Some(&Call::Disconnect));
}

#[tokio::test]
async fn continuous_receive_error_ends_loop_after_teardown() {
    let transport = FakeTransport::new()
        .with_messages(["one"])
        .with_receive_error(TransportError::Protocol("connection closed by broker".into()));
    let log = transport.log();
    let session = Session::connect(config().continuous(true), transport)
        .await
        .expect("connect");

    let mut sink: Vec<u8> = Vec::new();
    let err = session
        .receive(&mut sink, &unpaced(), std::future::pending())
        .await
        .unwrap_err();

    assert!(matches!(err, SessionError::Receive { .. }), "got {:?}", err);
    assert_eq!(log.calls().last(), Some(&Call::Disconnect));
}

#[tokio::test(start_paused = true)]
async fn continuous_paces_between_messages() {
    let transport = FakeTransport::new().with_messages(["a", "b", "c"]);
    let drained = transport.drained();
    let session = Session::connect(config().continuous(true), transport)
        .await
        .expect("connect");

    let started = tokio::time::Instant::now();
    let mut sink: Vec<u8> = Vec::new();
    session
        .receive(
            &mut sink,
            &ReceiveOptions::default(),
            async move { drained.notified().await },
        )
        .await
        .expect("receive");

    // one pacing delay of the default second after each of the three messages
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(3), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(4), "elapsed {:?}", elapsed);
}
