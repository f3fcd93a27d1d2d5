mod common;

use common::{MockTransport, BASIC_RESPONSE};
use jbdbms_lib::engine::{RequestEngine, SessionState};
use jbdbms_lib::protocol::{encode_frame, Command, Payload};
use jbdbms_lib::transport::Transport;
use jbdbms_lib::{DecodeError, Error, SessionConfig};
use std::time::Duration;
use tokio::time::Instant;

async fn connected(transport: MockTransport) -> (RequestEngine, MockTransport) {
    let engine = RequestEngine::new(&SessionConfig::default());
    let mut transport = transport;
    transport.connect().await.unwrap();
    transport
        .subscribe_notifications(engine.notification_handler())
        .await
        .unwrap();
    (engine, transport)
}

#[tokio::test(start_paused = true)]
async fn fragmented_response_is_reassembled() {
    let (engine, mut transport) = connected(MockTransport::new(common::device(3))).await;

    let payload = engine
        .request(&mut transport, Command::ReadBasic)
        .await
        .unwrap();

    let basic = match payload {
        Payload::Basic(basic) => basic,
        other => panic!("unexpected payload {other:?}"),
    };
    assert_eq!(basic.voltage, 58.88);
    assert_eq!(basic.string_count, 15);
    assert_eq!(basic.temperatures, vec![20.3, 21.5]);
    assert_eq!(engine.state(), SessionState::Idle);
    assert_eq!(
        transport.writes,
        vec![vec![0xdd, 0xa5, 0x03, 0x00, 0xff, 0xfd, 0x77]]
    );
}

#[tokio::test(start_paused = true)]
async fn silent_device_times_out_into_retry() {
    let (engine, mut transport) = connected(MockTransport::silent()).await;

    let start = Instant::now();
    let err = engine
        .request(&mut transport, Command::ReadVoltages)
        .await
        .unwrap_err();

    assert!(start.elapsed() >= Duration::from_millis(2500));
    assert!(start.elapsed() < Duration::from_millis(2600));
    assert!(matches!(
        err,
        Error::Timeout {
            command: Command::ReadVoltages,
            ..
        }
    ));
    assert!(err.is_recoverable());
    assert_eq!(engine.state(), SessionState::Retry);

    // Late fragments of the abandoned request are ignored
    transport.notify(&BASIC_RESPONSE);
    assert_eq!(engine.state(), SessionState::Retry);
}

#[tokio::test(start_paused = true)]
async fn next_request_after_timeout_is_allowed() {
    let mut answered = false;
    let responder = move |command: Command| {
        // Only the second request gets an answer
        if std::mem::replace(&mut answered, true) {
            common::device(64)(command)
        } else {
            Vec::new()
        }
    };
    let (engine, mut transport) = connected(MockTransport::new(responder)).await;

    assert!(engine
        .request(&mut transport, Command::ReadVersion)
        .await
        .is_err());
    let payload = engine
        .request(&mut transport, Command::ReadVersion)
        .await
        .unwrap();
    assert_eq!(payload.command(), Command::ReadVersion);
}

#[tokio::test(start_paused = true)]
async fn late_reply_to_timed_out_request_is_discarded() {
    // The version reply only shows up in front of the basic info reply
    let responder = |command: Command| match command {
        Command::ReadVersion => Vec::new(),
        Command::ReadBasic => vec![common::version_response(), BASIC_RESPONSE.to_vec()],
        Command::ReadVoltages => Vec::new(),
    };
    let (engine, mut transport) = connected(MockTransport::new(responder)).await;

    assert!(engine
        .request(&mut transport, Command::ReadVersion)
        .await
        .is_err());
    let payload = engine
        .request(&mut transport, Command::ReadBasic)
        .await
        .unwrap();

    assert_eq!(payload.command(), Command::ReadBasic);
    assert_eq!(engine.state(), SessionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn second_request_while_pending_is_rejected() {
    let (engine, mut transport) = connected(MockTransport::silent()).await;

    engine
        .issue(&mut transport, Command::ReadBasic)
        .await
        .unwrap();
    let err = engine
        .issue(&mut transport, Command::ReadVoltages)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::RequestPending {
            requested: Command::ReadVoltages,
            pending: Command::ReadBasic
        }
    ));
    assert!(!err.is_recoverable());
    assert_eq!(transport.writes.len(), 1);
    assert_eq!(engine.state(), SessionState::Awaiting(Command::ReadBasic));
}

#[tokio::test(start_paused = true)]
async fn corrupt_frame_is_a_decode_error() {
    let mut corrupt = BASIC_RESPONSE;
    corrupt[10] ^= 0x01;
    let (engine, mut transport) =
        connected(MockTransport::new(move |_| vec![corrupt.to_vec()])).await;

    let err = engine
        .request(&mut transport, Command::ReadBasic)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Decode {
            command: Command::ReadBasic,
            source: DecodeError::BadChecksum { .. }
        }
    ));
    assert_eq!(engine.state(), SessionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn rejected_status_is_reported() {
    let (engine, mut transport) =
        connected(MockTransport::new(|_| vec![encode_frame(0x05, 0x80, &[])])).await;

    let err = engine
        .request(&mut transport, Command::ReadVersion)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Decode {
            source: DecodeError::Rejected(0x80),
            ..
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn failed_write_leaves_engine_idle() {
    let engine = RequestEngine::new(&SessionConfig::default());
    let mut transport = MockTransport::silent();

    let err = engine
        .issue(&mut transport, Command::ReadBasic)
        .await
        .unwrap_err();

    assert!(err.is_transport());
    assert_eq!(engine.state(), SessionState::Idle);
}
