//! Connection lifecycle: auth, single-client policy, session reset.

use std::sync::Arc;
use std::time::Duration;

use vizbridge_client::{Dispatcher, Session, SessionConfig};

use crate::harness::TestBridge;

#[tokio::test]
async fn test_wrong_token_is_rejected() {
    let bridge = TestBridge::start().await;
    let session = Session::new(SessionConfig {
        auth_token: Some("wrong".into()),
        ..bridge.session_config()
    });

    let err = session.connect().await.unwrap_err();
    assert_eq!(err.code(), "AUTH_FAILED");
    assert!(!session.is_connected().await);

    bridge.shutdown().await;
}

#[tokio::test]
async fn test_second_client_is_busy() {
    let bridge = TestBridge::start().await;
    let first = Session::new(bridge.session_config());
    first.connect().await.unwrap();

    let second = Session::new(bridge.session_config());
    let err = second.connect().await.unwrap_err();
    assert!(err.is_transport());
    assert_eq!(err.code(), "CLIENT_BUSY");
    assert!(!second.is_connected().await);

    // The first client is unaffected.
    first.ping().await.unwrap();

    bridge.shutdown().await;
}

#[tokio::test]
async fn test_new_connection_starts_fresh_session() {
    let bridge = TestBridge::start().await;
    let first = bridge.dispatcher();
    first.execute_code("add cone; z = 9").await.unwrap();
    first.session().disconnect().await;

    // The bridge may not have noticed the disconnect yet.
    let mut second = None;
    for _ in 0..50 {
        let session = Arc::new(Session::new(bridge.session_config()));
        match session.connect().await {
            Ok(()) => {
                second = Some(Dispatcher::new(session));
                break;
            }
            Err(e) if e.is_transport() => {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            Err(e) => panic!("unexpected connect failure: {e}"),
        }
    }
    let second = second.expect("bridge never freed the client slot");

    assert!(second.history().await.unwrap().is_empty());
    assert!(second.execute_code("print z").await.is_err());
    // Host state itself is not rolled back by a reconnect.
    assert_eq!(bridge.sources(), vec!["cone"]);

    bridge.shutdown().await;
}
