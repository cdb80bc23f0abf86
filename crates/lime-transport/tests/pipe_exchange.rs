//! Integration tests: two pipe ends exchanging every envelope kind.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use lime_transport::{
    Authentication, AuthenticationScheme, CancellationToken, Command, CommandMethod, Document,
    Envelope, Event, Message, Node, Notification, PipeConfig, PipeTransport,
    PipeTransportListener, Session, SessionState, Transport, TransportError, TransportEvent,
    TransportListener,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("warn")
        .try_init();
}

/// Every kind crosses the pipe with its addressing intact.
#[tokio::test]
async fn all_kinds_round_trip_addressing() {
    init_tracing();

    let (client, server) = PipeTransport::pair(PipeConfig::new());
    let cancel = CancellationToken::new();
    let alice: Node = "alice@example.org/home".parse().unwrap();
    let bob: Node = "bob@example.org/work".parse().unwrap();

    let mut message = Message::new(Some(bob.clone()), Document::text("Hello Bob"));
    message.from = Some(alice.clone());

    let mut notification = Notification::for_envelope(&message.clone().into(), Event::Consumed);
    notification.from = Some(bob.clone());

    let mut command = Command::new(CommandMethod::Get, "/account");
    command.from = Some(alice.clone());
    command.to = Some(bob.clone());

    let mut session = Session::new(SessionState::Authenticating);
    session.scheme_options = Some(vec![AuthenticationScheme::Plain]);
    session.authentication = Some(Authentication::plain("pwd"));

    let sent: Vec<Envelope> = vec![
        message.into(),
        notification.into(),
        command.into(),
        session.into(),
    ];
    for envelope in &sent {
        client.send(envelope.clone(), &cancel).await.unwrap();
    }

    for expected in &sent {
        let received = tokio::time::timeout(Duration::from_secs(5), server.receive(&cancel))
            .await
            .expect("receive timed out")
            .unwrap();
        assert_eq!(&received, expected);
        assert_eq!(received.from(), expected.from());
        assert_eq!(received.to(), expected.to());
    }
}

/// Closing waits for every lifecycle subscriber before finishing.
#[tokio::test]
async fn close_defers_to_subscribers() {
    init_tracing();

    let (client, _server) = PipeTransport::pair(PipeConfig::new());
    let flushed = Arc::new(AtomicBool::new(false));
    let closed_seen = Arc::new(AtomicBool::new(false));

    client.events().subscribe({
        let flushed = flushed.clone();
        move |event| {
            let flushed = flushed.clone();
            async move {
                if event == TransportEvent::Closing {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    flushed.store(true, Ordering::SeqCst);
                }
            }
            .boxed()
        }
    });
    client.events().subscribe({
        let flushed = flushed.clone();
        let closed_seen = closed_seen.clone();
        move |event| {
            let flushed = flushed.clone();
            let closed_seen = closed_seen.clone();
            async move {
                if event == TransportEvent::Closed {
                    assert!(flushed.load(Ordering::SeqCst), "closed before closing finished");
                    closed_seen.store(true, Ordering::SeqCst);
                }
            }
            .boxed()
        }
    });

    client.close(&CancellationToken::new()).await.unwrap();
    assert!(flushed.load(Ordering::SeqCst));
    assert!(closed_seen.load(Ordering::SeqCst));
}

/// Server accepts several clients; each pipe stays isolated.
#[tokio::test]
async fn listener_accepts_isolated_pipes() {
    init_tracing();

    let listener = PipeTransportListener::new(PipeConfig::new(), 8);
    let cancel = CancellationToken::new();
    listener.start_listening(&cancel).await.unwrap();
    let connector = listener.connector();

    let first = connector.connect().await.unwrap();
    let second = connector.connect().await.unwrap();
    let first_server = listener.accept_transport(&cancel).await.unwrap();
    let second_server = listener.accept_transport(&cancel).await.unwrap();

    first
        .send(Message::new(None, Document::text("one")).into(), &cancel)
        .await
        .unwrap();
    second
        .send(Message::new(None, Document::text("two")).into(), &cancel)
        .await
        .unwrap();

    let text = |envelope: Envelope| match envelope {
        Envelope::Message(m) => m.content.as_text().map(str::to_string),
        _ => None,
    };
    assert_eq!(text(first_server.receive(&cancel).await.unwrap()).as_deref(), Some("one"));
    assert_eq!(text(second_server.receive(&cancel).await.unwrap()).as_deref(), Some("two"));

    listener.stop_listening(&cancel).await.unwrap();
    assert!(matches!(
        connector.connect().await,
        Err(TransportError::ListenerStopped)
    ));
}
