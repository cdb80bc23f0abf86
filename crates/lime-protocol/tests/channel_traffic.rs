//! Integration tests: application traffic over established sessions.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lime_protocol::{
    AuthenticationResult, ChannelConfig, ChannelListener, ClientChannel, Consumers,
    EstablishmentOptions, ServerChannel, ServerEstablishment,
};
use lime_transport::{
    Authentication, CancellationToken, Command, CommandStatus, Document, Event, Message, Node,
    Notification, PipeConfig, PipeTransport, PipeTransportListener, SessionState, TransportListener,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("warn")
        .try_init();
}

fn server_node() -> Node {
    "postmaster@example.org/server".parse().unwrap()
}

fn guest_login(node: Option<&Node>, _: &Authentication) -> AuthenticationResult {
    AuthenticationResult::Success(node.cloned().unwrap_or_default())
}

async fn establish(
    client_end: PipeTransport,
    server_end: PipeTransport,
    client_config: ChannelConfig,
) -> (ClientChannel, ServerChannel) {
    let server = ServerChannel::accept(server_node(), server_end, ChannelConfig::new());
    let client = ClientChannel::new(client_end, client_config);
    let cancel = CancellationToken::new();

    let establishment = ServerEstablishment::new(guest_login);
    let options = EstablishmentOptions::new(
        "bob@example.org".parse().unwrap(),
        Authentication::Guest,
    )
    .instance("phone");
    let (server_state, client_session) = tokio::join!(
        server.establish_session(&establishment, &cancel),
        client.establish_session(&options, &cancel),
    );
    assert_eq!(server_state.unwrap(), SessionState::Established);
    assert_eq!(client_session.unwrap().state, SessionState::Established);
    (client, server)
}

async fn established_pair(client_config: ChannelConfig) -> (ClientChannel, ServerChannel) {
    let (client_end, server_end) = PipeTransport::pair(PipeConfig::new());
    establish(client_end, server_end, client_config).await
}

/// Notifications sent from many tasks at once arrive exactly once each.
#[tokio::test]
async fn concurrent_notifications_arrive_exactly_once() {
    init_tracing();
    let (client, server) = established_pair(ChannelConfig::new()).await;
    let cancel = CancellationToken::new();

    let senders: Vec<_> = (0..100)
        .map(|i| {
            let server = server.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let notification = Notification {
                    id: Some(format!("n-{i}")),
                    ..Notification::new(Event::Received)
                };
                server.send_notification(notification, &cancel).await
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for _ in 0..100 {
        let notification = tokio::time::timeout(
            Duration::from_secs(5),
            client.receive_notification(&cancel),
        )
        .await
        .expect("receive timed out")
        .unwrap();
        assert!(seen.insert(notification.id.unwrap()), "duplicate notification");
    }
    for sender in senders {
        sender.await.unwrap().unwrap();
    }

    assert_eq!(seen.len(), 100);
    assert_eq!(client.queued(lime_transport::EnvelopeKind::Notification), 0);
}

/// With recipient filling on, missing addresses are taken from the session.
#[tokio::test]
async fn missing_addresses_are_filled_from_the_session() {
    init_tracing();
    let (client, server) =
        established_pair(ChannelConfig::new().fill_envelope_recipients(true)).await;
    let cancel = CancellationToken::new();

    server
        .send_message(Message::new(None, Document::text("unaddressed")), &cancel)
        .await
        .unwrap();
    let received = client.receive_message(&cancel).await.unwrap();
    assert_eq!(received.from, Some(server_node()));
    assert_eq!(received.to, client.local_node());
    assert_eq!(received.to.unwrap().instance.as_deref(), Some("phone"));

    // Explicit addressing is never overwritten.
    let carol: Node = "carol@example.org/desk".parse().unwrap();
    let mut addressed = Message::new(Some(carol.clone()), Document::text("relayed"));
    addressed.from = Some(carol.clone());
    server.send_message(addressed, &cancel).await.unwrap();
    let received = client.receive_message(&cancel).await.unwrap();
    assert_eq!(received.from, Some(carol.clone()));
    assert_eq!(received.to, Some(carol));
}

/// Without recipient filling, inbound addresses are left untouched.
#[tokio::test]
async fn addresses_are_left_alone_by_default() {
    init_tracing();
    let (client, server) = established_pair(ChannelConfig::new()).await;
    let cancel = CancellationToken::new();

    server
        .send_message(Message::new(None, Document::text("bare")), &cancel)
        .await
        .unwrap();
    let received = client.receive_message(&cancel).await.unwrap();
    assert_eq!(received.from, None);
    assert_eq!(received.to, None);
    assert_eq!(received.content.as_text(), Some("bare"));
}

/// A ping sent by the application is answered by the remote channel and
/// the response is handed back to the caller.
#[tokio::test]
async fn application_ping_is_answered() {
    init_tracing();
    let (client, server) = established_pair(ChannelConfig::new()).await;
    let cancel = CancellationToken::new();

    let ping = Command::ping_request();
    let ping_id = ping.id.clone();
    client.send_command(ping, &cancel).await.unwrap();

    let response = tokio::time::timeout(Duration::from_secs(5), client.receive_command(&cancel))
        .await
        .expect("no ping response")
        .unwrap();
    assert_eq!(response.id, ping_id);
    assert_eq!(response.status, CommandStatus::Success);
    assert!(response.resource.is_some_and(|r| r.is_ping()));
    // The server never saw the ping as application traffic.
    assert_eq!(server.queued(lime_transport::EnvelopeKind::Command), 0);
}

/// Sessions accepted through a transport listener feed a channel listener
/// until its consumer asks to stop.
#[tokio::test]
async fn listener_consumes_messages_from_an_accepted_session() {
    init_tracing();
    let transport_listener = PipeTransportListener::new(PipeConfig::new(), 4);
    let cancel = CancellationToken::new();
    transport_listener.start_listening(&cancel).await.unwrap();

    let client_end = transport_listener.connector().connect().await.unwrap();
    let server_end = transport_listener.accept_transport(&cancel).await.unwrap();
    let (client, server) = establish(client_end, server_end, ChannelConfig::new()).await;

    let consumed = Arc::new(AtomicUsize::new(0));
    let consumers = Consumers::new().on_message({
        let consumed = consumed.clone();
        move |_message: Message| {
            let count = consumed.fetch_add(1, Ordering::SeqCst) + 1;
            async move { count < 5 }
        }
    });
    let listener = ChannelListener::start(Arc::new(server.clone()), consumers);

    for i in 0..8 {
        client
            .send_message(Message::new(None, Document::text(format!("m{i}"))), &cancel)
            .await
            .unwrap();
    }

    let last = tokio::time::timeout(Duration::from_secs(5), listener.message_completion())
        .await
        .expect("listener did not complete")
        .unwrap()
        .unwrap();
    assert_eq!(last.content.as_text(), Some("m4"));
    assert_eq!(consumed.load(Ordering::SeqCst), 5);

    // The rest stays queued for whoever reads next.
    let next = server.receive_message(&cancel).await.unwrap();
    assert_eq!(next.content.as_text(), Some("m5"));

    listener.stop();
    assert!(listener.notification_completion().await.unwrap().is_none());
    transport_listener.stop_listening(&cancel).await.unwrap();
}
