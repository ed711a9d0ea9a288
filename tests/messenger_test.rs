//! Integration tests for the client messenger: suspension of messages to
//! receivers without keys, query throttling and inbound dispatch.

use std::sync::Arc;
use std::time::Duration;

use sechat::app::{ClientMessenger, ConnectionState, Session};
use sechat::core::{
    Content, GroupCommand, GroupCommandProcessor, GroupManager, GroupManagerConfig,
    HandshakeCommand, Id, InstantMessage, JsonPacker, MemoryGroupStore, Messenger, Packer,
};
use sechat::ds::{GateOptions, GateStatus, MemoryGate, MemoryGateFactory, Priority};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

struct Client {
    session: Arc<Session>,
    messenger: Arc<ClientMessenger>,
    packer: Arc<JsonPacker>,
    factory: Arc<MemoryGateFactory>,
}

impl Client {
    fn new(query_interval: Duration) -> Self {
        init_logger();
        let packer = Arc::new(JsonPacker::with_key_registry());
        packer.register(&station());
        let factory = Arc::new(MemoryGateFactory::new());
        let session = Session::with_defaults(station(), packer.clone(), factory.clone());
        let messenger = ClientMessenger::new(session.clone(), query_interval);
        session.set_current_user(Some(alice()));
        Self {
            session,
            messenger,
            packer,
            factory,
        }
    }

    fn gate(&self) -> Arc<MemoryGate> {
        self.factory.latest().expect("gate created")
    }

    fn deliver(&self, message: InstantMessage) {
        let payload = JsonPacker::new().pack(&message).unwrap();
        self.gate().receive(payload);
    }

    fn running(&self) {
        self.session.start(GateOptions::default());
        self.gate().set_status(GateStatus::Connected);
        self.session.tick();
        self.deliver(InstantMessage::new(
            station(),
            alice(),
            Content::Handshake(HandshakeCommand::success(Some("k".to_string()))),
        ));
        assert_eq!(self.session.current_state(), ConnectionState::Running);
        self.gate().take_sent();
    }

    fn sent_to(&self) -> Vec<(Id, Content)> {
        self.gate()
            .sent()
            .iter()
            .map(|packet| {
                let message = JsonPacker::new().unpack(&packet.payload).unwrap();
                (message.receiver, message.content)
            })
            .collect()
    }
}

fn station() -> Id {
    Id::from("station@x")
}

fn alice() -> Id {
    Id::from("alice@x")
}

fn text(body: &str) -> Content {
    Content::Text {
        group: None,
        text: body.to_string(),
    }
}

#[test]
fn test_unknown_receiver_is_suspended_then_resumed() {
    let client = Client::new(Duration::from_secs(120));
    client.running();
    let carol = Id::from("carol@x");

    assert!(client
        .messenger
        .send_content(&carol, text("hello"), Priority::Normal));
    assert_eq!(client.messenger.suspended_count(&carol), 1);
    assert!(client.gate().sent().is_empty());

    // Still no key: resuming keeps the message parked.
    assert_eq!(client.messenger.resume_suspended(&carol), 0);
    assert_eq!(client.messenger.suspended_count(&carol), 1);

    client.packer.register(&carol);
    assert_eq!(client.messenger.resume_suspended(&carol), 1);
    assert_eq!(client.messenger.suspended_count(&carol), 0);
    assert_eq!(client.sent_to(), vec![(carol.clone(), text("hello"))]);

    assert_eq!(client.messenger.resume_suspended(&carol), 0);
}

#[test]
fn test_station_content_is_addressed_to_station() {
    let client = Client::new(Duration::from_secs(120));
    client.running();

    assert!(client
        .messenger
        .send_to_station(text("for the station"), Priority::Normal));
    assert_eq!(client.sent_to(), vec![(station(), text("for the station"))]);
}

#[test]
fn test_send_without_user_fails() {
    let client = Client::new(Duration::from_secs(120));
    client.session.set_current_user(None);
    assert!(!client
        .messenger
        .send_content(&station(), text("hi"), Priority::Normal));
    assert_eq!(client.session.waiting_len(), 0);
}

#[test]
fn test_group_queries_are_throttled() {
    let client = Client::new(Duration::from_secs(120));
    client.running();
    let group = Id::from("g@x");
    let bot = Id::from("bot@x");
    let other = Id::from("bot2@x");
    client.packer.register(&bot);
    client.packer.register(&other);

    assert!(client.messenger.query_group_info(&group, &[bot.clone()]));
    assert!(!client.messenger.query_group_info(&group, &[bot.clone()]));
    // A member not asked yet still gets a query.
    assert!(client
        .messenger
        .query_group_info(&group, &[bot.clone(), other.clone()]));

    let queries: Vec<Id> = client
        .sent_to()
        .into_iter()
        .filter(|(_, content)| *content == Content::Group(GroupCommand::query(&group)))
        .map(|(receiver, _)| receiver)
        .collect();
    assert_eq!(queries, vec![bot, other]);
}

#[test]
fn test_queries_resume_after_interval() {
    let client = Client::new(Duration::ZERO);
    client.running();
    let group = Id::from("g@x");
    let bot = Id::from("bot@x");
    client.packer.register(&bot);

    assert!(client.messenger.query_group_info(&group, &[bot.clone()]));
    assert!(client.messenger.query_group_info(&group, &[bot.clone()]));
    assert_eq!(client.sent_to().len(), 2);
}

#[test]
fn test_query_refuses_broadcast_and_empty() {
    let client = Client::new(Duration::from_secs(120));
    assert!(!client
        .messenger
        .query_group_info(&Id::everyone(), &[Id::from("bot@x")]));
    assert!(!client.messenger.query_group_info(&Id::from("g@x"), &[]));
}

#[test]
fn test_inbound_group_command_reaches_processor() {
    let client = Client::new(Duration::from_secs(120));
    client.running();

    let store = Arc::new(MemoryGroupStore::new());
    let manager = Arc::new(GroupManager::new(
        store.clone(),
        store,
        client.messenger.clone(),
        GroupManagerConfig::default(),
    ));
    let processor = Arc::new(GroupCommandProcessor::new(manager.clone()));
    client.messenger.add_handler(&processor);

    let group = Id::from("g@x");
    let bob = Id::from("bob@x");
    client.deliver(InstantMessage::new(
        bob.clone(),
        alice(),
        Content::Group(GroupCommand::invite(&group, &[bob.clone(), alice()])),
    ));
    assert_eq!(manager.members(&group), vec![bob.clone(), alice()]);

    // Handlers are held weakly.
    drop(processor);
    client.deliver(InstantMessage::new(
        Id::from("bob@x"),
        alice(),
        Content::Group(GroupCommand::invite(&group, &[Id::from("carol@x")])),
    ));
    assert_eq!(manager.members(&group).len(), 2);
}

#[test]
fn test_inbound_time_is_recorded_for_next_handshake() {
    let client = Client::new(Duration::from_secs(120));
    client.running();

    let mut message = InstantMessage::new(Id::from("bob@x"), alice(), text("hi"));
    message.time = 1_700_000_000;
    client.deliver(message);

    // A new user goes back through Default and handshakes again.
    client.session.set_current_user(Some(Id::from("bob@x")));
    for _ in 0..4 {
        client.session.tick();
    }
    assert_eq!(client.session.current_state(), ConnectionState::Handshaking);

    let handshake = JsonPacker::new()
        .unpack(&client.gate().sent()[0].payload)
        .unwrap();
    match handshake.content {
        Content::Handshake(cmd) => assert_eq!(cmd.last_time, Some(1_700_000_000)),
        other => panic!("expected handshake, got {other:?}"),
    }
}
