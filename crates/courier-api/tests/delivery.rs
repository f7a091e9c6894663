/// End-to-end delivery scenarios: real HTTP pushes against a local receiver,
/// the in-memory broker backend, and an in-memory database.
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};

use courier_api::push::Pusher;
use courier_api::service::{DeliveryOutcome, DeliveryService};
use courier_broker::{Broker, MemoryBroker};
use courier_db::Database;
use courier_presence::{PresenceStore, TokenManager};
use courier_types::api::{Claims, CreateUserRequest, LoginRequest, MessagePayload};
use courier_types::events::{EXCHANGE, LOGIN_QUEUE, MESSAGE_QUEUE, MessageEvent};

struct Harness {
    service: Arc<DeliveryService>,
    db: Arc<Database>,
    broker: Arc<MemoryBroker>,
}

async fn harness() -> Harness {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let store = Arc::new(PresenceStore::new(db.clone()));
    let tokens = TokenManager::new("test-secret".into(), 60, store.clone());
    let broker = Arc::new(MemoryBroker::new());
    broker
        .declare_topology(EXCHANGE, &[MESSAGE_QUEUE, LOGIN_QUEUE])
        .await
        .unwrap();
    let pusher = Pusher::new(Duration::from_millis(800)).unwrap();

    Harness {
        service: Arc::new(DeliveryService::new(
            store,
            tokens,
            broker.clone(),
            pusher,
        )),
        db,
        broker,
    }
}

impl Harness {
    fn create_user(&self, username: &str, phone: &str) -> i64 {
        self.service
            .create_user(&CreateUserRequest {
                username: username.into(),
                phone_number: phone.into(),
                password: "secret-pass".into(),
            })
            .unwrap()
    }

    async fn login(&self, username: &str, address: &str) -> (i64, String) {
        self.service
            .login(&LoginRequest {
                username: username.into(),
                password: "secret-pass".into(),
                user_address: address.into(),
                public_key: None,
            })
            .await
            .unwrap()
    }

    fn claims_for(&self, user_id: i64, username: &str) -> Claims {
        Claims {
            sub: user_id,
            username: username.into(),
            exp: (chrono_like_exp()) as usize,
        }
    }
}

// One hour out, without pulling chrono into the test.
fn chrono_like_exp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs()
        + 3600
}

fn payload(sender_id: i64, sender_username: &str, receiver_id: i64, text: &str) -> MessagePayload {
    MessagePayload {
        message: text.into(),
        sender_id,
        sender_username: sender_username.into(),
        receiver_id,
        send_date: "2024-06-01 12:00:00".into(),
    }
}

/// Spawns a client-side listener that records every pushed message.
async fn spawn_receiver() -> (String, Arc<Mutex<Vec<MessagePayload>>>) {
    let received: Arc<Mutex<Vec<MessagePayload>>> = Arc::new(Mutex::new(Vec::new()));

    let app = Router::new().route(
        "/",
        post({
            let received = received.clone();
            move |Json(msg): Json<MessagePayload>| {
                let received = received.clone();
                async move {
                    received.lock().unwrap().push(msg);
                    StatusCode::OK
                }
            }
        }),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}/", addr), received)
}

#[tokio::test]
async fn message_to_receiver_without_addresses_is_queued() {
    let h = harness().await;
    let alice = h.create_user("alice", "111");
    let bob = h.create_user("bob", "222");

    let outcome = h
        .service
        .send_message(&h.claims_for(alice, "alice"), &payload(alice, "alice", bob, "hello"))
        .await
        .unwrap();

    assert_eq!(outcome, DeliveryOutcome::Queued);
    assert_eq!(h.db.messages_for(bob).unwrap().len(), 1);

    // The broker event still goes out, with the (empty) address snapshot.
    assert_eq!(h.broker.queue_depth(MESSAGE_QUEUE).await.unwrap(), 1);
    let event: MessageEvent =
        serde_json::from_slice(&h.broker.take(MESSAGE_QUEUE).unwrap()).unwrap();
    assert!(event.address_list.is_empty());
    assert_eq!(event.msg_json.message, "hello");
}

#[tokio::test]
async fn message_to_reachable_receiver_is_delivered_inline() {
    let h = harness().await;
    let alice = h.create_user("alice", "111");
    let _bob = h.create_user("bob", "222");

    let (address, received) = spawn_receiver().await;
    let (bob, _token) = h.login("bob", &address).await;

    let outcome = h
        .service
        .send_message(&h.claims_for(alice, "alice"), &payload(alice, "alice", bob, "direct"))
        .await
        .unwrap();

    assert_eq!(outcome, DeliveryOutcome::Delivered);
    // Delivered inline: nothing persisted.
    assert!(h.db.messages_for(bob).unwrap().is_empty());
    let seen = received.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].message, "direct");
}

#[tokio::test]
async fn pending_messages_are_redelivered_on_login_and_deleted() {
    let h = harness().await;
    let alice = h.create_user("alice", "111");
    let bob = h.create_user("bob", "222");

    // Two messages while bob is unreachable.
    for text in ["first", "second"] {
        let outcome = h
            .service
            .send_message(&h.claims_for(alice, "alice"), &payload(alice, "alice", bob, text))
            .await
            .unwrap();
        assert_eq!(outcome, DeliveryOutcome::Queued);
    }
    assert_eq!(h.db.messages_for(bob).unwrap().len(), 2);

    // Bob becomes reachable: the login-event path redelivers the batch.
    let (address, received) = spawn_receiver().await;
    let (delivered, remaining) = h
        .service
        .deliver_pending(bob, &[address.clone()])
        .await
        .unwrap();

    assert_eq!((delivered, remaining), (2, 0));
    assert!(h.db.messages_for(bob).unwrap().is_empty());
    assert_eq!(received.lock().unwrap().len(), 2);

    // Redelivering again is a no-op: the ids are gone from the pending set.
    let (delivered, remaining) = h.service.deliver_pending(bob, &[address]).await.unwrap();
    assert_eq!((delivered, remaining), (0, 0));
    assert_eq!(received.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn unreachable_addresses_leave_messages_pending() {
    let h = harness().await;
    let alice = h.create_user("alice", "111");
    let bob = h.create_user("bob", "222");
    h.db.insert_message(alice, bob, "alice", "stuck").unwrap();

    let (delivered, remaining) = h
        .service
        .deliver_pending(bob, &["http://127.0.0.1:1/".into()])
        .await
        .unwrap();

    assert_eq!((delivered, remaining), (0, 1));
    assert_eq!(h.db.messages_for(bob).unwrap().len(), 1);
}

#[tokio::test]
async fn second_login_reuses_token_and_fans_out_to_both_addresses() {
    let h = harness().await;
    let alice = h.create_user("alice", "111");
    let _bob = h.create_user("bob", "222");

    let (live_address, received) = spawn_receiver().await;

    // First device is now gone; second is live. Same token both times.
    let (bob, token_one) = h.login("bob", "http://127.0.0.1:1/").await;
    let (_, token_two) = h.login("bob", &live_address).await;
    assert_eq!(token_one, token_two);

    let addresses = h.service.store().addresses(bob).unwrap();
    assert_eq!(addresses.len(), 2);

    // Fan-out hits every address; one success is enough.
    let outcome = h
        .service
        .send_message(&h.claims_for(alice, "alice"), &payload(alice, "alice", bob, "fan-out"))
        .await
        .unwrap();

    assert_eq!(outcome, DeliveryOutcome::Delivered);
    assert_eq!(received.lock().unwrap().len(), 1);

    let event: MessageEvent =
        serde_json::from_slice(&h.broker.take(MESSAGE_QUEUE).unwrap()).unwrap();
    assert_eq!(event.address_list.len(), 2);
}

#[tokio::test]
async fn spoofed_sender_username_is_rejected() {
    let h = harness().await;
    let alice = h.create_user("alice", "111");
    let bob = h.create_user("bob", "222");

    let err = h
        .service
        .send_message(&h.claims_for(alice, "alice"), &payload(alice, "bob", bob, "forged"))
        .await
        .unwrap_err();

    assert!(matches!(err, courier_api::error::ApiError::NotAuthorized));
    // Rejected at the boundary: no state mutation.
    assert!(h.db.messages_for(bob).unwrap().is_empty());
    assert_eq!(h.broker.queue_depth(MESSAGE_QUEUE).await.unwrap(), 0);
}

#[tokio::test]
async fn unknown_receiver_is_a_validation_error() {
    let h = harness().await;
    let alice = h.create_user("alice", "111");

    let err = h
        .service
        .send_message(&h.claims_for(alice, "alice"), &payload(alice, "alice", 999, "void"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        courier_api::error::ApiError::Validation(_)
    ));
}

#[tokio::test]
async fn delete_user_cascades_and_is_idempotent() {
    let h = harness().await;
    let alice = h.create_user("alice", "111");
    let bob = h.create_user("bob", "222");

    let (_, _token) = h.login("bob", "http://127.0.0.1:1/").await;
    h.db.insert_message(alice, bob, "alice", "pending").unwrap();

    assert!(h.service.delete_user(bob).unwrap());
    assert!(h.db.user_by_id(bob).unwrap().is_none());
    assert!(h.db.token(bob).unwrap().is_none());
    assert!(h.db.addresses(bob).unwrap().is_empty());
    assert!(h.db.messages_for(bob).unwrap().is_empty());

    // Second deletion reports false, not an error.
    assert!(!h.service.delete_user(bob).unwrap());
}

#[tokio::test]
async fn login_publishes_the_login_event() {
    let h = harness().await;
    let _bob = h.create_user("bob", "222");

    let (bob, _token) = h.login("bob", "http://10.0.0.9:7777/").await;

    let event: courier_types::events::LoginEvent =
        serde_json::from_slice(&h.broker.take(LOGIN_QUEUE).unwrap()).unwrap();
    assert_eq!(event.user_id, bob);
    assert_eq!(event.user_address, "http://10.0.0.9:7777/");
}
