//! Two-client end-to-end suites over the in-process relay: one client plays
//! the proposing application, the other the responding wallet.

use {
    anyhow::Result,
    client_core::{
        client::{Client, ClientOptions, ConnectParams},
        error::ClientError,
        event::ClientEvent,
        relay::{memory::MemoryRelay, Transport},
        sequence::pairing::{default_permissions, SettledPairing},
        storage::{KeyValueStorage, MemoryStorage},
    },
    client_rpc::{
        domain::{MessageId, Topic},
        rpc::{
            AppMetadata, BlockchainPermissions, JsonRpcPermissions, NotificationPermissions,
            Participant, Payload, RelayProtocol, ResponseParams, SessionPermissions, SessionState,
        },
    },
    std::{sync::Arc, time::Duration},
    tokio::sync::broadcast,
};

fn metadata(name: &str) -> AppMetadata {
    AppMetadata {
        description: format!("{name} test client"),
        url: "https://example.com".to_owned(),
        icons: vec!["https://example.com/icon.png".to_owned()],
        name: name.to_owned(),
    }
}

fn permissions(methods: &[&str]) -> SessionPermissions {
    SessionPermissions {
        blockchain: BlockchainPermissions {
            chains: ["eip155:1".to_owned()].into(),
        },
        jsonrpc: JsonRpcPermissions {
            methods: methods.iter().map(|m| (*m).to_owned()).collect(),
        },
        notifications: NotificationPermissions {
            types: ["accountsChanged".to_owned()].into(),
        },
    }
}

fn accounts() -> SessionState {
    SessionState {
        accounts: ["eip155:1:0xBA5BA3955463ADcc7aa3E33bbdfb8A68e0933dD8".to_owned()].into(),
    }
}

async fn new_client(relay: &MemoryRelay, name: &str) -> Result<Arc<Client>> {
    let options = ClientOptions::new(Arc::new(relay.endpoint())).with_metadata(metadata(name));

    Ok(Arc::new(Client::new(options).await?))
}

async fn wait_for<T>(
    events: &mut broadcast::Receiver<ClientEvent>,
    mut pick: impl FnMut(&ClientEvent) -> Option<T>,
) -> T {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed");

        if let Some(value) = pick(&event) {
            return value;
        }
    }
}

struct Established {
    dapp: Arc<Client>,
    wallet: Arc<Client>,
    dapp_events: broadcast::Receiver<ClientEvent>,
    wallet_events: broadcast::Receiver<ClientEvent>,
    pairing_topic: Topic,
    session_topic: Topic,
}

/// Runs the full pair + connect flow between two fresh clients.
async fn establish(relay: &MemoryRelay, methods: &[&str]) -> Result<Established> {
    let dapp = new_client(relay, "dapp").await?;
    let wallet = new_client(relay, "wallet").await?;
    let mut dapp_events = dapp.events();
    let mut wallet_events = wallet.events();

    let connect = {
        let dapp = Arc::clone(&dapp);
        let permissions = permissions(methods);
        tokio::spawn(async move {
            dapp.connect(ConnectParams {
                pairing_topic: None,
                permissions,
            })
            .await
        })
    };

    let uri = wait_for(&mut dapp_events, |event| match event {
        ClientEvent::PairingProposed { uri, .. } => Some(uri.clone()),
        _ => None,
    })
    .await;

    let pairing = wallet.pair(&uri).await?;

    let proposal = wait_for(&mut wallet_events, |event| match event {
        ClientEvent::SessionProposed { proposal } => Some(proposal.clone()),
        _ => None,
    })
    .await;

    let wallet_session = wallet.approve(proposal, accounts()).await?;
    let dapp_session = connect.await??;

    assert_eq!(dapp_session.topic, wallet_session.topic);

    Ok(Established {
        dapp,
        wallet,
        dapp_events,
        wallet_events,
        pairing_topic: pairing.topic,
        session_topic: dapp_session.topic,
    })
}

#[tokio::test]
async fn pair_and_connect_settles_session() -> Result<()> {
    let relay = MemoryRelay::default();

    let storage = Arc::new(MemoryStorage::default());
    let dapp = Arc::new(
        Client::new(
            ClientOptions::new(Arc::new(relay.endpoint()))
                .with_metadata(metadata("dapp"))
                .with_storage(Arc::clone(&storage) as Arc<dyn KeyValueStorage>),
        )
        .await?,
    );
    let wallet = new_client(&relay, "wallet").await?;
    let mut dapp_events = dapp.events();
    let mut wallet_events = wallet.events();

    let connect = {
        let dapp = Arc::clone(&dapp);
        tokio::spawn(async move {
            dapp.connect(ConnectParams {
                pairing_topic: None,
                permissions: permissions(&["eth_sign"]),
            })
            .await
        })
    };

    let uri = wait_for(&mut dapp_events, |event| match event {
        ClientEvent::PairingProposed { uri, .. } => Some(uri.clone()),
        _ => None,
    })
    .await;
    assert!(uri.starts_with("wc:"));

    let wallet_pairing = wallet.pair(&uri).await?;

    let dapp_pairing = wait_for(&mut dapp_events, |event| match event {
        ClientEvent::PairingSettled { pairing } => Some(pairing.clone()),
        _ => None,
    })
    .await;
    assert_eq!(dapp_pairing.topic, wallet_pairing.topic);
    assert_ne!(
        dapp_pairing.self_participant.public_key,
        dapp_pairing.peer_participant.public_key
    );

    let proposal = wait_for(&mut wallet_events, |event| match event {
        ClientEvent::SessionProposed { proposal } => Some(proposal.clone()),
        _ => None,
    })
    .await;

    let wallet_session = wallet.approve(proposal, accounts()).await?;
    let dapp_session = connect.await??;

    assert_eq!(dapp_session.topic, wallet_session.topic);
    // The session channel is disjoint from its parent pairing.
    assert_ne!(dapp_session.topic, wallet_pairing.topic);
    assert_ne!(
        dapp_session.self_participant.public_key,
        dapp_session.peer_participant.public_key
    );
    // The proposer holds the controller role.
    assert!(dapp_session.controller);
    assert!(!wallet_session.controller);
    assert_eq!(wallet_session.state, accounts());

    let created = wait_for(&mut wallet_events, |event| match event {
        ClientEvent::SessionSettled { session } => Some(session.topic.clone()),
        _ => None,
    })
    .await;
    assert_eq!(created, dapp_session.topic);

    // Observers reading storage after the event see the settled record.
    let stored = storage
        .get("wc@2:client//session:settled")
        .await?
        .expect("settled sessions were persisted");
    let records: Vec<serde_json::Value> = serde_json::from_slice(&stored)?;
    assert_eq!(
        records
            .first()
            .and_then(|r| r.get("topic"))
            .and_then(|t| t.as_str()),
        Some(dapp_session.topic.as_ref()),
    );

    Ok(())
}

#[tokio::test]
async fn rejected_session_emits_deleted_on_both_sides() -> Result<()> {
    let relay = MemoryRelay::default();
    let dapp = new_client(&relay, "dapp").await?;
    let wallet = new_client(&relay, "wallet").await?;
    let mut dapp_events = dapp.events();
    let mut wallet_events = wallet.events();

    let connect = {
        let dapp = Arc::clone(&dapp);
        tokio::spawn(async move {
            dapp.connect(ConnectParams {
                pairing_topic: None,
                permissions: permissions(&["eth_sign"]),
            })
            .await
        })
    };

    let uri = wait_for(&mut dapp_events, |event| match event {
        ClientEvent::PairingProposed { uri, .. } => Some(uri.clone()),
        _ => None,
    })
    .await;
    wallet.pair(&uri).await?;

    let proposal = wait_for(&mut wallet_events, |event| match event {
        ClientEvent::SessionProposed { proposal } => Some(proposal.clone()),
        _ => None,
    })
    .await;

    wallet.reject(proposal.clone()).await?;

    let reason = wait_for(&mut wallet_events, |event| match event {
        ClientEvent::SessionDeleted { reason, .. } => Some(reason.clone()),
        _ => None,
    })
    .await;
    assert_eq!(reason.message, "User rejected");

    let reason = wait_for(&mut dapp_events, |event| match event {
        ClientEvent::SessionDeleted { reason, .. } => Some(reason.clone()),
        _ => None,
    })
    .await;
    assert_eq!(reason.message, "User rejected");

    assert!(matches!(
        connect.await?,
        Err(ClientError::Rpc { code: 5000, .. })
    ));

    // The proposal was consumed; approving it now has nothing to match.
    assert!(matches!(
        wallet.approve(proposal, accounts()).await,
        Err(ClientError::NoMatchingTopic(_))
    ));

    Ok(())
}

#[tokio::test]
async fn unauthorized_method_is_answered_with_method_not_found() -> Result<()> {
    let relay = MemoryRelay::default();
    let mut established = establish(&relay, &["eth_sign"]).await?;

    let result = established
        .dapp
        .request(
            &established.session_topic,
            "eth_sendTransaction",
            serde_json::json!([]),
            Some("eip155:1".to_owned()),
        )
        .await;

    assert!(matches!(
        result,
        Err(ClientError::Rpc { code: -32601, .. })
    ));

    // No payload event leaked on the wallet side.
    while let Ok(event) = established.wallet_events.try_recv() {
        assert!(!matches!(event, ClientEvent::SessionPayload { .. }));
    }

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn request_timeout_leaves_session_settled() -> Result<()> {
    let relay = MemoryRelay::default();
    let mut established = establish(&relay, &["eth_sign"]).await?;

    // The wallet application receives the payload but never responds.
    let result = established
        .dapp
        .request(
            &established.session_topic,
            "eth_sign",
            serde_json::json!(["0xdeadbeef"]),
            None,
        )
        .await;

    assert!(matches!(result, Err(ClientError::RpcTimeout)));

    let payload = wait_for(&mut established.wallet_events, |event| match event {
        ClientEvent::SessionPayload { request, .. } => Some(request.clone()),
        _ => None,
    })
    .await;
    assert_eq!(payload.method, "eth_sign");

    assert!(established.dapp.get_session(&established.session_topic).is_ok());
    assert!(established
        .wallet
        .get_session(&established.session_topic)
        .is_ok());

    Ok(())
}

#[tokio::test]
async fn request_and_respond_round_trip() -> Result<()> {
    let relay = MemoryRelay::default();
    let established = establish(&relay, &["eth_sign"]).await?;

    let responder = {
        let wallet = Arc::clone(&established.wallet);
        let mut wallet_events = established.wallet_events;
        tokio::spawn(async move {
            let (topic, request) = wait_for(&mut wallet_events, |event| match event {
                ClientEvent::SessionPayload { topic, request, .. } => {
                    Some((topic.clone(), request.clone()))
                }
                _ => None,
            })
            .await;

            wallet
                .respond(&topic, request.id, Ok(serde_json::json!("0xsigned")))
                .await
        })
    };

    let result = established
        .dapp
        .request(
            &established.session_topic,
            "eth_sign",
            serde_json::json!(["0xdeadbeef"]),
            None,
        )
        .await?;

    assert_eq!(result, serde_json::json!("0xsigned"));
    responder.await??;

    Ok(())
}

#[tokio::test]
async fn expired_pairing_is_swept_and_forgotten() -> Result<()> {
    let relay = MemoryRelay::default();
    let now = chrono::Utc::now().timestamp().max(0) as u64;

    let record = SettledPairing {
        topic: Topic::generate(),
        relay: RelayProtocol::default(),
        self_participant: Participant {
            public_key: "aa".repeat(32),
            metadata: None,
        },
        peer_participant: Participant {
            public_key: "bb".repeat(32),
            metadata: None,
        },
        permissions: default_permissions(),
        controller: false,
        sym_key: [7u8; 32],
        expiry: now + 2,
        state: Default::default(),
    };

    let storage = Arc::new(MemoryStorage::default());
    storage
        .set(
            "wc@2:client//pairing:settled",
            serde_json::to_vec(&vec![&record])?,
        )
        .await?;

    let client = Client::new(
        ClientOptions::new(Arc::new(relay.endpoint()))
            .with_storage(storage as Arc<dyn KeyValueStorage>),
    )
    .await?;
    let mut events = client.events();

    assert!(client.get_pairing(&record.topic).is_ok());

    let deleted = wait_for(&mut events, |event| match event {
        ClientEvent::PairingDeleted { topic, .. } => Some(topic.clone()),
        _ => None,
    })
    .await;
    assert_eq!(deleted, record.topic);

    assert!(matches!(
        client.get_pairing(&record.topic),
        Err(ClientError::NoMatchingTopic(_))
    ));

    Ok(())
}

#[tokio::test]
async fn double_pair_race_has_exactly_one_winner() -> Result<()> {
    let relay = MemoryRelay::default();
    let dapp = new_client(&relay, "dapp").await?;
    let wallet = new_client(&relay, "wallet").await?;
    let mut dapp_events = dapp.events();
    let mut wallet_events = wallet.events();

    let _connect = {
        let dapp = Arc::clone(&dapp);
        tokio::spawn(async move {
            dapp.connect(ConnectParams {
                pairing_topic: None,
                permissions: permissions(&["eth_sign"]),
            })
            .await
        })
    };

    let uri = wait_for(&mut dapp_events, |event| match event {
        ClientEvent::PairingProposed { uri, .. } => Some(uri.clone()),
        _ => None,
    })
    .await;

    let (first, second) = tokio::join!(wallet.pair(&uri), wallet.pair(&uri));
    let results = [first, second];

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(ClientError::ProposalAlreadyResponded(_)))));

    let mut settled = 0;
    while let Ok(event) = wallet_events.try_recv() {
        if matches!(event, ClientEvent::PairingSettled { .. }) {
            settled += 1;
        }
    }
    assert_eq!(settled, 1);

    Ok(())
}

#[tokio::test]
async fn notifications_are_scoped_by_permissions() -> Result<()> {
    let relay = MemoryRelay::default();
    let mut established = establish(&relay, &["eth_sign"]).await?;

    established
        .dapp
        .notify(
            &established.session_topic,
            "accountsChanged",
            serde_json::json!(["0xBA5BA3955463ADcc7aa3E33bbdfb8A68e0933dD8"]),
        )
        .await?;

    let notification = wait_for(&mut established.wallet_events, |event| match event {
        ClientEvent::SessionNotification { notification, .. } => Some(notification.clone()),
        _ => None,
    })
    .await;
    assert_eq!(notification.notification_type, "accountsChanged");

    assert!(matches!(
        established
            .dapp
            .notify(
                &established.session_topic,
                "chainChanged",
                serde_json::json!(1),
            )
            .await,
        Err(ClientError::UnauthorizedNotificationType(_))
    ));

    Ok(())
}

#[tokio::test]
async fn only_the_controller_may_update_or_upgrade() -> Result<()> {
    let relay = MemoryRelay::default();
    let mut established = establish(&relay, &["eth_sign"]).await?;

    let next_state = SessionState {
        accounts: ["eip155:1:0x1456225dE90927193F7A171E64a600416f96f2C8".to_owned()].into(),
    };

    // The dapp proposed the session, so it holds the controller role.
    established
        .dapp
        .update(&established.session_topic, next_state.clone())
        .await?;

    let updated = wait_for(&mut established.wallet_events, |event| match event {
        ClientEvent::SessionUpdated { session } => Some(session.clone()),
        _ => None,
    })
    .await;
    assert_eq!(updated.state, next_state);

    assert!(matches!(
        established
            .wallet
            .update(&established.session_topic, accounts())
            .await,
        Err(ClientError::UnauthorizedUpdate)
    ));

    let widened = permissions(&["eth_sign", "personal_sign"]);
    established
        .dapp
        .upgrade(&established.session_topic, widened)
        .await?;

    let upgraded = wait_for(&mut established.wallet_events, |event| match event {
        ClientEvent::SessionUpdated { session } => Some(session.clone()),
        _ => None,
    })
    .await;
    assert!(upgraded.permissions.jsonrpc.allows("personal_sign"));

    Ok(())
}

#[tokio::test]
async fn disconnect_is_idempotent() -> Result<()> {
    let relay = MemoryRelay::default();
    let mut established = establish(&relay, &["eth_sign"]).await?;

    established
        .dapp
        .disconnect(&established.session_topic, None)
        .await?;

    let reason = wait_for(&mut established.wallet_events, |event| match event {
        ClientEvent::SessionDeleted { reason, .. } => Some(reason.clone()),
        _ => None,
    })
    .await;
    assert_eq!(reason.message, "User disconnected");

    let deleted = wait_for(&mut established.dapp_events, |event| match event {
        ClientEvent::SessionDeleted { topic, .. } => Some(topic.clone()),
        _ => None,
    })
    .await;
    assert_eq!(deleted, established.session_topic);

    // Applying the delete a second time changes nothing and returns cleanly.
    established
        .dapp
        .disconnect(&established.session_topic, None)
        .await?;

    assert!(matches!(
        established.dapp.get_session(&established.session_topic),
        Err(ClientError::NoMatchingTopic(_))
    ));

    Ok(())
}

#[tokio::test]
async fn ping_reaches_sessions_and_pairings() -> Result<()> {
    let relay = MemoryRelay::default();
    let established = establish(&relay, &["eth_sign"]).await?;

    established.dapp.ping(&established.session_topic).await?;
    established.dapp.ping(&established.pairing_topic).await?;

    assert!(matches!(
        established.dapp.ping(&Topic::generate()).await,
        Err(ClientError::NoMatchingTopic(_))
    ));

    Ok(())
}

#[tokio::test]
async fn connect_reuses_an_existing_pairing() -> Result<()> {
    let relay = MemoryRelay::default();
    let established = establish(&relay, &["eth_sign"]).await?;

    let connect = {
        let dapp = Arc::clone(&established.dapp);
        let pairing_topic = established.pairing_topic.clone();
        tokio::spawn(async move {
            dapp.connect(ConnectParams {
                pairing_topic: Some(pairing_topic),
                permissions: permissions(&["personal_sign"]),
            })
            .await
        })
    };

    let mut wallet_events = established.wallet_events;
    let proposal = wait_for(&mut wallet_events, |event| match event {
        ClientEvent::SessionProposed { proposal } => Some(proposal.clone()),
        _ => None,
    })
    .await;
    // Notification types supplied by the caller survive into the proposal.
    assert!(proposal.permissions.notifications.allows("accountsChanged"));

    let second = established.wallet.approve(proposal, accounts()).await?;
    let dapp_session = connect.await??;

    assert_eq!(second.topic, dapp_session.topic);
    assert_ne!(second.topic, established.session_topic);

    // Connecting over an unknown pairing is an explicit error.
    assert!(matches!(
        established
            .dapp
            .connect(ConnectParams {
                pairing_topic: Some(Topic::generate()),
                permissions: permissions(&["eth_sign"]),
            })
            .await,
        Err(ClientError::NoMatchingTopic(_))
    ));

    Ok(())
}

#[tokio::test]
async fn malformed_inbound_requests_are_dropped() -> Result<()> {
    let relay = MemoryRelay::default();
    let dapp = new_client(&relay, "dapp").await?;
    let mut dapp_events = dapp.events();

    let _connect = {
        let dapp = Arc::clone(&dapp);
        tokio::spawn(async move {
            dapp.connect(ConnectParams {
                pairing_topic: None,
                permissions: permissions(&["eth_sign"]),
            })
            .await
        })
    };

    // The proposal topic carries plain JSON, so a hostile relay peer can
    // inject arbitrary payloads there.
    let topic = wait_for(&mut dapp_events, |event| match event {
        ClientEvent::PairingProposed { proposal, .. } => Some(proposal.topic.clone()),
        _ => None,
    })
    .await;

    let attacker = relay.endpoint();
    attacker.subscribe(topic.clone()).await?;
    let mut inbound = attacker.messages();

    // Message ID below the allowed range.
    attacker
        .publish(
            topic.clone(),
            Arc::from(r#"{"id":5,"jsonrpc":"2.0","method":"wc_pairingPing","params":{}}"#),
            30,
            false,
        )
        .await?;
    // Wrong JSON RPC version.
    attacker
        .publish(
            topic.clone(),
            Arc::from(
                r#"{"id":1675757972688031,"jsonrpc":"1.0","method":"wc_pairingPing","params":{}}"#,
            ),
            30,
            false,
        )
        .await?;
    // Well-formed request: answered (with an error, nothing settled here).
    attacker
        .publish(
            topic.clone(),
            Arc::from(
                r#"{"id":1675757972688032,"jsonrpc":"2.0","method":"wc_pairingPing","params":{}}"#,
            ),
            30,
            false,
        )
        .await?;

    // The first thing the attacker hears back answers the well-formed
    // request; the malformed ones were dropped without a response.
    let message = tokio::time::timeout(Duration::from_secs(5), inbound.recv())
        .await
        .expect("timed out waiting for a response")
        .expect("relay closed");

    let payload: Payload = serde_json::from_str(&message.message)?;
    match payload {
        Payload::Response(response) => {
            assert_eq!(response.id, MessageId::new(1675757972688032));
            assert!(matches!(response.params, ResponseParams::Err(_)));
        }
        Payload::Request(request) => panic!("unexpected request: {request:?}"),
    }

    Ok(())
}

#[tokio::test]
async fn empty_method_permissions_cannot_propose() -> Result<()> {
    let relay = MemoryRelay::default();
    let established = establish(&relay, &["eth_sign"]).await?;

    let result = established
        .dapp
        .connect(ConnectParams {
            pairing_topic: Some(established.pairing_topic.clone()),
            permissions: SessionPermissions {
                blockchain: BlockchainPermissions {
                    chains: ["eip155:1".to_owned()].into(),
                },
                ..Default::default()
            },
        })
        .await;

    assert!(matches!(result, Err(ClientError::Permissions(_))));

    Ok(())
}
