//! Two clients connecting over the in-process relay: one plays the proposing
//! application, the other the approving wallet. Demonstrates the full
//! pair + connect flow, an application request round trip, and disconnect.
//!
//! Run with `RUST_LOG=client_core=debug` to watch the protocol decisions.

use {
    anyhow::Result,
    client_core::{
        client::{Client, ClientOptions, ConnectParams},
        event::ClientEvent,
        relay::memory::MemoryRelay,
    },
    client_rpc::rpc::{
        AppMetadata, BlockchainPermissions, JsonRpcPermissions, NotificationPermissions,
        SessionPermissions, SessionState,
    },
    std::sync::Arc,
    tracing_subscriber::EnvFilter,
};

fn metadata(name: &str, url: &str) -> AppMetadata {
    AppMetadata {
        description: format!("{name} example"),
        url: url.to_owned(),
        icons: vec![],
        name: name.to_owned(),
    }
}

fn permissions() -> SessionPermissions {
    SessionPermissions {
        blockchain: BlockchainPermissions {
            chains: ["eip155:1".to_owned()].into(),
        },
        jsonrpc: JsonRpcPermissions {
            methods: ["personal_sign".to_owned()].into(),
        },
        notifications: NotificationPermissions {
            types: ["accountsChanged".to_owned()].into(),
        },
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let relay = MemoryRelay::default();

    let dapp = Arc::new(
        Client::new(
            ClientOptions::new(Arc::new(relay.endpoint()))
                .with_metadata(metadata("Example dApp", "https://dapp.example.com")),
        )
        .await?,
    );
    let wallet = Arc::new(
        Client::new(
            ClientOptions::new(Arc::new(relay.endpoint()))
                .with_metadata(metadata("Example Wallet", "https://wallet.example.com")),
        )
        .await?,
    );

    let mut dapp_events = dapp.events();
    let mut wallet_events = wallet.events();

    // The wallet side: pair on the URI, approve the session proposal, sign
    // one request.
    let wallet_task = {
        let wallet = Arc::clone(&wallet);
        tokio::spawn(async move {
            loop {
                match wallet_events.recv().await? {
                    ClientEvent::SessionProposed { proposal } => {
                        println!(
                            "[wallet] session proposed by {:?}",
                            proposal.proposer.metadata.as_ref().map(|m| &m.name)
                        );
                        let state = SessionState {
                            accounts: ["eip155:1:0xBA5BA3955463ADcc7aa3E33bbdfb8A68e0933dD8"
                                .to_owned()]
                            .into(),
                        };
                        wallet.approve(proposal, state).await?;
                    }
                    ClientEvent::SessionPayload { topic, request, .. } => {
                        println!("[wallet] signing request {}", request.method);
                        wallet
                            .respond(&topic, request.id, Ok(serde_json::json!("0xdeadbeef")))
                            .await?;
                    }
                    ClientEvent::SessionDeleted { reason, .. } => {
                        println!("[wallet] session deleted: {}", reason.message);
                        return anyhow::Ok(());
                    }
                    event => println!("[wallet] {}", event.name()),
                }
            }
        })
    };

    let connect = {
        let dapp = Arc::clone(&dapp);
        tokio::spawn(async move {
            dapp.connect(ConnectParams {
                pairing_topic: None,
                permissions: permissions(),
            })
            .await
        })
    };

    // Ferry the URI out-of-band, as a QR code would.
    let uri = loop {
        if let ClientEvent::PairingProposed { uri, .. } = dapp_events.recv().await? {
            break uri;
        }
    };
    println!("[dapp] pairing URI: {uri}");
    wallet.pair(&uri).await?;

    let session = connect.await??;
    println!("[dapp] session settled: topic={}", session.topic);

    let signature = dapp
        .request(
            &session.topic,
            "personal_sign",
            serde_json::json!(["0x68656c6c6f", "0xBA5BA3955463ADcc7aa3E33bbdfb8A68e0933dD8"]),
            Some("eip155:1".to_owned()),
        )
        .await?;
    println!("[dapp] signature: {signature}");

    dapp.disconnect(&session.topic, None).await?;
    wallet_task.await??;

    Ok(())
}
