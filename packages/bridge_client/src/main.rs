use anyhow::Result;
use bridge_client::{BridgeClient, ContentStore};
use clap::Parser;
use host_bridge::Dispatcher;
use host_bridge::content::Entity;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "bridge-client")]
#[command(about = "Stand-in embedded client serving an in-memory content store")]
struct Args {
    /// WebSocket endpoint of the bridge backend
    #[arg(long, env = "BRIDGE_CLIENT_URL", default_value = "ws://127.0.0.1:30000/ws")]
    url: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_directive = if args.debug {
        "bridge_client=debug,host_bridge=debug,info"
    } else {
        "bridge_client=info,host_bridge=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    let store = ContentStore::new();
    seed(&store).await;

    let mut dispatcher = Dispatcher::new();
    store.install(&mut dispatcher);
    let client = BridgeClient::new(args.url, dispatcher);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to install Ctrl+C handler: {}", e);
                return;
            }
            info!("Received shutdown signal");
            cancel.cancel();
        });
    }

    client.run(cancel).await;
    Ok(())
}

async fn seed(store: &ContentStore) {
    let entities = [
        ("Item", "Longsword", Some("srd-items"), json!({"damage": "1d8"})),
        ("Item", "Shortsword", Some("srd-items"), json!({"damage": "1d6"})),
        ("Item", "Potion of Healing", Some("srd-items"), json!({"heals": "2d4+2"})),
        ("Actor", "Goblin", Some("srd-monsters"), json!({"hp": 7})),
        ("Scene", "Cragmaw Hideout", None, json!({})),
    ];
    for (i, (entity_type, name, pack, data)) in entities.into_iter().enumerate() {
        store
            .insert(Entity {
                id: format!("seed{i}"),
                entity_type: entity_type.into(),
                name: name.into(),
                pack: pack.map(Into::into),
                data,
                items: Vec::new(),
            })
            .await;
    }
    for path in [
        "maps/cragmaw.webp",
        "maps/tokens/goblin.png",
        "handouts/letter.pdf",
    ] {
        store.add_file(path).await;
    }
    info!("seeded in-memory content store");
}
