// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

use clap::Parser;
use meshrpc::client::failure::EvictFailedServer;
use meshrpc::proxy::{ServiceDescriptor, ServiceSpec, StaticLoader};
use meshrpc::route::RouterType;
use meshrpc::{AppContext, ClientOptions, Outcome, RpcClient, ServerInfo, Value};
use service::{init_tracing, LocalCluster};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::Instrument;

#[derive(Parser)]
struct Flags {
    /// Routing strategy: round-robin, weighted-round-robin, least-active, consistent-hash or random.
    #[clap(long, default_value = "round-robin")]
    router_type: RouterType,
    /// Number of chat servers in the cluster.
    #[clap(long, default_value_t = 3)]
    servers: u16,
    /// Number of routed calls to make.
    #[clap(long, default_value_t = 6)]
    calls: i64,
    /// Enable per-call tracing.
    #[clap(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let flags = Flags::parse();
    init_tracing("Meshrpc Example Client")?;

    let loader = StaticLoader::new().with_services(
        "app/servers/chat/remote",
        vec![ServiceSpec::new("chatRemote").with_methods(["send", "kick"])],
    );
    let servers = (1..=flags.servers)
        .map(|i| Arc::new(ServerInfo::new(format!("chat-{i}"), "chat", "127.0.0.1", 3150 + i).with_weight(u32::from(i))))
        .collect();
    let options = ClientOptions::new()
        .with_context(AppContext::new("connector-1", "connector"))
        .with_router_type(flags.router_type)
        .with_debug(flags.debug)
        .with_loader(loader)
        .with_servers(servers)
        .with_failure_handler(EvictFailedServer);

    let client = RpcClient::new(LocalCluster::new(), options);
    client.add_proxy(&ServiceDescriptor::new("user", "chat", "app/servers/chat/remote"));
    client.start().await?;

    let chat = client
        .proxy("user", "chat", "chatRemote")
        .ok_or_else(|| anyhow::anyhow!("chatRemote proxy is not registered"))?;
    let send = chat.method("send").ok_or_else(|| anyhow::anyhow!("chatRemote.send is not registered"))?;
    let kick = chat.to_server("kick").ok_or_else(|| anyhow::anyhow!("chatRemote.kick is not registered"))?;

    async {
        for uid in 0..flags.calls {
            match send.call(vec![Value::Int(uid), Value::from("hello")]).await? {
                Outcome::Unicast(reply) => tracing::info!("uid {uid} -> {reply:?}"),
                Outcome::Broadcast(replies) => tracing::info!("uid {uid} -> {} replies", replies.len()),
            }
        }
        anyhow::Ok(())
    }
    .instrument(tracing::info_span!("routed calls", router_type = %flags.router_type))
    .await?;

    if let Outcome::Broadcast(replies) = kick.call(vec![Value::from("*"), Value::from("uid-0")]).await? {
        for (server_id, reply) in replies {
            tracing::info!("broadcast reached {server_id}: {reply:?}");
        }
    }

    // Losing a server evicts it from routing once the failure handler runs.
    client.transport().crash("chat-1");
    sleep(Duration::from_millis(10)).await;
    for uid in 0..flags.calls {
        if let Outcome::Unicast(reply) = send.call(vec![Value::Int(uid), Value::from("again")]).await? {
            tracing::info!("after crash, uid {uid} -> {reply:?}");
        }
    }

    client.stop(false).await;
    Ok(())
}
