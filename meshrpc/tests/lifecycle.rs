// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

mod common;

use assert_matches::assert_matches;
use common::*;
use meshrpc::{ClientOptions, ClientState, RpcClient, RpcError, RpcMessage, TransportErrorKind, Value};

fn message() -> RpcMessage {
    RpcMessage::new("user".into(), "chat".into(), "chatRemote".into(), "send".into(), vec![Value::from("hi")])
}

#[tokio::test]
async fn test_calls_before_start_fail() -> anyhow::Result<()> {
    let client = client(ClientOptions::new());
    client.add_server(server("chat-1", "chat"));

    let send = client.proxy("user", "chat", "chatRemote").and_then(|p| p.method("send")).unwrap();
    assert_matches!(send.call(vec!["uid-1".into(), "hi".into()]).await, Err(RpcError::NotStarted));
    assert_matches!(client.rpc_invoke("chat-1", message()).await, Err(RpcError::NotStarted));
    assert_eq!(client.transport().dispatches(), 0);
    Ok(())
}

#[tokio::test]
async fn test_second_start_is_rejected() -> anyhow::Result<()> {
    let client = client(ClientOptions::new());
    client.start().await?;
    assert_eq!(client.state(), ClientState::Started);

    assert_matches!(client.start().await, Err(RpcError::AlreadyStarted));
    assert_eq!(client.transport().starts(), 1);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_starts_start_transport_once() -> anyhow::Result<()> {
    let client = client(ClientOptions::new());
    let (a, b) = futures::join!(client.start(), client.start());
    assert!(a.is_ok() ^ b.is_ok());
    assert_eq!(client.transport().starts(), 1);
    Ok(())
}

#[tokio::test]
async fn test_failed_start_stays_inited() -> anyhow::Result<()> {
    let client = RpcClient::new(MockTransport::refusing_start(), ClientOptions::new());
    let err = client.start().await.unwrap_err();
    assert_matches!(err, RpcError::Transport(e) if e.kind == TransportErrorKind::Connect);
    assert_eq!(client.state(), ClientState::Inited);
    Ok(())
}

#[tokio::test]
async fn test_stop_closes_for_good() -> anyhow::Result<()> {
    let client = started(ClientOptions::new(), vec![server("chat-1", "chat")]).await;
    client.rpc_invoke("chat-1", message()).await?;

    client.stop(false).await;
    assert_eq!(client.state(), ClientState::Closed);
    assert_eq!(client.transport().stops(), 1);

    assert_matches!(client.rpc_invoke("chat-1", message()).await, Err(RpcError::NotStarted));
    assert_matches!(client.start().await, Err(RpcError::AlreadyStarted));
    assert_eq!(client.transport().dispatches(), 1);

    client.stop(true).await;
    assert_eq!(client.transport().stops(), 1);
    Ok(())
}

#[tokio::test]
async fn test_stop_before_start_is_noop() -> anyhow::Result<()> {
    let client = client(ClientOptions::new());
    client.stop(false).await;
    assert_eq!(client.state(), ClientState::Inited);
    assert_eq!(client.transport().stops(), 0);
    client.start().await?;
    Ok(())
}

#[tokio::test]
async fn test_server_mutations_reach_transport_in_any_state() -> anyhow::Result<()> {
    let client = client(ClientOptions::new());
    client.add_servers(vec![server("chat-1", "chat"), server("chat-2", "chat")]);
    assert!(client.transport().knows("chat-2"));

    client.remove_servers(&["chat-2".into()]);
    assert!(!client.transport().knows("chat-2"));
    assert!(client.servers().get("chat-2").is_none());

    client.start().await?;
    client.replace_servers(vec![server("area-1", "area")]);
    assert!(!client.transport().knows("chat-1"));
    assert!(client.transport().knows("area-1"));
    assert!(client.servers().servers("chat").is_empty());
    Ok(())
}

#[tokio::test]
async fn test_debug_traces_direct_invokes() -> anyhow::Result<()> {
    let client = started(ClientOptions::new().with_debug(true), vec![server("chat-1", "chat")]).await;
    let reply = client.rpc_invoke("chat-1", message()).await?;
    assert_eq!(served_by(&reply), "chat-1");
    assert_eq!(client.transport().traced(), 1);

    let quiet = started(ClientOptions::new(), vec![server("chat-1", "chat")]).await;
    quiet.rpc_invoke("chat-1", message()).await?;
    assert_eq!(quiet.transport().traced(), 0);
    Ok(())
}
