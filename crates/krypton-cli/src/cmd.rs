//! Command implementations.

use anyhow::Context;
use krypton_types::{ChainId, ConnectionConfig, DappIdentity, WalletIdentity};
use krypton_wire::methods::{IdentitiesResponse, KrIdentities, KrSign};
use krypton_wire::{
    DappConnection, DappOptions, FramedStream, HandlerError, KrMethod, MethodRegistry,
    RequestOptions, WalletConnection, WalletOptions, WireError,
};
use serde_json::Value;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")
}

/// Settings for `krypton wallet`.
pub struct WalletArgs {
    pub listen: SocketAddr,
    pub name: String,
    pub chains: Vec<ChainId>,
    pub account: String,
}

/// Settings for `krypton call`.
pub struct CallArgs {
    pub connect: SocketAddr,
    pub method: String,
    pub params: String,
    pub name: String,
    pub chains: Vec<ChainId>,
    pub timeout_ms: Option<u64>,
}

pub fn cmd_wallet(config: ConnectionConfig, args: WalletArgs) -> anyhow::Result<()> {
    runtime()?.block_on(run_wallet(config, args))
}

pub fn cmd_call(config: ConnectionConfig, args: CallArgs) -> anyhow::Result<()> {
    let result = runtime()?.block_on(run_call(config, args))?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn wallet_identity(args: &WalletArgs) -> WalletIdentity {
    args.chains
        .iter()
        .fold(WalletIdentity::new(&args.name), |identity, chain| {
            identity.with_chain(*chain, [KrIdentities::NAME, KrSign::NAME])
        })
}

/// Demo handlers. `kr_sign` produces a hex echo of the message, not a real
/// signature; no key material is involved.
pub fn demo_registry(account: &str, chains: &[ChainId]) -> anyhow::Result<MethodRegistry> {
    let identities: IdentitiesResponse = chains
        .iter()
        .map(|chain| (*chain, vec![account.to_string()]))
        .collect();
    let account = account.to_string();

    let mut registry = MethodRegistry::new();
    registry
        .register_method::<KrIdentities, _, _>(move |(_refresh,)| {
            let identities = identities.clone();
            async move { Ok::<_, HandlerError>(identities) }
        })?
        .register_method::<KrSign, _, _>(move |(signer, message)| {
            let account = account.clone();
            async move {
                if !signer.eq_ignore_ascii_case(&account) {
                    return Err(HandlerError::new(format!("unknown account {signer}")));
                }
                Ok(format!("0x{}", hex::encode(message)))
            }
        })?;
    Ok(registry)
}

async fn run_wallet(config: ConnectionConfig, args: WalletArgs) -> anyhow::Result<()> {
    let listener = TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("Failed to listen on {}", args.listen))?;
    let identity = wallet_identity(&args);
    info!(
        listen = %args.listen,
        wallet = %identity.name,
        protocol = %config.protocol_id,
        "Wallet listening"
    );

    loop {
        let (stream, peer) = listener.accept().await.context("Accept failed")?;
        let registry = demo_registry(&args.account, &args.chains)?;
        let identity = identity.clone();
        let config = config.clone();

        tokio::spawn(async move {
            let stream = FramedStream::new(stream).with_max_message_size(config.max_message_size);
            let options = WalletOptions::new().with_config(config);
            let wallet = WalletConnection::serve(identity, stream, registry, options);
            match wallet.connected().await {
                Some(dapp) => info!(%peer, dapp = %dapp.name, "Serving dapp"),
                None => warn!(%peer, "Connection closed before handshake"),
            }
            wallet.closed().await;
            info!(%peer, "Dapp disconnected");
        });
    }
}

async fn run_call(config: ConnectionConfig, args: CallArgs) -> anyhow::Result<Value> {
    let params = parse_params(&args.params)?;
    let identity = args
        .chains
        .iter()
        .fold(DappIdentity::new(&args.name), |identity, chain| {
            identity.with_chain(*chain, [args.method.as_str()])
        });

    let connect = args.connect;
    let max_message_size = config.max_message_size;
    let handshake_timeout = config.default_timeout();
    let dapp = DappConnection::connect_with(
        identity,
        move || async move {
            let stream = TcpStream::connect(connect).await?;
            Ok::<_, WireError>(FramedStream::new(stream).with_max_message_size(max_message_size))
        },
        DappOptions::new().with_config(config),
    )
    .await
    .with_context(|| format!("Failed to connect to {connect}"))?;

    let wallet = tokio::time::timeout(handshake_timeout, dapp.connected())
        .await
        .context("Handshake timed out")?
        .context("Wallet closed the connection during the handshake")?;
    info!(wallet = %wallet.name, "Connected");

    let options = args
        .timeout_ms
        .map(RequestOptions::with_timeout_ms)
        .unwrap_or_default();
    let result = dapp.call(&args.method, params, options).await;
    dapp.close().await;
    Ok(result?)
}

/// Parse the PARAMS argument. Arrays are positional params; any other value
/// becomes a single param.
fn parse_params(raw: &str) -> anyhow::Result<Vec<Value>> {
    let value: Value = serde_json::from_str(raw).context("PARAMS must be valid JSON")?;
    Ok(match value {
        Value::Array(params) => params,
        other => vec![other],
    })
}
