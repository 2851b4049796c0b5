//! Dapp and wallet identities.
//!
//! Identities are immutable once sent. The JSON field names follow the wire
//! format used by existing dapps and wallets (`image_uri`, `requestedChains`,
//! `requiredChains`, `supportedChains`).

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Numeric chain identifier (EVM chain id, etc.).
pub type ChainId = u64;

/// Name of a remote method, e.g. `"kr_sign"`.
pub type MethodName = String;

/// Methods available per chain. Serialized as a JSON object keyed by the
/// decimal chain id.
pub type ChainMethods = BTreeMap<ChainId, BTreeSet<MethodName>>;

/// Identity presented by the connection-initiating dapp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DappIdentity {
    /// Display name of the dapp.
    pub name: String,
    /// Origin of the dapp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    /// Logo of the dapp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_uri: Option<String>,
    /// Chains the dapp is interested in, with the methods it wants on each.
    #[serde(rename = "requestedChains", default)]
    pub requested_chains: ChainMethods,
    /// Chains a wallet must support for the connection to be useful.
    #[serde(
        rename = "requiredChains",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub required_chains: Option<BTreeSet<ChainId>>,
}

impl DappIdentity {
    /// Create an identity with no chains requested.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uri: None,
            image_uri: None,
            requested_chains: ChainMethods::new(),
            required_chains: None,
        }
    }

    /// Set the dapp origin.
    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    /// Set the dapp logo.
    pub fn with_image_uri(mut self, image_uri: impl Into<String>) -> Self {
        self.image_uri = Some(image_uri.into());
        self
    }

    /// Request a set of methods on a chain.
    pub fn with_chain<I, S>(mut self, chain: ChainId, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<MethodName>,
    {
        self.requested_chains
            .entry(chain)
            .or_default()
            .extend(methods.into_iter().map(Into::into));
        self
    }

    /// Mark a chain as required.
    pub fn require_chain(mut self, chain: ChainId) -> Self {
        self.required_chains.get_or_insert_with(BTreeSet::new).insert(chain);
        self
    }
}

/// Identity returned by the wallet in reply to the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletIdentity {
    /// Display name of the wallet.
    pub name: String,
    /// Logo of the wallet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_uri: Option<String>,
    /// Chains and methods the wallet can serve.
    #[serde(rename = "supportedChains", default)]
    pub supported_chains: ChainMethods,
}

impl WalletIdentity {
    /// Create an identity with no supported chains.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image_uri: None,
            supported_chains: ChainMethods::new(),
        }
    }

    /// Set the wallet logo.
    pub fn with_image_uri(mut self, image_uri: impl Into<String>) -> Self {
        self.image_uri = Some(image_uri.into());
        self
    }

    /// Advertise a set of methods on a chain.
    pub fn with_chain<I, S>(mut self, chain: ChainId, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<MethodName>,
    {
        self.supported_chains
            .entry(chain)
            .or_default()
            .extend(methods.into_iter().map(Into::into));
        self
    }

    /// Whether the wallet advertises `method` on `chain`.
    pub fn supports(&self, chain: ChainId, method: &str) -> bool {
        self.supported_chains
            .get(&chain)
            .is_some_and(|methods| methods.contains(method))
    }
}
