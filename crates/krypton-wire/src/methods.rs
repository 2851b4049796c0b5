//! Typed method table.
//!
//! Each method is a marker type naming the method and its argument and
//! return shapes, so the dapp's call sites are checked at compile time.
//! Arguments are tuples and serialize to the positional `params` array.

use krypton_types::{ChainId, DappIdentity, WalletIdentity};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Method carried by the reserved handshake request.
pub const HANDSHAKE_METHOD: &str = "kr_connected";

/// A remote method with typed arguments and result.
pub trait KrMethod: Send + Sync + 'static {
    const NAME: &'static str;
    type Args: Serialize + DeserializeOwned + Send + 'static;
    type Return: Serialize + DeserializeOwned + Send + 'static;
}

/// Handshake: the dapp's identity in, the wallet's identity out.
pub struct KrConnected;

impl KrMethod for KrConnected {
    const NAME: &'static str = HANDSHAKE_METHOD;
    type Args = (DappIdentity,);
    type Return = WalletIdentity;
}

/// Addresses the wallet exposes, per chain.
pub type IdentitiesResponse = BTreeMap<ChainId, Vec<String>>;

/// Ask the wallet for its identities. The boolean flag is passed through to
/// the wallet's handler unchanged.
pub struct KrIdentities;

impl KrMethod for KrIdentities {
    const NAME: &'static str = "kr_identities";
    type Args = (bool,);
    type Return = IdentitiesResponse;
}

/// Ask the wallet to sign a message: `(address, message) -> signature`.
pub struct KrSign;

impl KrMethod for KrSign {
    const NAME: &'static str = "kr_sign";
    type Args = (String, String);
    type Return = String;
}

/// Serialize typed arguments into positional params.
pub fn encode_args<M: KrMethod>(args: &M::Args) -> Result<Vec<Value>, serde_json::Error> {
    match serde_json::to_value(args)? {
        Value::Array(params) => Ok(params),
        Value::Null => Ok(Vec::new()),
        other => Ok(vec![other]),
    }
}

/// Deserialize positional params into typed arguments.
pub fn decode_args<M: KrMethod>(params: Vec<Value>) -> Result<M::Args, serde_json::Error> {
    serde_json::from_value(Value::Array(params))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sign_args_are_positional() {
        let params =
            encode_args::<KrSign>(&("0xabc".to_string(), "hello".to_string())).unwrap();
        assert_eq!(params, vec![json!("0xabc"), json!("hello")]);

        let (address, message) = decode_args::<KrSign>(params).unwrap();
        assert_eq!(address, "0xabc");
        assert_eq!(message, "hello");
    }

    #[test]
    fn test_single_arg_tuple() {
        let params = encode_args::<KrIdentities>(&(true,)).unwrap();
        assert_eq!(params, vec![json!(true)]);
        assert!(decode_args::<KrIdentities>(vec![json!("nope")]).is_err());
        assert!(decode_args::<KrIdentities>(vec![]).is_err());
    }

    #[test]
    fn test_identities_response_shape() {
        let value = json!({"1": ["0xabc"], "137": ["0xdef", "0x123"]});
        let parsed: IdentitiesResponse = serde_json::from_value(value).unwrap();
        assert_eq!(parsed[&137].len(), 2);
    }
}
