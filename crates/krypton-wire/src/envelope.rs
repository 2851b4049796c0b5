//! Envelope codec.
//!
//! Every message is a self-contained UTF-8 JSON object:
//!
//! - request: `{"jsonrpc":"2.0","id":<u16>,"method":<string>,"params":[...]}`
//! - response: `{"jsonrpc":"2.0","id":<u16>,"result":<any>}`
//!
//! There is no error object; a failed call is answered with `"result": null`.
//! Message boundaries come from the stream (see [`crate::transport`]).

use crate::error::DecodeError;
use serde::Serialize;
use serde_json::{Map, Value};

/// Value of the `jsonrpc` field.
pub const JSONRPC_VERSION: &str = "2.0";

/// One protocol message.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Correlates a response with its request.
    pub id: u16,
    /// Request or response payload.
    pub body: EnvelopeBody,
}

/// Exactly one of `method` or `result` is carried by an envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum EnvelopeBody {
    Request { method: String, params: Vec<Value> },
    Response { result: Value },
}

impl Envelope {
    /// Build a request envelope.
    pub fn request(id: u16, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            id,
            body: EnvelopeBody::Request {
                method: method.into(),
                params,
            },
        }
    }

    /// Build a response envelope.
    pub fn response(id: u16, result: Value) -> Self {
        Self {
            id,
            body: EnvelopeBody::Response { result },
        }
    }

    /// The method name, for requests.
    pub fn method(&self) -> Option<&str> {
        match &self.body {
            EnvelopeBody::Request { method, .. } => Some(method.as_str()),
            EnvelopeBody::Response { .. } => None,
        }
    }

    pub fn is_response(&self) -> bool {
        matches!(self.body, EnvelopeBody::Response { .. })
    }
}

#[derive(Serialize)]
struct WireEnvelope<'a> {
    jsonrpc: &'static str,
    id: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    method: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<&'a [Value]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a Value>,
}

/// Encode an envelope to its JSON bytes.
pub fn encode(envelope: &Envelope) -> Result<Vec<u8>, serde_json::Error> {
    let wire = match &envelope.body {
        EnvelopeBody::Request { method, params } => WireEnvelope {
            jsonrpc: JSONRPC_VERSION,
            id: envelope.id,
            method: Some(method.as_str()),
            params: Some(params.as_slice()),
            result: None,
        },
        EnvelopeBody::Response { result } => WireEnvelope {
            jsonrpc: JSONRPC_VERSION,
            id: envelope.id,
            method: None,
            params: None,
            result: Some(result),
        },
    };
    serde_json::to_vec(&wire)
}

/// Decode one complete message.
///
/// `result: null` is a valid response and is kept distinct from a missing
/// `result`. A message carrying both `method` and `result` is a request.
pub fn decode(bytes: &[u8]) -> Result<Envelope, DecodeError> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| DecodeError::malformed(format!("invalid JSON: {e}")))?;
    let Value::Object(mut object) = value else {
        return Err(DecodeError::malformed("expected a JSON object"));
    };

    if let Some(version) = object.get("jsonrpc") {
        if version.as_str() != Some(JSONRPC_VERSION) {
            return Err(DecodeError::malformed(format!(
                "unsupported jsonrpc version {version}"
            )));
        }
    }

    let id = decode_id(&object)?;

    if let Some(method) = object.remove("method") {
        let Value::String(method) = method else {
            return Err(DecodeError::malformed("method must be a string"));
        };
        let params = match object.remove("params") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(params)) => params,
            Some(_) => return Err(DecodeError::malformed("params must be an array")),
        };
        return Ok(Envelope::request(id, method, params));
    }

    match object.remove("result") {
        Some(result) => Ok(Envelope::response(id, result)),
        None => Err(DecodeError::malformed("envelope has neither method nor result")),
    }
}

fn decode_id(object: &Map<String, Value>) -> Result<u16, DecodeError> {
    let raw = object
        .get("id")
        .ok_or_else(|| DecodeError::malformed("missing id"))?;
    let id = raw
        .as_u64()
        .ok_or_else(|| DecodeError::malformed(format!("id must be an unsigned integer, got {raw}")))?;
    u16::try_from(id).map_err(|_| DecodeError::malformed(format!("id {id} out of range")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_shape() {
        let env = Envelope::request(1, "kr_connected", vec![json!({"name": "A"})]);
        let bytes = encode(&env).unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            value,
            json!({"jsonrpc": "2.0", "id": 1, "method": "kr_connected", "params": [{"name": "A"}]})
        );
    }

    #[test]
    fn test_null_result_is_kept() {
        let env = Envelope::response(9, Value::Null);
        let bytes = encode(&env).unwrap();
        assert_eq!(
            std::str::from_utf8(&bytes).unwrap(),
            r#"{"jsonrpc":"2.0","id":9,"result":null}"#
        );
        assert_eq!(decode(&bytes).unwrap(), env);
    }

    #[test]
    fn test_roundtrip_request_and_response() {
        let request = Envelope::request(
            65_535,
            "kr_sign",
            vec![json!("0xabc"), json!("hello"), json!({"nested": [1, 2, 3]})],
        );
        assert_eq!(decode(&encode(&request).unwrap()).unwrap(), request);

        let response = Envelope::response(3, json!({"1": ["0xabc"]}));
        assert_eq!(decode(&encode(&response).unwrap()).unwrap(), response);
    }

    #[test]
    fn test_decode_not_json() {
        assert!(matches!(
            decode(b"{not json"),
            Err(DecodeError::Malformed { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_missing_or_bad_id() {
        for raw in [
            r#"{"jsonrpc":"2.0","result":1}"#,
            r#"{"jsonrpc":"2.0","id":"3","result":1}"#,
            r#"{"jsonrpc":"2.0","id":-1,"result":1}"#,
            r#"{"jsonrpc":"2.0","id":70000,"result":1}"#,
            r#"[1,2,3]"#,
        ] {
            assert!(decode(raw.as_bytes()).is_err(), "accepted {raw}");
        }
    }

    #[test]
    fn test_decode_rejects_wrong_version_and_empty_body() {
        assert!(decode(br#"{"jsonrpc":"1.0","id":3,"result":1}"#).is_err());
        assert!(decode(br#"{"jsonrpc":"2.0","id":3}"#).is_err());
        assert!(decode(br#"{"id":3,"method":"m","params":{"a":1}}"#).is_err());
    }

    #[test]
    fn test_decode_lenient_inputs() {
        // jsonrpc may be omitted and params may be missing.
        let env = decode(br#"{"id":4,"method":"kr_identities"}"#).unwrap();
        assert_eq!(env, Envelope::request(4, "kr_identities", vec![]));

        // method wins over result.
        let env = decode(br#"{"id":5,"method":"m","params":[],"result":1}"#).unwrap();
        assert_eq!(env.method(), Some("m"));
        assert!(!env.is_response());
    }

    /// JSON values without floats, which may not survive a text round trip.
    fn json_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::from),
            ".*".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 32, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{0,6}", inner, 0..4)
                    .prop_map(|entries| Value::Object(entries.into_iter().collect())),
            ]
        })
    }

    fn any_envelope() -> impl Strategy<Value = Envelope> {
        prop_oneof![
            (any::<u16>(), ".*", prop::collection::vec(json_value(), 0..4))
                .prop_map(|(id, method, params)| Envelope::request(id, method, params)),
            (any::<u16>(), json_value()).prop_map(|(id, result)| Envelope::response(id, result)),
        ]
    }

    proptest! {
        #[test]
        fn test_any_envelope_survives_encoding(envelope in any_envelope()) {
            let bytes = encode(&envelope).unwrap();
            prop_assert_eq!(decode(&bytes).unwrap(), envelope);
        }
    }
}
