//! Envelope construction and (de)serialization.
//!
//! Decoding never panics and never returns an opaque error: malformed input
//! becomes a [`ParseFailure`] so the caller can pick a recovery policy.

use serde_json::{Map, Value};

use super::types::{
    Envelope, ErrorCode, ErrorResponse, Notification, ParseFailure, Request, RequestId, RpcError,
    SuccessResponse, JSONRPC_VERSION,
};

// ─── Construction ────────────────────────────────────────────────────────────

/// Build a request, or a notification when `id` is `None`.
pub fn make_request(method: &str, params: Option<Value>, id: Option<RequestId>) -> Envelope {
    match id {
        Some(id) => Envelope::Request(Request {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.to_string(),
            params,
            id,
        }),
        None => Envelope::Notification(Notification {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.to_string(),
            params,
        }),
    }
}

pub fn make_success(result: Value, id: RequestId) -> Envelope {
    Envelope::Success(SuccessResponse {
        jsonrpc: JSONRPC_VERSION.to_string(),
        result,
        id,
    })
}

pub fn make_error(
    code: ErrorCode,
    message: &str,
    id: Option<RequestId>,
    data: Option<Value>,
) -> Envelope {
    Envelope::Error(ErrorResponse {
        jsonrpc: JSONRPC_VERSION.to_string(),
        error: RpcError {
            code: code.code(),
            message: message.to_string(),
            data,
        },
        id,
    })
}

// ─── Wire Format ─────────────────────────────────────────────────────────────

pub fn serialize(envelope: &Envelope) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(envelope)
}

pub fn deserialize(bytes: &[u8]) -> Result<Envelope, ParseFailure> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| ParseFailure::invalid_json(e.to_string()))?;
    from_value(value)
}

/// Classify an already-parsed JSON value as an envelope.
pub fn from_value(value: Value) -> Result<Envelope, ParseFailure> {
    let Value::Object(obj) = value else {
        let what = if value.is_array() {
            "batch messages are not supported"
        } else {
            "envelope must be a JSON object"
        };
        return Err(ParseFailure::invalid_envelope(what, None));
    };

    let id = read_id(&obj)?;

    match obj.get("jsonrpc").and_then(Value::as_str) {
        Some(JSONRPC_VERSION) => {}
        _ => {
            return Err(ParseFailure::invalid_envelope(
                "missing or unsupported \"jsonrpc\" version",
                id,
            ))
        }
    }

    if let Some(method) = obj.get("method") {
        let Some(method) = method.as_str() else {
            return Err(ParseFailure::invalid_envelope("\"method\" must be a string", id));
        };
        let params = obj.get("params").cloned();
        if let Some(p) = &params {
            if !(p.is_object() || p.is_array() || p.is_null()) {
                return Err(ParseFailure::invalid_envelope(
                    "\"params\" must be an object or array",
                    id,
                ));
            }
        }
        return Ok(make_request(method, params.filter(|p| !p.is_null()), id));
    }

    if let Some(error) = obj.get("error").filter(|e| !e.is_null()) {
        let error: RpcError = serde_json::from_value(error.clone()).map_err(|e| {
            ParseFailure::invalid_envelope(format!("malformed \"error\" member: {e}"), id.clone())
        })?;
        return Ok(Envelope::Error(ErrorResponse {
            jsonrpc: JSONRPC_VERSION.to_string(),
            error,
            id,
        }));
    }

    if let Some(result) = obj.get("result") {
        let Some(id) = id else {
            return Err(ParseFailure::invalid_envelope("success response without \"id\"", None));
        };
        return Ok(make_success(result.clone(), id));
    }

    Err(ParseFailure::invalid_envelope(
        "envelope has none of \"method\", \"result\" or \"error\"",
        id,
    ))
}

/// `null` and absent ids both read as `None`; any other non-id value is invalid.
fn read_id(obj: &Map<String, Value>) -> Result<Option<RequestId>, ParseFailure> {
    match obj.get("id") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .map(|n| Some(RequestId::Number(n)))
            .ok_or_else(|| ParseFailure::invalid_envelope("\"id\" must be an integer", None)),
        Some(Value::String(s)) => Ok(Some(RequestId::String(s.clone()))),
        Some(_) => Err(ParseFailure::invalid_envelope(
            "\"id\" must be a number or string",
            None,
        )),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::types::ParseFailureKind;
    use serde_json::json;

    #[test]
    fn test_request_omits_absent_params() {
        let env = make_request("tools/list", None, Some(RequestId::Number(1)));
        let text = String::from_utf8(serialize(&env).unwrap()).unwrap();
        assert!(text.contains("\"jsonrpc\":\"2.0\""));
        assert!(text.contains("\"id\":1"));
        assert!(!text.contains("params"));
    }

    #[test]
    fn test_request_without_id_is_notification() {
        let env = make_request("notifications/initialized", None, None);
        assert!(matches!(env, Envelope::Notification(_)));
        let text = String::from_utf8(serialize(&env).unwrap()).unwrap();
        assert!(!text.contains("\"id\""));
    }

    #[test]
    fn test_error_envelope_keeps_null_id() {
        let env = make_error(ErrorCode::ParseError, "Parse error", None, None);
        let value: Value = serde_json::from_slice(&serialize(&env).unwrap()).unwrap();
        assert_eq!(value["id"], Value::Null);
        assert_eq!(value["error"]["code"], -32700);
        assert!(value["error"].get("data").is_none());
    }

    #[test]
    fn test_decodes_every_envelope_shape() {
        let req = deserialize(br#"{"jsonrpc":"2.0","method":"tools/call","params":{"name":"x"},"id":"a"}"#)
            .unwrap();
        assert_eq!(req.method(), Some("tools/call"));
        assert_eq!(req.id(), Some(&RequestId::String("a".into())));

        let note = deserialize(br#"{"jsonrpc":"2.0","method":"ping"}"#).unwrap();
        assert!(matches!(note, Envelope::Notification(_)));

        let ok = deserialize(br#"{"jsonrpc":"2.0","result":{"tools":[]},"id":4}"#).unwrap();
        match ok {
            Envelope::Success(s) => assert_eq!(s.result, json!({"tools": []})),
            other => panic!("expected success, got {other:?}"),
        }

        let err = deserialize(
            br#"{"jsonrpc":"2.0","error":{"code":-32601,"message":"Method not found"},"id":5}"#,
        )
        .unwrap();
        match err {
            Envelope::Error(e) => {
                assert_eq!(e.error.kind(), Some(ErrorCode::MethodNotFound));
                assert_eq!(e.id, Some(RequestId::Number(5)));
            }
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[test]
    fn test_null_result_is_still_success() {
        let env = deserialize(br#"{"jsonrpc":"2.0","result":null,"id":1}"#).unwrap();
        assert!(matches!(env, Envelope::Success(_)));
    }

    #[test]
    fn test_garbage_is_parse_failure_not_panic() {
        let failure = deserialize(b"{not json").unwrap_err();
        assert_eq!(failure.kind, ParseFailureKind::InvalidJson);
    }

    #[test]
    fn test_wrong_version_is_invalid_envelope_with_id() {
        let failure = deserialize(br#"{"jsonrpc":"1.0","method":"x","id":9}"#).unwrap_err();
        assert_eq!(failure.kind, ParseFailureKind::InvalidEnvelope);
        assert_eq!(failure.id, Some(RequestId::Number(9)));
    }

    #[test]
    fn test_batches_and_scalars_are_rejected() {
        assert_eq!(
            deserialize(b"[]").unwrap_err().kind,
            ParseFailureKind::InvalidEnvelope
        );
        assert_eq!(
            deserialize(b"42").unwrap_err().kind,
            ParseFailureKind::InvalidEnvelope
        );
    }

    #[test]
    fn test_success_without_id_is_rejected() {
        let failure = deserialize(br#"{"jsonrpc":"2.0","result":1}"#).unwrap_err();
        assert_eq!(failure.kind, ParseFailureKind::InvalidEnvelope);
    }

    #[test]
    fn test_round_trip_preserves_request() {
        let env = make_request(
            "resources/read",
            Some(json!({"uri": "file:///tmp/a.txt"})),
            Some(RequestId::Number(12)),
        );
        let decoded = deserialize(&serialize(&env).unwrap()).unwrap();
        assert_eq!(decoded, env);
    }
}
