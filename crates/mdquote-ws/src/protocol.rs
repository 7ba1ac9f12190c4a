//! JSON wire messages of the WebSocket market-data API.
//!
//! Frames carry either one message object or an array of them. Outbound we
//! only ever send a login, non-streaming batch item requests and pongs.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use mdquote_core::{ItemState, Payload, SessionError};

/// WebSocket sub-protocol negotiated on connect.
pub const SUBPROTOCOL: &str = "tr_json2";

/// Stream id reserved for the login stream.
pub const LOGIN_STREAM_ID: i64 = 1;

// ─── Outbound ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct LoginRequest {
    #[serde(rename = "ID")]
    pub id: i64,
    pub domain: &'static str,
    pub key: LoginKey,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct LoginKey {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_type: Option<&'static str>,
    pub elements: LoginElements,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct LoginElements {
    pub application_id: String,
    pub position: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authentication_token: Option<String>,
}

impl LoginRequest {
    /// Login with a user name.
    pub fn user(name: &str, application_id: &str, position: &str) -> Self {
        Self {
            id: LOGIN_STREAM_ID,
            domain: "Login",
            key: LoginKey {
                name: Some(name.to_string()),
                name_type: None,
                elements: LoginElements {
                    application_id: application_id.to_string(),
                    position: position.to_string(),
                    authentication_token: None,
                },
            },
        }
    }

    /// Login with an OAuth2 access token.
    pub fn token(token: &str, application_id: &str, position: &str) -> Self {
        Self {
            id: LOGIN_STREAM_ID,
            domain: "Login",
            key: LoginKey {
                name: None,
                name_type: Some("AuthnToken"),
                elements: LoginElements {
                    application_id: application_id.to_string(),
                    position: position.to_string(),
                    authentication_token: Some(token.to_string()),
                },
            },
        }
    }
}

/// Non-streaming batch request: one snapshot per name.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ItemRequest {
    #[serde(rename = "ID")]
    pub id: i64,
    pub key: ItemRequestKey,
    pub streaming: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view: Option<Vec<i64>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ItemRequestKey {
    pub service: String,
    pub name: Vec<String>,
}

impl ItemRequest {
    pub fn batch(id: i64, service: &str, names: &[String], view: Option<&[i64]>) -> Self {
        Self {
            id,
            key: ItemRequestKey {
                service: service.to_string(),
                name: names.to_vec(),
            },
            streaming: false,
            view: view.map(<[i64]>::to_vec),
        }
    }
}

pub fn pong() -> Value {
    serde_json::json!({ "Type": "Pong" })
}

// ─── Inbound ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InboundMessage {
    #[serde(rename = "ID")]
    pub id: Option<i64>,
    #[serde(rename = "Type")]
    pub kind: Option<String>,
    pub domain: Option<String>,
    pub key: Option<InboundKey>,
    pub state: Option<WireState>,
    pub fields: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InboundKey {
    /// A plain string on item streams.
    pub name: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WireState {
    pub stream: Option<String>,
    pub data: Option<String>,
    pub code: Option<String>,
    pub text: Option<String>,
}

impl WireState {
    pub fn to_item_state(&self) -> ItemState {
        ItemState::new(
            self.data.clone().unwrap_or_default(),
            self.code.clone().unwrap_or_else(|| "None".into()),
            self.text.clone().unwrap_or_default(),
            self.stream.clone().unwrap_or_default(),
        )
    }

    fn is_open_ok(&self) -> bool {
        self.stream.as_deref() == Some("Open") && self.data.as_deref() == Some("Ok")
    }
}

/// Classified inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Ping,
    /// Answer on the login stream.
    Login { accepted: bool, state: ItemState },
    /// Data for one item stream.
    Refresh {
        id: i64,
        name: Option<String>,
        state: ItemState,
        payload: Payload,
    },
    /// State without data for one stream.
    Status {
        id: i64,
        name: Option<String>,
        state: ItemState,
    },
    /// Updates, acks, anything else we do not act on.
    Other,
}

/// Split a text frame into messages.
pub fn decode_frame(text: &str) -> Result<Vec<InboundMessage>, SessionError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| SessionError::Protocol(e.to_string()))?;
    let items = match value {
        Value::Array(items) => items,
        other => vec![other],
    };
    items
        .into_iter()
        .map(|v| serde_json::from_value(v).map_err(|e| SessionError::Protocol(e.to_string())))
        .collect()
}

/// Field list → display strings. Strings pass through, `null` becomes empty.
pub fn decode_fields(fields: Map<String, Value>) -> Payload {
    fields
        .into_iter()
        .map(|(name, value)| {
            let text = match value {
                Value::String(s) => s,
                Value::Null => String::new(),
                other => other.to_string(),
            };
            (name, text)
        })
        .collect()
}

pub fn classify(msg: InboundMessage) -> Inbound {
    let kind = msg.kind.as_deref().unwrap_or_default();
    if kind == "Ping" {
        return Inbound::Ping;
    }
    let Some(id) = msg.id else {
        return Inbound::Other;
    };

    let wire_state = msg.state.unwrap_or_default();
    if id == LOGIN_STREAM_ID || msg.domain.as_deref() == Some("Login") {
        return match kind {
            "Refresh" | "Status" => Inbound::Login {
                accepted: wire_state.is_open_ok(),
                state: wire_state.to_item_state(),
            },
            _ => Inbound::Other,
        };
    }

    let name = msg.key.and_then(|k| match k.name {
        Some(Value::String(s)) => Some(s),
        _ => None,
    });
    let state = wire_state.to_item_state();
    match kind {
        "Refresh" => Inbound::Refresh {
            id,
            name,
            state,
            payload: msg.fields.map(decode_fields).unwrap_or_default(),
        },
        "Status" => Inbound::Status { id, name, state },
        _ => Inbound::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_login_shape() {
        let json = serde_json::to_value(LoginRequest::user("user1", "256", "10.0.0.1/net")).unwrap();
        assert_eq!(json["ID"], 1);
        assert_eq!(json["Domain"], "Login");
        assert_eq!(json["Key"]["Name"], "user1");
        assert_eq!(json["Key"]["Elements"]["ApplicationId"], "256");
        assert!(json["Key"].get("NameType").is_none());
    }

    #[test]
    fn token_login_shape() {
        let json = serde_json::to_value(LoginRequest::token("abc", "256", "p")).unwrap();
        assert_eq!(json["Key"]["NameType"], "AuthnToken");
        assert_eq!(json["Key"]["Elements"]["AuthenticationToken"], "abc");
        assert!(json["Key"].get("Name").is_none());
    }

    #[test]
    fn batch_request_with_view() {
        let names = vec!["IBM.N".to_string(), "TRI.N".to_string()];
        let req = ItemRequest::batch(4, "ELEKTRON_DD", &names, Some(&[22, 25][..]));
        let json = serde_json::to_value(req).unwrap();
        assert_eq!(json["ID"], 4);
        assert_eq!(json["Key"]["Service"], "ELEKTRON_DD");
        assert_eq!(json["Key"]["Name"][1], "TRI.N");
        assert_eq!(json["Streaming"], false);
        assert_eq!(json["View"][0], 22);

        let plain = serde_json::to_value(ItemRequest::batch(4, "S", &names, None)).unwrap();
        assert!(plain.get("View").is_none());
    }

    #[test]
    fn refresh_is_decoded() {
        let frame = r#"[{"ID":5,"Type":"Refresh","Key":{"Service":"ELEKTRON_DD","Name":"IBM.N"},
            "State":{"Stream":"NonStreaming","Data":"Ok","Text":"All is well"},
            "Fields":{"BID":145.2,"DSPLY_NAME":"INTL BUS MACHINE","ASK":null}}]"#;
        let mut msgs = decode_frame(frame).unwrap();
        assert_eq!(msgs.len(), 1);
        match classify(msgs.remove(0)) {
            Inbound::Refresh { id, name, state, payload } => {
                assert_eq!(id, 5);
                assert_eq!(name.as_deref(), Some("IBM.N"));
                assert_eq!(state.to_string(), "Ok|None|All is well|NonStreaming");
                assert_eq!(payload["BID"], "145.2");
                assert_eq!(payload["DSPLY_NAME"], "INTL BUS MACHINE");
                assert_eq!(payload["ASK"], "");
                let order: Vec<&str> = payload.keys().map(String::as_str).collect();
                assert_eq!(order, ["BID", "DSPLY_NAME", "ASK"]);
            }
            other => panic!("expected refresh, got {other:?}"),
        }
    }

    #[test]
    fn status_and_ping_are_classified() {
        let frame = r#"[{"ID":6,"Type":"Status","Key":{"Name":"BAD.X"},
            "State":{"Stream":"Closed","Data":"Suspect","Code":"NotFound","Text":"The record could not be found"}},
            {"Type":"Ping"}]"#;
        let msgs: Vec<Inbound> = decode_frame(frame).unwrap().into_iter().map(classify).collect();
        assert_eq!(
            msgs[0],
            Inbound::Status {
                id: 6,
                name: Some("BAD.X".into()),
                state: ItemState::new("Suspect", "NotFound", "The record could not be found", "Closed"),
            }
        );
        assert_eq!(msgs[1], Inbound::Ping);
    }

    #[test]
    fn login_acceptance() {
        let ok = r#"{"ID":1,"Type":"Refresh","Domain":"Login","Key":{"Name":"user1"},
            "State":{"Stream":"Open","Data":"Ok","Text":"Login accepted"}}"#;
        let refused = r#"{"ID":1,"Type":"Status","Domain":"Login",
            "State":{"Stream":"Closed","Data":"Suspect","Code":"UserUnknownToPermSys","Text":"denied"}}"#;
        let ok = classify(decode_frame(ok).unwrap().remove(0));
        let refused = classify(decode_frame(refused).unwrap().remove(0));
        assert!(matches!(ok, Inbound::Login { accepted: true, .. }));
        assert!(matches!(refused, Inbound::Login { accepted: false, .. }));
    }

    #[test]
    fn garbage_is_protocol_error() {
        assert!(matches!(decode_frame("not json"), Err(SessionError::Protocol(_))));
    }
}
