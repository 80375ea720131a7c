//! WAMP JSON Codec
//!
//! Encodes and decodes WAMP messages in the `wamp.2.json` serialization.
//! Trailing optional elements (`args`, `kwargs`) are omitted when empty on
//! encode and default to empty on decode.

use serde_json::{Map, Value};

use super::messages::{WampMessage, code};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// The message is not a non-empty JSON array.
    #[error("message is not a non-empty JSON array")]
    NotAnArray,

    /// Unknown message code.
    #[error("unknown message code: {0}")]
    UnknownCode(u64),

    /// Invalid message format.
    #[error("invalid {message} message: {detail}")]
    InvalidFormat {
        /// Message name.
        message: &'static str,
        /// What was wrong.
        detail: String,
    },
}

/// JSON codec for WAMP messages.
#[derive(Debug, Default, Clone)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Encode a message as a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self, message: &WampMessage) -> Result<String, CodecError> {
        let code = Value::from(message.code());

        let array = match message {
            WampMessage::Hello { realm, details } => {
                vec![code, realm.as_str().into(), details.clone().into()]
            }
            WampMessage::Welcome { session, details } => {
                vec![code, (*session).into(), details.clone().into()]
            }
            WampMessage::Abort { details, reason } | WampMessage::Goodbye { details, reason } => {
                vec![code, details.clone().into(), reason.as_str().into()]
            }
            WampMessage::Error {
                request_type,
                request,
                details,
                error,
                args,
                kwargs,
            } => {
                let mut array = vec![
                    code,
                    (*request_type).into(),
                    (*request).into(),
                    details.clone().into(),
                    error.as_str().into(),
                ];
                push_payload(&mut array, args, kwargs);
                array
            }
            WampMessage::Subscribe {
                request,
                options,
                topic,
            } => vec![
                code,
                (*request).into(),
                options.clone().into(),
                topic.as_str().into(),
            ],
            WampMessage::Subscribed {
                request,
                subscription,
            } => vec![code, (*request).into(), (*subscription).into()],
            WampMessage::Event {
                subscription,
                publication,
                details,
                args,
                kwargs,
            } => {
                let mut array = vec![
                    code,
                    (*subscription).into(),
                    (*publication).into(),
                    details.clone().into(),
                ];
                push_payload(&mut array, args, kwargs);
                array
            }
        };

        Ok(serde_json::to_string(&Value::Array(array))?)
    }

    /// Decode a JSON text frame into a message.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not JSON, the code is unknown or a
    /// required element is missing or mistyped.
    pub fn decode(&self, text: &str) -> Result<WampMessage, CodecError> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Array(items) = value else {
            return Err(CodecError::NotAnArray);
        };
        let code = items
            .first()
            .ok_or(CodecError::NotAnArray)?
            .as_u64()
            .ok_or(CodecError::NotAnArray)?;

        let fields = Fields {
            items: &items,
            message: message_name(code).ok_or(CodecError::UnknownCode(code))?,
        };

        Ok(match code {
            code::HELLO => WampMessage::Hello {
                realm: fields.string(1)?,
                details: fields.dict(2)?,
            },
            code::WELCOME => WampMessage::Welcome {
                session: fields.id(1)?,
                details: fields.dict(2)?,
            },
            code::ABORT => WampMessage::Abort {
                details: fields.dict(1)?,
                reason: fields.string(2)?,
            },
            code::GOODBYE => WampMessage::Goodbye {
                details: fields.dict(1)?,
                reason: fields.string(2)?,
            },
            code::ERROR => WampMessage::Error {
                request_type: fields.id(1)?,
                request: fields.id(2)?,
                details: fields.dict(3)?,
                error: fields.string(4)?,
                args: fields.optional_list(5)?,
                kwargs: fields.optional_dict(6)?,
            },
            code::SUBSCRIBE => WampMessage::Subscribe {
                request: fields.id(1)?,
                options: fields.dict(2)?,
                topic: fields.string(3)?,
            },
            code::SUBSCRIBED => WampMessage::Subscribed {
                request: fields.id(1)?,
                subscription: fields.id(2)?,
            },
            code::EVENT => WampMessage::Event {
                subscription: fields.id(1)?,
                publication: fields.id(2)?,
                details: fields.dict(3)?,
                args: fields.optional_list(4)?,
                kwargs: fields.optional_dict(5)?,
            },
            other => return Err(CodecError::UnknownCode(other)),
        })
    }
}

fn push_payload(array: &mut Vec<Value>, args: &[Value], kwargs: &Map<String, Value>) {
    if !args.is_empty() || !kwargs.is_empty() {
        array.push(Value::Array(args.to_vec()));
    }
    if !kwargs.is_empty() {
        array.push(Value::Object(kwargs.clone()));
    }
}

const fn message_name(code: u64) -> Option<&'static str> {
    match code {
        code::HELLO => Some("HELLO"),
        code::WELCOME => Some("WELCOME"),
        code::ABORT => Some("ABORT"),
        code::GOODBYE => Some("GOODBYE"),
        code::ERROR => Some("ERROR"),
        code::SUBSCRIBE => Some("SUBSCRIBE"),
        code::SUBSCRIBED => Some("SUBSCRIBED"),
        code::EVENT => Some("EVENT"),
        _ => None,
    }
}

/// Positional element access with typed errors.
struct Fields<'a> {
    items: &'a [Value],
    message: &'static str,
}

impl Fields<'_> {
    fn invalid(&self, detail: String) -> CodecError {
        CodecError::InvalidFormat {
            message: self.message,
            detail,
        }
    }

    fn get(&self, index: usize) -> Result<&Value, CodecError> {
        self.items
            .get(index)
            .ok_or_else(|| self.invalid(format!("missing element {index}")))
    }

    fn id(&self, index: usize) -> Result<u64, CodecError> {
        self.get(index)?
            .as_u64()
            .ok_or_else(|| self.invalid(format!("element {index} is not an id")))
    }

    fn string(&self, index: usize) -> Result<String, CodecError> {
        self.get(index)?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| self.invalid(format!("element {index} is not a string")))
    }

    fn dict(&self, index: usize) -> Result<Map<String, Value>, CodecError> {
        self.get(index)?
            .as_object()
            .cloned()
            .ok_or_else(|| self.invalid(format!("element {index} is not a dict")))
    }

    fn optional_list(&self, index: usize) -> Result<Vec<Value>, CodecError> {
        match self.items.get(index) {
            None => Ok(Vec::new()),
            Some(Value::Array(list)) => Ok(list.clone()),
            Some(_) => Err(self.invalid(format!("element {index} is not a list"))),
        }
    }

    fn optional_dict(&self, index: usize) -> Result<Map<String, Value>, CodecError> {
        match self.items.get(index) {
            None => Ok(Map::new()),
            Some(Value::Object(dict)) => Ok(dict.clone()),
            Some(_) => Err(self.invalid(format!("element {index} is not a dict"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::wamp::messages::reason;
    use serde_json::json;

    #[test]
    fn encode_hello() {
        let codec = JsonCodec::new();
        let text = codec.encode(&WampMessage::hello("realm1")).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            value,
            json!([1, "realm1", {"roles": {"subscriber": {}}}])
        );
    }

    #[test]
    fn encode_subscribe_and_goodbye() {
        let codec = JsonCodec::new();
        assert_eq!(
            codec.encode(&WampMessage::subscribe(3, "BTC_ETH")).unwrap(),
            r#"[32,3,{},"BTC_ETH"]"#
        );
        assert_eq!(
            codec
                .encode(&WampMessage::goodbye(reason::SYSTEM_SHUTDOWN))
                .unwrap(),
            r#"[6,{},"wamp.close.system_shutdown"]"#
        );
    }

    #[test]
    fn encode_event_omits_empty_payload() {
        let codec = JsonCodec::new();
        let event = WampMessage::Event {
            subscription: 5,
            publication: 9,
            details: Map::new(),
            args: vec![],
            kwargs: Map::new(),
        };
        assert_eq!(codec.encode(&event).unwrap(), "[36,5,9,{}]");
    }

    #[test]
    fn decode_welcome() {
        let codec = JsonCodec::new();
        let msg = codec.decode(r#"[2, 9129137332, {"roles": {"broker": {}}}]"#).unwrap();
        assert!(matches!(msg, WampMessage::Welcome { session: 9_129_137_332, .. }));
    }

    #[test]
    fn decode_event_with_kwargs() {
        let codec = JsonCodec::new();
        let msg = codec
            .decode(r#"[36, 5, 77, {}, [{"type": "orderBookRemove", "data": {"rate": "0.1"}}], {"seq": 7}]"#)
            .unwrap();

        let WampMessage::Event {
            subscription,
            publication,
            args,
            kwargs,
            ..
        } = msg
        else {
            panic!("expected EVENT");
        };
        assert_eq!(subscription, 5);
        assert_eq!(publication, 77);
        assert_eq!(args.len(), 1);
        assert_eq!(kwargs["seq"], json!(7));
    }

    #[test]
    fn decode_event_without_payload() {
        let codec = JsonCodec::new();
        let msg = codec.decode("[36, 5, 77, {}]").unwrap();
        assert!(matches!(
            msg,
            WampMessage::Event { ref args, ref kwargs, .. } if args.is_empty() && kwargs.is_empty()
        ));
    }

    #[test]
    fn decode_subscribe_error() {
        let codec = JsonCodec::new();
        let msg = codec
            .decode(r#"[8, 32, 1, {}, "wamp.error.not_authorized"]"#)
            .unwrap();
        assert!(matches!(
            msg,
            WampMessage::Error { request_type: 32, request: 1, ref error, .. }
                if error == "wamp.error.not_authorized"
        ));
    }

    #[test]
    fn decode_rejects_non_arrays_and_unknown_codes() {
        let codec = JsonCodec::new();
        assert!(matches!(codec.decode("{}"), Err(CodecError::NotAnArray)));
        assert!(matches!(codec.decode("[]"), Err(CodecError::NotAnArray)));
        assert!(matches!(codec.decode("[99]"), Err(CodecError::UnknownCode(99))));
        assert!(matches!(codec.decode("not json"), Err(CodecError::Json(_))));
    }

    #[test]
    fn decode_rejects_mistyped_elements() {
        let codec = JsonCodec::new();
        let err = codec.decode(r#"[33, "one", 2]"#).unwrap_err();
        assert!(matches!(
            err,
            CodecError::InvalidFormat { message: "SUBSCRIBED", .. }
        ));
    }

    #[test]
    fn decoded_messages_re_encode() {
        let codec = JsonCodec::new();
        let text = r#"[8,32,4,{},"wamp.error.invalid_uri",["bad topic"]]"#;
        let msg = codec.decode(text).unwrap();
        assert_eq!(codec.encode(&msg).unwrap(), text);
    }
}
