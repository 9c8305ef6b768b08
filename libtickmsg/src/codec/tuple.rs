//! A codec that serializes the `(id, payload)` pair as a JSON tuple.
//!
//! The payload travels as a hex string, or `null` when absent: `["Login", "0a0b"]`.

use super::{Message, MessageCodec, WireInt};
use crate::errors::CodecError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt::{Debug, Display};
use std::hash::Hash;
use std::marker::PhantomData;

pub struct TupleCodec<Id> {
    prefix: WireInt,
    _id: PhantomData<fn() -> Id>,
}

impl<Id> Default for TupleCodec<Id> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Id> TupleCodec<Id> {
    pub fn new() -> Self {
        Self { prefix: WireInt::default(), _id: PhantomData }
    }

    pub fn with_length_prefix(prefix: WireInt) -> Self {
        Self { prefix, _id: PhantomData }
    }
}

impl<Id> MessageCodec for TupleCodec<Id>
where
    Id: Serialize + DeserializeOwned + Clone + Eq + Hash + Debug + Display + 'static,
{
    type Id = Id;

    fn encode(&self, id: &Id, payload: Option<&[u8]>) -> Result<Vec<u8>, CodecError> {
        let payload = payload.map(hex::encode);
        serde_json::to_vec(&(id, payload)).map_err(|e| CodecError::encode(e.to_string()))
    }

    fn decode(&self, body: &[u8]) -> Result<Message<Id>, CodecError> {
        let value: Value = serde_json::from_slice(body).map_err(|e| CodecError::decode(e.to_string()))?;
        let Value::Array(mut pair) = value else {
            return Err(CodecError::format("expected a two-element array"));
        };
        if pair.len() != 2 {
            return Err(CodecError::format(format!("expected 2 elements, got {}", pair.len())));
        }
        let payload = pair.pop().unwrap_or(Value::Null);
        let id = pair.pop().unwrap_or(Value::Null);
        if id.is_null() {
            return Err(CodecError::format("message id is null"));
        }
        let id = serde_json::from_value(id).map_err(|e| CodecError::format(format!("invalid message id. {e}")))?;
        let payload = match payload {
            Value::Null => None,
            Value::String(s) => {
                Some(hex::decode(s).map_err(|e| CodecError::format(format!("invalid payload encoding. {e}")))?)
            }
            other => return Err(CodecError::format(format!("unexpected payload {other}"))),
        };
        Ok(Message { id, payload })
    }

    fn length_prefix(&self) -> WireInt {
        self.prefix
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn string_ids() {
        let codec = TupleCodec::<String>::new();
        let body = codec.encode(&"Login".to_string(), Some(&[0x0a, 0x0b])).unwrap();
        assert_eq!(body, br#"["Login","0a0b"]"#.to_vec());
        let msg = codec.decode(&body).unwrap();
        assert_eq!(msg, Message::new("Login".to_string(), Some(vec![0x0a, 0x0b])));

        let body = codec.encode(&"keep_alive_ping".to_string(), None).unwrap();
        assert_eq!(codec.decode(&body).unwrap().payload, None);
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let codec = TupleCodec::<String>::new();
        assert!(matches!(codec.decode(b"\x80\x03not json"), Err(CodecError::Decode(_))));
    }

    #[test]
    fn wrong_shapes_are_format_errors() {
        let codec = TupleCodec::<String>::new();
        let bodies: [&[u8]; 5] =
            [br#"{"id":"x"}"#, br#"["only"]"#, br#"[null, null]"#, br#"["a", 12]"#, br#"[1, null]"#];
        for body in bodies {
            let result = codec.decode(body);
            assert!(matches!(result, Err(CodecError::Format(_))), "{result:?}");
        }
    }
}
