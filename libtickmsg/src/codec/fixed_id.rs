use super::{Message, MessageCodec, WireInt};
use crate::errors::CodecError;

/// Tags each message with a fixed-width integer id, followed by the raw payload.
///
/// Suits payloads that are already serialized (protobuf, bincode, ...). An empty payload decodes as absent.
#[derive(Clone, Copy, Debug, Default)]
pub struct FixedIdCodec {
    prefix: WireInt,
    id: WireInt,
}

impl FixedIdCodec {
    pub fn new(prefix: WireInt, id: WireInt) -> Self {
        Self { prefix, id }
    }
}

impl MessageCodec for FixedIdCodec {
    type Id = u32;

    fn encode(&self, id: &u32, payload: Option<&[u8]>) -> Result<Vec<u8>, CodecError> {
        let payload = payload.unwrap_or_default();
        let mut body = Vec::with_capacity(self.id.size() + payload.len());
        if !self.id.write(u64::from(*id), &mut body) {
            return Err(CodecError::encode(format!("id {id} does not fit in {:?}", self.id.width)));
        }
        body.extend_from_slice(payload);
        Ok(body)
    }

    fn decode(&self, body: &[u8]) -> Result<Message<u32>, CodecError> {
        let raw = self.id.read(body).ok_or_else(|| CodecError::decode("body is shorter than the id field"))?;
        let id = u32::try_from(raw).map_err(|_| CodecError::format(format!("id {raw} is out of range")))?;
        let rest = &body[self.id.size()..];
        let payload = if rest.is_empty() { None } else { Some(rest.to_vec()) };
        Ok(Message { id, payload })
    }

    fn length_prefix(&self) -> WireInt {
        self.prefix
    }
}
