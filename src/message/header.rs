use crate::error::MojoError;
use crate::message::MessageFlags;
use bytes::{Buf, BufMut};

/// Encoded size of a header without a request id.
pub const MESSAGE_HEADER_V0_SIZE: usize = 16;
/// Encoded size of a header carrying a request id.
pub const MESSAGE_HEADER_V1_SIZE: usize = 24;

/// Fixed prefix of every framed message.
///
/// Layout (little-endian): `num_bytes: u32`, `version: u32`, `name: u32`,
/// `flags: u32`, then `request_id: u64` for version 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
  pub name: u32,
  pub flags: MessageFlags,
  pub request_id: Option<u64>,
}

impl MessageHeader {
  pub fn new(name: u32, flags: MessageFlags) -> Self {
    let request_id = flags.needs_request_id().then_some(0);
    Self {
      name,
      flags,
      request_id,
    }
  }

  pub fn with_request_id(name: u32, flags: MessageFlags, request_id: u64) -> Self {
    Self {
      name,
      flags,
      request_id: Some(request_id),
    }
  }

  pub fn version(&self) -> u32 {
    if self.request_id.is_some() {
      1
    } else {
      0
    }
  }

  pub fn encoded_len(&self) -> usize {
    if self.request_id.is_some() {
      MESSAGE_HEADER_V1_SIZE
    } else {
      MESSAGE_HEADER_V0_SIZE
    }
  }

  pub fn encode<B: BufMut>(&self, dst: &mut B) {
    dst.put_u32_le(self.encoded_len() as u32);
    dst.put_u32_le(self.version());
    dst.put_u32_le(self.name);
    dst.put_u32_le(self.flags.bits());
    if let Some(request_id) = self.request_id {
      dst.put_u64_le(request_id);
    }
  }

  /// Parses a header from the front of `src`. Unknown flag bits are dropped.
  pub fn decode(mut src: &[u8]) -> Result<Self, MojoError> {
    if src.len() < MESSAGE_HEADER_V0_SIZE {
      return Err(MojoError::InvalidMessage(format!(
        "message of {} bytes is shorter than a header",
        src.len()
      )));
    }
    let num_bytes = src.get_u32_le() as usize;
    let version = src.get_u32_le();
    let name = src.get_u32_le();
    let flags = MessageFlags::from_bits_truncate(src.get_u32_le());

    let expected = match version {
      0 => MESSAGE_HEADER_V0_SIZE,
      1 => MESSAGE_HEADER_V1_SIZE,
      _ => {
        return Err(MojoError::InvalidMessage(format!(
          "unsupported header version {}",
          version
        )))
      }
    };
    if num_bytes != expected {
      return Err(MojoError::InvalidMessage(format!(
        "header version {} declares {} bytes, expected {}",
        version, num_bytes, expected
      )));
    }
    if version == 0 && flags.needs_request_id() {
      return Err(MojoError::InvalidMessage(
        "request/response flags require a versioned header".into(),
      ));
    }

    let request_id = if version == 1 {
      if src.remaining() < 8 {
        return Err(MojoError::InvalidMessage("truncated request id".into()));
      }
      Some(src.get_u64_le())
    } else {
      None
    };

    Ok(Self {
      name,
      flags,
      request_id,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_v0_header_layout() {
    let header = MessageHeader::new(7, MessageFlags::empty());
    let mut buf = Vec::new();
    header.encode(&mut buf);

    assert_eq!(buf.len(), MESSAGE_HEADER_V0_SIZE);
    assert_eq!(&buf[0..4], &16u32.to_le_bytes());
    assert_eq!(&buf[4..8], &0u32.to_le_bytes());
    assert_eq!(&buf[8..12], &7u32.to_le_bytes());
    assert_eq!(MessageHeader::decode(&buf).unwrap(), header);
  }

  #[test]
  fn test_request_flags_force_v1() {
    let header = MessageHeader::new(3, MessageFlags::EXPECTS_RESPONSE | MessageFlags::IS_SYNC);
    assert_eq!(header.version(), 1);
    assert_eq!(header.encoded_len(), MESSAGE_HEADER_V1_SIZE);

    let header = MessageHeader::with_request_id(3, MessageFlags::IS_RESPONSE, 0xdead_beef);
    let mut buf = Vec::new();
    header.encode(&mut buf);
    let decoded = MessageHeader::decode(&buf).unwrap();
    assert_eq!(decoded.request_id, Some(0xdead_beef));
    assert!(decoded.flags.contains(MessageFlags::IS_RESPONSE));
  }

  #[test]
  fn test_decode_rejects_bad_input() {
    assert!(matches!(
      MessageHeader::decode(&[0u8; 8]),
      Err(MojoError::InvalidMessage(_))
    ));

    // v0 header that claims to expect a response.
    let mut buf = Vec::new();
    buf.put_u32_le(16);
    buf.put_u32_le(0);
    buf.put_u32_le(1);
    buf.put_u32_le(MessageFlags::EXPECTS_RESPONSE.bits());
    assert!(MessageHeader::decode(&buf).is_err());

    // v1 header cut short before the request id.
    let mut buf = Vec::new();
    buf.put_u32_le(24);
    buf.put_u32_le(1);
    buf.put_u32_le(1);
    buf.put_u32_le(0);
    assert!(MessageHeader::decode(&buf).is_err());
  }

  #[test]
  fn test_decode_rejects_unknown_version() {
    let mut buf = Vec::new();
    buf.put_u32_le(24);
    buf.put_u32_le(2);
    buf.put_u32_le(1);
    buf.put_u32_le(0);
    buf.put_u64_le(9);
    assert!(matches!(
      MessageHeader::decode(&buf),
      Err(MojoError::InvalidMessage(msg)) if msg.contains("version 2")
    ));
  }
}
