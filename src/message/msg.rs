use crate::error::MojoError;
use crate::message::{MessageFlags, MessageHeader};
use crate::system::ScopedMessagePipeHandle;
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// A framed message: a contiguous byte buffer plus handles that travel
/// out-of-band alongside it.
///
/// Messages written by the connector usually start with a `MessageHeader`, but
/// the transport does not require it; `Message::from_bytes` carries arbitrary
/// bytes.
#[derive(Default)]
pub struct Message {
  data: Bytes,
  handles: Vec<ScopedMessagePipeHandle>,
}

impl Message {
  /// Creates an empty message with no data and no handles.
  pub fn new() -> Self {
    Self::default()
  }

  /// Creates a message with a header followed by `payload`.
  pub fn with_header(header: MessageHeader, payload: &[u8]) -> Self {
    MessageBuilder::new(header).payload(payload).build()
  }

  /// Creates a message from raw bytes, taking ownership.
  pub fn from_bytes(data: impl Into<Bytes>) -> Self {
    Self {
      data: data.into(),
      handles: Vec::new(),
    }
  }

  /// Creates a message from raw bytes and handles to transfer with it.
  pub fn from_parts(data: impl Into<Bytes>, handles: Vec<ScopedMessagePipeHandle>) -> Self {
    Self {
      data: data.into(),
      handles,
    }
  }

  pub fn data(&self) -> &[u8] {
    &self.data
  }

  pub fn data_num_bytes(&self) -> usize {
    self.data.len()
  }

  /// Returns the underlying `Bytes`. Cloning is cheap (reference counted).
  pub fn data_bytes(&self) -> Bytes {
    self.data.clone()
  }

  pub fn handles(&self) -> &[ScopedMessagePipeHandle] {
    &self.handles
  }

  pub fn handles_mut(&mut self) -> &mut Vec<ScopedMessagePipeHandle> {
    &mut self.handles
  }

  pub fn take_handles(&mut self) -> Vec<ScopedMessagePipeHandle> {
    std::mem::take(&mut self.handles)
  }

  /// Decodes the header at the front of the data.
  pub fn header(&self) -> Result<MessageHeader, MojoError> {
    MessageHeader::decode(&self.data)
  }

  /// Bytes following the header.
  pub fn payload(&self) -> Result<&[u8], MojoError> {
    let header = self.header()?;
    Ok(&self.data[header.encoded_len()..])
  }

  pub fn name(&self) -> Result<u32, MojoError> {
    self.header().map(|h| h.name)
  }

  pub fn has_flag(&self, flag: MessageFlags) -> bool {
    self.header().map_or(false, |h| h.flags.contains(flag))
  }

  /// Request id of a request or response message, if any.
  pub fn request_id(&self) -> Option<u64> {
    self.header().ok().and_then(|h| h.request_id)
  }
}

impl fmt::Debug for Message {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Message")
      .field("size", &self.data.len())
      .field("handles", &self.handles.len())
      .field("header", &self.header().ok()) // Avoid printing large data
      .finish()
  }
}

/// Assembles a header, a payload and attached handles into a `Message`.
pub struct MessageBuilder {
  buf: BytesMut,
  handles: Vec<ScopedMessagePipeHandle>,
}

impl MessageBuilder {
  pub fn new(header: MessageHeader) -> Self {
    let mut buf = BytesMut::with_capacity(header.encoded_len());
    header.encode(&mut buf);
    Self {
      buf,
      handles: Vec::new(),
    }
  }

  pub fn payload(mut self, payload: &[u8]) -> Self {
    self.buf.put_slice(payload);
    self
  }

  pub fn handle(mut self, handle: ScopedMessagePipeHandle) -> Self {
    self.handles.push(handle);
    self
  }

  pub fn build(self) -> Message {
    Message {
      data: self.buf.freeze(),
      handles: self.handles,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::system::MessagePipe;

  #[test]
  fn test_builder_prefixes_header() {
    let (h0, _h1) = MessagePipe::new();
    let msg = MessageBuilder::new(MessageHeader::new(42, MessageFlags::empty()))
      .payload(b"abc")
      .handle(h0)
      .build();

    assert_eq!(msg.name().unwrap(), 42);
    assert_eq!(msg.payload().unwrap(), b"abc");
    assert_eq!(msg.handles().len(), 1);
    assert_eq!(msg.data_num_bytes(), 16 + 3);
    assert_eq!(msg.request_id(), None);
  }

  #[test]
  fn test_raw_message_has_no_header() {
    let msg = Message::from_bytes(&b"xy"[..]);
    assert!(msg.header().is_err());
    assert!(!msg.has_flag(MessageFlags::IS_SYNC));
    assert_eq!(msg.data(), b"xy");
  }
}
