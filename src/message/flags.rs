use bitflags::bitflags;

bitflags! {
    /// Flags carried in a `MessageHeader` describing the message's role.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MessageFlags: u32 {
        /// The sender expects a reply carrying the same request id.
        const EXPECTS_RESPONSE = 1 << 0;
        /// This message is the reply to an earlier request.
        const IS_RESPONSE = 1 << 1;
        /// Request or reply of a synchronous call.
        const IS_SYNC = 1 << 2;
    }
}

impl MessageFlags {
  /// Request/response messages carry a request id and need the v1 header.
  pub fn needs_request_id(self) -> bool {
    self.intersects(MessageFlags::EXPECTS_RESPONSE | MessageFlags::IS_RESPONSE)
  }
}
