use crate::message::Message;

/// Something that consumes messages one at a time.
///
/// Returning `false` means the message could not be processed. The connector
/// treats that as a broken stream unless told otherwise.
pub trait MessageReceiver {
  fn accept(&self, message: &mut Message) -> bool;
}
