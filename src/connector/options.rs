/// Selects who may send through a connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectorConfig {
  /// Only the owning thread sends. No lock is created.
  #[default]
  SingleThreadedSend,
  /// Any thread may send through a `ConnectorSender`; the pipe handle and the
  /// drop-writes flag sit behind a mutex.
  MultiThreadedSend,
}

/// Construction-time options of a `Connector`.
#[derive(Debug, Clone)]
pub struct ConnectorOptions {
  pub config: ConnectorConfig,
  /// A message rejected by the incoming receiver is a fatal pipe error.
  /// Default `true`.
  pub enforce_errors_from_incoming_receiver: bool,
}

impl ConnectorOptions {
  pub fn new(config: ConnectorConfig) -> Self {
    Self {
      config,
      ..Default::default()
    }
  }
}

impl Default for ConnectorOptions {
  fn default() -> Self {
    Self {
      config: ConnectorConfig::SingleThreadedSend,
      enforce_errors_from_incoming_receiver: true,
    }
  }
}
