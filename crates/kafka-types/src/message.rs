//! Application-level message types.

/// A single header attached to a message.
///
/// Header names are strings on the wire, values are opaque bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    pub key: String,
    pub value: Vec<u8>,
}

impl MessageHeader {
    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// The unit of communication between the application and the broker.
///
/// A message lives for a single send or receive call; it is never persisted
/// by the broker layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenericMessage {
    /// Destination topic when sending, originating topic when receiving
    pub topic: String,
    /// Partition affinity key, may be empty
    pub key: Vec<u8>,
    /// Opaque payload
    pub value: Vec<u8>,
    /// Ordered list of headers
    pub headers: Vec<MessageHeader>,
}

impl GenericMessage {
    /// Create a message without key and headers
    pub fn new(topic: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            value: value.into(),
            ..Default::default()
        }
    }

    pub fn with_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.key = key.into();
        self
    }

    /// Append a header, keeping the order headers were added in
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.headers.push(MessageHeader::new(key, value));
        self
    }
}
