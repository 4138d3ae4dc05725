//! Message model shared by every broker variant.
//!
//! Application code talks to the broker exclusively in terms of
//! [`GenericMessage`]. The transport crate translates those to and from the
//! Kafka wire representation through the [`codec`] module.
//!
//! # Architecture
//!
//! ```text
//! Send:     GenericMessage → to_wire → OwnedMessage → FutureRecord
//! Consume:  BorrowedMessage → detach → OwnedMessage → from_wire → GenericMessage
//! ```
//!
//! # Examples
//!
//! ```
//! use kafka_types::{from_wire, to_wire, GenericMessage};
//!
//! let message = GenericMessage::new("sources", b"payload".to_vec())
//!     .with_key(b"account-1".to_vec())
//!     .with_header("x-rh-identity", b"e30=".to_vec());
//!
//! let wire = to_wire(&message);
//! assert_eq!(from_wire(&wire), message);
//! ```

pub mod codec;
pub mod message;

// Re-export main types for convenient access
pub use codec::{from_wire, to_wire};
pub use message::{GenericMessage, MessageHeader};
