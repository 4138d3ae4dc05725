//! Translation between [`GenericMessage`] and the Kafka wire message.
//!
//! The mapping is lossless for arbitrary byte sequences. An empty key or value
//! is carried as an empty (not absent) field so that it survives the trip.

use rdkafka::message::{Header, Headers, Message, OwnedHeaders, OwnedMessage, Timestamp};

use crate::message::{GenericMessage, MessageHeader};

/// librdkafka's "unassigned partition": the partitioner picks one from the key.
const PARTITION_UNASSIGNED: i32 = -1;

/// Offset of a message that has not been written yet.
const OFFSET_INVALID: i64 = -1;

/// Convert an application message into a wire message ready to be published.
pub fn to_wire(message: &GenericMessage) -> OwnedMessage {
    let headers = if message.headers.is_empty() {
        None
    } else {
        let owned = message.headers.iter().fold(
            OwnedHeaders::new_with_capacity(message.headers.len()),
            |headers, header| {
                headers.insert(Header {
                    key: header.key.as_str(),
                    value: Some(header.value.as_slice()),
                })
            },
        );
        Some(owned)
    };

    OwnedMessage::new(
        Some(message.value.clone()),
        Some(message.key.clone()),
        message.topic.clone(),
        Timestamp::NotAvailable,
        PARTITION_UNASSIGNED,
        OFFSET_INVALID,
        headers,
    )
}

/// Reconstruct an application message from anything rdkafka considers a
/// message (owned or borrowed).
///
/// A header without a value maps to an empty value.
pub fn from_wire<M: Message>(message: &M) -> GenericMessage {
    let headers = message
        .headers()
        .map(|headers| {
            headers
                .iter()
                .map(|header| MessageHeader {
                    key: header.key.to_string(),
                    value: header.value.map(<[u8]>::to_vec).unwrap_or_default(),
                })
                .collect()
        })
        .unwrap_or_default();

    GenericMessage {
        topic: message.topic().to_string(),
        key: message.key().map(<[u8]>::to_vec).unwrap_or_default(),
        value: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        headers,
    }
}
