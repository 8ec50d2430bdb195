//! Probe Message Types

use crate::network::types::PeerAddress;
use serde::{Deserialize, Serialize};

/// Liveness probe sent to a peer
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ProbeRequest {
    /// Address the sender believes the receiver has
    pub target: PeerAddress,
    /// Sender wall-clock time in milliseconds since the Unix epoch
    pub send_timestamp_ms: i64,
}

/// Response to a probe, echoing the original send time
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ProbeAck {
    pub responding: PeerAddress,
    pub original_send_timestamp_ms: i64,
}

/// Datagram payload exchanged between peers
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum ProbeMessage {
    Request(ProbeRequest),
    Ack(ProbeAck),
}

impl ProbeRequest {
    pub fn new(target: PeerAddress) -> Self {
        Self {
            target,
            send_timestamp_ms: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Build the acknowledgment `responding` sends back for this request
    pub fn ack_from(&self, responding: PeerAddress) -> ProbeAck {
        ProbeAck {
            responding,
            original_send_timestamp_ms: self.send_timestamp_ms,
        }
    }
}

impl ProbeMessage {
    pub fn encode(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ack_echoes_send_timestamp() {
        let request = ProbeRequest {
            target: PeerAddress::new("10.0.0.2", 7800),
            send_timestamp_ms: 1_700_000_000_123,
        };
        let ack = request.ack_from(PeerAddress::new("10.0.0.2", 7800));
        assert_eq!(ack.original_send_timestamp_ms, 1_700_000_000_123);
        assert_eq!(ack.responding, request.target);
    }

    #[test]
    fn test_bincode_wire_format() {
        let msg = ProbeMessage::Request(ProbeRequest::new(PeerAddress::new("10.0.0.1", 7800)));
        let decoded = ProbeMessage::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded, msg);

        assert!(ProbeMessage::decode(&[0xff, 0xff, 0xff]).is_err());
    }
}
