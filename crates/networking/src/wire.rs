//! Frame codec and message payloads.
//!
//! Framing: `length: u32 big-endian ‖ type: u8 ‖ payload`, where `length`
//! counts the type byte plus the payload. Frames above the configured
//! maximum are rejected from the length prefix alone, before the payload
//! is read.

use axon_types::app::Hash256;
use axon_types::error::NetworkError;
use parity_scale_codec::{Decode, Encode};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Default maximum frame size: 10 MiB.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;
/// Bytes of framing before the payload: length word plus type byte.
pub const FRAME_HEADER_SIZE: usize = 5;

/// Wire message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Handshake, exchanged once per connection in both directions.
    Hello = 0x00,
    /// Keep-alive probe.
    Ping = 0x01,
    /// Keep-alive response.
    Pong = 0x02,
    /// Orderly teardown with a reason string.
    Disconnect = 0x03,
    /// Request full blocks by height range.
    GetBlocks = 0x10,
    /// Response to `GetBlocks`.
    Blocks = 0x11,
    /// Request headers from a starting height.
    GetHeaders = 0x12,
    /// Response to `GetHeaders`.
    Headers = 0x13,
    /// Gossip of a new transaction.
    NewTransaction = 0x20,
    /// Gossip of a full new block.
    NewBlock = 0x21,
    /// Lightweight announcement of a new block.
    NewBlockHashes = 0x22,
    /// Request the peer's known-peer list.
    GetPeers = 0x40,
    /// Response to `GetPeers`.
    Peers = 0x41,
}

impl TryFrom<u8> for MessageType {
    type Error = NetworkError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(MessageType::Hello),
            0x01 => Ok(MessageType::Ping),
            0x02 => Ok(MessageType::Pong),
            0x03 => Ok(MessageType::Disconnect),
            0x10 => Ok(MessageType::GetBlocks),
            0x11 => Ok(MessageType::Blocks),
            0x12 => Ok(MessageType::GetHeaders),
            0x13 => Ok(MessageType::Headers),
            0x20 => Ok(MessageType::NewTransaction),
            0x21 => Ok(MessageType::NewBlock),
            0x22 => Ok(MessageType::NewBlockHashes),
            0x40 => Ok(MessageType::GetPeers),
            0x41 => Ok(MessageType::Peers),
            other => Err(NetworkError::UnknownMessageType(other)),
        }
    }
}

/// A framed wire message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The message type byte.
    pub message_type: MessageType,
    /// The raw payload.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Builds a frame.
    pub fn new(message_type: MessageType, payload: Vec<u8>) -> Self {
        Frame {
            message_type,
            payload,
        }
    }

    /// An empty-payload frame.
    pub fn empty(message_type: MessageType) -> Self {
        Frame::new(message_type, Vec::new())
    }

    /// A `Disconnect` frame carrying a reason string.
    pub fn disconnect(reason: &str) -> Self {
        Frame::new(MessageType::Disconnect, reason.as_bytes().to_vec())
    }

    /// Encodes the frame with its length prefix.
    pub fn encode(&self) -> Vec<u8> {
        let length = (1 + self.payload.len()) as u32;
        let mut out = Vec::with_capacity(FRAME_HEADER_SIZE + self.payload.len());
        out.extend_from_slice(&length.to_be_bytes());
        out.push(self.message_type as u8);
        out.extend_from_slice(&self.payload);
        out
    }

    /// Decodes a frame from a complete buffer.
    pub fn decode(data: &[u8], max_size: usize) -> Result<Frame, NetworkError> {
        if data.len() < FRAME_HEADER_SIZE {
            return Err(NetworkError::InvalidFrame(format!(
                "frame too short: {} bytes",
                data.len()
            )));
        }
        let (header, payload) = data.split_at(FRAME_HEADER_SIZE);
        let (length_bytes, type_byte) = header.split_at(4);
        let length = u32::from_be_bytes(
            length_bytes
                .try_into()
                .map_err(|_| NetworkError::InvalidFrame("missing length word".into()))?,
        ) as usize;
        if length == 0 {
            return Err(NetworkError::InvalidFrame("zero-length frame".into()));
        }
        if length > max_size {
            return Err(NetworkError::OversizedMessage {
                size: length,
                max: max_size,
            });
        }
        if payload.len() != length - 1 {
            return Err(NetworkError::InvalidFrame(format!(
                "length mismatch: declared {}, carried {}",
                length - 1,
                payload.len()
            )));
        }
        let message_type = MessageType::try_from(type_byte.first().copied().unwrap_or(0xff))?;
        Ok(Frame {
            message_type,
            payload: payload.to_vec(),
        })
    }
}

/// Reads one frame from an async stream, rejecting oversized frames
/// before their payload is read.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_size: usize,
) -> Result<Frame, NetworkError> {
    let mut header = [0u8; FRAME_HEADER_SIZE];
    reader.read_exact(&mut header).await?;
    let (length_bytes, type_byte) = header.split_at(4);
    let length = u32::from_be_bytes(
        length_bytes
            .try_into()
            .map_err(|_| NetworkError::InvalidFrame("missing length word".into()))?,
    ) as usize;
    if length == 0 {
        return Err(NetworkError::InvalidFrame("zero-length frame".into()));
    }
    if length > max_size {
        return Err(NetworkError::OversizedMessage {
            size: length,
            max: max_size,
        });
    }
    let message_type = MessageType::try_from(type_byte.first().copied().unwrap_or(0xff))?;
    let mut payload = vec![0u8; length - 1];
    reader.read_exact(&mut payload).await?;
    Ok(Frame {
        message_type,
        payload,
    })
}

/// Writes one frame to an async stream and flushes it.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &Frame,
) -> Result<(), NetworkError> {
    writer.write_all(&frame.encode()).await?;
    writer.flush().await?;
    Ok(())
}

// ---- payloads ----

/// Handshake payload, JSON-encoded (self-describing by design).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HelloMessage {
    /// Protocol version spoken by the sender.
    pub protocol_version: u32,
    /// Network identifier; mismatches disconnect.
    pub network_id: u64,
    /// Genesis hash; mismatches disconnect.
    pub genesis_hash: Hash256,
    /// The sender's best height.
    pub best_height: u64,
    /// The sender's best block hash.
    pub best_hash: Hash256,
    /// Port the sender accepts inbound connections on.
    pub listen_port: u16,
    /// The sender's node id.
    pub node_id: Hash256,
    /// Capability strings (e.g. `sync`, `relay`).
    pub capabilities: Vec<String>,
}

/// Request for a height range of full blocks. JSON-encoded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GetBlocksMessage {
    /// First height requested.
    pub start_height: u64,
    /// Last height requested (inclusive).
    pub end_height: u64,
    /// Cap on the number of blocks in the response.
    pub max_blocks: u32,
}

/// Request for headers starting at a height. JSON-encoded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GetHeadersMessage {
    /// First height requested.
    pub start_height: u64,
    /// Cap on the number of headers in the response.
    pub max_headers: u32,
}

/// Request for the peer's known-peer list. JSON-encoded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GetPeersMessage {
    /// Cap on the number of peers in the response.
    pub max_peers: u32,
}

/// One advertised peer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeerEntry {
    /// Host address.
    pub address: String,
    /// Listen port.
    pub port: u16,
    /// Node id.
    pub node_id: Hash256,
}

/// Response to [`GetPeersMessage`]. JSON-encoded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeersMessage {
    /// Advertised peers.
    pub peers: Vec<PeerEntry>,
}

/// Lightweight new-block announcement, SCALE-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct BlockAnnouncement {
    /// Height of the announced block.
    pub height: u64,
    /// Hash of the announced block.
    pub hash: Hash256,
    /// Parent hash, letting receivers detect gaps immediately.
    pub previous_hash: Hash256,
    /// Producer timestamp.
    pub timestamp: u64,
}

/// Encodes a JSON payload frame.
pub fn json_frame<T: Serialize>(
    message_type: MessageType,
    payload: &T,
) -> Result<Frame, NetworkError> {
    let bytes = serde_json::to_vec(payload)
        .map_err(|e| NetworkError::MalformedMessage(format!("encode failed: {}", e)))?;
    Ok(Frame::new(message_type, bytes))
}

/// Decodes a JSON payload.
pub fn decode_json<T: for<'de> Deserialize<'de>>(payload: &[u8]) -> Result<T, NetworkError> {
    serde_json::from_slice(payload)
        .map_err(|e| NetworkError::MalformedMessage(format!("decode failed: {}", e)))
}

/// Encodes a SCALE payload frame.
pub fn scale_frame<T: Encode>(message_type: MessageType, payload: &T) -> Frame {
    Frame::new(message_type, axon_types::codec::to_bytes_canonical(payload))
}

/// Decodes a SCALE payload.
pub fn decode_scale<T: Decode>(payload: &[u8]) -> Result<T, NetworkError> {
    axon_types::codec::from_bytes_canonical(payload).map_err(NetworkError::MalformedMessage)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_roundtrip() {
        let frame = Frame::new(MessageType::Ping, vec![1, 2, 3]);
        let encoded = frame.encode();
        assert_eq!(encoded.len(), FRAME_HEADER_SIZE + 3);
        let decoded = Frame::decode(&encoded, DEFAULT_MAX_MESSAGE_SIZE).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn empty_payload_frames() {
        let frame = Frame::empty(MessageType::Pong);
        let decoded = Frame::decode(&frame.encode(), DEFAULT_MAX_MESSAGE_SIZE).unwrap();
        assert!(decoded.payload.is_empty());
        assert_eq!(decoded.message_type, MessageType::Pong);
    }

    #[test]
    fn oversized_frames_are_rejected() {
        let frame = Frame::new(MessageType::Blocks, vec![0u8; 100]);
        let encoded = frame.encode();
        assert!(matches!(
            Frame::decode(&encoded, 50),
            Err(NetworkError::OversizedMessage { size: 101, max: 50 })
        ));
    }

    #[test]
    fn unknown_type_is_rejected() {
        let mut encoded = Frame::new(MessageType::Ping, Vec::new()).encode();
        encoded[4] = 0x7f;
        assert!(matches!(
            Frame::decode(&encoded, DEFAULT_MAX_MESSAGE_SIZE),
            Err(NetworkError::UnknownMessageType(0x7f))
        ));
    }

    #[test]
    fn truncated_frames_are_rejected() {
        let encoded = Frame::new(MessageType::Ping, vec![1, 2, 3]).encode();
        assert!(Frame::decode(&encoded[..6], DEFAULT_MAX_MESSAGE_SIZE).is_err());
        assert!(Frame::decode(&encoded[..3], DEFAULT_MAX_MESSAGE_SIZE).is_err());
    }

    #[tokio::test]
    async fn async_read_write_roundtrip() {
        let frame = Frame::new(MessageType::NewTransaction, vec![9u8; 64]);
        let (mut client, mut server) = tokio::io::duplex(1024);
        write_frame(&mut client, &frame).await.unwrap();
        let received = read_frame(&mut server, DEFAULT_MAX_MESSAGE_SIZE)
            .await
            .unwrap();
        assert_eq!(received, frame);
    }

    #[tokio::test]
    async fn async_read_rejects_oversize_before_payload() {
        let (mut client, mut server) = tokio::io::duplex(64);
        // Hand-craft a header declaring a huge payload; the body is never
        // sent, yet the reader must bail out immediately.
        let mut header = Vec::new();
        header.extend_from_slice(&(1_000_000u32 + 1).to_be_bytes());
        header.push(MessageType::Blocks as u8);
        tokio::io::AsyncWriteExt::write_all(&mut client, &header)
            .await
            .unwrap();
        let result = read_frame(&mut server, 1_000_000).await;
        assert!(matches!(
            result,
            Err(NetworkError::OversizedMessage { .. })
        ));
    }

    #[test]
    fn hello_json_roundtrip() {
        let hello = HelloMessage {
            protocol_version: 1,
            network_id: 9999,
            genesis_hash: [1u8; 32],
            best_height: 42,
            best_hash: [2u8; 32],
            listen_port: 30303,
            node_id: [3u8; 32],
            capabilities: vec!["sync".into(), "relay".into()],
        };
        let frame = json_frame(MessageType::Hello, &hello).unwrap();
        let decoded: HelloMessage = decode_json(&frame.payload).unwrap();
        assert_eq!(decoded, hello);
    }

    #[test]
    fn announcement_scale_roundtrip() {
        let announcement = BlockAnnouncement {
            height: 7,
            hash: [1u8; 32],
            previous_hash: [2u8; 32],
            timestamp: 1_700_000_000,
        };
        let frame = scale_frame(MessageType::NewBlockHashes, &announcement);
        let decoded: BlockAnnouncement = decode_scale(&frame.payload).unwrap();
        assert_eq!(decoded, announcement);
    }

    #[test]
    fn malformed_json_is_reported() {
        assert!(matches!(
            decode_json::<HelloMessage>(b"{not json"),
            Err(NetworkError::MalformedMessage(_))
        ));
    }
}
