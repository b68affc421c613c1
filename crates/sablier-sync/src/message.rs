//! Outgoing message content, the wire envelope and padding.

use serde::{Deserialize, Serialize};

use crate::config::AvatarPointer;
use crate::error::{Result, SyncError};

/// Plaintext bodies are padded to a multiple of this before encryption so
/// ciphertext length leaks less about content length.
pub const PADDING_BLOCK: usize = 160;

/// Sender profile attached to outgoing messages (except to self).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SenderProfile {
    pub display_name: String,
    pub avatar: Option<AvatarPointer>,
}

/// Class of an outgoing message. Config-class payloads must go through
/// the config sync path, never plain dispatch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MessageKind {
    Visible,
    Config,
}

/// An application message about to be dispatched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub kind: MessageKind,
    pub sent_timestamp_ms: u64,
    pub text: Option<String>,
    /// Attachment references; must match the uploaded file ids supplied
    /// at send time.
    pub attachment_ids: Vec<String>,
    pub profile: Option<SenderProfile>,
    /// Disappearing-message duration.
    pub expires_in_ms: Option<u64>,
    /// Original recipient, set on sync-to-self copies.
    pub sync_target: Option<String>,
}

impl OutgoingMessage {
    /// Structural validity: a timestamp plus either text or attachments.
    pub fn is_valid(&self) -> bool {
        if self.sent_timestamp_ms == 0 {
            return false;
        }
        self.text.as_deref().map(|t| !t.is_empty()).unwrap_or(false)
            || !self.attachment_ids.is_empty()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| SyncError::ProtoConversionFailed(e.to_string()))
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        bincode::deserialize(data).map_err(|e| SyncError::ProtoConversionFailed(e.to_string()))
    }
}

/// The outer wrapper a swarm message travels in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Envelope {
    /// Sender account id (prefixed hex); absent when the path hides it.
    pub source: Option<String>,
    pub timestamp_ms: u64,
    /// Ciphertext (or, for the group path, plaintext to be encrypted
    /// after wrapping).
    pub content: Vec<u8>,
}

impl Envelope {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| SyncError::ProtoConversionFailed(e.to_string()))
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        bincode::deserialize(data).map_err(|e| SyncError::ProtoConversionFailed(e.to_string()))
    }
}

/// ISO/IEC 7816-4 style padding: a 0x80 marker then zeros up to the next
/// block boundary.
pub fn pad(mut bytes: Vec<u8>) -> Vec<u8> {
    bytes.push(0x80);
    while bytes.len() % PADDING_BLOCK != 0 {
        bytes.push(0x00);
    }
    bytes
}

/// Strip [`pad`] padding.
pub fn unpad(bytes: &[u8]) -> Result<Vec<u8>> {
    let marker = bytes
        .iter()
        .rposition(|b| *b == 0x80)
        .ok_or_else(|| SyncError::ProtoConversionFailed("padding marker missing".to_string()))?;
    if bytes[marker + 1..].iter().any(|b| *b != 0x00) {
        return Err(SyncError::ProtoConversionFailed(
            "invalid padding tail".to_string(),
        ));
    }
    Ok(bytes[..marker].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_message(text: &str) -> OutgoingMessage {
        OutgoingMessage {
            kind: MessageKind::Visible,
            sent_timestamp_ms: 1_700_000_000_000,
            text: Some(text.to_string()),
            attachment_ids: vec![],
            profile: None,
            expires_in_ms: None,
            sync_target: None,
        }
    }

    #[test]
    fn test_validity() {
        assert!(text_message("hi").is_valid());

        let mut empty = text_message("");
        assert!(!empty.is_valid());
        empty.attachment_ids.push("file-1".to_string());
        assert!(empty.is_valid());

        let mut no_ts = text_message("hi");
        no_ts.sent_timestamp_ms = 0;
        assert!(!no_ts.is_valid());
    }

    #[test]
    fn test_pad_unpad_round_trip() {
        for len in [0usize, 1, 159, 160, 161, 4096] {
            let data = vec![0xABu8; len];
            let padded = pad(data.clone());
            assert_eq!(padded.len() % PADDING_BLOCK, 0);
            assert!(padded.len() > data.len());
            assert_eq!(unpad(&padded).unwrap(), data);
        }
    }

    #[test]
    fn test_unpad_rejects_garbage_tail() {
        let mut padded = pad(vec![1, 2, 3]);
        let len = padded.len();
        padded[len - 1] = 0x07;
        assert!(unpad(&padded).is_err());
    }

    #[test]
    fn test_envelope_round_trip() {
        let envelope = Envelope {
            source: Some("05ab".to_string()),
            timestamp_ms: 42,
            content: vec![1, 2, 3],
        };
        let restored = Envelope::from_bytes(&envelope.to_bytes().unwrap()).unwrap();
        assert_eq!(restored, envelope);
    }
}
