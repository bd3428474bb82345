//! Sign request records
//!
//! A [`SignRequest`] tracks one submission to the signing authority from
//! draft to finalized container. Records persist as JSON in the work
//! directory so a later session can finalize them.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Result, WorkflowError};
use crate::transport::RequestId;

/// Helper module for serializing [u8; 48] as hex
mod hex_bytes_48 {
    use super::*;

    pub fn serialize<S>(bytes: &[u8; 48], serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if serializer.is_human_readable() {
            serializer.serialize_str(&hex::encode(bytes))
        } else {
            serializer.serialize_bytes(bytes)
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> std::result::Result<[u8; 48], D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::Error;
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            let mut bytes = [0u8; 48];
            hex::decode_to_slice(&s, &mut bytes).map_err(D::Error::custom)?;
            Ok(bytes)
        } else {
            let bytes = Vec::<u8>::deserialize(deserializer)?;
            bytes
                .try_into()
                .map_err(|_| D::Error::custom("expected 48 bytes"))
        }
    }
}

/// Lifecycle of a sign request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    /// Built locally, not yet accepted by the authority
    Draft,
    Requested,
    /// Quorum reached on the authority side
    Approved,
    Finalized,
    Cancelled,
}

impl RequestState {
    pub fn is_closed(self) -> bool {
        matches!(self, RequestState::Finalized | RequestState::Cancelled)
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestState::Draft => "draft",
            RequestState::Requested => "requested",
            RequestState::Approved => "approved",
            RequestState::Finalized => "finalized",
            RequestState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// What the request asks the authority to sign
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// A code-signing key appended to a keychain
    Key,
    /// An engineering cert header
    Block0,
    /// Firmware block0 bytes for a signature descriptor
    Image,
}

/// A recorded approval
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    pub role: String,
    pub at: DateTime<Utc>,
}

/// Local record of a submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignRequest {
    pub id: RequestId,

    pub kind: RequestKind,

    /// SHA-384 of the submitted module file
    #[serde(with = "hex_bytes_48")]
    pub content_hash: [u8; 48],

    pub permission: u32,

    pub cancel_id: u32,

    #[serde(default)]
    pub approvals: Vec<Approval>,

    pub state: RequestState,

    pub created_at: DateTime<Utc>,
}

impl SignRequest {
    pub fn new(
        id: RequestId,
        kind: RequestKind,
        content_hash: [u8; 48],
        permission: u32,
        cancel_id: u32,
    ) -> Self {
        Self {
            id,
            kind,
            content_hash,
            permission,
            cancel_id,
            approvals: Vec::new(),
            state: RequestState::Draft,
            created_at: Utc::now(),
        }
    }

    /// Fail if the request can no longer be acted on
    pub fn ensure_open(&self, action: &'static str) -> std::result::Result<(), WorkflowError> {
        if self.state.is_closed() {
            return Err(WorkflowError::RequestClosed {
                id: self.id,
                state: self.state.to_string(),
                action,
            });
        }
        Ok(())
    }

    /// The authority accepted the submission
    pub fn mark_requested(&mut self) -> std::result::Result<(), WorkflowError> {
        self.ensure_open("submitted")?;
        if self.state == RequestState::Draft {
            self.state = RequestState::Requested;
        }
        Ok(())
    }

    /// Record an approval; `quorum_reached` reflects the authority's view
    pub fn record_approval(
        &mut self,
        role: &str,
        quorum_reached: bool,
    ) -> std::result::Result<(), WorkflowError> {
        self.ensure_open("approved")?;
        if !self.approvals.iter().any(|a| a.role == role) {
            self.approvals.push(Approval {
                role: role.to_string(),
                at: Utc::now(),
            });
        }
        if quorum_reached {
            self.state = RequestState::Approved;
        }
        Ok(())
    }

    pub fn mark_finalized(&mut self) -> std::result::Result<(), WorkflowError> {
        self.ensure_open("finalized")?;
        self.state = RequestState::Finalized;
        Ok(())
    }

    pub fn mark_cancelled(&mut self) -> std::result::Result<(), WorkflowError> {
        self.ensure_open("cancelled")?;
        self.state = RequestState::Cancelled;
        Ok(())
    }

    pub fn content_hash_hex(&self) -> String {
        hex::encode(self.content_hash)
    }

    /// File the record is stored under inside `dir`
    pub fn path_in(dir: &Path, id: RequestId) -> PathBuf {
        dir.join(format!("request-{id}.json"))
    }

    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        let path = Self::path_in(dir, self.id);
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        Ok(path)
    }

    pub fn load(dir: &Path, id: RequestId) -> Result<Self> {
        let content = std::fs::read_to_string(Self::path_in(dir, id))?;
        let request: Self = serde_json::from_str(&content)?;
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn request() -> SignRequest {
        SignRequest::new(RequestId(7), RequestKind::Key, [0xAB; 48], 0x0F, 2)
    }

    #[test]
    fn test_lifecycle() {
        let mut r = request();
        assert_eq!(r.state, RequestState::Draft);
        r.mark_requested().unwrap();
        assert_eq!(r.state, RequestState::Requested);

        r.record_approval("reviewer", false).unwrap();
        r.record_approval("reviewer", false).unwrap();
        assert_eq!(r.approvals.len(), 1);
        assert_eq!(r.state, RequestState::Requested);

        r.record_approval("manager", true).unwrap();
        assert_eq!(r.state, RequestState::Approved);

        r.mark_finalized().unwrap();
        assert_eq!(
            r.mark_cancelled(),
            Err(WorkflowError::RequestClosed {
                id: RequestId(7),
                state: "finalized".into(),
                action: "cancelled",
            })
        );
    }

    #[test]
    fn test_cancelled_is_terminal() {
        let mut r = request();
        r.mark_requested().unwrap();
        r.mark_cancelled().unwrap();
        assert!(r.record_approval("security", true).is_err());
        assert!(r.mark_finalized().is_err());
        assert_eq!(r.state, RequestState::Cancelled);
    }

    #[test]
    fn test_json_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut r = request();
        r.mark_requested().unwrap();
        r.record_approval("security", false).unwrap();

        let path = r.save(dir.path()).unwrap();
        assert!(path.ends_with("request-7.json"));
        let json = std::fs::read_to_string(&path).unwrap();
        assert!(json.contains(&"ab".repeat(48)));
        assert!(json.contains("\"requested\""));

        assert_eq!(SignRequest::load(dir.path(), RequestId(7)).unwrap(), r);
    }
}
