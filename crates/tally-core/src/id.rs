//! # Entity Identifiers
//!
//! Uuid-backed newtype identifiers for every entity in the platform.
//! Each identifier renders with a stable prefix (`user:`, `project:`, ...)
//! so log lines and error messages are unambiguous about what kind of
//! entity they reference.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── UserId ─────────────────────────────────────────────────────────────

/// A unique identifier for a platform user (client or freelancer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(Uuid);

impl UserId {
    /// Create a new random user identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a user identifier from an existing UUID.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Access the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "user:{}", self.0)
    }
}

// ── ProjectId ──────────────────────────────────────────────────────────

/// A unique identifier for a contracting project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProjectId(Uuid);

impl ProjectId {
    /// Create a new random project identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a project identifier from an existing UUID.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Access the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ProjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ProjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "project:{}", self.0)
    }
}

// ── MilestoneId ────────────────────────────────────────────────────────

/// A unique identifier for a project milestone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MilestoneId(Uuid);

impl MilestoneId {
    /// Create a new random milestone identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a milestone identifier from an existing UUID.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Access the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for MilestoneId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MilestoneId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "milestone:{}", self.0)
    }
}

// ── DisputeId ──────────────────────────────────────────────────────────

/// A unique identifier for a dispute proceeding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DisputeId(Uuid);

impl DisputeId {
    /// Create a new random dispute identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a dispute identifier from an existing UUID.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Access the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for DisputeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for DisputeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "dispute:{}", self.0)
    }
}

// ── WalletId ───────────────────────────────────────────────────────────

/// A unique identifier for a user wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WalletId(Uuid);

impl WalletId {
    /// Create a new random wallet identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a wallet identifier from an existing UUID.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Access the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for WalletId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WalletId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "wallet:{}", self.0)
    }
}

// ── TransactionId ──────────────────────────────────────────────────────

/// A unique identifier for a project-facing ledger transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionId(Uuid);

impl TransactionId {
    /// Create a new random transaction identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a transaction identifier from an existing UUID.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Access the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

// ── WalletTransactionId ────────────────────────────────────────────────

/// A unique identifier for a wallet-level ledger transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WalletTransactionId(Uuid);

impl WalletTransactionId {
    /// Create a new random wallet transaction identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a wallet transaction identifier from an existing UUID.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Access the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for WalletTransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WalletTransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "wtxn:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        assert_ne!(UserId::new(), UserId::new());
        assert_ne!(ProjectId::new(), ProjectId::new());
        assert_ne!(MilestoneId::new(), MilestoneId::new());
        assert_ne!(DisputeId::new(), DisputeId::new());
        assert_ne!(WalletId::new(), WalletId::new());
        assert_ne!(TransactionId::new(), TransactionId::new());
        assert_ne!(WalletTransactionId::new(), WalletTransactionId::new());
    }

    #[test]
    fn display_prefixes() {
        assert!(format!("{}", UserId::new()).starts_with("user:"));
        assert!(format!("{}", ProjectId::new()).starts_with("project:"));
        assert!(format!("{}", MilestoneId::new()).starts_with("milestone:"));
        assert!(format!("{}", DisputeId::new()).starts_with("dispute:"));
        assert!(format!("{}", WalletId::new()).starts_with("wallet:"));
        assert!(format!("{}", TransactionId::new()).starts_with("txn:"));
        assert!(format!("{}", WalletTransactionId::new()).starts_with("wtxn:"));
    }

    #[test]
    fn from_uuid_roundtrip() {
        let uuid = Uuid::new_v4();
        assert_eq!(*UserId::from_uuid(uuid).as_uuid(), uuid);
        assert_eq!(*MilestoneId::from_uuid(uuid).as_uuid(), uuid);
        assert_eq!(*DisputeId::from_uuid(uuid).as_uuid(), uuid);
    }

    #[test]
    fn serde_roundtrip() {
        let id = MilestoneId::new();
        let json = serde_json::to_string(&id).unwrap();
        let back: MilestoneId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
