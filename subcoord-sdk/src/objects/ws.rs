//! WebSocket message types for the live status channel.
//!
//! # Protocol
//!
//! 1. The client opens `GET /api/v1/live` and sends a
//!    [`WsClientMessage::Join`] naming a transaction.
//! 2. The server answers with a [`WsServerMessage::Snapshot`] holding the
//!    current state, so a late joiner always sees the latest status.
//! 3. Subsequent snapshots are pushed on every committed transition.
//! 4. Joining another transaction replaces the previous join.
//! 5. Unknown transactions yield a [`WsServerMessage::Error`]; the
//!    connection stays open so the client may join again.

use serde::{Deserialize, Serialize};

use super::payment::{PaymentStatus, SnapshotData, SubscriptionStatus};

/// Client-to-server WebSocket message.
///
/// ```json
/// {"type":"join","transaction_id":"txn_..."}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsClientMessage {
    Join { transaction_id: String },
    Leave,
}

/// Server-to-client WebSocket message.
///
/// ```json
/// {"type":"snapshot","transaction_id":"t1","status":"success","subscription_status":"active","data":{ ... }}
/// {"type":"error","code":4004,"reason":"transaction not found"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsServerMessage {
    Snapshot {
        transaction_id: String,
        status: PaymentStatus,
        subscription_status: SubscriptionStatus,
        data: SnapshotData,
    },
    Error {
        /// Application-level error code (mirrors [`WsCloseCode`] values).
        code: u16,
        reason: String,
    },
}

impl From<super::StatusSnapshot> for WsServerMessage {
    fn from(snapshot: super::StatusSnapshot) -> Self {
        WsServerMessage::Snapshot {
            transaction_id: snapshot.transaction_id,
            status: snapshot.status,
            subscription_status: snapshot.subscription_status,
            data: snapshot.data,
        }
    }
}

/// Well-known WebSocket codes used by the live channel.
///
/// Codes in the 4000–4999 range are reserved for application use by
/// [RFC 6455 §7.4.2](https://www.rfc-editor.org/rfc/rfc6455#section-7.4.2).
pub struct WsCloseCode;

impl WsCloseCode {
    pub const NORMAL: u16 = 1000;

    pub const INTERNAL_ERROR: u16 = 1011;

    /// The client sent a frame that is not a valid [`WsClientMessage`].
    pub const BAD_MESSAGE: u16 = 4000;

    /// The requested transaction does not exist.
    pub const TRANSACTION_NOT_FOUND: u16 = 4004;
}
