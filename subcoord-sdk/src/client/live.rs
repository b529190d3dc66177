//! Live status channel client.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use super::ClientError;
use crate::objects::ws::{WsClientMessage, WsServerMessage};
use crate::objects::{SnapshotData, StatusSnapshot};

/// A joined live status stream for one transaction.
pub struct LiveStatus {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl LiveStatus {
    pub(super) async fn connect(url: Url, transaction_id: &str) -> Result<Self, ClientError> {
        let (mut socket, _) = connect_async(url.as_str()).await?;
        let join = serde_json::to_string(&WsClientMessage::Join {
            transaction_id: transaction_id.to_owned(),
        })?;
        socket.send(Message::Text(join)).await?;
        Ok(Self { socket })
    }

    /// Wait for the next snapshot.
    ///
    /// Returns `Ok(None)` once the server closes the connection.
    pub async fn next_snapshot(&mut self) -> Result<Option<StatusSnapshot>, ClientError> {
        while let Some(frame) = self.socket.next().await {
            let text = match frame? {
                Message::Text(text) => text,
                Message::Close(_) => return Ok(None),
                _ => continue,
            };
            match serde_json::from_str::<WsServerMessage>(&text)? {
                WsServerMessage::Snapshot {
                    transaction_id,
                    status,
                    subscription_status,
                    data,
                } => {
                    return Ok(Some(snapshot(transaction_id, status, subscription_status, data)));
                }
                WsServerMessage::Error { code, reason } => {
                    return Err(ClientError::Live { code, reason });
                }
            }
        }
        Ok(None)
    }

    /// Close the channel.
    pub async fn close(mut self) -> Result<(), ClientError> {
        self.socket.close(None).await?;
        Ok(())
    }
}

fn snapshot(
    transaction_id: String,
    status: crate::objects::PaymentStatus,
    subscription_status: crate::objects::SubscriptionStatus,
    data: SnapshotData,
) -> StatusSnapshot {
    StatusSnapshot {
        transaction_id,
        status,
        subscription_status,
        data,
    }
}
