use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tracing::{debug, instrument, warn};

use crate::models::Party;
use crate::services::ConsultationGateway;

pub const PING_INTERVAL: Duration = Duration::from_secs(30);

/// A client that sends nothing, pongs included, for this long is dropped.
pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(90);

/// Drives one authenticated socket until either side goes away. Inbound
/// frames are handled one at a time, so a party's events apply in order.
#[instrument(skip_all, fields(party_id = %party.actor.id()))]
pub async fn run_socket(socket: WebSocket, gateway: Arc<ConsultationGateway>, party: Party) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (connection_id, mut outbound) = gateway.connect(&party);

    let mut writer = tokio::spawn(async move {
        let mut ping = tokio::time::interval(PING_INTERVAL);
        ping.tick().await;

        loop {
            tokio::select! {
                frame = outbound.recv() => match frame {
                    Some(text) => {
                        if ws_tx.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        let _ = ws_tx.send(Message::Close(None)).await;
                        break;
                    }
                },
                _ = ping.tick() => {
                    if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    loop {
        let next = tokio::select! {
            _ = &mut writer => break,
            next = tokio::time::timeout(CLIENT_TIMEOUT, ws_rx.next()) => next,
        };

        let frame = match next {
            Ok(Some(Ok(frame))) => frame,
            Ok(Some(Err(e))) => {
                debug!("Socket error on {}: {}", connection_id, e);
                break;
            }
            Ok(None) => break,
            Err(_) => {
                warn!("Connection {} unresponsive for {:?}", connection_id, CLIENT_TIMEOUT);
                break;
            }
        };

        match frame {
            Message::Text(text) => {
                gateway
                    .handle_frame(connection_id, &party, text.as_str())
                    .await
            }
            Message::Binary(data) => match std::str::from_utf8(&data) {
                Ok(text) => gateway.handle_frame(connection_id, &party, text).await,
                Err(_) => debug!("Ignoring non-UTF-8 binary frame on {}", connection_id),
            },
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    writer.abort();
    gateway.disconnect(connection_id, &party).await;
}
