//! Realtime channel connection: join handshake and the event forwarding task.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::message::{Inbound, PhoenixMessage, join_outcome};
use crate::error::{Result, StoreError};
use crate::row::ChangeEvent;
use crate::settings::StoreSettings;
use crate::store::ChangeFeed;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Monotonic message refs for one socket.
#[derive(Debug, Default)]
struct RefCounter(u64);

impl RefCounter {
    fn next(&mut self) -> u64 {
        self.0 += 1;
        self.0
    }
}

/// State the forwarding task needs after the join succeeded.
struct FeedContext {
    topic: String,
    table: String,
    heartbeat_interval: Duration,
    refs: RefCounter,
}

/// Connect, join the table's channel and start forwarding updates.
///
/// Fails with [`StoreError::Subscription`] if the socket cannot be opened or the
/// join is not acknowledged within `join_timeout`.
pub(crate) async fn open_feed(settings: &StoreSettings) -> Result<ChangeFeed> {
    ensure_crypto_provider();

    let url = settings.realtime_url()?;
    let topic = settings.channel_topic();
    info!(topic = %topic, "Connecting to realtime change feed");

    let (mut ws, _) = connect_async(url.as_str())
        .await
        .map_err(|e| StoreError::subscription(format!("connect failed: {e}")))?;

    let mut refs = RefCounter::default();
    let join_ref = refs.next();
    let join = PhoenixMessage::join(
        &topic,
        &settings.schema,
        &settings.table,
        &settings.api_key,
        join_ref,
    );
    ws.send(join.to_ws()?)
        .await
        .map_err(|e| StoreError::subscription(format!("join send failed: {e}")))?;

    let joined = tokio::time::timeout(
        settings.join_timeout,
        await_join(&mut ws, &topic, &settings.table, join_ref),
    )
    .await;

    match joined {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            let _ = ws.close(None).await;
            return Err(e);
        }
        Err(_) => {
            let _ = ws.close(None).await;
            return Err(StoreError::subscription(format!(
                "no join reply within {:?}",
                settings.join_timeout
            )));
        }
    }

    info!(topic = %topic, "Subscribed to realtime change feed");

    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let cancel = CancellationToken::new();
    let ctx = FeedContext {
        topic,
        table: settings.table.clone(),
        heartbeat_interval: settings.heartbeat_interval,
        refs,
    };
    tokio::spawn(run_feed(ws, ctx, tx, cancel.clone()));

    Ok(ChangeFeed::new(rx, cancel))
}

/// Read frames until the reply to our join arrives.
async fn await_join(ws: &mut WsStream, topic: &str, table: &str, join_ref: u64) -> Result<()> {
    let expected = join_ref.to_string();

    while let Some(frame) = ws.next().await {
        let frame = frame.map_err(|e| StoreError::subscription(format!("socket error: {e}")))?;
        let message = match PhoenixMessage::from_ws(&frame) {
            Ok(Some(message)) => message,
            Ok(None) => continue,
            Err(e) => {
                warn!("Skipping undecodable frame before join reply: {}", e);
                continue;
            }
        };

        match Inbound::classify(&message, topic, table) {
            Inbound::Reply {
                msg_ref,
                ok,
                reason,
            } if msg_ref.as_deref() == Some(expected.as_str()) => {
                return join_outcome(ok, reason);
            }
            Inbound::ChannelClosed { reason } => {
                return Err(StoreError::subscription(format!(
                    "channel closed during join: {reason}"
                )));
            }
            other => trace!("Ignoring frame before join reply: {:?}", other),
        }
    }

    Err(StoreError::subscription("socket closed before join reply"))
}

/// Forward matching updates until cancelled or the socket drops.
///
/// There is no reconnect: when the socket goes away the sender is dropped and
/// the feed reports closed.
async fn run_feed(
    mut ws: WsStream,
    mut ctx: FeedContext,
    tx: mpsc::Sender<ChangeEvent>,
    cancel: CancellationToken,
) {
    let mut heartbeat = tokio::time::interval_at(
        Instant::now() + ctx.heartbeat_interval,
        ctx.heartbeat_interval,
    );
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                leave(&mut ws, &mut ctx).await;
                debug!(topic = %ctx.topic, "Change feed cancelled");
                return;
            }

            _ = heartbeat.tick() => {
                let frame = match PhoenixMessage::heartbeat(ctx.refs.next()).to_ws() {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!("Failed to encode heartbeat: {}", e);
                        continue;
                    }
                };
                if let Err(e) = ws.send(frame).await {
                    warn!(topic = %ctx.topic, "Failed to send heartbeat: {}", e);
                    break;
                }
                trace!(topic = %ctx.topic, "Sent heartbeat");
            }

            frame = ws.next() => {
                let frame = match frame {
                    Some(Ok(frame)) => frame,
                    Some(Err(e)) => {
                        warn!(topic = %ctx.topic, "Realtime socket error: {}", e);
                        break;
                    }
                    None => {
                        warn!(topic = %ctx.topic, "Realtime socket closed by server");
                        break;
                    }
                };

                let message = match PhoenixMessage::from_ws(&frame) {
                    Ok(Some(message)) => message,
                    Ok(None) => continue,
                    Err(e) => {
                        warn!("Failed to decode realtime frame: {}", e);
                        continue;
                    }
                };

                match Inbound::classify(&message, &ctx.topic, &ctx.table) {
                    Inbound::Change(event) => {
                        debug!("Received change event: {}", event.description());
                        if tx.send(event).await.is_err() {
                            // Receiver gone, nobody is listening anymore.
                            leave(&mut ws, &mut ctx).await;
                            return;
                        }
                    }
                    Inbound::ChannelClosed { reason } => {
                        warn!(topic = %ctx.topic, "Realtime channel closed by server: {}", reason);
                        break;
                    }
                    Inbound::System { ok: false, message } => {
                        warn!(topic = %ctx.topic, "Realtime channel reported an error: {}", message);
                    }
                    Inbound::Reply { ok: false, reason, .. } => {
                        warn!(topic = %ctx.topic, "Realtime request rejected: {:?}", reason);
                    }
                    _ => {}
                }
            }
        }
    }

    let _ = ws.close(None).await;
    info!(topic = %ctx.topic, "Change feed stopped");
}

async fn leave(ws: &mut WsStream, ctx: &mut FeedContext) {
    if let Ok(frame) = PhoenixMessage::leave(&ctx.topic, ctx.refs.next()).to_ws() {
        let _ = ws.send(frame).await;
    }
    let _ = ws.close(None).await;
}

/// Install the process-wide rustls provider used by the WebSocket connector.
///
/// Installing twice is harmless; the second attempt is rejected and ignored.
fn ensure_crypto_provider() {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}
