use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use parley_types::api::Claims;
use parley_types::events::{
    GatewayCommand, GatewayFrame, PRESENCE_SNAPSHOT, PRESENCE_TOPIC, PresenceSnapshot,
    conversation_topic, personal_topic,
};

use crate::GatewayState;
use crate::bus::TopicSubscription;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// How long a fresh connection gets to send its Identify command.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle a single WebSocket connection: Identify handshake, Ready frame,
/// presence registration, then the relay loop.
pub async fn handle_connection(socket: WebSocket, state: GatewayState) {
    let (mut sender, mut receiver) = socket.split();

    let Some(claims) = wait_for_identify(&mut receiver, &state.jwt_secret).await else {
        warn!("WebSocket client failed to identify, closing");
        return;
    };
    let user_id = claims.sub;
    let email = claims.email;

    info!("{} ({}) connected to gateway", email, user_id);

    let ready = GatewayFrame::Ready {
        user_id,
        email: email.clone(),
    };
    if send_frame(&mut sender, &ready).await.is_err() {
        return;
    }

    // Register on the presence topic. The subscription is taken before the
    // snapshot is delivered, so no membership event can slip between them.
    let (snapshot, presence_sub) = state.roster.join(&state.bus, user_id);
    let snapshot_frame = GatewayFrame::Event {
        topic: PRESENCE_TOPIC.into(),
        event: PRESENCE_SNAPSHOT.into(),
        payload: serde_json::to_value(PresenceSnapshot { online: snapshot }).unwrap(),
    };
    if send_frame(&mut sender, &snapshot_frame).await.is_err() {
        state.roster.leave(&state.bus, user_id);
        return;
    }

    // All subscribed topics funnel through one frame channel to the socket.
    let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<GatewayFrame>();
    let mut fixed_forwarders = vec![
        spawn_forwarder(presence_sub, frame_tx.clone()),
        spawn_forwarder(state.bus.subscribe(&personal_topic(&email)), frame_tx.clone()),
    ];

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward frames to the client, with heartbeat.
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                frame = frame_rx.recv() => {
                    let Some(frame) = frame else { break };
                    if send_frame(&mut sender, &frame).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from the client.
    let recv_state = state.clone();
    let email_recv = email.clone();
    let mut recv_task = tokio::spawn(async move {
        // Conversation-topic forwarders, replaced wholesale on Subscribe.
        let mut conversation_forwarders: Vec<JoinHandle<()>> = Vec::new();

        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(GatewayCommand::Identify { .. }) => {} // Already handled
                    Ok(GatewayCommand::Subscribe { conversation_ids }) => {
                        info!(
                            "{} ({}) subscribing to {} conversations",
                            email_recv,
                            user_id,
                            conversation_ids.len()
                        );
                        for task in conversation_forwarders.drain(..) {
                            task.abort();
                        }
                        for cid in conversation_ids {
                            let sub = recv_state.bus.subscribe(&conversation_topic(cid));
                            conversation_forwarders.push(spawn_forwarder(sub, frame_tx.clone()));
                        }
                    }
                    Err(e) => {
                        let raw = text.as_str();
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            email_recv,
                            user_id,
                            e,
                            raw.get(..200).unwrap_or(raw)
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }

        for task in conversation_forwarders {
            task.abort();
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    for task in fixed_forwarders.drain(..) {
        task.abort();
    }
    state.roster.leave(&state.bus, user_id);
    info!("{} ({}) disconnected from gateway", email, user_id);
}

/// Relay one topic subscription into the connection's frame channel. Ends
/// when the topic closes or the connection's frame channel goes away.
fn spawn_forwarder(
    mut subscription: TopicSubscription,
    frame_tx: mpsc::UnboundedSender<GatewayFrame>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                event = subscription.recv() => {
                    let Some(event) = event else { break };
                    let payload = match serde_json::from_slice(&event.payload) {
                        Ok(value) => value,
                        Err(e) => {
                            warn!("Undecodable payload on '{}': {}", event.topic, e);
                            continue;
                        }
                    };
                    let frame = GatewayFrame::Event {
                        topic: event.topic,
                        event: event.event,
                        payload,
                    };
                    if frame_tx.send(frame).is_err() {
                        break;
                    }
                }
                _ = frame_tx.closed() => break,
            }
        }
    })
}

async fn send_frame(
    sender: &mut SplitSink<WebSocket, Message>,
    frame: &GatewayFrame,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(frame).unwrap();
    sender.send(Message::Text(text.into())).await
}

async fn wait_for_identify(
    receiver: &mut SplitStream<WebSocket>,
    jwt_secret: &str,
) -> Option<Claims> {
    use jsonwebtoken::{DecodingKey, Validation, decode};

    let timeout = tokio::time::timeout(IDENTIFY_TIMEOUT, async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(GatewayCommand::Identify { token }) =
                    serde_json::from_str::<GatewayCommand>(&text)
                {
                    let token_data = decode::<Claims>(
                        &token,
                        &DecodingKey::from_secret(jwt_secret.as_bytes()),
                        &Validation::default(),
                    )
                    .ok()?;

                    return Some(token_data.claims);
                }
            }
        }
        None
    });

    timeout.await.ok().flatten()
}
