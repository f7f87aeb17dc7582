use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};

use crate::{
    monitor::status::StatusSnapshot,
    notify::broadcast::{ChannelSubscriber, StatusSink},
    ServerState,
};

/// Subscribes the socket to the status snapshots pushed after every poll cycle.
pub async fn handler_device_status_ws(
    ws: WebSocketUpgrade,
    State(state): State<ServerState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_status_socket(socket, state))
}

async fn handle_status_socket(socket: WebSocket, state: ServerState) {
    let (mut sender, mut receiver) = socket.split();
    let broadcaster = state.broadcaster.clone();
    let (subscriber, mut updates) =
        ChannelSubscriber::channel(broadcaster.settings().channel_capacity);

    // Current persisted view first, so the client does not wait a full cycle
    match state.store.list().await {
        Ok(devices) if !devices.is_empty() => {
            let snapshots: Vec<StatusSnapshot> = devices.iter().map(StatusSnapshot::from).collect();
            match serde_json::to_string(&snapshots) {
                Ok(json) => {
                    if let Err(e) = subscriber.send(json.into()).await {
                        tracing::debug!("Failed to queue initial snapshot: {}", e);
                    }
                }
                Err(e) => tracing::error!("Failed to serialize initial snapshot: {}", e),
            }
        }
        Ok(_) => {}
        Err(e) => tracing::warn!("Could not load initial status snapshot: {:#}", e),
    }

    let subscriber_id = broadcaster.register(Arc::new(subscriber));
    tracing::info!(
        "Status subscriber {} connected ({} total)",
        subscriber_id,
        broadcaster.subscriber_count()
    );

    let mut send_task = tokio::spawn(async move {
        while let Some(payload) = updates.recv().await {
            if let Err(e) = sender.send(Message::Text(payload.to_string())).await {
                tracing::debug!("Failed to push status update: {:?}", e);
                break;
            }
        }
        let _ = sender.close().await;
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Close(_)) => break,
                Err(e) => {
                    tracing::debug!("WebSocket error: {:?}", e);
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    broadcaster.unregister(subscriber_id);
    tracing::info!("Status subscriber {} disconnected", subscriber_id);
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::StreamExt;
    use tokio::net::{TcpListener, TcpStream};
    use tokio_tungstenite::{tungstenite, MaybeTlsStream, WebSocketStream};

    use crate::{
        monitor::status::StatusSnapshot,
        notify::broadcast::{BroadcastSettings, StatusBroadcaster},
        routes::AppRouter,
        testing::common::{device, start_time, test_monitor},
        ServerState,
    };

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    async fn next_text(client: &mut Client) -> serde_json::Value {
        let frame = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match client.next().await.unwrap().unwrap() {
                    tungstenite::Message::Text(text) => return text,
                    _ => continue,
                }
            }
        })
        .await
        .expect("no status frame received");

        serde_json::from_str(&frame).unwrap()
    }

    #[tokio::test]
    async fn test_status_socket_lifecycle() {
        let monitor = test_monitor(vec![device(1, "press", false)], Duration::from_secs(60));
        let broadcaster = StatusBroadcaster::new(BroadcastSettings {
            send_timeout: Duration::from_millis(500),
            channel_capacity: 4,
        });
        let state = ServerState {
            store: monitor.store.clone(),
            status_service: monitor.service.clone(),
            broadcaster: broadcaster.clone(),
        };

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, AppRouter::create(state)).await.unwrap();
        });

        let (mut client, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws/devices"))
            .await
            .unwrap();

        let initial = next_text(&mut client).await;
        assert_eq!(
            initial,
            serde_json::json!([{
                "deviceId": 1,
                "isOnline": false,
                "lastChecked": "2024-05-01T08:00:00Z"
            }])
        );
        assert_eq!(broadcaster.subscriber_count(), 1);

        let summary = broadcaster
            .broadcast(&[StatusSnapshot {
                device_id: 1,
                is_online: true,
                checked_at: start_time(),
            }])
            .await;
        assert_eq!(summary.delivered, 1);

        let pushed = next_text(&mut client).await;
        assert_eq!(pushed[0]["isOnline"], true);

        client.close(None).await.unwrap();

        let mut remaining = broadcaster.subscriber_count();
        for _ in 0..100 {
            if remaining == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            remaining = broadcaster.subscriber_count();
        }
        assert_eq!(remaining, 0);
    }
}
