//! Drives `SdcpClient` against an in-process printer simulator.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use pr_device::{
    DeviceClient, DeviceError, DeviceEvent, ReconnectBackoff, SdcpClient, SdcpSettings,
};
use pr_protocol::{CameraReply, RequestEnvelope, CMD_CAMERA, CMD_STATUS};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;

const MAINBOARD: &str = "mb-test";
/// Commands the simulator never answers.
const CMD_SILENT: u32 = 999;

struct Simulator {
    addr: SocketAddr,
    kick: broadcast::Sender<()>,
}

impl Simulator {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (kick, _) = broadcast::channel(4);
        let kick_tx = kick.clone();
        tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                let kicked = kick_tx.subscribe();
                tokio::spawn(serve(tcp, kicked));
            }
        });
        Self { addr, kick }
    }

    /// Drop every open connection; the listener keeps accepting.
    fn drop_connections(&self) {
        let _ = self.kick.send(());
    }
}

async fn serve(tcp: tokio::net::TcpStream, mut kicked: broadcast::Receiver<()>) {
    let Ok(mut ws) = tokio_tungstenite::accept_async(tcp).await else {
        return;
    };
    loop {
        tokio::select! {
            _ = kicked.recv() => return,
            msg = ws.next() => {
                let Some(Ok(Message::Text(text))) = msg else { return };
                if text == "ping" {
                    let _ = ws.send(Message::Text("pong".into())).await;
                    continue;
                }
                let Ok(req) = serde_json::from_str::<RequestEnvelope>(&text) else { continue };
                let reply_data = match req.data.cmd {
                    CMD_SILENT => continue,
                    CMD_CAMERA => json!({"Ack": 0, "VideoUrl": "127.0.0.1:3031/video"}),
                    _ => json!({"Ack": 0}),
                };
                let reply = json!({
                    "Id": req.id,
                    "Data": {
                        "Cmd": req.data.cmd,
                        "Data": reply_data,
                        "RequestID": req.data.request_id,
                        "MainboardID": MAINBOARD,
                    },
                    "Topic": format!("sdcp/response/{MAINBOARD}"),
                });
                let _ = ws.send(Message::Text(reply.to_string())).await;
                if req.data.cmd == CMD_STATUS {
                    let push = json!({
                        "Status": {
                            "CurrentStatus": [1],
                            "PrintInfo": {"Status": 13, "CurrentLayer": 4, "TotalLayer": 100},
                            "TempOfNozzle": 210.0
                        },
                        "MainboardID": MAINBOARD,
                        "Topic": format!("sdcp/status/{MAINBOARD}"),
                    });
                    let _ = ws.send(Message::Text(push.to_string())).await;
                }
            }
        }
    }
}

fn settings() -> SdcpSettings {
    SdcpSettings {
        heartbeat_interval: Duration::from_millis(200),
        heartbeat_timeout: Duration::from_secs(2),
        reconnect_timeout: Duration::from_secs(1),
        command_timeout: Duration::from_millis(500),
        backoff: ReconnectBackoff::constant(Duration::from_millis(50)),
        ..SdcpSettings::default()
    }
}

async fn next_matching(
    rx: &mut broadcast::Receiver<DeviceEvent>,
    pred: impl Fn(&DeviceEvent) -> bool,
) -> DeviceEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(ev) if pred(&ev) => return ev,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

#[tokio::test]
async fn connect_learns_mainboard_and_answers_camera_command() {
    let sim = Simulator::start().await;
    let client = SdcpClient::new(&sim.addr.to_string(), settings());

    let identity = client.connect(Duration::from_secs(2)).await.unwrap();
    assert_eq!(identity.mainboard_id.as_deref(), Some(MAINBOARD));
    assert!(client.is_connected());

    let reply = client
        .send_command(CMD_CAMERA, json!({"Enable": 1}), Duration::from_secs(2))
        .await
        .unwrap();
    let reply: CameraReply = serde_json::from_value(reply).unwrap();
    assert_eq!(reply.into_stream_url().unwrap(), "http://127.0.0.1:3031/video");

    client.disconnect().await;
    assert!(!client.is_connected());
}

#[tokio::test]
async fn polling_delivers_status_pushes() {
    let sim = Simulator::start().await;
    let client = SdcpClient::new(&sim.addr.to_string(), settings());
    let mut events = client.subscribe();
    client.connect(Duration::from_secs(2)).await.unwrap();
    client.start_status_polling(Duration::from_millis(100));

    let DeviceEvent::Status(status) =
        next_matching(&mut events, |e| matches!(e, DeviceEvent::Status(_))).await
    else {
        unreachable!()
    };
    assert_eq!(status.machine_code(), Some(1));
    assert_eq!(status.job_code(), Some(13));
}

#[tokio::test]
async fn unanswered_command_times_out() {
    let sim = Simulator::start().await;
    let client = SdcpClient::new(&sim.addr.to_string(), settings());
    client.connect(Duration::from_secs(2)).await.unwrap();

    let err = client
        .send_command(CMD_SILENT, json!({}), Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(matches!(err, DeviceError::CommandTimeout { cmd: CMD_SILENT, .. }));
    assert!(err.is_timeout());
}

#[tokio::test]
async fn dropped_socket_reports_disconnect_then_reconnects() {
    let sim = Simulator::start().await;
    let client = SdcpClient::new(&sim.addr.to_string(), settings());
    let mut events = client.subscribe();
    client.connect(Duration::from_secs(2)).await.unwrap();

    sim.drop_connections();
    next_matching(&mut events, |e| matches!(e, DeviceEvent::Disconnected { .. })).await;
    next_matching(&mut events, |e| matches!(e, DeviceEvent::Reconnected)).await;
    assert!(client.is_connected());

    // The new socket carries commands again.
    client
        .send_command(CMD_STATUS, json!({}), Duration::from_secs(2))
        .await
        .unwrap();
}

#[tokio::test]
async fn connect_to_closed_port_fails() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = SdcpClient::new(&addr.to_string(), settings());
    let err = client.connect(Duration::from_secs(2)).await.unwrap_err();
    assert!(matches!(
        err,
        DeviceError::Connect { .. } | DeviceError::ConnectTimeout { .. }
    ));
    assert!(!client.is_connected());
}
