//! End-to-end tests driving a real gateway over WebSocket.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures::{SinkExt, StreamExt};
use gateway_server::codec::{BinaryCodec, Codec, JsonCodec};
use gateway_server::protocol::{
    status, Envelope, Heartbeat, JoinRoomRequest, LoginRequest, MessageHeader, MessageKind,
    Payload, ResponseBody, ResponseData, UserUpdatePush,
};
use gateway_server::{GatewayServer, ServerConfig, WireFormat};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(2);

struct Running {
    server: Arc<GatewayServer>,
    serving: JoinHandle<Result<(), gateway_server::ServerError>>,
    url: String,
}

fn local_config() -> ServerConfig {
    ServerConfig {
        bind_address: "127.0.0.1:0".parse().unwrap(),
        ..Default::default()
    }
}

async fn start(max_connections: usize) -> Running {
    start_with(ServerConfig {
        max_connections,
        ..local_config()
    })
    .await
}

async fn start_with(config: ServerConfig) -> Running {
    let server = Arc::new(GatewayServer::new(config));
    let listener = server.bind().unwrap();
    let addr = listener.local_addr().unwrap();
    let serving = {
        let server = server.clone();
        tokio::spawn(async move { server.serve(listener).await })
    };
    Running {
        server,
        serving,
        url: format!("ws://{addr}/ws"),
    }
}

async fn connect(url: &str) -> Client {
    let (client, _) = connect_async(url).await.unwrap();
    client
}

async fn send(client: &mut Client, header: MessageHeader, payload: Payload) {
    let codec = JsonCodec::new();
    let body = codec.encode_payload(header.msg_type, &payload).unwrap();
    let frame = codec.encode_envelope(&Envelope::new(header, body)).unwrap();
    client
        .send(Message::text(String::from_utf8(frame).unwrap()))
        .await
        .unwrap();
}

/// One received frame, split into its header and decoded body bytes.
struct Received {
    header: MessageHeader,
    body: Vec<u8>,
}

impl Received {
    fn response(&self) -> ResponseBody {
        JsonCodec::new().decode_response_body(&self.body).unwrap()
    }

    fn payload(&self) -> Payload {
        JsonCodec::new()
            .decode_payload(&Envelope::new(self.header.clone(), self.body.clone()))
            .unwrap()
    }
}

async fn recv(client: &mut Client) -> Received {
    loop {
        let message = timeout(WAIT, client.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .unwrap();
        if let Message::Text(text) = message {
            let raw: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
            return Received {
                header: serde_json::from_value(raw["header"].clone()).unwrap(),
                body: STANDARD.decode(raw["body"].as_str().unwrap()).unwrap(),
            };
        }
    }
}

async fn login(client: &mut Client, user_id: u64) -> Received {
    send(
        client,
        MessageHeader::new(MessageKind::Login),
        Payload::Login(LoginRequest {
            token: "token".into(),
            user_id,
            device_id: "integration".into(),
        }),
    )
    .await;
    recv(client).await
}

async fn heartbeat(client: &mut Client, client_time: i64) -> Received {
    send(
        client,
        MessageHeader::new(MessageKind::Heartbeat),
        Payload::Heartbeat(Heartbeat { client_time }),
    )
    .await;
    recv(client).await
}

/// Waits until the server ends the session.
async fn wait_closed(client: &mut Client) -> bool {
    timeout(WAIT, async {
        loop {
            match client.next().await {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await
    .is_ok()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_login_and_heartbeat() {
    let running = start(100).await;
    let mut client = connect(&running.url).await;

    let reply = login(&mut client, 7).await;
    assert_eq!(reply.header.msg_type, 1000);
    let body = reply.response();
    assert_eq!(body.code, status::OK);
    assert_eq!(body.data, Some(ResponseData::Login { user_id: 7 }));

    let ack = heartbeat(&mut client, 99).await;
    assert_eq!(ack.header.msg_type, MessageKind::Heartbeat.as_u32());
    assert_eq!(ack.payload(), Payload::Heartbeat(Heartbeat { client_time: 99 }));
    assert!(ack.header.timestamp > 0);

    assert_eq!(running.server.stats().await.connections, 1);
    running.server.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_bad_frame_gets_error_and_connection_survives() {
    let running = start(100).await;
    let mut client = connect(&running.url).await;

    client.send(Message::text("not an envelope")).await.unwrap();
    let error = recv(&mut client).await;
    assert_eq!(error.header.msg_type, 2004);
    let body = error.response();
    assert_eq!(body.code, status::BAD_REQUEST);
    assert!(matches!(body.data, Some(ResponseData::Error { .. })));

    let ack = heartbeat(&mut client, 5).await;
    assert_eq!(ack.header.msg_type, MessageKind::Heartbeat.as_u32());
    running.server.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_join_room_notifies_existing_member() {
    let running = start(100).await;
    let mut alice = connect(&running.url).await;
    let mut bob = connect(&running.url).await;
    login(&mut alice, 1).await;
    login(&mut bob, 2).await;

    let join = |room: &str| Payload::JoinRoom(JoinRoomRequest { room_id: room.into() });
    send(&mut alice, MessageHeader::new(MessageKind::JoinRoom), join("r1")).await;
    assert_eq!(
        recv(&mut alice).await.response().data,
        Some(ResponseData::Room { room_id: "r1".into() })
    );

    send(&mut bob, MessageHeader::new(MessageKind::JoinRoom), join("r1")).await;
    assert_eq!(
        recv(&mut bob).await.response().data,
        Some(ResponseData::Room { room_id: "r1".into() })
    );

    let push = recv(&mut alice).await;
    assert_eq!(push.header.msg_type, MessageKind::PushUserUpdate.as_u32());
    assert_eq!(
        push.payload(),
        Payload::UserUpdate(UserUpdatePush {
            user_id: 2,
            status: 1,
            location: "r1".into(),
        })
    );

    // Bob's next frame is his heartbeat ack, not an echo of his own join.
    let ack = heartbeat(&mut bob, 1).await;
    assert_eq!(ack.header.msg_type, MessageKind::Heartbeat.as_u32());

    let stats = running.server.stats().await;
    assert_eq!(stats.connections, 2);
    assert_eq!(stats.rooms, 1);
    running.server.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_login_over_capacity_is_refused_but_not_closed() {
    let running = start(1).await;
    let mut first = connect(&running.url).await;
    let mut second = connect(&running.url).await;
    login(&mut first, 1).await;

    let refused = login(&mut second, 2).await;
    assert_eq!(refused.header.msg_type, 2001);
    let body = refused.response();
    assert_eq!(body.code, status::CONNECTION_LIMIT);
    assert_eq!(body.message, "Connection limit reached");

    let ack = heartbeat(&mut second, 3).await;
    assert_eq!(ack.header.msg_type, MessageKind::Heartbeat.as_u32());
    running.server.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_wrong_path_is_rejected() {
    let running = start(100).await;
    let wrong = running.url.replace("/ws", "/elsewhere");
    match connect_async(wrong.as_str()).await {
        Err(WsError::Http(response)) => assert_eq!(response.status(), 404),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("handshake on the wrong path succeeded"),
    }
    running.server.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shutdown_closes_clients_and_stops_serving() {
    let running = start(100).await;
    let mut client = connect(&running.url).await;
    let mut anonymous = connect(&running.url).await;
    login(&mut client, 9).await;

    running.server.shutdown().await.unwrap();
    timeout(WAIT, running.serving)
        .await
        .expect("serve did not return")
        .unwrap()
        .unwrap();

    for peer in [&mut client, &mut anonymous] {
        assert!(wait_closed(peer).await, "client was not closed");
    }

    // Closed connections deregister on their way out.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(running.server.stats().await.connections, 0);
    assert!(connect_async(running.url.as_str()).await.is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_silent_client_is_swept_and_closed() {
    let running = start_with(ServerConfig {
        heartbeat_interval: Duration::from_millis(100),
        heartbeat_timeout: Duration::from_millis(300),
        ..local_config()
    })
    .await;
    let mut quiet = connect(&running.url).await;
    let mut chatty = connect(&running.url).await;
    login(&mut quiet, 1).await;
    login(&mut chatty, 2).await;

    // Keep one client heartbeating while the other goes quiet.
    for tick in 0..8 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        heartbeat(&mut chatty, tick).await;
    }

    assert!(wait_closed(&mut quiet).await, "silent client was not closed");
    let registry = running.server.registry();
    assert!(registry.lookup_by_user(1).await.is_none());
    assert!(registry.lookup_by_user(2).await.is_some());

    let ack = heartbeat(&mut chatty, 99).await;
    assert_eq!(ack.header.msg_type, MessageKind::Heartbeat.as_u32());
    running.server.shutdown().await.unwrap();
}

async fn send_binary(client: &mut Client, header: MessageHeader, payload: Payload) {
    let codec = BinaryCodec::new();
    let body = codec.encode_payload(header.msg_type, &payload).unwrap();
    let frame = codec.encode_envelope(&Envelope::new(header, body)).unwrap();
    client.send(Message::binary(frame)).await.unwrap();
}

async fn recv_binary(client: &mut Client) -> Envelope {
    loop {
        let message = timeout(WAIT, client.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .unwrap();
        match message {
            Message::Binary(bytes) => return BinaryCodec::new().decode_envelope(&bytes).unwrap(),
            Message::Text(text) => panic!("text frame on a binary gateway: {text}"),
            _ => continue,
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_binary_wire_format_end_to_end() {
    let running = start_with(ServerConfig {
        wire_format: WireFormat::Binary,
        ..local_config()
    })
    .await;
    let codec = BinaryCodec::new();
    let mut alice = connect(&running.url).await;
    let mut bob = connect(&running.url).await;

    for (client, user_id) in [(&mut alice, 1), (&mut bob, 2)] {
        send_binary(
            client,
            MessageHeader::new(MessageKind::Login),
            Payload::Login(LoginRequest {
                token: "token".into(),
                user_id,
                device_id: "binary".into(),
            }),
        )
        .await;
        let reply = recv_binary(client).await;
        assert_eq!(reply.header.msg_type, 1000);
        assert_eq!(
            codec.decode_response_body(&reply.body).unwrap().data,
            Some(ResponseData::Login { user_id })
        );
    }

    let join = |room: &str| Payload::JoinRoom(JoinRoomRequest { room_id: room.into() });
    send_binary(&mut alice, MessageHeader::new(MessageKind::JoinRoom), join("arena")).await;
    recv_binary(&mut alice).await;
    send_binary(&mut bob, MessageHeader::new(MessageKind::JoinRoom), join("arena")).await;
    let joined = recv_binary(&mut bob).await;
    assert_eq!(
        codec.decode_response_body(&joined.body).unwrap().data,
        Some(ResponseData::Room { room_id: "arena".into() })
    );

    let push = recv_binary(&mut alice).await;
    assert_eq!(push.header.msg_type, MessageKind::PushUserUpdate.as_u32());
    assert_eq!(
        codec.decode_payload(&push).unwrap(),
        Payload::UserUpdate(UserUpdatePush {
            user_id: 2,
            status: 1,
            location: "arena".into(),
        })
    );

    // Undecodable binary frames are answered in the same format.
    alice.send(Message::binary(vec![0xff, 0x00, 0x13])).await.unwrap();
    let error = recv_binary(&mut alice).await;
    assert_eq!(error.header.msg_type, 2004);
    running.server.shutdown().await.unwrap();
}
