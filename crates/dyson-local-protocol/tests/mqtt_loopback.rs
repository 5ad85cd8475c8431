//! Integration test: MQTT transport against a scripted broker on loopback.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use dyson_local_credentials::Credentials;
use dyson_local_protocol::{BrokerAddress, MqttTransport, ProtocolError, PubSubTransport};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const STATUS: &str = "527/NN2-EU-KHA1234A/status/current";
const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

const CONNECT: u8 = 0x10;
const SUBSCRIBE: u8 = 0x82;
const DISCONNECT: u8 = 0xE0;

/// Read one MQTT packet: fixed header byte and body.
async fn read_packet(stream: &mut TcpStream) -> Option<(u8, Vec<u8>)> {
    let header = stream.read_u8().await.ok()?;
    let mut len = 0usize;
    let mut shift = 0;
    loop {
        let byte = stream.read_u8().await.ok()?;
        len |= usize::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    let mut body = vec![0; len];
    stream.read_exact(&mut body).await.ok()?;
    Some((header, body))
}

fn read_string(body: &[u8], pos: &mut usize) -> String {
    let len = usize::from(u16::from_be_bytes([body[*pos], body[*pos + 1]]));
    let s = String::from_utf8(body[*pos + 2..*pos + 2 + len].to_vec()).unwrap();
    *pos += 2 + len;
    s
}

/// Username and password from a CONNECT body without a will.
fn login(body: &[u8]) -> (String, String) {
    let mut pos = 0;
    assert_eq!(read_string(body, &mut pos), "MQTT");
    assert_eq!(body[pos], 4, "protocol level 3.1.1");
    let flags = body[pos + 1];
    assert_eq!(flags & 0xC0, 0xC0, "username and password flags");
    pos += 4;
    let _client_id = read_string(body, &mut pos);
    let username = read_string(body, &mut pos);
    let password = read_string(body, &mut pos);
    (username, password)
}

fn publish_packet(topic: &str, payload: &[u8]) -> Vec<u8> {
    let remaining = 2 + topic.len() + payload.len();
    assert!(remaining < 128);
    let mut packet = vec![0x30, u8::try_from(remaining).unwrap()];
    packet.extend_from_slice(&u16::try_from(topic.len()).unwrap().to_be_bytes());
    packet.extend_from_slice(topic.as_bytes());
    packet.extend_from_slice(payload);
    packet
}

fn credentials() -> Credentials {
    Credentials::new("NN2-EU-KHA1234A", "hunter2-hash")
}

async fn bind() -> (TcpListener, BrokerAddress) {
    let listener = TcpListener::bind((LOCALHOST, 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, BrokerAddress::new("mqtt", LOCALHOST, port))
}

#[tokio::test]
async fn connect_subscribe_and_receive() {
    let (listener, broker) = bind().await;

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();

        let (header, body) = read_packet(&mut stream).await.unwrap();
        assert_eq!(header, CONNECT);
        let login = login(&body);
        stream.write_all(&[0x20, 0x02, 0x00, 0x00]).await.unwrap();

        let (header, body) = read_packet(&mut stream).await.unwrap();
        assert_eq!(header, SUBSCRIBE);
        let mut pos = 2;
        let topic = read_string(&body, &mut pos);
        let qos = body[pos];
        stream
            .write_all(&[0x90, 0x03, body[0], body[1], 0x00])
            .await
            .unwrap();

        stream
            .write_all(&publish_packet(STATUS, br#"{"msg":"CURRENT-STATE"}"#))
            .await
            .unwrap();

        // Drain until the client hangs up, noting whether it said goodbye.
        let mut disconnected = false;
        while let Some((header, _)) = read_packet(&mut stream).await {
            disconnected |= header == DISCONNECT;
        }
        (login, topic, qos, disconnected)
    });

    let opened = MqttTransport::default().open(&broker, &credentials()).unwrap();
    let mut deliveries = opened.deliveries;
    opened.handshake.outcome().await.unwrap();
    opened.link.subscribe(STATUS).await.unwrap();

    let delivery = tokio::time::timeout(Duration::from_secs(5), deliveries.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(delivery.topic, STATUS);
    assert_eq!(delivery.payload, br#"{"msg":"CURRENT-STATE"}"#);

    opened.link.close().await.unwrap();

    let (login, topic, qos, disconnected) =
        tokio::time::timeout(Duration::from_secs(5), server).await.unwrap().unwrap();
    assert_eq!(login, ("NN2-EU-KHA1234A".to_string(), "hunter2-hash".to_string()));
    assert_eq!(topic, STATUS);
    assert_eq!(qos, 0);
    assert!(disconnected);
}

#[tokio::test]
async fn refused_connack_fails_handshake() {
    let (listener, broker) = bind().await;

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let _ = read_packet(&mut stream).await;
        // Return code 5: not authorised.
        stream.write_all(&[0x20, 0x02, 0x00, 0x05]).await.unwrap();
        let _ = read_packet(&mut stream).await;
    });

    let opened = MqttTransport::default().open(&broker, &credentials()).unwrap();
    let err = tokio::time::timeout(Duration::from_secs(5), opened.handshake.outcome())
        .await
        .unwrap()
        .unwrap_err();
    assert!(!err.to_string().contains("hunter2-hash"));
    opened.link.close().await.unwrap();
}

#[tokio::test]
async fn unreachable_broker_fails_handshake() {
    let (listener, broker) = bind().await;
    drop(listener);

    let opened = MqttTransport::default().open(&broker, &credentials()).unwrap();
    let err = tokio::time::timeout(Duration::from_secs(5), opened.handshake.outcome())
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, ProtocolError::Connection(_)));
}

#[tokio::test]
async fn rejected_subscription_fails_subscribe() {
    let (listener, broker) = bind().await;

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let _ = read_packet(&mut stream).await;
        stream.write_all(&[0x20, 0x02, 0x00, 0x00]).await.unwrap();
        let (_, body) = read_packet(&mut stream).await.unwrap();
        stream
            .write_all(&[0x90, 0x03, body[0], body[1], 0x80])
            .await
            .unwrap();
        while read_packet(&mut stream).await.is_some() {}
    });

    let opened = MqttTransport::default().open(&broker, &credentials()).unwrap();
    opened.handshake.outcome().await.unwrap();
    let err = opened.link.subscribe(STATUS).await.unwrap_err();
    match err {
        ProtocolError::SubscribeRejected(topic) => assert_eq!(topic, STATUS),
        other => panic!("unexpected error: {other}"),
    }
    opened.link.close().await.unwrap();
}

#[tokio::test]
async fn dropped_connection_reconnects_and_resubscribes() {
    let (listener, broker) = bind().await;

    let server = tokio::spawn(async move {
        // First session: accept, acknowledge the subscription, then vanish.
        let (mut stream, _) = listener.accept().await.unwrap();
        let _ = read_packet(&mut stream).await.unwrap();
        stream.write_all(&[0x20, 0x02, 0x00, 0x00]).await.unwrap();
        let (_, body) = read_packet(&mut stream).await.unwrap();
        stream
            .write_all(&[0x90, 0x03, body[0], body[1], 0x00])
            .await
            .unwrap();
        drop(stream);

        // Second session: the client must log in and subscribe again.
        let (mut stream, _) = listener.accept().await.unwrap();
        let (header, body) = read_packet(&mut stream).await.unwrap();
        assert_eq!(header, CONNECT);
        let relogin = login(&body);
        stream.write_all(&[0x20, 0x02, 0x00, 0x00]).await.unwrap();
        let body = loop {
            let (header, body) = read_packet(&mut stream).await.unwrap();
            if header == SUBSCRIBE {
                break body;
            }
        };
        let mut pos = 2;
        let topic = read_string(&body, &mut pos);
        stream
            .write_all(&[0x90, 0x03, body[0], body[1], 0x00])
            .await
            .unwrap();
        stream
            .write_all(&publish_packet(STATUS, br#"{"msg":"CURRENT-STATE"}"#))
            .await
            .unwrap();

        while read_packet(&mut stream).await.is_some() {}
        (relogin, topic)
    });

    let opened = MqttTransport::default().open(&broker, &credentials()).unwrap();
    let mut deliveries = opened.deliveries;
    opened.handshake.outcome().await.unwrap();
    opened.link.subscribe(STATUS).await.unwrap();

    let delivery = tokio::time::timeout(Duration::from_secs(10), deliveries.recv())
        .await
        .expect("no delivery after reconnect")
        .unwrap();
    assert_eq!(delivery.topic, STATUS);

    opened.link.close().await.unwrap();
    let (relogin, topic) =
        tokio::time::timeout(Duration::from_secs(5), server).await.unwrap().unwrap();
    assert_eq!(relogin.0, "NN2-EU-KHA1234A");
    assert_eq!(topic, STATUS);
}

#[tokio::test]
async fn unsubscribed_topic_is_not_restored() {
    let (listener, broker) = bind().await;

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let _ = read_packet(&mut stream).await.unwrap();
        stream.write_all(&[0x20, 0x02, 0x00, 0x00]).await.unwrap();
        let (_, body) = read_packet(&mut stream).await.unwrap();
        stream
            .write_all(&[0x90, 0x03, body[0], body[1], 0x00])
            .await
            .unwrap();
        // UNSUBSCRIBE, then hang up.
        let (header, _) = read_packet(&mut stream).await.unwrap();
        assert_eq!(header, 0xA2);
        drop(stream);

        let (mut stream, _) = listener.accept().await.unwrap();
        let _ = read_packet(&mut stream).await.unwrap();
        stream.write_all(&[0x20, 0x02, 0x00, 0x00]).await.unwrap();
        let mut headers = Vec::new();
        while let Some((header, _)) = read_packet(&mut stream).await {
            headers.push(header);
        }
        headers
    });

    let opened = MqttTransport::default().open(&broker, &credentials()).unwrap();
    opened.handshake.outcome().await.unwrap();
    opened.link.subscribe(STATUS).await.unwrap();
    opened.link.unsubscribe(STATUS).await.unwrap();

    // Let the pump notice the drop and reconnect before closing.
    tokio::time::sleep(Duration::from_secs(3)).await;
    opened.link.close().await.unwrap();

    let headers = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap();
    assert!(!headers.contains(&SUBSCRIBE), "unexpected resubscribe: {headers:x?}");
}
