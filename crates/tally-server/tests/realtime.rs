//! End-to-end: a real server on ephemeral ports driven over HTTP and WebSocket.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tally_server::{ServerHandle, TallyServer};
use tally_settings::ServerSettings;
use tally_store::{Database, OptionRepo};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

async fn boot() -> ServerHandle {
    let db = Database::in_memory().unwrap();
    let _ = OptionRepo::new(db.clone())
        .seed(&["Option A", "Option B", "Option C"])
        .unwrap();
    let settings = ServerSettings {
        host: "127.0.0.1".into(),
        http_port: 0,
        ws_port: 0,
        ..ServerSettings::default()
    };
    TallyServer::new(settings, db).start().await.unwrap()
}

async fn open_ws(handle: &ServerHandle) -> Ws {
    let (ws, _) = connect_async(format!("ws://{}/ws", handle.ws_addr))
        .await
        .unwrap();
    ws
}

/// Next application frame as JSON, skipping control frames.
async fn next_json(ws: &mut Ws) -> Value {
    loop {
        let msg = tokio::time::timeout(WAIT, ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .unwrap();
        match msg {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

/// Open a socket and consume its `connection-ack`.
async fn connected(handle: &ServerHandle) -> Ws {
    let mut ws = open_ws(handle).await;
    let ack = next_json(&mut ws).await;
    assert_eq!(ack["type"], "connection-ack");
    ws
}

fn api(handle: &ServerHandle, path: &str) -> String {
    format!("http://{}{path}", handle.http_addr)
}

async fn login(http: &reqwest::Client, handle: &ServerHandle, name: &str) -> String {
    let body: Value = http
        .post(api(handle, "/api/auth/login"))
        .json(&json!({ "name": name }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["success"], true);
    body["sessionId"].as_str().unwrap().to_string()
}

async fn vote(
    http: &reqwest::Client,
    handle: &ServerHandle,
    token: &str,
    option_id: i64,
) -> reqwest::Response {
    http.post(api(handle, "/api/voting/vote"))
        .header("cookie", format!("voting-session={token}"))
        .json(&json!({ "optionId": option_id }))
        .send()
        .await
        .unwrap()
}

async fn wait_for_count(handle: &ServerHandle, expected: usize) {
    tokio::time::timeout(WAIT, async {
        while handle.broadcast().connection_count() != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("connection count never settled");
}

#[tokio::test]
async fn connect_receives_ack() {
    let handle = boot().await;
    let mut ws = open_ws(&handle).await;
    let ack = next_json(&mut ws).await;
    assert_eq!(ack["type"], "connection-ack");
    assert_eq!(ack["data"], "Connected to voting server");
    assert!(ack["timestamp"].as_i64().unwrap() > 0);
    wait_for_count(&handle, 1).await;
    handle.shutdown(Some(WAIT)).await;
}

#[tokio::test]
async fn ping_envelope_gets_pong() {
    let handle = boot().await;
    let mut ws = connected(&handle).await;
    ws.send(Message::Text(r#"{"type":"ping"}"#.into())).await.unwrap();
    let reply = next_json(&mut ws).await;
    assert_eq!(reply["type"], "pong");
    assert_eq!(reply["data"], "pong");
    handle.shutdown(Some(WAIT)).await;
}

#[tokio::test]
async fn malformed_message_is_reported_and_connection_kept() {
    let handle = boot().await;
    let http = reqwest::Client::new();
    let mut ws = connected(&handle).await;

    ws.send(Message::Text("definitely not json".into())).await.unwrap();
    let reply = next_json(&mut ws).await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["data"], "Invalid message format");
    wait_for_count(&handle, 1).await;

    let token = login(&http, &handle, "mia").await;
    assert!(vote(&http, &handle, &token, 1).await.status().is_success());
    let update = next_json(&mut ws).await;
    assert_eq!(update["type"], "vote-update");
    assert_eq!(update["data"]["totalVotes"], 1);
    handle.shutdown(Some(WAIT)).await;
}

#[tokio::test]
async fn every_client_sees_every_update_in_order() {
    const CLIENTS: usize = 3;
    const VOTES: usize = 5;

    let handle = boot().await;
    let http = reqwest::Client::new();
    let mut sockets = Vec::new();
    for _ in 0..CLIENTS {
        sockets.push(connected(&handle).await);
    }
    wait_for_count(&handle, CLIENTS).await;

    for i in 0..VOTES {
        let token = login(&http, &handle, &format!("voter{i}")).await;
        let option = (i % 3) as i64 + 1;
        assert!(vote(&http, &handle, &token, option).await.status().is_success());
    }

    for ws in &mut sockets {
        let mut totals = Vec::new();
        for _ in 0..VOTES {
            let update = next_json(ws).await;
            assert_eq!(update["type"], "vote-update");
            totals.push(update["data"]["totalVotes"].as_u64().unwrap());
        }
        assert_eq!(totals, [1, 2, 3, 4, 5]);
    }
    handle.shutdown(Some(WAIT)).await;
}

#[tokio::test]
async fn closed_client_is_unregistered() {
    let handle = boot().await;
    let mut ws = connected(&handle).await;
    wait_for_count(&handle, 1).await;
    ws.close(None).await.unwrap();
    wait_for_count(&handle, 0).await;
    handle.shutdown(Some(WAIT)).await;
}

#[tokio::test]
async fn shutdown_closes_sockets_with_going_away() {
    let handle = boot().await;
    let mut ws = connected(&handle).await;
    wait_for_count(&handle, 1).await;

    let stopper = tokio::spawn(handle.shutdown(Some(WAIT)));

    let frame = loop {
        let msg = tokio::time::timeout(WAIT, ws.next())
            .await
            .expect("timed out waiting for close")
            .expect("stream ended before close")
            .unwrap();
        if let Message::Close(frame) = msg {
            break frame.expect("close frame carries a code");
        }
    };
    assert_eq!(u16::from(frame.code), 1001);
    assert_eq!(frame.reason.as_str(), "Server shutting down");
    stopper.await.unwrap();
}

#[tokio::test]
async fn http_voting_flow() {
    let handle = boot().await;
    let http = reqwest::Client::new();

    let options: Value = http
        .get(api(&handle, "/api/voting/options"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(options["options"].as_array().unwrap().len(), 3);

    let unauth = vote(&http, &handle, "bogus", 1).await;
    assert_eq!(unauth.status(), 401);

    let token = login(&http, &handle, "nia").await;
    let session: Value = http
        .get(api(&handle, "/api/auth/session"))
        .header("cookie", format!("voting-session={token}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(session["valid"], true);
    assert_eq!(session["hasVoted"], false);

    let ok = vote(&http, &handle, &token, 3).await;
    assert_eq!(ok.status(), 200);
    let body: Value = ok.json().await.unwrap();
    assert_eq!(body["vote"]["optionName"], "Option C");

    let again = vote(&http, &handle, &token, 1).await;
    assert_eq!(again.status(), 409);

    let results: Value = http
        .get(api(&handle, "/api/voting/results"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(results["results"]["totalVotes"], 1);
    assert_eq!(results["results"]["options"][2]["percentage"], 100);

    let health: Value = http
        .get(api(&handle, "/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");

    handle.shutdown(Some(WAIT)).await;
}
