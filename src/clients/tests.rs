#![allow(clippy::unwrap_used)]
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::sync::Mutex;

use super::*;
use crate::address::DestinationAddress;
use crate::monitor::{CatchUpQuery, EventSource};
use crate::observer::{DestinationMinter, SourceTransfer};

type Requests = Arc<Mutex<Vec<(String, Value)>>>;

/// Serve `app` on an ephemeral loopback port, returning its base URL
async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

async fn graphql(State(requests): State<Requests>, Json(body): Json<Value>) -> Json<Value> {
    let query = body["query"].as_str().unwrap_or_default().to_string();
    requests.lock().await.push((query.clone(), body["variables"].clone()));

    let data = if query.contains("GetTipIndex") {
        json!({ "nodeStatus": { "tip": { "index": 1234 } } })
    } else if query.contains("GetBlockIndex") {
        json!({ "chainQuery": { "blockQuery": { "block": { "index": 1200 } } } })
    } else if query.contains("GetBlockHash") {
        json!({ "chainQuery": { "blockQuery": { "block": null } } })
    } else {
        json!({ "transferNCGHistories": [{
            "blockHash": "0xblock",
            "txId": "tx1",
            "sender": "0xsender",
            "recipient": "0xwatched",
            "amount": "100.5",
            "memo": "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed"
        }] })
    };
    Json(json!({ "data": data }))
}

#[tokio::test]
async fn test_graphql_event_source() {
    let requests = Requests::default();
    let app = Router::new()
        .route("/graphql", post(graphql))
        .with_state(requests.clone());
    let source = GraphQlEventSource::new(format!("{}/graphql", serve(app).await)).unwrap();

    assert_eq!(source.tip_index().await.unwrap(), 1234);
    assert_eq!(source.block_index("0xblock").await.unwrap(), 1200);
    assert!(source.block_hash(99999).await.is_err());

    let events = source.events_for_block("0xblock", "0xwatched").await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].tx_id, "tx1");
    assert_eq!(events[0].amount, "100.5");
    assert_eq!(events[0].source_address, "0xwatched");

    let requests = requests.lock().await;
    let (_, variables) = requests.last().unwrap();
    assert_eq!(variables["blockHash"], "0xblock");
    assert_eq!(variables["recipient"], "0xwatched");
}

#[tokio::test]
async fn test_graphql_errors_are_surfaced() {
    let app = Router::new().route(
        "/",
        post(|| async { Json(json!({ "data": null, "errors": [{ "message": "boom" }] })) }),
    );
    let source = GraphQlEventSource::new(serve(app).await).unwrap();

    let error = source.tip_index().await.unwrap_err();
    assert!(error.to_string().contains("boom"));
}

#[tokio::test]
async fn test_catch_up_posts_block_from() {
    let requests = Requests::default();
    let app = Router::new()
        .route(
            "/catch-up",
            post(
                |State(requests): State<Requests>, Json(body): Json<Value>| async move {
                    requests.lock().await.push(("catch-up".to_string(), body));
                    Json(json!([]))
                },
            ),
        )
        .with_state(requests.clone());
    let catch_up = HttpCatchUp::new(format!("{}/catch-up", serve(app).await)).unwrap();

    assert!(catch_up.events_since("0xfrom").await.unwrap().is_empty());
    assert_eq!(
        requests.lock().await[0].1,
        json!({ "blockFrom": "0xfrom" })
    );
}

#[tokio::test]
async fn test_executor_client() {
    let requests = Requests::default();
    let app = Router::new()
        .route(
            "/mint",
            post(
                |State(requests): State<Requests>, Json(body): Json<Value>| async move {
                    requests.lock().await.push(("mint".to_string(), body));
                    Json(json!({ "transactionHash": "0xhash" }))
                },
            ),
        )
        .route(
            "/transfer",
            post(|| async {
                (StatusCode::BAD_GATEWAY, "node unavailable").into_response()
            }),
        )
        .with_state(requests.clone());
    let executor = ExecutorClient::new(format!("{}/", serve(app).await)).unwrap();

    let recipient = DestinationAddress::parse("0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed").unwrap();
    let amount = 990 * 10u128.pow(18);
    let receipt = executor.mint(&recipient, amount).await.unwrap();
    assert_eq!(receipt.transaction_hash, "0xhash");
    assert_eq!(
        requests.lock().await[0].1,
        json!({
            "recipient": "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed",
            "amount": "990000000000000000000"
        })
    );

    let error = executor.transfer("0xsender", "1", "memo").await.unwrap_err();
    assert!(error.to_string().contains("502"));
}

#[test]
fn test_join() {
    assert_eq!(join("http://a/", "/mint"), "http://a/mint");
    assert_eq!(join("http://a", "mint"), "http://a/mint");
}
