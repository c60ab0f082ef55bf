//! Chat channels and the live change bridge.
//!
//! Runs against the Postgres and Redis named by `TEST_DATABASE_BASE_URL` and `TEST_REDIS_URL`.

mod common;

use std::time::Duration;

use axum::http::StatusCode;
use common::app;
use serde_json::json;

use hearth::app::chat::MESSAGE_TOO_LONG;
use hearth::app::realtime::{RealtimeBridge, StoredRecords};
use hearth::domain::realtime::{LiveItem, Topic};
use hearth::infra::realtime::RealtimeHub;

#[tokio::test]
async fn only_members_can_send_and_read() {
    let app = app().await;
    let member = app.create_user("chat_member").await;
    let outsider = app.create_user("chat_outsider").await;
    let community = app.create_community("chatters").await;
    let channel = app.create_channel(community, "general").await;
    app.join(&member, community).await;
    let path = format!("/v1/channels/{}/messages", channel);

    let resp = app
        .post_json(&path, json!({ "content": "hi" }), Some(&outsider.access_token))
        .await;
    assert_eq!(resp.status, StatusCode::FORBIDDEN);

    let resp = app.get(&path, Some(&outsider.access_token)).await;
    assert_eq!(resp.status, StatusCode::FORBIDDEN);

    let resp = app
        .post_json(&path, json!({ "content": "hi" }), Some(&member.access_token))
        .await;
    assert_eq!(resp.status, StatusCode::OK);
    let body = resp.json();
    assert_eq!(body["content"], "hi");
    assert_eq!(body["author"]["handle"], member.handle.as_str());

    let resp = app
        .post_json(&path, json!({ "content": "   " }), Some(&member.access_token))
        .await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);

    let resp = app
        .post_json(
            &path,
            json!({ "content": "x".repeat(2001) }),
            Some(&member.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert_eq!(resp.error_message(), MESSAGE_TOO_LONG);
}

#[tokio::test]
async fn unknown_channel_is_not_found() {
    let app = app().await;
    let user = app.create_user("chat_unknown").await;

    let resp = app
        .post_json(
            &format!("/v1/channels/{}/messages", uuid::Uuid::new_v4()),
            json!({ "content": "anyone?" }),
            Some(&user.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn message_history_pages_newest_first() {
    let app = app().await;
    let member = app.create_user("chat_history").await;
    let community = app.create_community("historians").await;
    let channel = app.create_channel(community, "archive").await;
    app.join(&member, community).await;
    let path = format!("/v1/channels/{}/messages", channel);

    for n in 0..3 {
        let resp = app
            .post_json(
                &path,
                json!({ "content": format!("message {}", n) }),
                Some(&member.access_token),
            )
            .await;
        assert_eq!(resp.status, StatusCode::OK);
    }

    let resp = app
        .get(&format!("{}?limit=2", path), Some(&member.access_token))
        .await;
    let body = resp.json();
    let first: Vec<String> = body["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["content"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(first, vec!["message 2", "message 1"]);
    let cursor = body["next_cursor"].as_str().unwrap().to_string();

    let resp = app
        .get(
            &format!("{}?limit=2&cursor={}", path, cursor),
            Some(&member.access_token),
        )
        .await;
    let body = resp.json();
    assert_eq!(body["items"][0]["content"], "message 0");
    assert!(body["next_cursor"].is_null());
}

#[tokio::test]
async fn inserted_messages_reach_subscribers_with_author() {
    let app = app().await;
    let member = app.create_user("chat_live").await;
    let community = app.create_community("live").await;
    let channel = app.create_channel(community, "live").await;
    app.join(&member, community).await;

    let hub = RealtimeHub::new(16);
    let listener = tokio::spawn(hub.clone().run_listener(app.state.db.clone()));
    tokio::time::sleep(Duration::from_millis(500)).await;

    let bridge = RealtimeBridge::new(hub, StoredRecords::new(app.state.db.clone()));
    let mut subscription = bridge.subscribe(Topic::Channel(channel));

    // 8000 bytes of body alone; the change notification must still fit.
    let long = "😀".repeat(2000);
    let resp = app
        .post_json(
            &format!("/v1/channels/{}/messages", channel),
            json!({ "content": long }),
            Some(&member.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::OK);

    let item = tokio::time::timeout(Duration::from_secs(5), subscription.next())
        .await
        .expect("no live item within 5s")
        .expect("subscription closed");
    match item {
        LiveItem::Message(message) => {
            assert_eq!(message.content, long);
            assert_eq!(message.channel_id, channel);
            assert_eq!(message.author.unwrap().id, member.id);
        }
        other => panic!("unexpected live item: {:?}", other),
    }

    listener.abort();
}
