//! Feed pagination, visibility and suggestion tests.
//!
//! Runs against the Postgres and Redis named by `TEST_DATABASE_BASE_URL` and `TEST_REDIS_URL`.

mod common;

use axum::http::StatusCode;
use common::app;
use serde_json::{json, Value};
use uuid::Uuid;

fn item_ids(body: &Value) -> Vec<String> {
    body["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|item| item["id"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn feed_pages_are_newest_first_and_disjoint() {
    let app = app().await;
    let author = app.create_user("feed_page_author").await;
    let mut expected = Vec::new();
    for age in 1..=5 {
        let id = app
            .insert_post(author.id, "paging", "public", &["pagingtag"], None, age)
            .await;
        expected.push(id.to_string());
    }

    let mut seen = Vec::new();
    let mut path = "/v1/feed?tag=pagingtag&limit=2".to_string();
    let mut pages = 0;
    loop {
        let resp = app.get(&path, Some(&author.access_token)).await;
        assert_eq!(resp.status, StatusCode::OK);
        let body = resp.json();
        seen.extend(item_ids(&body));
        pages += 1;

        if !body["has_more"].as_bool().unwrap() {
            break;
        }
        let cursor = body["next_cursor"].as_str().unwrap();
        path = format!("/v1/feed?tag=pagingtag&limit=2&cursor={}", cursor);
    }

    assert_eq!(pages, 3);
    assert_eq!(seen, expected);
}

#[tokio::test]
async fn feed_applies_visibility_rules() {
    let app = app().await;
    let viewer = app.create_user("feed_vis_viewer").await;
    let author = app.create_user("feed_vis_author").await;

    let public = app
        .insert_post(author.id, "public", "public", &["vistag"], None, 4)
        .await;
    let friends = app
        .insert_post(author.id, "friends", "friends", &["vistag"], None, 3)
        .await;
    app.insert_post(author.id, "private", "private", &["vistag"], None, 2)
        .await;
    app.insert_post(author.id, "unlisted", "unlisted", &["vistag"], None, 1)
        .await;

    let resp = app
        .get("/v1/feed?tag=vistag", Some(&viewer.access_token))
        .await;
    assert_eq!(item_ids(&resp.json()), vec![public.to_string()]);

    let resp = app
        .post_json(
            &format!("/v1/users/{}/follow", author.id),
            json!({}),
            Some(&viewer.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::OK);

    let resp = app
        .get("/v1/feed?tag=vistag", Some(&viewer.access_token))
        .await;
    assert_eq!(
        item_ids(&resp.json()),
        vec![friends.to_string(), public.to_string()]
    );

    // Authors always see their own posts.
    let resp = app
        .get("/v1/feed?tag=vistag", Some(&author.access_token))
        .await;
    assert_eq!(item_ids(&resp.json()).len(), 4);
}

#[tokio::test]
async fn community_posts_need_membership() {
    let app = app().await;
    let member = app.create_user("feed_comm_member").await;
    let viewer = app.create_user("feed_comm_viewer").await;
    let community = app.create_community("gardeners").await;
    app.join(&member, community).await;

    let resp = app
        .post_json(
            "/v1/posts",
            json!({ "content": "tomatoes #commtag", "community_id": community }),
            Some(&member.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::OK);
    let post_id = resp.json()["id"].as_str().unwrap().to_string();

    let resp = app
        .get("/v1/feed?tag=commtag", Some(&viewer.access_token))
        .await;
    assert!(item_ids(&resp.json()).is_empty());

    let resp = app
        .get(
            &format!("/v1/feed?community_id={}", community),
            Some(&viewer.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::OK);
    assert!(item_ids(&resp.json()).is_empty());

    app.join(&viewer, community).await;
    let resp = app
        .get("/v1/feed?tag=commtag", Some(&viewer.access_token))
        .await;
    assert_eq!(item_ids(&resp.json()), vec![post_id]);
}

#[tokio::test]
async fn posts_at_the_size_limits_are_accepted() {
    let app = app().await;
    let member = app.create_user("feed_big_member").await;
    let community = app.create_community("novelists").await;
    app.join(&member, community).await;

    // Two bytes per character, well past a NOTIFY payload on its own.
    let content = "é".repeat(5000);
    let media_urls: Vec<String> = (0..10)
        .map(|n| format!("https://media.example/{}/{}", n, "m".repeat(300)))
        .collect();

    let resp = app
        .post_json(
            "/v1/posts",
            json!({ "content": content, "media_urls": media_urls, "community_id": community }),
            Some(&member.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::OK);
    let post_id = resp.json()["id"].as_str().unwrap().to_string();

    let resp = app
        .get(&format!("/v1/posts/{}", post_id), Some(&member.access_token))
        .await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.json()["content"], content.as_str());
    assert_eq!(resp.json()["media_urls"].as_array().unwrap().len(), 10);

    let resp = app
        .post_json(
            "/v1/posts",
            json!({ "content": format!("{}é", content), "community_id": community }),
            Some(&member.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert_eq!(resp.error_message(), "content must be at most 5000 characters");
}

#[tokio::test]
async fn stale_membership_fill_cannot_hide_a_join() {
    let app = app().await;
    let member = app.create_user("feed_fill_member").await;
    let author = app.create_user("feed_fill_author").await;
    let community = app.create_community("fillers").await;
    app.join(&author, community).await;

    let resp = app
        .post_json(
            "/v1/posts",
            json!({ "content": "seedlings #filltag", "community_id": community }),
            Some(&author.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::OK);
    let post_id = resp.json()["id"].as_str().unwrap().to_string();

    app.join(&member, community).await;

    // A read that loaded the rows before the join lands its fill late.
    let key = format!("membership:{}", member.id);
    let landed = app
        .state
        .cache
        .fill_json(&key, &Vec::<Uuid>::new(), 300)
        .await;
    assert!(!landed);

    let resp = app
        .get("/v1/feed?tag=filltag", Some(&member.access_token))
        .await;
    assert_eq!(item_ids(&resp.json()), vec![post_id]);
}

#[tokio::test]
async fn non_members_cannot_post_into_a_community() {
    let app = app().await;
    let outsider = app.create_user("feed_comm_outsider").await;
    let community = app.create_community("closed").await;

    let resp = app
        .post_json(
            "/v1/posts",
            json!({ "content": "hello", "community_id": community }),
            Some(&outsider.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::FORBIDDEN);
    assert_eq!(resp.error_message(), "not a member of this community");
}

#[tokio::test]
async fn hidden_posts_leave_the_feed_until_restored() {
    let app = app().await;
    let admin = app.create_user("feed_hide_admin").await;
    let author = app.create_user("feed_hide_author").await;
    let post = app
        .insert_post(author.id, "spam", "public", &["hidetag"], None, 1)
        .await;
    let path = format!("/v1/moderation/posts/{}/hide", post);

    let resp = app
        .post_admin(&path, json!({}), &admin.access_token, None)
        .await;
    assert_eq!(resp.status, StatusCode::FORBIDDEN);

    let resp = app
        .post_admin(
            &path,
            json!({ "reason": "spam" }),
            &admin.access_token,
            Some(app.admin_token()),
        )
        .await;
    assert_eq!(resp.status, StatusCode::NO_CONTENT);

    let resp = app
        .get("/v1/feed?tag=hidetag", Some(&author.access_token))
        .await;
    assert!(item_ids(&resp.json()).is_empty());
    let resp = app
        .get(&format!("/v1/posts/{}", post), Some(&author.access_token))
        .await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);

    let resp = app
        .post_admin(
            &format!("/v1/moderation/posts/{}/unhide", post),
            json!({}),
            &admin.access_token,
            Some(app.admin_token()),
        )
        .await;
    assert_eq!(resp.status, StatusCode::NO_CONTENT);

    let resp = app
        .get("/v1/feed?tag=hidetag", Some(&author.access_token))
        .await;
    assert_eq!(item_ids(&resp.json()), vec![post.to_string()]);
}

#[tokio::test]
async fn trending_sort_reorders_the_page() {
    let app = app().await;
    let author = app.create_user("feed_trend_author").await;
    let older = app
        .insert_post(author.id, "older", "public", &["trendtag"], None, 60)
        .await;
    let newer = app
        .insert_post(author.id, "newer", "public", &["trendtag"], None, 1)
        .await;
    sqlx::query("UPDATE posts SET likes_count = 9 WHERE id = $1")
        .bind(older)
        .execute(app.pool())
        .await
        .unwrap();

    let resp = app
        .get("/v1/feed?tag=trendtag", Some(&author.access_token))
        .await;
    assert_eq!(
        item_ids(&resp.json()),
        vec![newer.to_string(), older.to_string()]
    );

    let resp = app
        .get(
            "/v1/feed?tag=trendtag&sort=trending",
            Some(&author.access_token),
        )
        .await;
    let body = resp.json();
    assert_eq!(body["sort"], "trending");
    assert_eq!(item_ids(&body), vec![older.to_string(), newer.to_string()]);
}

#[tokio::test]
async fn feed_rejects_bad_parameters() {
    let app = app().await;
    let user = app.create_user("feed_bad_params").await;

    let resp = app.get("/v1/feed?limit=51", Some(&user.access_token)).await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);

    let resp = app
        .get("/v1/feed?cursor=not-a-cursor", Some(&user.access_token))
        .await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert_eq!(resp.error_message(), "invalid cursor");

    let resp = app.get("/v1/feed", None).await;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn suggestions_come_from_recent_likes() {
    let app = app().await;
    let viewer = app.create_user("sugg_viewer").await;
    let popular = app.create_user("sugg_popular").await;
    let followed = app.create_user("sugg_followed").await;

    let mut liked = Vec::new();
    for age in 1..=3 {
        liked.push(
            app.insert_post(popular.id, "p", "public", &["suggrust", "suggcats"], None, age)
                .await,
        );
    }
    liked.push(
        app.insert_post(followed.id, "f", "public", &["suggcats"], None, 4)
            .await,
    );
    app.post_json(
        &format!("/v1/users/{}/follow", followed.id),
        json!({}),
        Some(&viewer.access_token),
    )
    .await;

    for post in &liked {
        let resp = app
            .post_json(
                &format!("/v1/posts/{}/like", post),
                json!({}),
                Some(&viewer.access_token),
            )
            .await;
        assert_eq!(resp.status, StatusCode::OK);
    }

    let resp = app
        .get("/v1/feed/suggestions", Some(&viewer.access_token))
        .await;
    assert_eq!(resp.status, StatusCode::OK);
    let body = resp.json();

    let tags: Vec<&str> = body["tags"]
        .as_array()
        .unwrap()
        .iter()
        .map(|tag| tag["tag"].as_str().unwrap())
        .collect();
    assert_eq!(tags, vec!["suggcats", "suggrust"]);

    let authors = body["authors"].as_array().unwrap();
    assert_eq!(authors.len(), 1);
    assert_eq!(authors[0]["author"]["id"], popular.id.to_string());
    assert_eq!(authors[0]["count"], 3);
}
