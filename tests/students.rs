mod common;

use axum::http::StatusCode;
use common::{read_json, student_body, test_app};
use serde_json::json;
use student_records::models::Role;
use student_records::store::UserRepository;

#[tokio::test]
async fn student_crud_is_admin_only() {
    let app = test_app();
    app.register("plain", "plain-password", &["user"]).await;
    let user = app.access_token("plain", "plain-password").await;

    let response = app
        .create_student(&user, student_body("S1", "AB0000001", "1A"))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let response = app.send("GET", "/api/students", None, Some(&user)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let response = app.send("GET", "/api/students/me", None, Some(&user)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn creating_a_student_links_a_matching_user() {
    let app = test_app();
    let admin = app.admin_token().await;
    app.register("S777", "s777-password", &["user"]).await;

    let response = app
        .create_student(&admin, student_body("S777", "AB0000777", "2B"))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = read_json(response).await;
    assert_eq!(body["student"]["user"]["username"], "S777");

    let user = app
        .store
        .find_user_by_username("S777")
        .await
        .expect("lookup")
        .expect("user");
    assert_eq!(user.roles, vec![Role::User, Role::Student]);
    assert_eq!(
        body["student"]["user_id"],
        json!(user.id.to_string())
    );

    let token = app.access_token("S777", "s777-password").await;
    let response = app.send("GET", "/api/students/me", None, Some(&token)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await["student"]["identifier"], "S777");
}

#[tokio::test]
async fn creating_a_student_without_matching_user_leaves_it_unlinked() {
    let app = test_app();
    let admin = app.admin_token().await;
    let response = app
        .create_student(&admin, student_body("S778", "AB0000778", "2B"))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = read_json(response).await;
    assert_eq!(body["student"]["user_id"], serde_json::Value::Null);
    assert_eq!(body["student"]["user"], serde_json::Value::Null);
}

#[tokio::test]
async fn duplicate_identifier_and_passport_are_reported_together() {
    let app = test_app();
    let admin = app.admin_token().await;
    app.create_student(&admin, student_body("S1", "AB0000001", "1A"))
        .await;

    let response = app
        .create_student(&admin, student_body("S1", "AB0000001", "1B"))
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = read_json(response).await;
    let paths: Vec<_> = body["fields"]
        .as_array()
        .expect("fields")
        .iter()
        .map(|field| field["path"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(paths, vec!["identifier", "passport_number"]);
}

#[tokio::test]
async fn blank_email_clears_and_omitted_email_is_kept() {
    let app = test_app();
    let admin = app.admin_token().await;
    let response = app
        .create_student(&admin, student_body("S10", "AB0000010", "1A"))
        .await;
    let id = read_json(response).await["student"]["id"]
        .as_str()
        .expect("id")
        .to_string();
    let uri = format!("/api/students/{id}");

    let response = app
        .send("PATCH", &uri, Some(json!({ "faculty": "Maths" })), Some(&admin))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["student"]["faculty"], "Maths");
    assert_eq!(body["student"]["email"], "s10@uni.edu");

    let response = app
        .send("PATCH", &uri, Some(json!({ "email": "" })), Some(&admin))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["student"]["email"], serde_json::Value::Null);
    assert_eq!(body["student"]["faculty"], "Maths");
}

#[tokio::test]
async fn update_rejects_taking_another_students_identifier() {
    let app = test_app();
    let admin = app.admin_token().await;
    app.create_student(&admin, student_body("S20", "AB0000020", "1A"))
        .await;
    let response = app
        .create_student(&admin, student_body("S21", "AB0000021", "1A"))
        .await;
    let id = read_json(response).await["student"]["id"]
        .as_str()
        .expect("id")
        .to_string();

    let uri = format!("/api/students/{id}");
    let response = app
        .send("PATCH", &uri, Some(json!({ "identifier": "S20" })), Some(&admin))
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    // keeping its own identifier is not a conflict
    let response = app
        .send("PATCH", &uri, Some(json!({ "identifier": "S21" })), Some(&admin))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn missing_and_malformed_ids() {
    let app = test_app();
    let admin = app.admin_token().await;
    let response = app
        .send("GET", "/api/students/not-a-uuid", None, Some(&admin))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let uri = format!("/api/students/{}", uuid::Uuid::new_v4());
    let response = app.send("GET", &uri, None, Some(&admin)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let response = app.send("DELETE", &uri, None, Some(&admin)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn deleting_a_student_soft_deletes_its_user() {
    let app = test_app();
    let admin = app.admin_token().await;
    app.register("S30", "s30-password", &["user"]).await;
    let response = app
        .create_student(&admin, student_body("S30", "AB0000030", "1A"))
        .await;
    let id = read_json(response).await["student"]["id"]
        .as_str()
        .expect("id")
        .to_string();

    let uri = format!("/api/students/{id}");
    let response = app.send("DELETE", &uri, None, Some(&admin)).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    assert!(app
        .store
        .find_user_by_username("S30")
        .await
        .expect("lookup")
        .is_none());
    let response = app.send("GET", &uri, None, Some(&admin)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        app.login("S30", "s30-password").await.status(),
        StatusCode::BAD_REQUEST
    );
}

#[tokio::test]
async fn listing_searches_by_group_and_orders_results() {
    let app = test_app();
    let admin = app.admin_token().await;
    for (identifier, passport, group) in [
        ("S3", "AB0000003", "3A"),
        ("S1", "AB0000001", "3a-evening"),
        ("S2", "AB0000002", "2B"),
        ("S4", "AB0000004", "13A"),
    ] {
        let response = app
            .create_student(&admin, student_body(identifier, passport, group))
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let response = app
        .send(
            "GET",
            "/api/students?search_by=group&search=3A&sort_by=identifier&order=desc",
            None,
            Some(&admin),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["total"], 3);
    let identifiers: Vec<_> = body["students"]
        .as_array()
        .expect("students")
        .iter()
        .map(|student| student["identifier"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(identifiers, vec!["S4", "S3", "S1"]);
}

#[tokio::test]
async fn listing_pages_and_rejects_unknown_keys() {
    let app = test_app();
    let admin = app.admin_token().await;
    for n in 0..12 {
        let identifier = format!("S{n:02}");
        let passport = format!("AB00000{n:02}");
        app.create_student(&admin, student_body(&identifier, &passport, "1A"))
            .await;
    }

    let response = app
        .send("GET", "/api/students?take=10&skip=10", None, Some(&admin))
        .await;
    let body = read_json(response).await;
    assert_eq!(body["total"], 12);
    assert_eq!(body["students"].as_array().map(Vec::len), Some(2));
    assert_eq!(body["students"][0]["identifier"], "S10");

    for query in ["take=5", "skip=-1", "sort_by=password_hash", "search_by=user.password"] {
        let uri = format!("/api/students?{query}");
        let response = app.send("GET", &uri, None, Some(&admin)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{query}");
    }
}
