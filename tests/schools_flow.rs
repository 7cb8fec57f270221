mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, json_body, TestApp};
use serde_json::{json, Value};

const LINK: &str = "https://docs.google.com/spreadsheets/d/school-sheet/edit";

#[tokio::test]
async fn create_get_list_and_rename_school() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let token = app.admin_token().await?;

    for name in ["Lyceum 2", "Gymnasium 1"] {
        let response = app
            .put_json("/v1/school", &json!({ "school_name": name }), Some(&token))
            .await?;
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let response = app
        .put_json("/v1/school", &json!({ "school_name": "Lyceum 2" }), Some(&token))
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app.get("/v1/schools", Some(&token)).await?;
    let body = json_body(response).await?;
    let names: Vec<&str> = body["schools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|school| school["school_name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["Gymnasium 1", "Lyceum 2"]);

    let response = app
        .patch_json(
            "/v1/school?name=Lyceum%202",
            &json!({ "new_name": "Lyceum 3", "new_link": LINK }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.get("/v1/school?name=Lyceum%203", Some(&token)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let school = json_body(response).await?;
    assert_eq!(school["school_name"], "Lyceum 3");
    assert_eq!(school["link"], LINK);

    let response = app
        .patch_json(
            "/v1/school?name=Lyceum%203",
            &json!({ "new_link": null }),
            Some(&token),
        )
        .await?;
    assert_eq!(json_body(response).await?["link"], Value::Null);

    let response = app
        .patch_json(
            "/v1/school?name=Lyceum%203",
            &json!({ "new_name": "Gymnasium 1" }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app.get("/v1/school?name=Lyceum%202", Some(&token)).await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn delete_requires_flags_for_remaining_rows() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let token = app.admin_token().await?;

    app.put_json("/v1/school", &json!({ "school_name": "School 5" }), Some(&token))
        .await?;
    let response = app
        .put_json(
            "/v1/school/students",
            &json!({
                "school_name": "School 5",
                "students": [{ "name": "Anna", "surname": "Smirnova", "class_name": "9-A" }]
            }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let code = json_body(response).await?["students"][0]["code"]
        .as_str()
        .unwrap()
        .to_string();

    let response = app
        .post_json(
            "/v1/student/absent",
            &json!({ "code": code, "date": "2024-09-02", "reason": "ill" }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app.delete("/v1/school?name=School%205", Some(&token)).await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .delete("/v1/school?name=School%205&students=true", Some(&token))
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .delete(
            "/v1/school?name=School%205&students=true&absents=true",
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app.get("/v1/school?name=School%205", Some(&token)).await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .get(&format!("/v1/student?code={code}"), Some(&token))
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn empty_school_deletes_without_flags() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let token = app.admin_token().await?;

    app.put_json("/v1/school", &json!({ "school_name": "Empty" }), Some(&token))
        .await?;
    let response = app.delete("/v1/school?name=Empty", Some(&token)).await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app.delete("/v1/school?name=Empty", Some(&token)).await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn malformed_requests_are_bad_requests() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let token = app.admin_token().await?;

    let response = app
        .put_json("/v1/school", &json!({ "link": LINK }), Some(&token))
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await?;
    assert!(
        body["error"].as_str().unwrap().contains("school_name"),
        "{body}"
    );

    app.put_json("/v1/school", &json!({ "school_name": "Lyceum" }), Some(&token))
        .await?;
    let response = app
        .put_json(
            "/v1/school/teachers",
            &json!({
                "school_name": "Lyceum",
                "teachers": [{ "name": "Olga", "surname": "Kuznetsova" }]
            }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(json_body(response).await?["error"].is_string());

    let response = app.get("/v1/school", Some(&token)).await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(json_body(response).await?["error"].is_string());

    let response = app
        .get("/v1/student?tg_user_id=not-a-number", Some(&token))
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .put_json(
            "/v1/school",
            &json!({ "school_name": "x".repeat(256) }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    app.cleanup().await?;
    Ok(())
}
