//! HTTP surface, driven through the router without a socket

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use biblion_server::{api::create_router, models::user::UserRole, repository::Repository};

use crate::support::{self, CLEAN_CODE};

struct TestApp {
    router: Router,
    repository: Repository,
    librarian_token: String,
}

impl TestApp {
    async fn new() -> Self {
        let repository = support::repository();
        let state = support::app_state(&repository);
        let librarian = support::create_user(&repository, "staff@example.com", UserRole::Librarian).await;
        let librarian_token = state.services.auth.issue_token(&librarian).unwrap();

        Self {
            router: create_router(state),
            repository,
            librarian_token,
        }
    }

    async fn send(
        &self,
        method: Method,
        uri: &str,
        token: Option<&String>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => request
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn register(&self, email: &str) -> (String, String) {
        let (status, body) = self
            .send(
                Method::POST,
                "/api/v1/users/register",
                None,
                Some(json!({
                    "email": email,
                    "password": "secret123",
                    "firstName": "Ada",
                    "lastName": "Lovelace"
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        (
            body["user"]["id"].as_str().unwrap().to_string(),
            body["token"].as_str().unwrap().to_string(),
        )
    }

    async fn create_book(&self, isbn: &str, total_copies: i32) -> Value {
        let (status, body) = self
            .send(
                Method::POST,
                "/api/v1/books",
                Some(&self.librarian_token),
                Some(json!({
                    "isbn": isbn,
                    "title": "Clean Code",
                    "author": "Robert C. Martin",
                    "publisher": "Prentice Hall",
                    "year": 2008,
                    "category": "technology",
                    "totalCopies": total_copies
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body
    }
}

#[tokio::test]
async fn test_health_and_readiness() {
    let app = TestApp::new().await;

    let (status, body) = app.send(Method::GET, "/api/v1/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, body) = app.send(Method::GET, "/api/v1/ready", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");
}

#[tokio::test]
async fn test_register_login_and_me() {
    let app = TestApp::new().await;
    let (user_id, token) = app.register("Ada@Example.com").await;

    let (status, body) = app
        .send(
            Method::POST,
            "/api/v1/users/register",
            None,
            Some(json!({
                "email": "ada@example.com",
                "password": "secret123",
                "firstName": "Ada",
                "lastName": "Lovelace"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], 5);

    let (status, body) = app
        .send(
            Method::POST,
            "/api/v1/users/login",
            None,
            Some(json!({ "email": "ada@example.com", "password": "secret123" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["id"], user_id.as_str());

    let (status, _) = app
        .send(
            Method::POST,
            "/api/v1/users/login",
            None,
            Some(json!({ "email": "ada@example.com", "password": "wrong-password" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app.send(Method::GET, "/api/v1/users/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["role"], "student");
    assert!(body.get("credentialHash").is_none());

    let (status, body) = app.send(Method::GET, "/api/v1/users/me", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], 2);
}

#[tokio::test]
async fn test_register_rejects_short_password() {
    let app = TestApp::new().await;
    let (status, body) = app
        .send(
            Method::POST,
            "/api/v1/users/register",
            None,
            Some(json!({
                "email": "ada@example.com",
                "password": "short",
                "firstName": "Ada",
                "lastName": "Lovelace"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], 8);
}

#[tokio::test]
async fn test_book_management() {
    let app = TestApp::new().await;

    let book = app.create_book(CLEAN_CODE, 2).await;
    assert_eq!(book["availableCopies"], 2);
    assert_eq!(book["available"], true);
    let id = book["id"].as_str().unwrap().to_string();

    let (status, _) = app
        .send(
            Method::POST,
            "/api/v1/books",
            Some(&app.librarian_token),
            Some(json!({
                "isbn": CLEAN_CODE,
                "title": "Clean Code",
                "author": "Robert C. Martin",
                "publisher": "Prentice Hall",
                "year": 2008,
                "category": "technology",
                "totalCopies": 1
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = app
        .send(
            Method::POST,
            "/api/v1/books",
            Some(&app.librarian_token),
            Some(json!({
                "isbn": "978-0-13-235088-4",
                "title": "Clean Code",
                "author": "Robert C. Martin",
                "publisher": "Prentice Hall",
                "year": 2008,
                "category": "technology",
                "totalCopies": 1
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT, "{body}");

    let (status, body) = app
        .send(
            Method::POST,
            "/api/v1/books",
            Some(&app.librarian_token),
            Some(json!({
                "isbn": "9780132350880",
                "title": "Clean Code",
                "author": "Robert C. Martin",
                "publisher": "Prentice Hall",
                "year": 2008,
                "category": "technology",
                "totalCopies": 1
            })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");

    let (status, body) = app
        .send(Method::GET, "/api/v1/books?category=technology&available=true", None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (status, body) = app
        .send(
            Method::PUT,
            &format!("/api/v1/books/{}", id),
            Some(&app.librarian_token),
            Some(json!({ "title": "Clean Code (2nd printing)" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["title"], "Clean Code (2nd printing)");
    assert_eq!(body["isbn"], CLEAN_CODE);

    let (status, _) = app
        .send(Method::DELETE, &format!("/api/v1/books/{}", id), Some(&app.librarian_token), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = app.send(Method::GET, &format!("/api/v1/books/{}", id), None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], 4);
}

#[tokio::test]
async fn test_students_cannot_manage_catalog() {
    let app = TestApp::new().await;
    let (_, token) = app.register("ada@example.com").await;

    let (status, body) = app
        .send(
            Method::POST,
            "/api/v1/books",
            Some(&token),
            Some(json!({
                "isbn": CLEAN_CODE,
                "title": "Clean Code",
                "author": "Robert C. Martin",
                "publisher": "Prentice Hall",
                "year": 2008,
                "category": "technology",
                "totalCopies": 1
            })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], 2);

    let (status, _) = app.send(Method::GET, "/api/v1/loans", Some(&token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_borrow_and_return_over_http() {
    let app = TestApp::new().await;
    let (_, token) = app.register("ada@example.com").await;
    let book = app.create_book(CLEAN_CODE, 1).await;
    let book_id = book["id"].as_str().unwrap();

    let (status, loan) = app
        .send(Method::POST, "/api/v1/loans", Some(&token), Some(json!({ "bookId": book_id })))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{loan}");
    assert_eq!(loan["status"], "active");
    let loan_id = loan["id"].as_str().unwrap().to_string();

    let (status, body) = app
        .send(
            Method::POST,
            "/api/v1/loans",
            Some(&app.librarian_token),
            Some(json!({ "bookId": book_id })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], 6);

    let (status, body) = app
        .send(Method::GET, "/api/v1/loans/my?active=true", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    let uri = format!("/api/v1/loans/{}/return", loan_id);
    let (status, body) = app.send(Method::PUT, &uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "returned");
    assert!(body["returnDate"].is_string());

    let (status, body) = app.send(Method::PUT, &uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], 7);

    let (status, body) = app
        .send(Method::GET, "/api/v1/loans", Some(&app.librarian_token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    let stored = app.repository.books.find_by_id(book_id).await.unwrap().unwrap();
    assert_eq!(stored.available_copies, 1);
}

#[tokio::test]
async fn test_borrow_unknown_book_over_http() {
    let app = TestApp::new().await;
    let (status, body) = app
        .send(
            Method::POST,
            "/api/v1/loans",
            Some(&app.librarian_token),
            Some(json!({ "bookId": "missing" })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "NotFound");
}

#[tokio::test]
async fn test_reconcile_endpoint() {
    let app = TestApp::new().await;
    app.create_book(CLEAN_CODE, 1).await;
    app.repository
        .store
        .delete(&biblion_server::repository::books::isbn_key(CLEAN_CODE))
        .await
        .unwrap();

    let (status, body) = app
        .send(
            Method::POST,
            "/api/v1/maintenance/reconcile",
            Some(&app.librarian_token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["restored"], 1);
    assert!(app.repository.books.find_by_isbn(CLEAN_CODE).await.unwrap().is_some());
}
