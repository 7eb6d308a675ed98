//! # Middleware Chain Integration Tests
//!
//! Ordering, short-circuiting and parameter propagation through global and route-level
//! middleware.

use axum::http::{HeaderValue, Method, StatusCode};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use service_router::{IncomingRequest, Middleware, Next, Router, ServiceResponse};

/// Helper function to create a test request
fn create_test_request(method: Method, path: &str) -> IncomingRequest {
    IncomingRequest::from_parts(method, path).unwrap()
}

/// Test middleware that records its name and forwards the request
#[derive(Debug)]
struct RecordingMiddleware {
    name: &'static str,
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait::async_trait]
impl Middleware for RecordingMiddleware {
    fn name(&self) -> &str {
        self.name
    }

    async fn handle(&self, request: IncomingRequest, next: Next) -> ServiceResponse {
        self.log.lock().push(self.name.to_string());
        next.run(request).await
    }
}

/// Rejects requests without an authorization header
#[derive(Debug, Default)]
struct RequireAuth {
    continued: AtomicBool,
}

#[async_trait::async_trait]
impl Middleware for RequireAuth {
    async fn handle(&self, request: IncomingRequest, next: Next) -> ServiceResponse {
        if request.header("authorization").is_none() {
            return ServiceResponse::text(StatusCode::UNAUTHORIZED, "Unauthorized");
        }
        self.continued.store(true, Ordering::SeqCst);
        let user = request
            .header("authorization")
            .unwrap_or_default()
            .trim_start_matches("Bearer ")
            .to_string();
        next.run(request.with_param("user", user)).await
    }
}

fn books_router(auth: Arc<RequireAuth>, handler_ran: Arc<AtomicBool>) -> Router {
    let mut router = Router::new();
    router
        .use_shared("/api/v1/books", auth)
        .unwrap()
        .get("/api/v1/books", move |request: IncomingRequest| {
            let handler_ran = Arc::clone(&handler_ran);
            async move {
                handler_ran.store(true, Ordering::SeqCst);
                let user = request.param("user").unwrap_or("anonymous").to_string();
                ServiceResponse::text(StatusCode::OK, format!("books for {}", user))
            }
        })
        .unwrap();
    router
}

#[tokio::test]
async fn test_chain_runs_in_registration_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut router = Router::new();
    for name in ["m1", "m2", "m3"] {
        router
            .use_middleware(
                "/api",
                RecordingMiddleware {
                    name,
                    log: Arc::clone(&log),
                },
            )
            .unwrap();
    }
    let handler_log = Arc::clone(&log);
    router
        .get("/api/items", move |_request: IncomingRequest| {
            let log = Arc::clone(&handler_log);
            async move {
                log.lock().push("handler".to_string());
                ServiceResponse::ok()
            }
        })
        .unwrap();

    let response = router
        .handle(create_test_request(Method::GET, "/api/items"))
        .await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(*log.lock(), vec!["m1", "m2", "m3", "handler"]);
}

#[tokio::test]
async fn test_non_matching_middleware_is_skipped() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut router = Router::new();
    router
        .use_middleware(
            "/admin",
            RecordingMiddleware {
                name: "admin",
                log: Arc::clone(&log),
            },
        )
        .unwrap()
        .use_middleware(
            "/",
            RecordingMiddleware {
                name: "root",
                log: Arc::clone(&log),
            },
        )
        .unwrap()
        .get("/books", |_request: IncomingRequest| async { ServiceResponse::ok() })
        .unwrap();

    router.handle(create_test_request(Method::GET, "/books")).await;

    assert_eq!(*log.lock(), vec!["root"]);
}

#[tokio::test]
async fn test_short_circuit_stops_chain_and_handler() {
    let later_ran = Arc::new(AtomicBool::new(false));
    let handler_ran = Arc::new(AtomicBool::new(false));

    let mut router = Router::new();
    router
        .use_middleware("/", |_request: IncomingRequest, _next: Next| async {
            ServiceResponse::text(StatusCode::FORBIDDEN, "blocked")
        })
        .unwrap();
    let later = Arc::clone(&later_ran);
    router
        .use_middleware("/", move |request: IncomingRequest, next: Next| {
            let later = Arc::clone(&later);
            async move {
                later.store(true, Ordering::SeqCst);
                next.run(request).await
            }
        })
        .unwrap();
    let handled = Arc::clone(&handler_ran);
    router
        .get("/books", move |_request: IncomingRequest| {
            let handled = Arc::clone(&handled);
            async move {
                handled.store(true, Ordering::SeqCst);
                ServiceResponse::ok()
            }
        })
        .unwrap();

    let response = router
        .handle(create_test_request(Method::GET, "/books"))
        .await;

    assert_eq!(response.status, StatusCode::FORBIDDEN);
    assert_eq!(response.body_text(), "blocked");
    assert!(!later_ran.load(Ordering::SeqCst));
    assert!(!handler_ran.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_unauthenticated_request_is_rejected() {
    let auth = Arc::new(RequireAuth::default());
    let handler_ran = Arc::new(AtomicBool::new(false));
    let router = books_router(Arc::clone(&auth), Arc::clone(&handler_ran));

    let response = router
        .handle(create_test_request(Method::GET, "/api/v1/books"))
        .await;

    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert!(!auth.continued.load(Ordering::SeqCst));
    assert!(!handler_ran.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_authenticated_request_reaches_handler() {
    let auth = Arc::new(RequireAuth::default());
    let handler_ran = Arc::new(AtomicBool::new(false));
    let router = books_router(Arc::clone(&auth), Arc::clone(&handler_ran));

    let mut request = create_test_request(Method::GET, "/api/v1/books");
    request
        .headers
        .insert("authorization", HeaderValue::from_static("Bearer alice"));
    let response = router.handle(request).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body_text(), "books for alice");
    assert!(auth.continued.load(Ordering::SeqCst));
    assert!(handler_ran.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_middleware_prefix_params_reach_handler() {
    let mut router = Router::new();
    router
        .use_middleware(
            "/books/:bookId",
            |request: IncomingRequest, next: Next| async move {
                let seen = request.param("bookId").unwrap_or_default().to_string();
                next.run(request.with_param("seen_by_middleware", seen)).await
            },
        )
        .unwrap()
        .get(
            "/books/:bookId/chapters",
            |request: IncomingRequest| async move {
                let body = format!(
                    "{}|{}|{}",
                    request.param("bookId").unwrap_or_default(),
                    request.param("seen_by_middleware").unwrap_or_default(),
                    request.param("*").unwrap_or_default(),
                );
                ServiceResponse::text(StatusCode::OK, body)
            },
        )
        .unwrap();

    let response = router
        .handle(create_test_request(Method::GET, "/books/7/chapters"))
        .await;

    assert_eq!(response.body_text(), "7|7|/chapters");
}

#[tokio::test]
async fn test_route_middleware_runs_after_params_are_bound() {
    let order = Arc::new(Mutex::new(Vec::new()));

    let global_order = Arc::clone(&order);
    let route_order = Arc::clone(&order);
    let route_middleware: Arc<dyn Middleware> =
        Arc::new(move |request: IncomingRequest, next: Next| {
            let order = Arc::clone(&route_order);
            async move {
                let id = request.param("bookid").unwrap_or("unbound").to_string();
                order.lock().push(format!("route:{}", id));
                next.run(request).await
            }
        });

    let mut router = Router::new();
    router
        .use_middleware("/", move |request: IncomingRequest, next: Next| {
            let order = Arc::clone(&global_order);
            async move {
                let id = request.param("bookid").unwrap_or("unbound").to_string();
                order.lock().push(format!("global:{}", id));
                next.run(request).await
            }
        })
        .unwrap()
        .route_with(
            Method::DELETE,
            "/books/:bookid",
            |_request: IncomingRequest| async { ServiceResponse::empty(StatusCode::NO_CONTENT) },
            vec![route_middleware],
        )
        .unwrap();

    let response = router
        .handle(create_test_request(Method::DELETE, "/books/99"))
        .await;

    assert_eq!(response.status, StatusCode::NO_CONTENT);
    assert_eq!(*order.lock(), vec!["global:unbound", "route:99"]);
}

#[tokio::test]
async fn test_last_bound_value_wins() {
    let mut router = Router::new();
    router
        .use_middleware("/", |request: IncomingRequest, next: Next| async move {
            next.run(request.with_param("id", "from-middleware")).await
        })
        .unwrap()
        .get("/items/:id", |request: IncomingRequest| async move {
            ServiceResponse::text(StatusCode::OK, request.param("id").unwrap_or_default())
        })
        .unwrap();

    let response = router
        .handle(create_test_request(Method::GET, "/items/route-value"))
        .await;

    assert_eq!(response.body_text(), "route-value");
}

#[tokio::test]
async fn test_middleware_can_rewrite_response() {
    let mut router = Router::new();
    router
        .use_middleware("/", |request: IncomingRequest, next: Next| async move {
            next.run(request).await.with_header(
                axum::http::HeaderName::from_static("x-served-by"),
                HeaderValue::from_static("service-router"),
            )
        })
        .unwrap()
        .get("/books", |_request: IncomingRequest| async { ServiceResponse::ok() })
        .unwrap();

    let hit = router.handle(create_test_request(Method::GET, "/books")).await;
    let miss = router.handle(create_test_request(Method::GET, "/nope")).await;

    assert_eq!(hit.headers["x-served-by"], "service-router");
    assert_eq!(miss.status, StatusCode::NOT_FOUND);
    assert_eq!(miss.headers["x-served-by"], "service-router");
}
