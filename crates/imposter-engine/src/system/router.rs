//! Route dispatch for the `/system` endpoints.

use super::handlers;
use super::types::{collect_body, error_response, not_found};
use crate::store::StoreRegistry;
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Body;
use hyper::{Method, Request, Response, StatusCode};
use std::borrow::Cow;
use tracing::debug;

/// Parsed route for endpoints under `/system/store/`
#[derive(Debug, PartialEq)]
enum StoreRoute {
    /// GET/DELETE/POST /system/store/:name
    Store(String),
    /// GET/PUT/DELETE /system/store/:name/:key
    Item(String, String),
}

impl StoreRoute {
    /// Parse route from path segments after `/system/store/`. Keys may
    /// themselves contain `/`.
    fn parse(segments: &[&str]) -> Option<Self> {
        match segments {
            [] | ["", ..] => None,
            [name] => Some(StoreRoute::Store(decode(name))),
            [name, ""] => Some(StoreRoute::Store(decode(name))),
            [name, rest @ ..] => Some(StoreRoute::Item(decode(name), decode(&rest.join("/")))),
        }
    }
}

fn decode(segment: &str) -> String {
    urlencoding::decode(segment)
        .unwrap_or(Cow::Borrowed(segment))
        .into_owned()
}

/// Main request router
pub async fn route_request<B>(req: Request<B>, stores: &StoreRegistry) -> Response<Full<Bytes>>
where
    B: Body,
    B::Error: std::fmt::Display,
{
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(|s| s.to_string());

    debug!("System API: {} {}", method, path);

    if method == Method::GET && path == "/system/status" {
        return handlers::handle_status();
    }

    let Some(rest) = path.strip_prefix("/system/store/") else {
        return not_found();
    };
    let segments: Vec<&str> = rest.split('/').collect();
    let Some(route) = StoreRoute::parse(&segments) else {
        return not_found();
    };

    let headers = req.headers().clone();
    match (&method, route) {
        (&Method::GET, StoreRoute::Store(name)) => {
            handlers::handle_list(stores, &name, query.as_deref(), &headers)
        }
        (&Method::DELETE, StoreRoute::Store(name)) => handlers::handle_delete_store(stores, &name),
        (&Method::POST, StoreRoute::Store(name)) => match collect_body(req).await {
            Ok(body) => handlers::handle_save_all(stores, &name, body),
            Err(e) => error_response(StatusCode::BAD_REQUEST, &e),
        },

        (&Method::GET, StoreRoute::Item(name, key)) => {
            handlers::handle_get_item(stores, &name, &key)
        }
        (&Method::PUT, StoreRoute::Item(name, key)) => match collect_body(req).await {
            Ok(body) => handlers::handle_put_item(stores, &name, &key, &headers, body),
            Err(e) => error_response(StatusCode::BAD_REQUEST, &e),
        },
        (&Method::DELETE, StoreRoute::Item(name, key)) => {
            handlers::handle_delete_item(stores, &name, &key)
        }

        _ => error_response(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use serde_json::json;

    fn request(method: Method, uri: &str, body: &'static str) -> Request<Full<Bytes>> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Full::new(Bytes::from_static(body.as_bytes())))
            .unwrap()
    }

    async fn body_text(resp: Response<Full<Bytes>>) -> String {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_store_route_parse() {
        assert_eq!(
            StoreRoute::parse(&["s"]),
            Some(StoreRoute::Store("s".into()))
        );
        assert_eq!(
            StoreRoute::parse(&["s", "k"]),
            Some(StoreRoute::Item("s".into(), "k".into()))
        );
        assert_eq!(
            StoreRoute::parse(&["s", "a", "b"]),
            Some(StoreRoute::Item("s".into(), "a/b".into()))
        );
        assert_eq!(
            StoreRoute::parse(&["s", "my%20key"]),
            Some(StoreRoute::Item("s".into(), "my key".into()))
        );
        assert!(StoreRoute::parse(&[""]).is_none());
    }

    #[tokio::test]
    async fn test_item_lifecycle() {
        let stores = StoreRegistry::new();

        let resp = route_request(request(Method::PUT, "/system/store/s/k", "hello"), &stores).await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        let resp = route_request(request(Method::GET, "/system/store/s/k", ""), &stores).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_text(resp).await, "hello");

        let resp = route_request(request(Method::DELETE, "/system/store/s/k", ""), &stores).await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let resp = route_request(request(Method::GET, "/system/store/s/k", ""), &stores).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_bulk_save_and_list() {
        let stores = StoreRegistry::new();
        let resp = route_request(
            request(Method::POST, "/system/store/s", r#"{"a":"1","b":{"c":2}}"#),
            &stores,
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = route_request(request(Method::GET, "/system/store/s", ""), &stores).await;
        let listed: serde_json::Value = serde_json::from_str(&body_text(resp).await).unwrap();
        assert_eq!(listed, json!({"a": "1", "b": {"c": 2}}));

        let resp = route_request(request(Method::DELETE, "/system/store/s", ""), &stores).await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        assert!(stores.get("s").is_none());
    }

    #[tokio::test]
    async fn test_status_and_unknown_routes() {
        let stores = StoreRegistry::new();
        let resp = route_request(request(Method::GET, "/system/status", ""), &stores).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(body_text(resp).await.contains("\"ok\""));

        let resp = route_request(request(Method::GET, "/system/other", ""), &stores).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = route_request(request(Method::PATCH, "/system/store/s", ""), &stores).await;
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
