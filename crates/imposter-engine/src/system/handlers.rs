//! Store and status handlers.

use super::types::*;
use crate::exchange::parse_query_string;
use crate::store::StoreRegistry;
use bytes::Bytes;
use http_body_util::Full;
use hyper::{HeaderMap, Response, StatusCode};
use serde_json::{Map, Value};
use tracing::{debug, info};

/// GET /system/status
pub fn handle_status() -> Response<Full<Bytes>> {
    json_response(
        StatusCode::OK,
        &serde_json::json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
        }),
    )
}

/// GET /system/store/:name
pub fn handle_list(
    stores: &StoreRegistry,
    name: &str,
    query: Option<&str>,
    headers: &HeaderMap,
) -> Response<Full<Bytes>> {
    if !accepts_json(headers) {
        return error_response(
            StatusCode::NOT_ACCEPTABLE,
            "Store items can only be listed as application/json",
        );
    }

    let prefix = parse_query_string(query)
        .into_iter()
        .find(|(k, _)| k == "keyPrefix")
        .map(|(_, v)| v);

    let items = match (stores.get(name), prefix) {
        (None, _) => Map::new(),
        (Some(store), Some(prefix)) => store.load_by_key_prefix(&prefix),
        (Some(store), None) => store.load_all(),
    };
    debug!("Listing {} items from store {}", items.len(), name);
    json_response(StatusCode::OK, &Value::Object(items))
}

/// DELETE /system/store/:name
pub fn handle_delete_store(stores: &StoreRegistry, name: &str) -> Response<Full<Bytes>> {
    if stores.delete_store(name) {
        info!("Deleted store {}", name);
    }
    build_response(StatusCode::NO_CONTENT, Bytes::new())
}

/// GET /system/store/:name/:key
///
/// Strings are returned as plain text, anything else as JSON.
pub fn handle_get_item(stores: &StoreRegistry, name: &str, key: &str) -> Response<Full<Bytes>> {
    match stores.get(name).and_then(|store| store.load(key)) {
        Some(Value::String(text)) => {
            build_response_with_headers(StatusCode::OK, [("Content-Type", "text/plain")], text)
        }
        Some(value) => json_response(StatusCode::OK, &value),
        None => not_found(),
    }
}

/// PUT /system/store/:name/:key
///
/// JSON bodies sent as `application/json` are stored structurally; any other
/// body is stored as a string.
pub fn handle_put_item(
    stores: &StoreRegistry,
    name: &str,
    key: &str,
    headers: &HeaderMap,
    body: Bytes,
) -> Response<Full<Bytes>> {
    let value = match body_value(headers, &body) {
        Ok(value) => value,
        Err(message) => return error_response(StatusCode::BAD_REQUEST, &message),
    };

    let created = stores.open(name).save(key, value);
    debug!("Saved item {} in store {} (created: {})", key, name, created);
    if created {
        build_response(StatusCode::CREATED, Bytes::new())
    } else {
        build_response(StatusCode::OK, Bytes::new())
    }
}

/// POST /system/store/:name
pub fn handle_save_all(stores: &StoreRegistry, name: &str, body: Bytes) -> Response<Full<Bytes>> {
    let items = match serde_json::from_slice::<Value>(&body) {
        Ok(Value::Object(items)) => items,
        Ok(_) => {
            return error_response(StatusCode::BAD_REQUEST, "Request body must be a JSON object")
        }
        Err(e) => {
            return error_response(StatusCode::BAD_REQUEST, &format!("Invalid JSON: {}", e))
        }
    };

    let store = stores.open(name);
    let count = items.len();
    for (key, value) in items {
        store.save(&key, value);
    }
    debug!("Saved {} items in store {}", count, name);
    build_response(StatusCode::OK, Bytes::new())
}

/// DELETE /system/store/:name/:key
pub fn handle_delete_item(stores: &StoreRegistry, name: &str, key: &str) -> Response<Full<Bytes>> {
    if let Some(store) = stores.get(name) {
        store.delete(key);
    }
    build_response(StatusCode::NO_CONTENT, Bytes::new())
}

fn body_value(headers: &HeaderMap, body: &[u8]) -> Result<Value, String> {
    let is_json = headers
        .get(hyper::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"));

    if is_json {
        serde_json::from_slice(body).map_err(|e| format!("Invalid JSON: {}", e))
    } else {
        Ok(Value::String(String::from_utf8_lossy(body).into_owned()))
    }
}
