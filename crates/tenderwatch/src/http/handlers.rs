//! Request handlers for `/api/v1/data`.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Map, Value};

use tenderwatch_core::Cursor;
use tenderwatch_store::{ListPage, ListQuery, DEFAULT_LIMIT, MAX_BATCH_IDS};

use super::error::ApiError;
use super::DATA_PATH;
use crate::service::{PutOutcome, Service};

/// Largest page a client may ask for.
pub const MAX_LIMIT: usize = 1000;

/// Bounds of the comma-separated id list in `GET /data/{ids}`.
const IDS_MIN_LEN: usize = 32;
const IDS_MAX_LEN: usize = 3300;

type Params = Query<HashMap<String, String>>;

fn flag(params: &HashMap<String, String>, name: &str) -> bool {
    params
        .get(name)
        .is_some_and(|v| matches!(v.as_str(), "1" | "true" | "yes"))
}

// ─────────────────────────────────────────────────────────────────────────────
// Reads
// ─────────────────────────────────────────────────────────────────────────────

/// `GET /data?offset=&limit=&reverse=`
pub async fn list(
    State(service): State<Arc<Service>>,
    Query(params): Params,
) -> Result<Json<Value>, ApiError> {
    let limit = match params.get("limit").map(String::as_str) {
        None | Some("") => DEFAULT_LIMIT,
        Some(raw) => match raw.parse::<i64>() {
            Ok(n) if (1..=MAX_LIMIT as i64).contains(&n) => n as usize,
            Ok(_) => DEFAULT_LIMIT,
            Err(_) => return Err(ApiError::bad_request(format!("bad limit {raw:?}"))),
        },
    };
    // A cursor that does not decode starts from the beginning.
    let cursor = params.get("offset").and_then(|o| o.parse::<Cursor>().ok());
    let reverse = flag(&params, "reverse");

    let mut query = ListQuery::after(cursor, limit);
    if reverse {
        query = query.reversed();
    }
    let page = service.list(&query).await?;
    Ok(Json(page_body(&page, reverse)))
}

/// `{data, prev_page, next_page}`. `next_page` continues in the direction of
/// the request, `prev_page` walks back the other way.
fn page_body(page: &ListPage, reverse: bool) -> Value {
    let data: Vec<Value> = page.ids.iter().map(|id| json!({ "id": id })).collect();
    let mut body = Map::new();
    body.insert("data".into(), Value::Array(data));
    if let Some(prev) = page.prev {
        body.insert("prev_page".into(), page_link(prev, !reverse));
    }
    if let Some(next) = page.next {
        body.insert("next_page".into(), page_link(next, reverse));
    }
    Value::Object(body)
}

fn page_link(cursor: Cursor, reverse: bool) -> Value {
    if reverse {
        json!({ "offset": cursor.encode(), "reverse": 1 })
    } else {
        json!({ "offset": cursor.encode() })
    }
}

/// `GET /data/{id[,id...]}`
pub async fn get_items(
    State(service): State<Arc<Service>>,
    Path(ids): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let ids = parse_ids(&ids)?;
    let records = service.get_many(&ids).await?;
    if records.is_empty() {
        return Err(ApiError::NotFound);
    }
    let data: Vec<Value> = records.iter().map(|r| r.to_value()).collect();
    Ok(Json(json!({ "data": data })))
}

fn parse_ids(raw: &str) -> Result<Vec<String>, ApiError> {
    let well_formed = (IDS_MIN_LEN..=IDS_MAX_LEN).contains(&raw.len())
        && raw
            .bytes()
            .all(|b| b == b',' || b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
    if !well_formed {
        return Err(ApiError::bad_request("bad id"));
    }
    let ids: Vec<String> = raw
        .split(',')
        .filter(|id| !id.is_empty())
        .map(str::to_owned)
        .collect();
    if ids.len() > MAX_BATCH_IDS {
        return Err(ApiError::bad_request("too many ids"));
    }
    Ok(ids)
}

// ─────────────────────────────────────────────────────────────────────────────
// Writes
// ─────────────────────────────────────────────────────────────────────────────

/// `PUT|POST /data`: the id comes from the body.
pub async fn put_collection(
    State(service): State<Arc<Service>>,
    Query(params): Params,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    put_record(&service, None, &params, &headers, &body).await
}

/// `PUT|POST /data/{id}`: the body must carry the same id.
pub async fn put_item(
    State(service): State<Arc<Service>>,
    Path(id): Path<String>,
    Query(params): Params,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    put_record(&service, Some(&id), &params, &headers, &body).await
}

async fn put_record(
    service: &Service,
    path_id: Option<&str>,
    params: &HashMap<String, String>,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Response, ApiError> {
    if service.is_readonly() {
        return Err(ApiError::MethodNotAllowed);
    }
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !content_type.starts_with("application/json") {
        return Err(ApiError::bad_request("content type must be application/json"));
    }
    let raw: Value = serde_json::from_slice(body)
        .map_err(|e| ApiError::bad_request(format!("bad json: {e}")))?;

    let body_id = raw.get("id").and_then(Value::as_str);
    if let Some(path_id) = path_id {
        if body_id != Some(path_id) {
            return Err(ApiError::bad_request("id mismatch"));
        }
    }
    if let Some(owner) = raw
        .get("envelope")
        .and_then(|e| e.get("owner"))
        .and_then(Value::as_str)
    {
        let agent = headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !agent.contains(owner) {
            return Err(ApiError::bad_request("owner not found in user-agent"));
        }
    }

    match service.put(&raw, flag(params, "nosave")).await? {
        PutOutcome::Validated(_) => {
            Ok((StatusCode::OK, Json(json!({ "validated": 1, "created": 0 }))).into_response())
        }
        PutOutcome::Created(id) => {
            let location = format!("{DATA_PATH}/{id}");
            Ok((
                StatusCode::CREATED,
                [(header::LOCATION, location)],
                Json(json!({ "created": 1 })),
            )
                .into_response())
        }
    }
}

/// Any other method on a data route.
pub async fn method_not_allowed() -> ApiError {
    ApiError::MethodNotAllowed
}

/// Unknown paths.
pub async fn not_found() -> ApiError {
    ApiError::NotFound
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ids() {
        let a = "a".repeat(32);
        let b = "0".repeat(32);
        assert_eq!(parse_ids(&a).unwrap(), vec![a.clone()]);
        assert_eq!(parse_ids(&format!("{a},{b},")).unwrap(), vec![a.clone(), b]);
        assert!(parse_ids("abc").is_err());
        assert!(parse_ids(&"A".repeat(32)).is_err());
        assert!(parse_ids(&"g".repeat(32)).is_err());

        let too_long = vec![a; MAX_BATCH_IDS + 1].join(",");
        assert!(matches!(parse_ids(&too_long), Err(ApiError::BadRequest(m)) if m == "bad id"));
        let many = vec!["f"; MAX_BATCH_IDS + 1].join(",");
        assert!(matches!(parse_ids(&many), Err(ApiError::BadRequest(m)) if m == "too many ids"));
    }

    #[test]
    fn test_page_links() {
        let page = ListPage {
            ids: vec!["x".into(), "y".into()],
            prev: Some(Cursor(1.0)),
            next: Some(Cursor(2.0)),
        };
        let forward = page_body(&page, false);
        assert_eq!(forward["prev_page"]["reverse"], 1);
        assert!(forward["next_page"].get("reverse").is_none());
        assert_eq!(forward["prev_page"]["offset"], "000000000000f03f");

        let backward = page_body(&page, true);
        assert_eq!(backward["next_page"]["reverse"], 1);
        assert!(backward["prev_page"].get("reverse").is_none());

        let empty = page_body(&ListPage::default(), false);
        assert_eq!(empty, json!({ "data": [] }));
    }
}
