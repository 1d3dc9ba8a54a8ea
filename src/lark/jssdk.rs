//! Config signatures for web pages that call the JSSDK.
//!
//! The page sends its URL to `/get_signature`; the answer feeds `h5sdk.config`
//! in the browser.

use crate::error::Result;
use crate::lark::client::LarkClient;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use ring::digest::{digest, SHA1_FOR_LEGACY_USE_ONLY};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::error;

pub const SIGNATURE_PATH: &str = "/get_signature";

/// Random string mixed into every signature.
pub const NONCE_STR: &str = "13oEviLbrTo458A3NjrOwS70oTOXVOAm";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsapiSignature {
    pub appid: String,
    pub ticket: String,
    pub signature: String,
    pub noncestr: String,
    pub timestamp: String,
}

/// Hex SHA-1 over the ticket, nonce, timestamp and page URL.
pub fn signature(ticket: &str, nonce: &str, timestamp: &str, url: &str) -> String {
    let verify = format!(
        "jsapi_ticket={}&noncestr={}&timestamp={}&url={}",
        ticket, nonce, timestamp, url
    );
    hex::encode(digest(&SHA1_FOR_LEGACY_USE_ONLY, verify.as_bytes()))
}

/// Sign `url` with the app's current ticket. The timestamp is in
/// milliseconds, truncated to whole seconds.
pub async fn sign_url(client: &LarkClient, url: &str) -> Result<JsapiSignature> {
    let ticket = client.jsapi_ticket().await?;
    let timestamp = (Utc::now().timestamp() * 1000).to_string();
    Ok(JsapiSignature {
        appid: client.credentials().app_id.clone(),
        signature: signature(&ticket, NONCE_STR, &timestamp, url),
        ticket,
        noncestr: NONCE_STR.to_string(),
        timestamp,
    })
}

#[derive(Debug, Deserialize)]
struct SignatureQuery {
    url: Option<String>,
}

pub fn router(client: Arc<LarkClient>) -> Router {
    Router::new()
        .route(SIGNATURE_PATH, get(handle_signature))
        .with_state(client)
}

async fn handle_signature(
    State(client): State<Arc<LarkClient>>,
    Query(query): Query<SignatureQuery>,
) -> Response {
    let Some(url) = query.url.filter(|u| !u.is_empty()) else {
        return (StatusCode::BAD_REQUEST, Json(json!({"message": "url is required"}))).into_response();
    };

    match sign_url(&client, &url).await {
        Ok(signed) => Json(signed).into_response(),
        Err(e) => {
            error!("Failed to sign JSSDK config: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"message": e.to_string()}))).into_response()
        }
    }
}
