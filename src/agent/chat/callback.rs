//! OAuth redirect target that stores a user's access token.

use crate::agent::chat::context::{AuthToken, ContextStore};
use crate::error::Result;
use crate::lark::LarkClient;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info};

pub const CALLBACK_PATH: &str = "/callback";

const MISSING_CODE_TEXT: &str = "授权码不能为空 / Authorization code cannot be empty";
const LOGIN_FAILED_TEXT: &str = "登录失败 / Login failed";
const CALLBACK_ERROR_TEXT: &str = "处理授权回调时出错 / Error processing authorization callback";

const SUCCESS_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>Login</title></head>
<body>
<p>登录成功，请返回飞书继续对话 / Login succeeded, please return to Lark to continue</p>
</body>
</html>
"#;

#[derive(Clone)]
pub struct CallbackState {
    pub lark: Arc<LarkClient>,
    pub contexts: Arc<ContextStore>,
    pub redirect_uri: String,
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    code: Option<String>,
}

pub fn router(state: CallbackState) -> Router {
    Router::new()
        .route(CALLBACK_PATH, get(handle_callback))
        .with_state(state)
}

async fn handle_callback(
    State(state): State<CallbackState>,
    Query(query): Query<CallbackQuery>,
) -> Response {
    let Some(code) = query.code.filter(|c| !c.is_empty()) else {
        return (StatusCode::BAD_REQUEST, MISSING_CODE_TEXT).into_response();
    };

    match login(&state, &code).await {
        Ok(Some(user_id)) => {
            info!(user_id = %user_id, "Authorization completed");
            Html(SUCCESS_PAGE).into_response()
        }
        Ok(None) => (StatusCode::INTERNAL_SERVER_ERROR, LOGIN_FAILED_TEXT).into_response(),
        Err(e) => {
            error!("Error processing authorization callback: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, CALLBACK_ERROR_TEXT).into_response()
        }
    }
}

/// Exchange the code and store the token. `None` when the platform does not
/// say who the user is.
async fn login(state: &CallbackState, code: &str) -> Result<Option<String>> {
    let token = state.lark.exchange_user_token(code, &state.redirect_uri).await?;
    let user = state.lark.user_info(&token.access_token).await?;
    let Some(user_id) = user.open_id.filter(|id| !id.is_empty()) else {
        return Ok(None);
    };

    let refresh_token = Some(token.refresh_token).filter(|t| !t.is_empty());
    state
        .contexts
        .set_auth_token(
            &user_id,
            AuthToken {
                access_token: token.access_token,
                refresh_token,
                expires_at: Utc::now() + chrono::Duration::seconds(token.expires_in),
            },
        )
        .await;
    Ok(Some(user_id))
}
