//! Minimal OpenAPI client: tenant token, messages, user OAuth and the JSAPI
//! ticket.

use crate::config::AppCredentials;
use crate::error::{LarkBotError, Result};
use crate::lark::cards::Card;
use crate::lark::messages::{text_content, MsgType, ReceiveIdType};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};
use url::Url;

pub const REQUEST_ID_HEADER: &str = "x-tt-logid";

/// Refresh the tenant token this long before it expires.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Outbound message operations the bots depend on.
#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Send a new message, returning its message id.
    async fn send_message(
        &self,
        receive_id_type: ReceiveIdType,
        receive_id: &str,
        msg_type: MsgType,
        content: &str,
    ) -> Result<String>;

    /// Reply in the thread of `message_id`, returning the new message id.
    async fn reply_message(&self, message_id: &str, msg_type: MsgType, content: &str) -> Result<String>;

    /// Replace the content of a card message.
    async fn patch_message(&self, message_id: &str, content: &str) -> Result<()>;

    /// Replace the content of a text or post message.
    async fn update_message(&self, message_id: &str, msg_type: MsgType, content: &str) -> Result<()>;

    async fn send_text(
        &self,
        receive_id_type: ReceiveIdType,
        receive_id: &str,
        text: &str,
    ) -> Result<String> {
        self.send_message(receive_id_type, receive_id, MsgType::Text, &text_content(text))
            .await
    }

    async fn send_card(
        &self,
        receive_id_type: ReceiveIdType,
        receive_id: &str,
        card: &Value,
    ) -> Result<String> {
        self.send_message(receive_id_type, receive_id, MsgType::Interactive, &card.to_string())
            .await
    }

    async fn send_template_card(
        &self,
        receive_id_type: ReceiveIdType,
        receive_id: &str,
        card: &Card,
    ) -> Result<String> {
        self.send_message(receive_id_type, receive_id, MsgType::Interactive, &card.to_content()?)
            .await
    }
}

/// Tokens returned by the OAuth code exchange.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserToken {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    /// Lifetime in seconds.
    #[serde(default)]
    pub expires_in: i64,
    #[serde(default)]
    pub refresh_token_expires_in: i64,
    #[serde(default)]
    pub token_type: String,
    #[serde(default)]
    pub scope: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserInfo {
    #[serde(default)]
    pub open_id: Option<String>,
    #[serde(default)]
    pub union_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub en_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

pub struct LarkClient {
    http: Client,
    credentials: AppCredentials,
    tenant_token: Mutex<Option<CachedToken>>,
    jsapi_ticket: Mutex<Option<CachedToken>>,
}

impl LarkClient {
    pub fn new(credentials: AppCredentials) -> Self {
        Self {
            http: Client::new(),
            credentials,
            tenant_token: Mutex::new(None),
            jsapi_ticket: Mutex::new(None),
        }
    }

    pub fn credentials(&self) -> &AppCredentials {
        &self.credentials
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.credentials.domain, path)
    }

    /// App-scoped token, cached until shortly before it expires.
    pub async fn tenant_access_token(&self) -> Result<String> {
        let mut cached = self.tenant_token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() + TOKEN_REFRESH_MARGIN < token.expires_at {
                return Ok(token.value.clone());
            }
        }

        debug!("Fetching tenant access token");
        let request = self
            .http
            .post(self.url("/open-apis/auth/v3/tenant_access_token/internal"))
            .json(&json!({
                "app_id": self.credentials.app_id,
                "app_secret": self.credentials.app_secret,
            }));
        let body = send_checked(request).await?;

        let value = body["tenant_access_token"]
            .as_str()
            .ok_or_else(|| LarkBotError::ApiError("response has no tenant_access_token".to_string()))?
            .to_string();
        let expire = body["expire"].as_u64().unwrap_or(0);

        *cached = Some(CachedToken {
            value: value.clone(),
            expires_at: Instant::now() + Duration::from_secs(expire),
        });
        Ok(value)
    }

    /// Ticket for signing web pages that use the JSSDK, cached like the
    /// tenant token.
    pub async fn jsapi_ticket(&self) -> Result<String> {
        let mut cached = self.jsapi_ticket.lock().await;
        if let Some(ticket) = cached.as_ref() {
            if Instant::now() + TOKEN_REFRESH_MARGIN < ticket.expires_at {
                return Ok(ticket.value.clone());
            }
        }

        debug!("Fetching JSAPI ticket");
        let data = self
            .call(Method::POST, "/open-apis/jssdk/ticket/get", &[], None)
            .await?;
        let value = data["ticket"]
            .as_str()
            .ok_or_else(|| LarkBotError::ApiError("response has no ticket".to_string()))?
            .to_string();
        let expire = data["expire_in"].as_u64().unwrap_or(0);

        *cached = Some(CachedToken {
            value: value.clone(),
            expires_at: Instant::now() + Duration::from_secs(expire),
        });
        Ok(value)
    }

    /// Call an OpenAPI endpoint with the tenant token and return its `data`.
    async fn call(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<Value>,
    ) -> Result<Value> {
        let token = self.tenant_access_token().await?;
        let mut request = self
            .http
            .request(method, self.url(path))
            .bearer_auth(token)
            .query(query);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let mut body = send_checked(request).await?;
        Ok(body.get_mut("data").map(Value::take).unwrap_or(Value::Null))
    }

    /// URL of the consent page that redirects back with an auth code.
    pub fn authorize_url(&self, redirect_uri: &str, scopes: &[&str]) -> Result<String> {
        let mut url = Url::parse(&self.url("/open-apis/authen/v1/authorize"))
            .map_err(|e| LarkBotError::ConfigError(format!("Invalid domain: {}", e)))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("client_id", &self.credentials.app_id);
            query.append_pair("redirect_uri", redirect_uri);
            if !scopes.is_empty() {
                query.append_pair("scope", &scopes.join(" "));
            }
        }
        Ok(url.to_string())
    }

    /// Exchange an OAuth authorization code for a user access token.
    pub async fn exchange_user_token(&self, code: &str, redirect_uri: &str) -> Result<UserToken> {
        let request = self
            .http
            .post(self.url("/open-apis/authen/v2/oauth/token"))
            .json(&json!({
                "grant_type": "authorization_code",
                "client_id": self.credentials.app_id,
                "client_secret": self.credentials.app_secret,
                "code": code,
                "redirect_uri": redirect_uri,
            }));
        let body = send_checked(request).await?;
        Ok(serde_json::from_value(body)?)
    }

    pub async fn user_info(&self, user_access_token: &str) -> Result<UserInfo> {
        let request = self
            .http
            .get(self.url("/open-apis/authen/v1/user_info"))
            .bearer_auth(user_access_token);
        let mut body = send_checked(request).await?;
        let data = body.get_mut("data").map(Value::take).unwrap_or(Value::Null);
        Ok(serde_json::from_value(data)?)
    }
}

/// Send a request and turn a non-zero `code` into [`LarkBotError::LarkApi`].
async fn send_checked(request: RequestBuilder) -> Result<Value> {
    let response = request.send().await?;
    let status = response.status();
    let request_id = response
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let text = response.text().await?;

    let body: Value = match serde_json::from_str(&text) {
        Ok(body) => body,
        Err(_) => {
            return Err(LarkBotError::ApiError(format!(
                "HTTP {} (request id: {}): {}",
                status, request_id, text
            )))
        }
    };

    let code = body["code"].as_i64().unwrap_or(0);
    if code != 0 || !status.is_success() {
        let msg = body["msg"]
            .as_str()
            .or_else(|| body["error_description"].as_str())
            .unwrap_or("unknown error")
            .to_string();
        return Err(LarkBotError::LarkApi {
            code: if code != 0 { code } else { i64::from(status.as_u16()) },
            msg,
            request_id,
        });
    }

    Ok(body)
}

fn message_id_of(data: &Value) -> Result<String> {
    data["message_id"]
        .as_str()
        .map(String::from)
        .ok_or_else(|| LarkBotError::ApiError("response has no message_id".to_string()))
}

#[async_trait]
impl MessageSender for LarkClient {
    async fn send_message(
        &self,
        receive_id_type: ReceiveIdType,
        receive_id: &str,
        msg_type: MsgType,
        content: &str,
    ) -> Result<String> {
        let data = self
            .call(
                Method::POST,
                "/open-apis/im/v1/messages",
                &[("receive_id_type", receive_id_type.as_str())],
                Some(json!({
                    "receive_id": receive_id,
                    "msg_type": msg_type.as_str(),
                    "content": content,
                })),
            )
            .await?;
        let message_id = message_id_of(&data)?;
        info!(message_id = %message_id, msg_type = msg_type.as_str(), "Message sent");
        Ok(message_id)
    }

    async fn reply_message(&self, message_id: &str, msg_type: MsgType, content: &str) -> Result<String> {
        let data = self
            .call(
                Method::POST,
                &format!("/open-apis/im/v1/messages/{}/reply", message_id),
                &[],
                Some(json!({"msg_type": msg_type.as_str(), "content": content})),
            )
            .await?;
        message_id_of(&data)
    }

    async fn patch_message(&self, message_id: &str, content: &str) -> Result<()> {
        self.call(
            Method::PATCH,
            &format!("/open-apis/im/v1/messages/{}", message_id),
            &[],
            Some(json!({"content": content})),
        )
        .await?;
        Ok(())
    }

    async fn update_message(&self, message_id: &str, msg_type: MsgType, content: &str) -> Result<()> {
        self.call(
            Method::PUT,
            &format!("/open-apis/im/v1/messages/{}", message_id),
            &[],
            Some(json!({"msg_type": msg_type.as_str(), "content": content})),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    async fn mock_token(server: &mut mockito::ServerGuard, expect: usize) -> mockito::Mock {
        server
            .mock("POST", "/open-apis/auth/v3/tenant_access_token/internal")
            .match_body(Matcher::Json(json!({"app_id": "cli_test", "app_secret": "secret"})))
            .with_status(200)
            .with_body(r#"{"code":0,"msg":"ok","tenant_access_token":"t-abc","expire":7200}"#)
            .expect(expect)
            .create_async()
            .await
    }

    fn client_for(server: &mockito::ServerGuard) -> LarkClient {
        LarkClient::new(AppCredentials::new("cli_test", "secret").with_domain(server.url()))
    }

    #[tokio::test]
    async fn test_jsapi_ticket_is_fetched_with_tenant_token_and_cached() {
        let mut server = mockito::Server::new_async().await;
        let _token = mock_token(&mut server, 1).await;
        let ticket_mock = server
            .mock("POST", "/open-apis/jssdk/ticket/get")
            .match_header("authorization", "Bearer t-abc")
            .with_body(r#"{"code":0,"msg":"ok","data":{"expire_in":7200,"ticket":"617bf955"}}"#)
            .expect(1)
            .create_async()
            .await;
        let client = client_for(&server);

        assert_eq!(client.jsapi_ticket().await.unwrap(), "617bf955");
        assert_eq!(client.jsapi_ticket().await.unwrap(), "617bf955");

        ticket_mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_tenant_token_is_cached() {
        let mut server = mockito::Server::new_async().await;
        let token_mock = mock_token(&mut server, 1).await;
        let client = client_for(&server);

        assert_eq!(client.tenant_access_token().await.unwrap(), "t-abc");
        assert_eq!(client.tenant_access_token().await.unwrap(), "t-abc");

        token_mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_short_lived_token_is_refetched() {
        let mut server = mockito::Server::new_async().await;
        let token_mock = server
            .mock("POST", "/open-apis/auth/v3/tenant_access_token/internal")
            .with_body(r#"{"code":0,"tenant_access_token":"t-short","expire":30}"#)
            .expect(2)
            .create_async()
            .await;
        let client = client_for(&server);

        client.tenant_access_token().await.unwrap();
        client.tenant_access_token().await.unwrap();

        token_mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_send_message() {
        let mut server = mockito::Server::new_async().await;
        let _token = mock_token(&mut server, 1).await;
        let send_mock = server
            .mock("POST", "/open-apis/im/v1/messages")
            .match_query(Matcher::UrlEncoded("receive_id_type".into(), "chat_id".into()))
            .match_header("authorization", "Bearer t-abc")
            .match_body(Matcher::Json(json!({
                "receive_id": "oc_1",
                "msg_type": "text",
                "content": "{\"text\":\"hello\"}"
            })))
            .with_body(r#"{"code":0,"msg":"success","data":{"message_id":"om_1"}}"#)
            .create_async()
            .await;
        let client = client_for(&server);

        let id = client.send_text(ReceiveIdType::ChatId, "oc_1", "hello").await.unwrap();

        assert_eq!(id, "om_1");
        send_mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_api_error_carries_request_id() {
        let mut server = mockito::Server::new_async().await;
        let _token = mock_token(&mut server, 1).await;
        let _reply = server
            .mock("POST", "/open-apis/im/v1/messages/om_1/reply")
            .with_status(400)
            .with_header("X-Tt-Logid", "log-123")
            .with_body(r#"{"code":230002,"msg":"bot not in chat"}"#)
            .create_async()
            .await;
        let client = client_for(&server);

        let err = client.reply_message("om_1", MsgType::Text, "{}").await.unwrap_err();

        match err {
            LarkBotError::LarkApi { code, msg, request_id } => {
                assert_eq!(code, 230002);
                assert_eq!(msg, "bot not in chat");
                assert_eq!(request_id, "log-123");
            }
            other => panic!("Expected LarkApi, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_patch_and_update_messages() {
        let mut server = mockito::Server::new_async().await;
        let _token = mock_token(&mut server, 1).await;
        let patch_mock = server
            .mock("PATCH", "/open-apis/im/v1/messages/om_card")
            .match_body(Matcher::PartialJson(json!({"content": "{\"schema\":\"2.0\"}"})))
            .with_body(r#"{"code":0,"msg":"success","data":{}}"#)
            .create_async()
            .await;
        let update_mock = server
            .mock("PUT", "/open-apis/im/v1/messages/om_text")
            .match_body(Matcher::PartialJson(json!({"msg_type": "text"})))
            .with_body(r#"{"code":0,"msg":"success","data":{}}"#)
            .create_async()
            .await;
        let client = client_for(&server);

        client.patch_message("om_card", r#"{"schema":"2.0"}"#).await.unwrap();
        client
            .update_message("om_text", MsgType::Text, &text_content("edited"))
            .await
            .unwrap();

        patch_mock.assert_async().await;
        update_mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_send_template_card() {
        let mut server = mockito::Server::new_async().await;
        let _token = mock_token(&mut server, 1).await;
        let send_mock = server
            .mock("POST", "/open-apis/im/v1/messages")
            .match_query(Matcher::UrlEncoded("receive_id_type".into(), "open_id".into()))
            .match_body(Matcher::PartialJson(json!({"msg_type": "interactive"})))
            .with_body(r#"{"code":0,"data":{"message_id":"om_2"}}"#)
            .create_async()
            .await;
        let client = client_for(&server);

        let card = Card::template("tpl_1").variable("open_id", "ou_1");
        client
            .send_template_card(ReceiveIdType::OpenId, "ou_1", &card)
            .await
            .unwrap();

        send_mock.assert_async().await;
    }

    #[test]
    fn test_authorize_url() {
        let client = LarkClient::new(AppCredentials::new("cli_test", "secret"));
        let url = client
            .authorize_url("http://localhost:3000/callback", &["im:chat:read", "docx:document:readonly"])
            .unwrap();

        let parsed = Url::parse(&url).unwrap();
        assert_eq!(parsed.path(), "/open-apis/authen/v1/authorize");
        let pairs: Vec<(String, String)> = parsed.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("client_id".to_string(), "cli_test".to_string()),
                ("redirect_uri".to_string(), "http://localhost:3000/callback".to_string()),
                ("scope".to_string(), "im:chat:read docx:document:readonly".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_exchange_user_token_and_user_info() {
        let mut server = mockito::Server::new_async().await;
        let token_mock = server
            .mock("POST", "/open-apis/authen/v2/oauth/token")
            .match_body(Matcher::PartialJson(json!({
                "grant_type": "authorization_code",
                "client_id": "cli_test",
                "code": "code-1",
                "redirect_uri": "http://localhost:3000/callback"
            })))
            .with_body(r#"{"code":0,"access_token":"u-1","refresh_token":"r-1","expires_in":7200,"token_type":"Bearer","scope":"im:chat:read"}"#)
            .create_async()
            .await;
        let info_mock = server
            .mock("GET", "/open-apis/authen/v1/user_info")
            .match_header("authorization", "Bearer u-1")
            .with_body(r#"{"code":0,"msg":"success","data":{"open_id":"ou_9","name":"Alice"}}"#)
            .create_async()
            .await;
        let client = client_for(&server);

        let token = client
            .exchange_user_token("code-1", "http://localhost:3000/callback")
            .await
            .unwrap();
        assert_eq!(token.access_token, "u-1");
        assert_eq!(token.expires_in, 7200);

        let info = client.user_info(&token.access_token).await.unwrap();
        assert_eq!(info.open_id.as_deref(), Some("ou_9"));

        token_mock.assert_async().await;
        info_mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_exchange_user_token_error() {
        let mut server = mockito::Server::new_async().await;
        let _token = server
            .mock("POST", "/open-apis/authen/v2/oauth/token")
            .with_status(400)
            .with_body(r#"{"code":20003,"error":"invalid_grant","error_description":"code expired"}"#)
            .create_async()
            .await;
        let client = client_for(&server);

        let err = client.exchange_user_token("stale", "http://cb").await.unwrap_err();
        assert!(err.to_string().contains("code expired"));
    }
}
