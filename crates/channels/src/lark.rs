//! Lark OpenAPI client: tenant token, card creation, delivery, append.

use async_trait::async_trait;
use larkrelay_core::error::ChannelError;
use larkrelay_core::message::ChatType;
use larkrelay_core::reply::{ReplyChannel, ReplySurface, ReplyTarget};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Tokens are refreshed this long before the platform expires them.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

const CARD_ELEMENT_ID: &str = "markdown_1";
const CARD_PLACEHOLDER: &str = "思考中";

/// Lark reply channel. Holds app credentials and a cached tenant token;
/// clones of the shared inner client back every surface it opens.
pub struct LarkChannel {
    inner: Arc<LarkClient>,
}

impl LarkChannel {
    pub fn new(
        base_url: impl Into<String>,
        app_id: impl Into<String>,
        app_secret: impl Into<String>,
    ) -> Result<Self, ChannelError> {
        let app_id = app_id.into();
        let app_secret = app_secret.into();
        if app_id.is_empty() || app_secret.is_empty() {
            return Err(ChannelError::NotConfigured(
                "lark app_id/app_secret missing".into(),
            ));
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| ChannelError::NotConfigured(format!("http client: {e}")))?;

        Ok(Self {
            inner: Arc::new(LarkClient {
                http,
                base_url: base_url.into().trim_end_matches('/').to_string(),
                app_id,
                app_secret,
                token: Mutex::new(None),
            }),
        })
    }
}

impl std::fmt::Debug for LarkChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LarkChannel")
            .field("base_url", &self.inner.base_url)
            .field("app_id", &self.inner.app_id)
            .field("app_secret", &"[REDACTED]")
            .finish()
    }
}

#[async_trait]
impl ReplyChannel for LarkChannel {
    async fn open_surface(
        &self,
        target: &ReplyTarget,
    ) -> Result<Box<dyn ReplySurface>, ChannelError> {
        let card_id = self.inner.create_card().await?;

        match target.chat_type {
            ChatType::P2p => self.inner.send_card(&target.chat_id, &card_id).await?,
            ChatType::Group => {
                self.inner
                    .reply_card(&target.chat_id, &target.message_id, &card_id)
                    .await?
            }
        }

        info!(chat_id = %target.chat_id, card_id = %card_id, "Reply surface opened");
        Ok(Box::new(LarkSurface {
            client: self.inner.clone(),
            card_id,
            sequence: AtomicU32::new(1),
        }))
    }
}

/// One open streaming card. The sequence counter is owned here so appends
/// from a single conversation are strictly increasing from 1.
pub struct LarkSurface {
    client: Arc<LarkClient>,
    card_id: String,
    sequence: AtomicU32,
}

#[async_trait]
impl ReplySurface for LarkSurface {
    async fn append(&self, text: &str) -> Result<(), ChannelError> {
        // The counter advances only on a delivered chunk. A failed append
        // reuses its sequence number, keeping the platform-visible
        // sequence contiguous.
        let sequence = self.sequence.load(Ordering::SeqCst);
        self.client
            .append_content(&self.card_id, text, sequence)
            .await?;
        self.sequence.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct LarkClient {
    http: reqwest::Client,
    base_url: String,
    app_id: String,
    app_secret: String,
    token: Mutex<Option<CachedToken>>,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_fresh(&self, now: Instant) -> bool {
        now + TOKEN_REFRESH_MARGIN < self.expires_at
    }
}

impl LarkClient {
    /// Return a valid tenant access token, fetching a new one when the
    /// cached token is missing or close to expiry.
    async fn tenant_token(&self) -> Result<String, ChannelError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.is_fresh(Instant::now()) {
                return Ok(token.value.clone());
            }
        }

        debug!("Fetching tenant access token");
        let url = format!(
            "{}/open-apis/auth/v3/tenant_access_token/internal",
            self.base_url
        );
        let response = self
            .http
            .post(&url)
            .json(&json!({
                "app_id": self.app_id,
                "app_secret": self.app_secret,
            }))
            .send()
            .await
            .map_err(|e| ChannelError::AuthFailed(format!("token request: {e}")))?;

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| ChannelError::AuthFailed(format!("token response: {e}")))?;
        if body.code != 0 {
            return Err(ChannelError::AuthFailed(format!(
                "code {}: {}",
                body.code, body.msg
            )));
        }

        let token = CachedToken {
            value: body.tenant_access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(body.expire),
        };
        *cached = Some(token);
        Ok(body.tenant_access_token)
    }

    async fn create_card(&self) -> Result<String, ChannelError> {
        let url = format!("{}/open-apis/cardkit/v1/cards", self.base_url);
        let body = self
            .post_json(
                &url,
                &json!({
                    "type": "card_json",
                    "data": card_template().to_string(),
                }),
            )
            .await
            .map_err(|reason| ChannelError::SurfaceCreationFailed { reason })?;

        body.data
            .as_ref()
            .and_then(|d| d.get("card_id"))
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| ChannelError::SurfaceCreationFailed {
                reason: "response missing card_id".into(),
            })
    }

    /// Deliver the card into a direct chat.
    async fn send_card(&self, chat_id: &str, card_id: &str) -> Result<(), ChannelError> {
        let url = format!(
            "{}/open-apis/im/v1/messages?receive_id_type=chat_id",
            self.base_url
        );
        self.post_json(
            &url,
            &json!({
                "receive_id": chat_id,
                "msg_type": "interactive",
                "content": card_content(card_id),
            }),
        )
        .await
        .map_err(|reason| ChannelError::DeliveryFailed {
            chat_id: chat_id.to_string(),
            reason,
        })?;
        Ok(())
    }

    /// Deliver the card as a threaded reply to the inbound message.
    async fn reply_card(
        &self,
        chat_id: &str,
        message_id: &str,
        card_id: &str,
    ) -> Result<(), ChannelError> {
        let url = format!(
            "{}/open-apis/im/v1/messages/{}/reply",
            self.base_url, message_id
        );
        self.post_json(
            &url,
            &json!({
                "msg_type": "interactive",
                "content": card_content(card_id),
            }),
        )
        .await
        .map_err(|reason| ChannelError::DeliveryFailed {
            chat_id: chat_id.to_string(),
            reason,
        })?;
        Ok(())
    }

    /// Replace the markdown element content with the given sequence number.
    /// The uuid makes platform-side retries idempotent.
    async fn append_content(
        &self,
        card_id: &str,
        content: &str,
        sequence: u32,
    ) -> Result<(), ChannelError> {
        let url = format!(
            "{}/open-apis/cardkit/v1/cards/{}/elements/{}/content",
            self.base_url, card_id, CARD_ELEMENT_ID
        );
        let token = self.tenant_token().await?;
        let response = self
            .http
            .put(&url)
            .bearer_auth(&token)
            .json(&json!({
                "uuid": uuid::Uuid::new_v4().to_string(),
                "content": content,
                "sequence": sequence,
            }))
            .send()
            .await
            .map_err(|e| ChannelError::DeliveryFailed {
                chat_id: card_id.to_string(),
                reason: format!("append: {e}"),
            })?;

        let body: ApiEnvelope = response.json().await.map_err(|e| {
            ChannelError::DeliveryFailed {
                chat_id: card_id.to_string(),
                reason: format!("append response: {e}"),
            }
        })?;
        if body.code != 0 {
            return Err(ChannelError::DeliveryFailed {
                chat_id: card_id.to_string(),
                reason: format!("code {}: {}", body.code, body.msg),
            });
        }
        Ok(())
    }

    /// POST an authorized JSON body and decode the standard envelope.
    /// Errors come back as plain reason strings so call sites can attach
    /// their own variant.
    async fn post_json(&self, url: &str, body: &Value) -> Result<ApiEnvelope, String> {
        let token = self
            .tenant_token()
            .await
            .map_err(|e| format!("auth: {e}"))?;
        let response = self
            .http
            .post(url)
            .bearer_auth(&token)
            .json(body)
            .send()
            .await
            .map_err(|e| format!("request: {e}"))?;

        let envelope: ApiEnvelope = response
            .json()
            .await
            .map_err(|e| format!("response: {e}"))?;
        if envelope.code != 0 {
            return Err(format!("code {}: {}", envelope.code, envelope.msg));
        }
        Ok(envelope)
    }
}

/// The streaming card shell: one markdown element the appends target,
/// streaming mode on so the client animates content as it arrives.
fn card_template() -> Value {
    json!({
        "schema": "2.0",
        "config": {
            "streaming_mode": true,
            "summary": {
                "content": format!("[{CARD_PLACEHOLDER}]"),
            },
            "streaming_config": {
                "print_frequency_ms": {"default": 30, "android": 25, "ios": 40, "pc": 50},
                "print_step": {"default": 2, "android": 3, "ios": 4, "pc": 5},
                "print_strategy": "fast",
            },
        },
        "body": {
            "elements": [
                {
                    "tag": "markdown",
                    "content": CARD_PLACEHOLDER,
                    "element_id": CARD_ELEMENT_ID,
                }
            ],
        },
    })
}

/// The message content wrapper that points a chat message at a card.
fn card_content(card_id: &str) -> String {
    json!({"type": "card", "data": {"card_id": card_id}}).to_string()
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    code: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    tenant_access_token: String,
    #[serde(default)]
    expire: u64,
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    code: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn card_template_has_streaming_markdown_element() {
        let card = card_template();
        assert_eq!(card["config"]["streaming_mode"], json!(true));
        let element = &card["body"]["elements"][0];
        assert_eq!(element["tag"], "markdown");
        assert_eq!(element["element_id"], CARD_ELEMENT_ID);
        assert_eq!(element["content"], CARD_PLACEHOLDER);
    }

    #[test]
    fn card_content_embeds_card_id() {
        let content = card_content("crd_123");
        let parsed: Value = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed["type"], "card");
        assert_eq!(parsed["data"]["card_id"], "crd_123");
    }

    #[test]
    fn cached_token_fresh_until_margin() {
        let now = Instant::now();
        let token = CachedToken {
            value: "t".into(),
            expires_at: now + Duration::from_secs(7200),
        };
        assert!(token.is_fresh(now));
        // Inside the refresh margin counts as stale.
        assert!(!token.is_fresh(now + Duration::from_secs(7200 - 30)));
    }

    #[test]
    fn token_response_parses() {
        let body = r#"{"code":0,"msg":"ok","tenant_access_token":"t-abc","expire":7200}"#;
        let parsed: TokenResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.code, 0);
        assert_eq!(parsed.tenant_access_token, "t-abc");
        assert_eq!(parsed.expire, 7200);
    }

    #[test]
    fn envelope_error_code_parses() {
        let body = r#"{"code":99991663,"msg":"app not found"}"#;
        let parsed: ApiEnvelope = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.code, 99991663);
        assert!(parsed.data.is_none());
    }

    #[test]
    fn missing_credentials_rejected_at_construction() {
        let err = LarkChannel::new("https://open.feishu.cn", "", "secret").unwrap_err();
        assert!(matches!(err, ChannelError::NotConfigured(_)));
    }

    #[test]
    fn debug_redacts_secret() {
        let channel =
            LarkChannel::new("https://open.feishu.cn", "cli_app", "hunter2").unwrap();
        let debug = format!("{channel:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("hunter2"));
    }

    #[tokio::test]
    async fn surface_sequence_starts_at_one() {
        let channel =
            LarkChannel::new("https://open.feishu.cn", "cli_app", "secret").unwrap();
        let surface = LarkSurface {
            client: channel.inner.clone(),
            card_id: "crd_1".into(),
            sequence: AtomicU32::new(1),
        };
        assert_eq!(surface.sequence.fetch_add(1, Ordering::SeqCst), 1);
        assert_eq!(surface.sequence.fetch_add(1, Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_append_does_not_consume_a_sequence_number() {
        // Nothing listens here, so the token fetch inside append fails and
        // the chunk is never delivered.
        let channel = LarkChannel::new("http://127.0.0.1:1", "cli_app", "secret").unwrap();
        let surface = LarkSurface {
            client: channel.inner.clone(),
            card_id: "crd_1".into(),
            sequence: AtomicU32::new(1),
        };

        assert!(surface.append("lost chunk").await.is_err());
        assert!(surface.append("lost again").await.is_err());
        // The next delivered chunk would still be sequence 1.
        assert_eq!(surface.sequence.load(Ordering::SeqCst), 1);
    }
}
