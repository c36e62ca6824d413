//! The bounded round loop.

use larkrelay_core::Error;
use larkrelay_core::error::ProviderError;
use larkrelay_core::message::{History, Turn};
use larkrelay_core::provider::{FinishReason, Provider, ProviderRequest, ProviderResponse};
use larkrelay_core::reply::{ReplyChannel, ReplySurface, ReplyTarget, truncate_chars};
use larkrelay_core::toolhost::ToolSession;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How one driver run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverState {
    /// The model produced a final answer
    Done,
    /// The round budget ran out before a final answer
    RoundLimitExceeded,
}

/// The result of one driver run: the full history plus how it ended.
#[derive(Debug)]
pub struct DriverOutcome {
    pub history: History,
    pub state: DriverState,
}

/// Drives one conversation: model calls, tool execution, progress narration.
pub struct Driver {
    provider: Arc<dyn Provider>,
    channel: Arc<dyn ReplyChannel>,
    model: String,
    max_rounds: u32,
    narration_cap: usize,
    model_timeout: Duration,
    max_attempts: u32,
    backoff_base: Duration,
}

impl Driver {
    pub fn new(
        provider: Arc<dyn Provider>,
        channel: Arc<dyn ReplyChannel>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            channel,
            model: model.into(),
            max_rounds: 10,
            narration_cap: 1000,
            model_timeout: Duration::from_secs(120),
            max_attempts: 3,
            backoff_base: Duration::from_millis(500),
        }
    }

    /// Set the round budget for one run.
    pub fn with_max_rounds(mut self, max: u32) -> Self {
        self.max_rounds = max;
        self
    }

    /// Set the character cap applied to tool-result narration.
    pub fn with_narration_cap(mut self, cap: usize) -> Self {
        self.narration_cap = cap;
        self
    }

    /// Set the per-attempt model call timeout.
    pub fn with_model_timeout(mut self, timeout: Duration) -> Self {
        self.model_timeout = timeout;
        self
    }

    /// Set the retry budget for model calls.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Handle one inbound text message to completion.
    ///
    /// Opens the reply surface, then loops the model until it produces a
    /// final answer or the round budget runs out. Tool calls are executed in
    /// request order; a failed call gets an error-result turn so the model
    /// always sees an answer for every call id it issued.
    pub async fn run(
        &self,
        text: &str,
        session: &dyn ToolSession,
        target: &ReplyTarget,
    ) -> Result<DriverOutcome, Error> {
        let surface = self.channel.open_surface(target).await?;
        let schemas = session.schemas().to_vec();
        let mut history = History::with_user(text);

        info!(
            chat_id = %target.chat_id,
            tools = schemas.len(),
            "Driver run starting"
        );

        let mut rounds_left = self.max_rounds;
        while rounds_left > 0 {
            let response = self
                .complete_with_retry(&history, schemas.clone())
                .await?;

            match response.finish {
                FinishReason::ToolCalls => {
                    let calls = response.turn.tool_calls.clone();
                    debug!(count = calls.len(), "Model requested tool calls");
                    history.push(response.turn);

                    for call in &calls {
                        self.narrate(
                            surface.as_ref(),
                            &format!(
                                "我需要执行工具：{}，参数为：{}",
                                call.name, call.arguments
                            ),
                        )
                        .await;

                        let arguments: Value = serde_json::from_str(&call.arguments)
                            .unwrap_or_else(|_| Value::Object(Default::default()));

                        let result_text = match session.call(&call.name, arguments).await {
                            Ok(output) => output,
                            Err(e) => {
                                warn!(tool = %call.name, error = %e, "Tool call failed");
                                format!("Error: {e}")
                            }
                        };

                        // The history keeps the full result; the narration
                        // is capped.
                        history.push(Turn::tool_result(&call.id, &result_text));
                        self.narrate(
                            surface.as_ref(),
                            &format!(
                                "工具执行结果：\n{}",
                                truncate_chars(&result_text, self.narration_cap)
                            ),
                        )
                        .await;
                    }
                }
                FinishReason::Stop => {
                    self.narrate(surface.as_ref(), &response.turn.content).await;
                    history.push(response.turn);
                    info!(turns = history.len(), "Driver run complete");
                    return Ok(DriverOutcome {
                        history,
                        state: DriverState::Done,
                    });
                }
                FinishReason::Other(reason) => {
                    debug!(finish_reason = %reason, "Non-terminal finish, looping");
                }
            }

            rounds_left -= 1;
        }

        warn!(max_rounds = self.max_rounds, "Round budget exhausted");
        Ok(DriverOutcome {
            history,
            state: DriverState::RoundLimitExceeded,
        })
    }

    /// One model call with a per-attempt timeout, retried with exponential
    /// backoff for retryable failures only.
    async fn complete_with_retry(
        &self,
        history: &History,
        tools: Vec<larkrelay_core::provider::ToolSchema>,
    ) -> Result<ProviderResponse, Error> {
        let mut attempt = 1;
        loop {
            let request = ProviderRequest {
                model: self.model.clone(),
                turns: history.turns().to_vec(),
                tools: tools.clone(),
            };

            let result = match tokio::time::timeout(
                self.model_timeout,
                self.provider.complete(request),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout(format!(
                    "model call exceeded {}s",
                    self.model_timeout.as_secs()
                ))),
            };

            match result {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let backoff = self.backoff_base * 2u32.pow(attempt - 1);
                    warn!(
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Model call failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Append one chunk to the reply surface. Delivery failures are logged
    /// and swallowed; progress narration never aborts the loop.
    async fn narrate(&self, surface: &dyn ReplySurface, text: &str) {
        if let Err(e) = surface.append(text).await {
            warn!(error = %e, "Narration delivery failed");
        }
    }
}
