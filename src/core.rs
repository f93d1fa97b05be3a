use crate::config::{AppConfig, Prompts};
use crate::context::{History, Message};
use crate::llm_client::{LlmClient, LlmError, ModelReply};
use crate::tools::ToolRegistry;
use crate::utils::truncate_log;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error(transparent)]
    Llm(#[from] LlmError),
}

/// Drives one conversation: keeps the history, calls the model, runs
/// requested tools, and compacts the history when it grows too large.
/// Persistence stays outside; the shell saves after each turn.
pub struct Agent {
    llm: Arc<dyn LlmClient>,
    registry: ToolRegistry,
    prompts: Prompts,
    history: History,
    memory_threshold_kb: f64,
    memory_keep_last_n: usize,
    max_tool_rounds: usize,
}

impl Agent {
    /// Returned when the model produces neither text nor tool calls.
    pub const FALLBACK_REPLY: &'static str =
        "I'm sorry, I could not produce a response. Please try again.";

    /// Returned when a turn burns through every allowed tool round.
    /// The partial tool exchange stays in history so a follow-up turn
    /// can pick up from it.
    pub const ROUND_LIMIT_REPLY: &'static str =
        "I reached the tool-call limit for this turn and stopped early. The tool results so far are saved; ask again to continue.";

    pub fn new(
        llm: Arc<dyn LlmClient>,
        registry: ToolRegistry,
        prompts: Prompts,
        history: History,
        config: &AppConfig,
    ) -> Self {
        Self {
            llm,
            registry,
            prompts,
            history,
            memory_threshold_kb: config.memory_threshold_kb,
            memory_keep_last_n: config.memory_keep_last_n,
            max_tool_rounds: config.max_tool_rounds,
        }
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// Runs one full user turn. On any API failure the history is
    /// restored to its state before the user message was appended, so
    /// a failed turn leaves no trace.
    pub async fn process_message(&mut self, user_input: &str) -> Result<String, AgentError> {
        let checkpoint = self.history.clone();
        self.history.push(Message::user(user_input));

        match self.run_turn().await {
            Ok(reply) => Ok(reply),
            Err(e) => {
                self.history = checkpoint;
                Err(e.into())
            }
        }
    }

    async fn run_turn(&mut self) -> Result<String, LlmError> {
        if self.history.needs_compaction(self.memory_threshold_kb) {
            println!("[Memory threshold reached, summarizing conversation...]");
            tracing::info!(
                "History at {:.1} KB crossed the {:.0} KB threshold",
                self.history.size_kb(),
                self.memory_threshold_kb
            );
            self.compact().await?;
        }

        let schemas = self.registry.schemas();
        for round in 0..self.max_tool_rounds {
            match self.call_model(&schemas).await? {
                ModelReply::Text(text) => {
                    let reply = match text {
                        Some(text) if !text.trim().is_empty() => text,
                        _ => {
                            tracing::warn!("Model returned an empty reply");
                            Self::FALLBACK_REPLY.to_string()
                        }
                    };
                    self.history.push(Message::assistant(reply.clone()));
                    return Ok(reply);
                }
                ModelReply::ToolCalls { content, calls } => {
                    tracing::debug!("Round {}: {} tool call(s)", round + 1, calls.len());
                    self.history
                        .push(Message::assistant_with_calls(content, calls.clone()));
                    for call in &calls {
                        println!("[Executing tool: {} with args: {}]", call.name, call.arguments);
                        tracing::info!("Executing tool {} ({})", call.name, call.id);
                        let result = self.registry.execute(&call.name, &call.arguments).await;
                        tracing::debug!("Tool {} returned: {}", call.name, truncate_log(&result));
                        self.history
                            .push(Message::tool_result(&call.id, &call.name, &result));
                    }
                }
            }
        }

        tracing::warn!(
            "Turn stopped after {} tool rounds without a final reply",
            self.max_tool_rounds
        );
        self.history.push(Message::assistant(Self::ROUND_LIMIT_REPLY));
        Ok(Self::ROUND_LIMIT_REPLY.to_string())
    }

    /// The system prompt is prepended per request and never stored, so
    /// the persisted history stays prompt-free.
    async fn call_model(&self, schemas: &[Value]) -> Result<ModelReply, LlmError> {
        let mut messages = Vec::with_capacity(self.history.len() + 1);
        messages.push(Message::system(self.prompts.system_prompt.clone()));
        messages.extend_from_slice(self.history.messages());
        self.llm.chat(&messages, Some(schemas)).await
    }

    async fn compact(&mut self) -> Result<(), LlmError> {
        let request = self
            .history
            .summary_request(&self.prompts.summarization_prompt);
        let summary = self.llm.generate_text(&request).await?;
        self.history = self.history.compress(&summary, self.memory_keep_last_n);
        tracing::info!("Compacted history down to {} messages", self.history.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Role, ToolCall, SUMMARY_PREFIX};
    use crate::tools::GetDateTool;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Default)]
    struct ScriptedClient {
        replies: Mutex<VecDeque<Result<ModelReply, String>>>,
        summaries: Mutex<VecDeque<String>>,
        chat_payloads: Mutex<Vec<Vec<Message>>>,
        summary_prompts: Mutex<Vec<String>>,
    }

    impl ScriptedClient {
        fn with_replies(replies: Vec<Result<ModelReply, String>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                ..Default::default()
            })
        }

        fn chat_count(&self) -> usize {
            self.chat_payloads.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedClient {
        async fn chat(
            &self,
            messages: &[Message],
            _tools: Option<&[Value]>,
        ) -> Result<ModelReply, LlmError> {
            self.chat_payloads.lock().unwrap().push(messages.to_vec());
            match self.replies.lock().unwrap().pop_front() {
                Some(Ok(reply)) => Ok(reply),
                Some(Err(message)) => Err(LlmError::ApiError(message)),
                None => Err(LlmError::ApiError("no scripted reply left".to_string())),
            }
        }

        async fn generate_text(&self, prompt: &str) -> Result<String, LlmError> {
            self.summary_prompts.lock().unwrap().push(prompt.to_string());
            match self.summaries.lock().unwrap().pop_front() {
                Some(summary) => Ok(summary),
                None => Err(LlmError::ApiError("no scripted summary left".to_string())),
            }
        }
    }

    fn test_prompts() -> Prompts {
        Prompts {
            system_prompt: "You are a friendly French tutor with tools.".to_string(),
            summarization_prompt: "Summarize what happened:\n{conversation}".to_string(),
        }
    }

    fn date_call(id: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            name: "get_date".to_string(),
            arguments: json!({}),
        }
    }

    fn agent_with(client: Arc<ScriptedClient>, history: History, config: &AppConfig) -> Agent {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(GetDateTool));
        Agent::new(client, registry, test_prompts(), history, config)
    }

    #[tokio::test]
    async fn plain_text_turn_appends_user_and_assistant() {
        let client = ScriptedClient::with_replies(vec![Ok(ModelReply::Text(Some(
            "Bonjour! Ready to practice?".to_string(),
        )))]);
        let mut agent = agent_with(client.clone(), History::new(), &AppConfig::default());

        let reply = agent.process_message("hello").await.unwrap();
        assert_eq!(reply, "Bonjour! Ready to practice?");

        let history = agent.history().messages();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[1].role, Role::Assistant);

        // system prompt goes on the wire but never into history
        let payload = &client.chat_payloads.lock().unwrap()[0];
        assert_eq!(payload[0].role, Role::System);
        assert!(payload[0]
            .text_content()
            .unwrap()
            .contains("French tutor"));
        assert!(history.iter().all(|m| m.role != Role::System));
    }

    #[tokio::test]
    async fn blank_reply_falls_back_to_apology() {
        let client =
            ScriptedClient::with_replies(vec![Ok(ModelReply::Text(Some("   ".to_string())))]);
        let mut agent = agent_with(client, History::new(), &AppConfig::default());

        let reply = agent.process_message("hi").await.unwrap();
        assert_eq!(reply, Agent::FALLBACK_REPLY);
        assert_eq!(
            agent.history().last().unwrap().text_content().unwrap(),
            Agent::FALLBACK_REPLY
        );
    }

    #[tokio::test]
    async fn tool_round_feeds_results_back_to_the_model() {
        let client = ScriptedClient::with_replies(vec![
            Ok(ModelReply::ToolCalls {
                content: None,
                calls: vec![date_call("call_1")],
            }),
            Ok(ModelReply::Text(Some("Today is a fine day.".to_string()))),
        ]);
        let mut agent = agent_with(client.clone(), History::new(), &AppConfig::default());

        let reply = agent.process_message("what day is it?").await.unwrap();
        assert_eq!(reply, "Today is a fine day.");

        let history = agent.history().messages();
        assert_eq!(history.len(), 4);
        assert_eq!(history[1].role, Role::Assistant);
        assert_eq!(history[1].tool_calls.as_ref().unwrap()[0].name, "get_date");
        assert_eq!(history[2].role, Role::Tool);
        assert_eq!(history[2].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(history[2].name.as_deref(), Some("get_date"));
        assert_eq!(history[3].role, Role::Assistant);

        // the second request carried the tool result
        let second_payload = &client.chat_payloads.lock().unwrap()[1];
        assert!(second_payload.iter().any(|m| m.role == Role::Tool));
    }

    #[tokio::test]
    async fn unknown_tool_is_reported_not_fatal() {
        let client = ScriptedClient::with_replies(vec![
            Ok(ModelReply::ToolCalls {
                content: None,
                calls: vec![ToolCall {
                    id: "call_1".to_string(),
                    name: "book_flight".to_string(),
                    arguments: json!({"to": "Paris"}),
                }],
            }),
            Ok(ModelReply::Text(Some("I cannot book flights.".to_string()))),
        ]);
        let mut agent = agent_with(client, History::new(), &AppConfig::default());

        let reply = agent.process_message("fly me to Paris").await.unwrap();
        assert_eq!(reply, "I cannot book flights.");

        let tool_message = &agent.history().messages()[2];
        let text = tool_message.text_content().unwrap();
        assert!(text.contains("Unknown tool"));
        assert!(text.contains("book_flight"));
    }

    #[tokio::test]
    async fn api_error_rolls_back_the_whole_turn() {
        let mut seeded = History::new();
        seeded.push(Message::user("earlier question"));
        seeded.push(Message::assistant("earlier answer"));

        let client = ScriptedClient::with_replies(vec![
            Ok(ModelReply::ToolCalls {
                content: Some("checking".to_string()),
                calls: vec![date_call("call_1")],
            }),
            Err("HTTP 500: upstream exploded".to_string()),
        ]);
        let mut agent = agent_with(client, seeded.clone(), &AppConfig::default());

        let result = agent.process_message("and now?").await;
        assert!(matches!(result, Err(AgentError::Llm(_))));

        // the partial turn (user message, tool exchange) is gone
        assert_eq!(agent.history(), &seeded);
    }

    #[tokio::test]
    async fn round_limit_stops_the_turn_with_a_notice() {
        let replies: Vec<Result<ModelReply, String>> = (0..5)
            .map(|i| {
                Ok(ModelReply::ToolCalls {
                    content: None,
                    calls: vec![date_call(&format!("call_{i}"))],
                })
            })
            .collect();
        let client = ScriptedClient::with_replies(replies);
        let mut agent = agent_with(client.clone(), History::new(), &AppConfig::default());

        let reply = agent.process_message("loop forever").await.unwrap();
        assert_eq!(reply, Agent::ROUND_LIMIT_REPLY);
        assert_eq!(client.chat_count(), 5);

        // user + 5 * (assistant, tool) + closing notice
        let history = agent.history().messages();
        assert_eq!(history.len(), 12);
        assert_eq!(
            history.last().unwrap().text_content().unwrap(),
            Agent::ROUND_LIMIT_REPLY
        );
    }

    #[tokio::test]
    async fn oversized_history_is_compacted_before_the_model_call() {
        let mut history = History::new();
        for i in 0..30 {
            history.push(Message::user(format!("padding {i}: {}", "x".repeat(40))));
        }
        let config = AppConfig {
            memory_threshold_kb: 0.5,
            ..Default::default()
        };
        assert!(history.needs_compaction(config.memory_threshold_kb));

        let client = ScriptedClient::with_replies(vec![Ok(ModelReply::Text(Some(
            "Compact and carry on.".to_string(),
        )))]);
        *client.summaries.lock().unwrap() = vec!["we traded padding".to_string()].into();

        let mut agent = agent_with(client.clone(), history, &config);
        let reply = agent.process_message("still there?").await.unwrap();
        assert_eq!(reply, "Compact and carry on.");

        // summary + last 10 (ending in the new user message) + reply
        let history = agent.history().messages();
        assert_eq!(history.len(), 12);
        let first = history[0].text_content().unwrap();
        assert!(first.starts_with(SUMMARY_PREFIX));
        assert!(first.contains("we traded padding"));
        assert_eq!(history[10].text_content().unwrap(), "still there?");

        // the summarization request got the rendered transcript
        let prompts = client.summary_prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].starts_with("Summarize what happened:"));
        assert!(prompts[0].contains("USER: padding 0"));
        assert!(!prompts[0].contains("{conversation}"));
    }

    #[tokio::test]
    async fn failed_summarization_rolls_back_and_leaves_history_intact() {
        let mut history = History::new();
        for i in 0..30 {
            history.push(Message::user(format!("padding {i}: {}", "x".repeat(40))));
        }
        let config = AppConfig {
            memory_threshold_kb: 0.5,
            ..Default::default()
        };

        // no scripted summaries: generate_text fails, turn aborts
        let client = ScriptedClient::with_replies(vec![]);
        let mut agent = agent_with(client.clone(), history.clone(), &config);

        let result = agent.process_message("one more").await;
        assert!(result.is_err());
        assert_eq!(agent.history(), &history);
        assert_eq!(client.chat_count(), 0);
    }
}
