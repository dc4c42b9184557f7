use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::error::{Result, RunnerError};
use crate::session::SessionId;

/// Everything the decision service needs to pick one session's next action.
/// The instruction is fixed for the session's lifetime; history, observation
/// and the choice set are refreshed every tick.
#[derive(Debug, Clone)]
pub struct PromptContext {
    pub instruction: String,
    pub history: Vec<String>,
    pub observation: String,
    pub has_search_bar: bool,
    pub clickables: Vec<String>,
}

impl PromptContext {
    /// Render the full prompt string sent to the decision service.
    pub fn render(&self) -> String {
        let choices = if self.has_search_bar {
            "SEARCH".to_string()
        } else {
            self.clickables
                .iter()
                .map(|c| format!("CLICK {c}"))
                .collect::<Vec<_>>()
                .join("\n")
        };

        let mut previous = String::new();
        if !self.history.is_empty() {
            previous.push_str("Here are the previous steps I have completed:\n");
            for (idx, step) in self.history.iter().enumerate() {
                previous.push_str(&format!("{}. {step}\n", idx + 1));
            }
        }

        format!(
            "Here is HTML for a shopping website: {}\n\
             My goal is to buy the following on a shopping website: \"{}\".\n\
             I will give you a list of choices you must select from.\n\
             Your job is to tell me which HTML element I should click on or term I should search to get closer to acheiving this goal.\n\
             It is ok if your instruction does not complete the goal in this step because I will follow up asking for more questions after completing this step if your response element does not complete the goal.\n\
             Respond with the following JSON format if I should type in the search bar: \n\
             {{\"action\": \"SEARCH\", \"search_text\": \"women faux fur lined winter jacket\"}}\n\
             Respond with the following JSON format if I should click on an element: \n\
             {{\"action\": \"CLICK\", \"element\": \"B09PY89B1S\"}}\n\
             Respond with the following JSON format to complete the buy action once you are confident with the item selected: \n\
             {{\"action\": \"CLICK\", \"element\": \"Buy Now\"}}\n\
             Only respond with one of these two formats and no additional text aside from the JSON.\n\
             {}\n\
             Here are the available actions to choose from. You may only choose from these actions.:\n\
             {}",
            self.observation, self.instruction, previous, choices
        )
    }
}

/// The external decision service: one order-correlated batch completion,
/// where `result[i]` answers `prompts[i]`.
#[async_trait]
pub trait DecisionClient: Send + Sync {
    async fn complete(&self, prompts: &[String]) -> Result<Vec<String>>;
}

/// HTTP client for the batch prediction endpoint. The request carries the
/// authentication token and the ordered prompt list; the response carries the
/// ordered result list.
pub struct HttpDecisionClient {
    client: Client,
    endpoint: String,
    token: String,
}

impl HttpDecisionClient {
    pub fn new(endpoint: String, token: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RunnerError::DecisionService(e.to_string()))?;
        Ok(Self {
            client,
            endpoint,
            token,
        })
    }
}

#[derive(Deserialize)]
struct BatchReply {
    result: Vec<String>,
}

#[async_trait]
impl DecisionClient for HttpDecisionClient {
    async fn complete(&self, prompts: &[String]) -> Result<Vec<String>> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({
                "token": self.token,
                "prompts": prompts,
            }))
            .send()
            .await
            .map_err(|e| RunnerError::DecisionService(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RunnerError::DecisionService(format!(
                "endpoint returned {status}"
            )));
        }

        let reply: BatchReply = response
            .json()
            .await
            .map_err(|e| RunnerError::DecisionService(format!("bad response body: {e}")))?;
        Ok(reply.result)
    }
}

/// One directive as the service phrases it.
#[derive(Debug, Deserialize)]
struct Directive {
    action: String,
    #[serde(default)]
    search_text: Option<String>,
    #[serde(default)]
    element: Option<String>,
}

/// Translate one response entry into a raw driver action. Anything that does
/// not match the two known directive shapes is fatal for the tick: the
/// contract has no partial-batch recovery.
fn parse_directive(raw: &str) -> Result<String> {
    let directive: Directive = serde_json::from_str(raw)
        .map_err(|e| RunnerError::MalformedDecision(format!("{e} in {raw:?}")))?;
    match directive.action.as_str() {
        "SEARCH" => directive
            .search_text
            .map(|query| format!("search[{query}]"))
            .ok_or_else(|| RunnerError::MalformedDecision("SEARCH without search_text".to_string())),
        "CLICK" => directive
            .element
            .map(|element| format!("click[{element}]"))
            .ok_or_else(|| RunnerError::MalformedDecision("CLICK without element".to_string())),
        other => Err(RunnerError::MalformedDecision(format!(
            "unknown action {other:?}"
        ))),
    }
}

/// Issues exactly one batched decision call per tick and maps the positional
/// response back to sessions.
///
/// The service correlates request and response by position, not by key, so
/// the identifier order used to build the payload must be the order used to
/// demultiplex the reply. `BTreeMap` iteration provides that deterministic
/// order on both sides.
pub struct DecisionBatcher {
    client: Box<dyn DecisionClient>,
    max_attempts: usize,
}

impl DecisionBatcher {
    pub fn new(client: Box<dyn DecisionClient>) -> Self {
        Self {
            client,
            max_attempts: 3,
        }
    }

    pub async fn decide(
        &self,
        requests: &BTreeMap<SessionId, PromptContext>,
    ) -> Result<BTreeMap<SessionId, String>> {
        let ids: Vec<SessionId> = requests.keys().copied().collect();
        let prompts: Vec<String> = ids.iter().map(|id| requests[id].render()).collect();
        debug!(sessions = prompts.len(), "issuing batched decision call");

        let results = self.call_with_retry(&prompts).await?;

        let mut decided = BTreeMap::new();
        for (id, raw) in ids.into_iter().zip(results) {
            decided.insert(id, parse_directive(&raw)?);
        }
        Ok(decided)
    }

    /// Transport failures and length mismatches get the whole call retried;
    /// nothing is handed back to any session until an attempt succeeds.
    async fn call_with_retry(&self, prompts: &[String]) -> Result<Vec<String>> {
        let mut last = RunnerError::DecisionService("no attempt made".to_string());
        for attempt in 1..=self.max_attempts {
            match self.client.complete(prompts).await {
                Ok(results) if results.len() == prompts.len() => return Ok(results),
                Ok(results) => {
                    last = RunnerError::DecisionService(format!(
                        "asked for {} decisions, got {}",
                        prompts.len(),
                        results.len()
                    ));
                    warn!(attempt, error = %last, "decision batch rejected");
                }
                Err(err @ RunnerError::DecisionService(_)) => {
                    warn!(attempt, error = %err, "decision call failed");
                    last = err;
                }
                Err(err) => return Err(err),
            }
        }
        Err(last)
    }
}
