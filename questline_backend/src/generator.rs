use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Context handed to the generator when asking for the next daily mission.
#[derive(Debug, Clone, Serialize)]
pub struct NextMissionRequest {
    pub current_mission_name: String,
    pub goal_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goal_deadline: Option<DateTime<Utc>>,
    /// Names of already-completed daily missions, newline-joined.
    pub completion_history: String,
    pub user_level: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback_text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedSubTask {
    pub name: String,
    pub target: f64,
    pub unit: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedMission {
    pub next_mission_name: String,
    pub next_mission_description: String,
    pub xp_reward: u64,
    pub fragment_reward: u64,
    pub sub_tasks: Vec<GeneratedSubTask>,
    #[serde(default)]
    pub learning_resource_links: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SkillXpResponse {
    xp_amount: u64,
}

/// Seam for the generative backend, so the orchestrator can be exercised
/// with a scripted generator in tests.
#[async_trait]
pub trait MissionGenerator: Send + Sync {
    async fn next_mission(&self, request: &NextMissionRequest) -> Result<GeneratedMission>;

    /// How much skill xp a completed mission is worth, keyed by mission text
    /// and the skill's current level.
    async fn skill_xp(&self, mission_text: &str, skill_level: u32) -> Result<u64>;
}

/// True when the error text carries a rate-limit/quota marker, so callers
/// can surface the distinct quota message instead of the generic one.
pub fn is_quota_error(err: &anyhow::Error) -> bool {
    static MARKERS: OnceLock<Regex> = OnceLock::new();
    let re = MARKERS.get_or_init(|| {
        Regex::new(r"(?i)(429|rate.?limit|quota|resource.?exhausted|overloaded|too many requests)")
            .expect("quota marker regex")
    });
    re.is_match(&format!("{err:#}"))
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

/// HTTP implementation speaking the OpenAI chat-completions format.
#[derive(Clone)]
pub struct HttpMissionGenerator {
    api_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl HttpMissionGenerator {
    pub fn new(api_url: String, api_key: String, model: String) -> Self {
        Self {
            api_url,
            api_key,
            model,
            client: reqwest::Client::new(),
        }
    }

    async fn generate(&self, messages: Vec<Message>) -> Result<String> {
        let url = format!("{}/chat/completions", self.api_url);

        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            temperature: Some(0.7),
            max_tokens: Some(1000),
        };

        let mut req = self.client.post(&url).json(&request);

        // API key header only when configured (local models run without one)
        if !self.api_key.is_empty() {
            req = req.header("Authorization", format!("Bearer {}", self.api_key));
        }

        let response = req.send().await.context("Failed to send generator request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read body".to_string());
            anyhow::bail!("Generator API returned error {}: {}", status, body);
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .context("Failed to parse generator response")?;

        completion
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .ok_or_else(|| anyhow::anyhow!("No response from generator"))
    }

    async fn generate_json<T>(&self, messages: Vec<Message>) -> Result<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        let response = self.generate(messages).await?;

        match serde_json::from_str::<T>(&response) {
            Ok(parsed) => Ok(parsed),
            Err(_) => {
                // Models often wrap JSON in a markdown fence or prose;
                // extract the fenced block or the outermost brace span.
                let json_content = if let Some(start) = response.find("```json") {
                    let after_start = &response[start + 7..];
                    if let Some(end) = after_start.find("```") {
                        after_start[..end].trim()
                    } else {
                        &response
                    }
                } else if let Some(start) = response.find('{') {
                    if let Some(end) = response.rfind('}') {
                        &response[start..=end]
                    } else {
                        &response
                    }
                } else {
                    &response
                };

                serde_json::from_str::<T>(json_content).context(format!(
                    "Failed to parse JSON response. Raw response: {}",
                    response
                ))
            }
        }
    }

    fn next_mission_messages(request: &NextMissionRequest) -> Vec<Message> {
        let deadline = request
            .goal_deadline
            .map(|d| format!("Goal deadline: {}\n", d.to_rfc3339()))
            .unwrap_or_default();
        let feedback = request
            .feedback_text
            .as_deref()
            .map(|f| format!("User feedback on the last mission: {}\n", f))
            .unwrap_or_default();

        vec![
            Message {
                role: "system".to_string(),
                content: "You design the next daily mission in a gamified productivity system. \
                          Missions are small, concrete and measurable, and build on what the \
                          user already finished. Respond with JSON only."
                    .to_string(),
            },
            Message {
                role: "user".to_string(),
                content: format!(
                    "Goal: {}\n{}Just completed: {}\nUser level: {}\n{}\
                     Completed missions so far:\n{}\n\n\
                     Respond with JSON:\n\
                     {{\n  \
                       \"next_mission_name\": \"...\",\n  \
                       \"next_mission_description\": \"...\",\n  \
                       \"xp_reward\": 50,\n  \
                       \"fragment_reward\": 5,\n  \
                       \"sub_tasks\": [{{\"name\": \"...\", \"target\": 1, \"unit\": \"...\"}}],\n  \
                       \"learning_resource_links\": []\n\
                     }}",
                    request.goal_name,
                    deadline,
                    request.current_mission_name,
                    request.user_level,
                    feedback,
                    request.completion_history,
                ),
            },
        ]
    }
}

#[async_trait]
impl MissionGenerator for HttpMissionGenerator {
    async fn next_mission(&self, request: &NextMissionRequest) -> Result<GeneratedMission> {
        self.generate_json(Self::next_mission_messages(request))
            .await
    }

    async fn skill_xp(&self, mission_text: &str, skill_level: u32) -> Result<u64> {
        let messages = vec![
            Message {
                role: "system".to_string(),
                content: "You rate how much skill experience a completed mission is worth. \
                          Respond with JSON only."
                    .to_string(),
            },
            Message {
                role: "user".to_string(),
                content: format!(
                    "Mission: {}\nCurrent skill level: {}\n\n\
                     Respond with JSON: {{\"xp_amount\": <integer 10-100>}}",
                    mission_text, skill_level
                ),
            },
        ];
        let parsed: SkillXpResponse = self.generate_json(messages).await?;
        Ok(parsed.xp_amount)
    }
}
