//! LLM-based task extraction
//!
//! Builds the extraction prompt, sends it to the configured backend and turns
//! the reply into a validated result. Failures are returned, never papered
//! over here: falling back to the rule engine is the facade's job.

use chrono::{Local, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::config::{AiBackendConfig, Provider};
use crate::error::{ExtractionError, Result};
use crate::types::{
    fold_people_into_notes, retain_known_tags, ExtractionResult, Priority, TaskDate, TaskDraft,
};

/// Prompt override files (relative to working directory)
const ANALYZER_PROMPT_FILE: &str = "prompts/task_analyzer.md";
const IMPORT_PROMPT_FILE: &str = "prompts/task_import.md";

const ANALYZER_TAG_LIMIT: usize = 3;
const IMPORT_TAG_LIMIT: usize = 5;

const ANTHROPIC_VERSION: &str = "2023-06-01";

const SYSTEM_INSTRUCTION: &str =
    "你是一个任务分析助手，请分析任务描述并返回 JSON 格式的结构化数据。";

/// Example-driven prompt for the live analyzer
const ANALYZER_PROMPT: &str = r#"你现在是一个信息提取助手。请从以下文本中提取关键信息，并按照指定格式返回JSON。

示例输入：
"周四下午2点在图书馆和小明讨论项目方案"

示例输出：
{
  "title": "图书馆 小明 讨论 (周四 下午2点)",
  "notes": "项目方案",
  "suggestedTags": ["工作"],
  "priority": "medium",
  "estimatedTime": "周四 下午2点",
  "location": "图书馆",
  "participants": ["小明"]
}

现在请分析以下文本：
{{TEXT}}

要求：
1. 必须严格按照示例格式返回JSON
2. title：提取地点、人物、动作，并将时间放在括号中
3. notes：提取具体的讨论/工作内容
4. suggestedTags：从这些标签中选择（最多 3 个）：{{TAGS}}
5. priority：根据紧急程度判断（high/medium/low）
6. estimatedTime：提取具体时间
7. location：提取地点信息
8. participants：提取所有参与者

请直接返回JSON，不要有任何其他内容。
"#;

/// Schema prompt for one-shot task import
const IMPORT_PROMPT: &str = r#"你是一个任务分析助手，请分析以下任务描述，提取关键信息并返回 JSON 格式的结构化数据。

今天是 {{TODAY}}。

任务描述: {{TEXT}}

请提取以下信息（如果存在）：
1. 任务标题（简洁明了）
2. 任务标签（最多 3 个，只能从这些标签中选择：{{TAGS}}）
3. 优先级（high/medium/low）
4. 开始日期（YYYY-MM-DD 格式）
5. 截止日期（YYYY-MM-DD 格式）
6. 地点
7. 相关人员
8. 备注信息

请以下面的 JSON 格式返回结果（只返回 JSON，不要有其他文字）：
{
  "text": "任务标题",
  "tags": ["标签1", "标签2"],
  "priority": "优先级",
  "startDate": "开始日期",
  "dueDate": "截止日期",
  "location": "地点",
  "people": ["人员1", "人员2"],
  "notes": "备注信息"
}
"#;

static FENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```(?:json|JSON)?\s*|\s*```").expect("Invalid regex"));

static DAY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("Invalid regex"));

// ============================================================================
// Prompts
// ============================================================================

/// Which prompt and output shape a call uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    /// Live analysis: structured participants, analyzer field names
    Analyzer,
    /// Task import: people folded into notes, calendar dates
    Import,
}

impl PromptKind {
    fn file(&self) -> &'static str {
        match self {
            PromptKind::Analyzer => ANALYZER_PROMPT_FILE,
            PromptKind::Import => IMPORT_PROMPT_FILE,
        }
    }

    fn builtin(&self) -> &'static str {
        match self {
            PromptKind::Analyzer => ANALYZER_PROMPT,
            PromptKind::Import => IMPORT_PROMPT,
        }
    }
}

/// Load the prompt template, preferring an override file
fn load_template(kind: PromptKind) -> String {
    let path = kind.file();

    if !Path::new(path).exists() {
        return kind.builtin().to_string();
    }

    match fs::read_to_string(path) {
        Ok(content) => {
            debug!("Loaded prompt from {}", path);
            content
        }
        Err(e) => {
            warn!("Failed to read {}: {}, using built-in prompt", path, e);
            kind.builtin().to_string()
        }
    }
}

/// Fill `{{TODAY}}`, `{{TAGS}}` and `{{TEXT}}` in the template
pub fn build_prompt(kind: PromptKind, text: &str, known_tags: &[String]) -> String {
    let today = Local::now().format("%Y-%m-%d").to_string();
    let tags = if known_tags.is_empty() {
        "(无)".to_string()
    } else {
        known_tags.join(", ")
    };

    // Text goes in last so user input is never treated as a placeholder
    load_template(kind)
        .replace("{{TODAY}}", &today)
        .replace("{{TAGS}}", &tags)
        .replace("{{TEXT}}", text)
}

// ============================================================================
// Backend Wire Types
// ============================================================================

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: OllamaOptions<'a>,
}

#[derive(Serialize)]
struct OllamaOptions<'a> {
    temperature: f32,
    top_k: u32,
    top_p: f32,
    num_predict: u32,
    #[serde(skip_serializing_if = "no_stop")]
    stop: &'a [String],
}

fn no_stop(stop: &&[String]) -> bool {
    stop.is_empty()
}

#[derive(Deserialize, Debug)]
struct OllamaResponse {
    #[serde(default)]
    response: Option<String>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    top_p: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "no_stop")]
    stop: &'a [String],
}

#[derive(Deserialize, Debug)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize, Debug)]
struct ChatChoice {
    #[serde(default)]
    message: Option<ChatChoiceMessage>,
}

#[derive(Deserialize, Debug)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    system: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    top_p: f32,
    top_k: u32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "no_stop")]
    stop_sequences: &'a [String],
}

#[derive(Deserialize, Debug)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<AnthropicBlock>,
}

#[derive(Deserialize, Debug)]
struct AnthropicBlock {
    #[serde(default)]
    text: Option<String>,
}

// ============================================================================
// Backend Calls
// ============================================================================

/// Send `prompt` to the configured backend and return its text reply
pub async fn complete(client: &Client, prompt: &str, config: &AiBackendConfig) -> Result<String> {
    config.validate()?;
    let base = config.base_url()?;

    info!(
        "Calling {} backend at {} (model {})",
        config.provider.as_str(),
        base,
        config.model
    );

    match config.provider {
        Provider::Ollama => call_ollama(client, &base, prompt, config).await,
        Provider::OpenAi => call_openai(client, &base, prompt, config).await,
        Provider::Anthropic => call_anthropic(client, &base, prompt, config).await,
        Provider::Custom => call_custom(client, &base, prompt, config).await,
    }
}

async fn call_ollama(
    client: &Client,
    base: &str,
    prompt: &str,
    config: &AiBackendConfig,
) -> Result<String> {
    let body = OllamaRequest {
        model: &config.model,
        prompt,
        stream: false,
        options: OllamaOptions {
            temperature: config.options.temperature,
            top_k: config.options.top_k,
            top_p: config.options.top_p,
            num_predict: config.options.max_tokens,
            stop: &config.options.stop,
        },
    };

    let request = client.post(format!("{}/api/generate", base)).json(&body);
    let resp: OllamaResponse = send(request).await?.json().await?;

    non_empty(resp.response, "Ollama response has no `response` text")
}

async fn call_openai(
    client: &Client,
    base: &str,
    prompt: &str,
    config: &AiBackendConfig,
) -> Result<String> {
    // validate() guarantees the key for this provider
    let key = config.api_key.as_deref().unwrap_or_default();
    call_chat_completions(client, base, prompt, config, Some(key)).await
}

async fn call_custom(
    client: &Client,
    base: &str,
    prompt: &str,
    config: &AiBackendConfig,
) -> Result<String> {
    call_chat_completions(client, base, prompt, config, config.api_key.as_deref()).await
}

/// OpenAI-style `/chat/completions`
async fn call_chat_completions(
    client: &Client,
    base: &str,
    prompt: &str,
    config: &AiBackendConfig,
    bearer: Option<&str>,
) -> Result<String> {
    let body = ChatRequest {
        model: &config.model,
        messages: vec![
            ChatMessage {
                role: "system",
                content: SYSTEM_INSTRUCTION,
            },
            ChatMessage {
                role: "user",
                content: prompt,
            },
        ],
        temperature: config.options.temperature,
        top_p: config.options.top_p,
        max_tokens: config.options.max_tokens,
        stop: &config.options.stop,
    };

    let mut request = client
        .post(format!("{}/chat/completions", base))
        .json(&body);
    if let Some(key) = bearer {
        request = request.bearer_auth(key);
    }

    let resp: ChatResponse = send(request).await?.json().await?;
    let content = resp
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message)
        .and_then(|m| m.content);

    non_empty(content, "Chat completion has no message content")
}

async fn call_anthropic(
    client: &Client,
    base: &str,
    prompt: &str,
    config: &AiBackendConfig,
) -> Result<String> {
    let key = config.api_key.as_deref().unwrap_or_default();

    let body = AnthropicRequest {
        model: &config.model,
        system: SYSTEM_INSTRUCTION,
        messages: vec![ChatMessage {
            role: "user",
            content: prompt,
        }],
        temperature: config.options.temperature,
        top_p: config.options.top_p,
        top_k: config.options.top_k,
        max_tokens: config.options.max_tokens,
        stop_sequences: &config.options.stop,
    };

    let request = client
        .post(format!("{}/messages", base))
        .header("x-api-key", key)
        .header("anthropic-version", ANTHROPIC_VERSION)
        .json(&body);

    let resp: AnthropicResponse = send(request).await?.json().await?;
    let chunks: Vec<String> = resp.content.into_iter().filter_map(|b| b.text).collect();

    if chunks.is_empty() {
        return Err(ExtractionError::ResponseParse(
            "Anthropic response has no text blocks".to_string(),
        ));
    }
    Ok(chunks.join("\n").trim().to_string())
}

/// Send a request, turning non-2xx statuses into `BackendHttp`
async fn send(request: RequestBuilder) -> Result<reqwest::Response> {
    let response = request.send().await?;

    if !response.status().is_success() {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        return Err(ExtractionError::BackendHttp { status, body });
    }
    Ok(response)
}

fn non_empty(text: Option<String>, missing: &str) -> Result<String> {
    match text {
        Some(t) if !t.trim().is_empty() => Ok(t.trim().to_string()),
        _ => Err(ExtractionError::ResponseParse(missing.to_string())),
    }
}

// ============================================================================
// Reply Parsing
// ============================================================================

/// Remove markdown code fence markers, keeping their contents
pub fn strip_code_fences(text: &str) -> String {
    FENCE_RE.replace_all(text, "").trim().to_string()
}

/// End index (exclusive) of the balanced object starting at `start`
fn balanced_object_end(s: &str, start: usize) -> Option<usize> {
    let mut in_str = false;
    let mut escape = false;
    let mut depth = 0;

    for (i, ch) in s[start..].char_indices() {
        if in_str {
            if escape {
                escape = false;
            } else if ch == '\\' {
                escape = true;
            } else if ch == '"' {
                in_str = false;
            }
            continue;
        }

        match ch {
            '"' => in_str = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Find and parse the first JSON object in a model reply.
///
/// Tolerates code fences and surrounding prose; stray braces in the prose are
/// skipped by trying each `{` in turn.
pub fn extract_json_object(text: &str) -> Result<Map<String, Value>> {
    let s = strip_code_fences(text);

    // Fast path: the whole reply is the object
    if s.starts_with('{') {
        if let Ok(Value::Object(map)) = serde_json::from_str(&s) {
            return Ok(map);
        }
    }

    let mut last_error = "No '{' found in model output".to_string();
    for (start, _) in s.match_indices('{') {
        let Some(end) = balanced_object_end(&s, start) else {
            last_error = "No matching '}' found in model output".to_string();
            continue;
        };
        match serde_json::from_str::<Value>(&s[start..end]) {
            Ok(Value::Object(map)) => return Ok(map),
            Ok(_) => last_error = "Model output is not a JSON object".to_string(),
            Err(e) => last_error = format!("Failed to parse JSON: {}", e),
        }
    }

    Err(ExtractionError::ResponseParse(last_error))
}

/// Non-empty, trimmed string field
fn str_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// String elements of an array field; anything else is dropped
fn string_list(obj: &Map<String, Value>, key: &str) -> Vec<String> {
    match obj.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// `YYYY-MM-DD` that is also a real calendar day
fn day_field(obj: &Map<String, Value>, key: &str) -> Option<TaskDate> {
    let s = str_field(obj, key)?;
    if !DAY_RE.is_match(&s) {
        return None;
    }
    NaiveDate::parse_from_str(&s, "%Y-%m-%d")
        .ok()
        .map(TaskDate::Day)
}

/// Coerce an analyzer reply; missing priority means `Medium`
pub fn normalize_analysis(
    obj: &Map<String, Value>,
    text: &str,
    known_tags: &[String],
) -> ExtractionResult {
    let mut participants = string_list(obj, "participants");
    if participants.is_empty() {
        participants = string_list(obj, "people");
    }

    ExtractionResult {
        title: str_field(obj, "title").unwrap_or_else(|| text.to_string()),
        notes: str_field(obj, "notes"),
        suggested_tags: retain_known_tags(
            string_list(obj, "suggestedTags"),
            known_tags,
            ANALYZER_TAG_LIMIT,
        ),
        priority: str_field(obj, "priority")
            .and_then(|p| Priority::parse(&p))
            .unwrap_or_default(),
        estimated_time: str_field(obj, "estimatedTime"),
        location: str_field(obj, "location"),
        participants,
    }
}

/// Coerce an import reply; people are folded into the notes
pub fn normalize_import(obj: &Map<String, Value>, text: &str, known_tags: &[String]) -> TaskDraft {
    let title = str_field(obj, "text")
        .or_else(|| str_field(obj, "title"))
        .unwrap_or_else(|| text.to_string());

    TaskDraft {
        title,
        notes: fold_people_into_notes(str_field(obj, "notes"), &string_list(obj, "people")),
        tags: retain_known_tags(string_list(obj, "tags"), known_tags, IMPORT_TAG_LIMIT),
        priority: str_field(obj, "priority").and_then(|p| Priority::parse(&p)),
        start_date: day_field(obj, "startDate"),
        due_date: day_field(obj, "dueDate"),
        location: str_field(obj, "location"),
    }
}

// ============================================================================
// Entry Points
// ============================================================================

async fn run_prompt(
    client: &Client,
    kind: PromptKind,
    text: &str,
    known_tags: &[String],
    config: &AiBackendConfig,
) -> Result<Map<String, Value>> {
    if text.trim().is_empty() {
        return Err(ExtractionError::EmptyInput);
    }

    let prompt = build_prompt(kind, text, known_tags);
    debug!("Extraction prompt ({:?}): {}", kind, prompt);

    let raw = complete(client, &prompt, config).await?;
    debug!("Model raw response: {}", raw);

    extract_json_object(&raw)
}

/// Analyzer shape: structured participants, at most 3 tags
pub async fn analyze_task_llm(
    client: &Client,
    text: &str,
    known_tags: &[String],
    config: &AiBackendConfig,
) -> Result<ExtractionResult> {
    let obj = run_prompt(client, PromptKind::Analyzer, text, known_tags, config).await?;
    Ok(normalize_analysis(&obj, text, known_tags))
}

/// Import shape: calendar dates, people in notes, at most 5 tags
pub async fn import_task_llm(
    client: &Client,
    text: &str,
    known_tags: &[String],
    config: &AiBackendConfig,
) -> Result<TaskDraft> {
    let obj = run_prompt(client, PromptKind::Import, text, known_tags, config).await?;
    Ok(normalize_import(&obj, text, known_tags))
}
