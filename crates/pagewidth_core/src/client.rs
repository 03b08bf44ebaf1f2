use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::thread::sleep;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use reqwest::blocking::Client;
use reqwest::cookie::Jar;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::api::{Block, BlockKind, MutationError, NotionApi, Workspace};
use crate::config::{PagewidthConfig, env_override};

const RECORD_BATCH_SIZE: usize = 100;
const ERROR_BODY_PREVIEW_CHARS: usize = 300;

#[derive(Debug, Clone)]
pub struct NotionClientConfig {
    pub api_url: String,
    pub user_agent: String,
    pub token_v2: Option<String>,
    pub timeout_ms: u64,
    pub max_retries: usize,
    pub max_write_retries: usize,
    pub retry_delay_ms: u64,
    pub read_interval_ms: u64,
}

impl NotionClientConfig {
    pub fn from_config(config: &PagewidthConfig) -> Self {
        let http = &config.http;
        Self {
            api_url: config.api_url(),
            user_agent: config.user_agent(),
            token_v2: config.token_v2(),
            timeout_ms: env_value_u64("NOTION_HTTP_TIMEOUT_MS", http.timeout_ms.unwrap_or(30_000)),
            max_retries: env_value_usize("NOTION_HTTP_RETRIES", http.max_retries.unwrap_or(2)),
            max_write_retries: env_value_usize(
                "NOTION_HTTP_WRITE_RETRIES",
                http.max_write_retries.unwrap_or(0),
            ),
            retry_delay_ms: env_value_u64(
                "NOTION_HTTP_RETRY_DELAY_MS",
                http.retry_delay_ms.unwrap_or(500),
            ),
            read_interval_ms: env_value_u64(
                "NOTION_READ_INTERVAL_MS",
                http.read_interval_ms.unwrap_or(0),
            ),
        }
    }
}

pub struct NotionClient {
    client: Client,
    config: NotionClientConfig,
    base_url: Url,
    authenticated: bool,
    last_read_at: Option<Instant>,
    request_count: usize,
}

impl NotionClient {
    pub fn new(config: NotionClientConfig) -> Result<Self> {
        let base_url = Url::parse(&format!("{}/", config.api_url.trim_end_matches('/')))
            .with_context(|| format!("invalid NOTION_API_URL: {}", config.api_url))?;

        let cookies = Arc::new(Jar::default());
        if let Some(token) = &config.token_v2 {
            cookies.add_cookie_str(&format!("token_v2={token}; Path=/"), &base_url);
        }

        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .cookie_provider(cookies)
            .build()
            .context("failed to build Notion HTTP client")?;

        Ok(Self {
            client,
            authenticated: config.token_v2.is_some(),
            config,
            base_url,
            last_read_at: None,
            request_count: 0,
        })
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn login(&mut self, email: &str, password: &str) -> Result<()> {
        self.request_json(
            "loginWithEmail",
            &json!({ "email": email, "password": password }),
            true,
        )
        .context("Notion login failed")?;
        self.authenticated = true;
        Ok(())
    }

    fn request_json(&mut self, endpoint: &str, body: &Value, is_write: bool) -> Result<Value> {
        let url = self
            .base_url
            .join(endpoint)
            .with_context(|| format!("invalid Notion endpoint: {endpoint}"))?;
        let max_retries = if is_write {
            self.config.max_write_retries
        } else {
            self.config.max_retries
        };

        for attempt in 0..=max_retries {
            if !is_write {
                self.apply_read_interval();
            }
            self.request_count += 1;
            debug!(endpoint, attempt, "calling Notion API");

            let response = self
                .client
                .post(url.clone())
                .header("User-Agent", self.config.user_agent.clone())
                .json(body)
                .send();

            match response {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        if attempt < max_retries && is_retryable_status(status) {
                            self.wait_before_retry(attempt, is_write);
                            continue;
                        }
                        let text = response.text().unwrap_or_default();
                        bail!("{}", describe_api_error(status, &text));
                    }

                    return response
                        .json::<Value>()
                        .with_context(|| format!("failed to decode Notion {endpoint} response"));
                }
                Err(error) => {
                    if attempt < max_retries && is_retryable_error(&error) {
                        self.wait_before_retry(attempt, is_write);
                        continue;
                    }
                    return Err(error)
                        .with_context(|| format!("failed to call Notion API {endpoint}"));
                }
            }
        }

        bail!("Notion API request exhausted retry budget")
    }

    fn apply_read_interval(&mut self) {
        let interval = Duration::from_millis(self.config.read_interval_ms);
        if let Some(last) = self.last_read_at {
            let elapsed = last.elapsed();
            if elapsed < interval {
                sleep(interval - elapsed);
            }
        }
        self.last_read_at = Some(Instant::now());
    }

    fn wait_before_retry(&self, attempt: usize, is_write: bool) {
        let exponent = u32::try_from(attempt).unwrap_or(16);
        let base = self
            .config
            .retry_delay_ms
            .saturating_mul(2u64.saturating_pow(exponent));
        let jitter = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| u64::from(duration.subsec_millis() % 100))
            .unwrap_or(0);
        let multiplier = if is_write { 2u64 } else { 1u64 };
        sleep(Duration::from_millis(
            base.saturating_mul(multiplier).saturating_add(jitter),
        ));
    }

    fn load_blocks(&mut self, ids: &[String]) -> Result<Vec<Block>> {
        let mut blocks = Vec::with_capacity(ids.len());
        for batch in ids.chunks(RECORD_BATCH_SIZE) {
            let requests = batch
                .iter()
                .map(|id| json!({ "pointer": { "table": "block", "id": id }, "version": -1 }))
                .collect::<Vec<_>>();
            let response =
                self.request_json("syncRecordValues", &json!({ "requests": requests }), false)?;
            blocks.extend(parse_blocks(batch, response)?);
        }
        Ok(blocks)
    }
}

impl NotionApi for NotionClient {
    fn resolve_user_id(&mut self, email: &str) -> Result<String> {
        let response = self.request_json("loadUserContent", &json!({}), false)?;
        find_user_id(email, response)
    }

    fn list_workspaces(&mut self, user_id: &str) -> Result<Vec<Workspace>> {
        let response = self.request_json("getSpaces", &json!({}), false)?;
        parse_workspaces(user_id, &response)
    }

    fn get_root_pages(&mut self, workspace: &Workspace) -> Result<Vec<Block>> {
        self.load_blocks(&workspace.root_page_ids)
    }

    fn get_children(&mut self, page: &Block) -> Result<Vec<Block>> {
        self.load_blocks(&page.child_ids)
    }

    fn set_full_width(&mut self, page_id: &str, full_width: bool) -> Result<(), MutationError> {
        self.request_json(
            "submitTransaction",
            &full_width_transaction(page_id, full_width),
            true,
        )
        .map(|_| ())
        .map_err(|error| MutationError::classify(format!("{error:#}")))
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

fn full_width_transaction(page_id: &str, full_width: bool) -> Value {
    json!({
        "operations": [{
            "id": page_id,
            "table": "block",
            "path": ["format"],
            "command": "update",
            "args": { "page_full_width": full_width },
        }]
    })
}

fn describe_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ErrorPayload>(body)
        && let Some(message) = payload.message
    {
        let name = payload.name.unwrap_or_else(|| "UnknownError".to_string());
        return format!("Notion API error [HTTP {}] {name}: {message}", status.as_u16());
    }

    let preview = body
        .trim()
        .chars()
        .take(ERROR_BODY_PREVIEW_CHARS)
        .collect::<String>();
    if preview.is_empty() {
        format!("Notion API request failed with HTTP {status}")
    } else {
        format!("Notion API request failed with HTTP {status}: {preview}")
    }
}

/// Records come back either as `{ "value": {...} }` or, from newer
/// endpoints, as `{ "value": { "value": {...}, "role": ... } }`.
fn record_value(entry: &Value) -> Option<&Value> {
    let value = entry.get("value")?;
    match value.get("value") {
        Some(inner) if inner.is_object() => Some(inner),
        _ => Some(value),
    }
}

fn find_user_id(email: &str, response: Value) -> Result<String> {
    let parsed: RecordMapResponse = serde_json::from_value(response)
        .context("failed to decode loadUserContent response")?;
    for (user_id, entry) in &parsed.record_map.notion_user {
        let matches = record_value(entry)
            .and_then(|user| user.get("email"))
            .and_then(Value::as_str)
            .is_some_and(|value| value.trim().eq_ignore_ascii_case(email.trim()));
        if matches {
            return Ok(user_id.clone());
        }
    }
    bail!("no Notion user with email {email} in this session")
}

fn parse_workspaces(user_id: &str, response: &Value) -> Result<Vec<Workspace>> {
    let Some(spaces) = response
        .get(user_id)
        .and_then(|user| user.get("space"))
        .and_then(Value::as_object)
    else {
        debug!(user = user_id, "getSpaces returned no member spaces");
        return Ok(Vec::new());
    };

    let private_pages = parse_private_pages(user_id, response)?;

    let mut workspaces = Vec::with_capacity(spaces.len());
    for (space_id, entry) in spaces {
        let Some(value) = record_value(entry) else {
            continue;
        };
        let record: SpaceRecord = serde_json::from_value(value.clone())
            .with_context(|| format!("failed to decode space record {space_id}"))?;
        let id = record.id.unwrap_or_else(|| space_id.clone());

        let mut seen = HashSet::new();
        let root_page_ids = record
            .pages
            .into_iter()
            .chain(private_pages.get(&id).cloned().unwrap_or_default())
            .filter(|page_id| seen.insert(page_id.clone()))
            .collect();
        workspaces.push(Workspace {
            id,
            name: record.name.unwrap_or_else(|| "<unnamed>".to_string()),
            root_page_ids,
        });
    }
    workspaces.sort_by(|left, right| {
        left.name
            .to_lowercase()
            .cmp(&right.name.to_lowercase())
            .then_with(|| left.id.cmp(&right.id))
    });
    Ok(workspaces)
}

// Top-level pages in a member's private section live on their space_view,
// not on the space record.
fn parse_private_pages(user_id: &str, response: &Value) -> Result<BTreeMap<String, Vec<String>>> {
    let mut private_pages: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let Some(views) = response
        .get(user_id)
        .and_then(|user| user.get("space_view"))
        .and_then(Value::as_object)
    else {
        return Ok(private_pages);
    };

    for (view_id, entry) in views {
        let Some(value) = record_value(entry) else {
            continue;
        };
        let record: SpaceViewRecord = serde_json::from_value(value.clone())
            .with_context(|| format!("failed to decode space_view record {view_id}"))?;
        if record.alive == Some(false) {
            continue;
        }
        if let Some(space_id) = record.space_id {
            private_pages
                .entry(space_id)
                .or_default()
                .extend(record.private_pages);
        }
    }
    Ok(private_pages)
}

fn parse_blocks(ids: &[String], response: Value) -> Result<Vec<Block>> {
    let parsed: RecordMapResponse = serde_json::from_value(response)
        .context("failed to decode syncRecordValues response")?;

    let mut blocks = Vec::with_capacity(ids.len());
    for id in ids {
        let Some(value) = parsed.record_map.block.get(id).and_then(record_value) else {
            debug!(block = %id, "block record not returned");
            continue;
        };
        let record: BlockRecord = serde_json::from_value(value.clone())
            .with_context(|| format!("failed to decode block record {id}"))?;
        if record.alive == Some(false) {
            continue;
        }
        let kind = BlockKind::from_wire(record.block_type.as_deref().unwrap_or_default());
        blocks.push(Block {
            id: record.id,
            kind,
            parent_id: record.parent_id,
            title: record.properties.as_ref().and_then(title_text),
            child_ids: record.content,
        });
    }
    Ok(blocks)
}

fn title_text(properties: &Value) -> Option<String> {
    let segments = properties.get("title")?.as_array()?;
    let text = segments
        .iter()
        .filter_map(|segment| segment.get(0).and_then(Value::as_str))
        .collect::<String>();
    if text.is_empty() { None } else { Some(text) }
}

fn env_value_u64(key: &str, default: u64) -> u64 {
    env_override(key)
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_value_usize(key: &str, default: usize) -> usize {
    env_override(key)
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(default)
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

#[derive(Debug, Deserialize, Default)]
struct RecordMapResponse {
    #[serde(default, rename = "recordMap")]
    record_map: RecordMap,
}

#[derive(Debug, Deserialize, Default)]
struct RecordMap {
    #[serde(default)]
    block: BTreeMap<String, Value>,
    #[serde(default)]
    notion_user: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct BlockRecord {
    id: String,
    #[serde(rename = "type")]
    block_type: Option<String>,
    parent_id: Option<String>,
    alive: Option<bool>,
    #[serde(default)]
    content: Vec<String>,
    properties: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct SpaceRecord {
    id: Option<String>,
    name: Option<String>,
    #[serde(default)]
    pages: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SpaceViewRecord {
    space_id: Option<String>,
    alive: Option<bool>,
    #[serde(default)]
    private_pages: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ErrorPayload {
    name: Option<String>,
    message: Option<String>,
}
