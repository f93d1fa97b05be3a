use async_trait::async_trait;
use chrono::Local;
use regex::Regex;
use reqwest::Client;
use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::stats::{
    current_week_start, days_remaining_in_week, now_timestamp, today_string, week_start_of,
    Session, StatsRecord, StatsStore, DATE_FMT,
};

// Helper to clean up JSON schema for strict LLM APIs
pub fn clean_schema(mut schema_val: serde_json::Value) -> serde_json::Value {
    if let Some(obj) = schema_val.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
    }
    schema_val
}

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> String;
    fn description(&self) -> String;
    fn parameters_schema(&self) -> serde_json::Value;
    async fn execute(&self, args: Value) -> Result<String, ToolError>;
}

/// Strips the spurious `{"": ""}` pair some models attach to calls of
/// zero-parameter tools, and normalizes null arguments to an empty
/// object.
fn sanitize_args(args: &Value) -> Value {
    match args {
        Value::Object(map) => {
            let cleaned: serde_json::Map<String, Value> = map
                .iter()
                .filter(|(key, _)| !key.is_empty())
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();
            Value::Object(cleaned)
        }
        Value::Null => Value::Object(serde_json::Map::new()),
        other => other.clone(),
    }
}

/// Holds the available tools and dispatches calls to them by name.
/// Failures never escape: an unknown tool or a failing execution comes
/// back as explanatory text the model can read and react to.
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tool schemas in the chat-completions function format.
    pub fn schemas(&self) -> Vec<Value> {
        self.tools
            .iter()
            .map(|tool| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": tool.name(),
                        "description": tool.description(),
                        "parameters": tool.parameters_schema(),
                    }
                })
            })
            .collect()
    }

    pub async fn execute(&self, name: &str, args: &Value) -> String {
        let Some(tool) = self.tools.iter().find(|tool| tool.name() == name) else {
            return format!("Error: Unknown tool '{name}'");
        };
        match tool.execute(sanitize_args(args)).await {
            Ok(result) => result,
            Err(e) => format!("Error executing {name}: {e}"),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// All nine built-in tools, sharing one stats store.
pub fn default_registry(stats: Arc<StatsStore>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(WriteToFileTool::new()));
    registry.register(Arc::new(GetDateTool));
    registry.register(Arc::new(BatchNewsletterTool::new()));
    registry.register(Arc::new(SetFrenchLearningGoalTool::new(stats.clone())));
    registry.register(Arc::new(GetFrenchLearningGoalTool::new(stats.clone())));
    registry.register(Arc::new(LogFrenchLearningTimeTool::new(stats.clone())));
    registry.register(Arc::new(GetFrenchLearningTimeTool::new(stats.clone())));
    registry.register(Arc::new(CompareFrenchLearningProgressTool::new(
        stats.clone(),
    )));
    registry.register(Arc::new(CheckNewWeekStatusTool::new(stats)));
    registry
}

#[derive(Serialize, Deserialize, JsonSchema)]
pub struct EmptyArgs {}

// --- File Write Tool ---
pub struct WriteToFileTool {
    base_dir: Option<PathBuf>,
}

#[derive(Serialize, Deserialize, JsonSchema)]
pub struct WriteToFileArgs {
    /// Name of the file to write to
    pub filename: String,
    /// Content to write to the file
    pub content: String,
}

impl WriteToFileTool {
    pub fn new() -> Self {
        Self { base_dir: None }
    }

    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: Some(base_dir.into()),
        }
    }

    fn resolve(&self, filename: &str) -> PathBuf {
        match &self.base_dir {
            Some(base) if Path::new(filename).is_relative() => base.join(filename),
            _ => PathBuf::from(filename),
        }
    }
}

impl Default for WriteToFileTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for WriteToFileTool {
    fn name(&self) -> String {
        "write_to_file".to_string()
    }

    fn description(&self) -> String {
        "Write content to a file in the current directory.".to_string()
    }

    fn parameters_schema(&self) -> serde_json::Value {
        clean_schema(serde_json::to_value(schema_for!(WriteToFileArgs)).unwrap())
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let parsed: WriteToFileArgs =
            serde_json::from_value(args).map_err(|e| ToolError::InvalidArguments(e.to_string()))?;

        match std::fs::write(self.resolve(&parsed.filename), &parsed.content) {
            Ok(()) => Ok(format!("Successfully wrote to {}", parsed.filename)),
            Err(e) => Ok(format!("Error writing to file: {e}")),
        }
    }
}

// --- Date Tool ---
pub struct GetDateTool;

#[async_trait]
impl Tool for GetDateTool {
    fn name(&self) -> String {
        "get_date".to_string()
    }

    fn description(&self) -> String {
        "Get today's date in a readable format.".to_string()
    }

    fn parameters_schema(&self) -> serde_json::Value {
        clean_schema(serde_json::to_value(schema_for!(EmptyArgs)).unwrap())
    }

    async fn execute(&self, _args: Value) -> Result<String, ToolError> {
        Ok(Local::now().format("%A, %B %d, %Y").to_string())
    }
}

// --- The Batch Newsletter Tool ---
pub struct BatchNewsletterTool {
    client: Client,
}

const BATCH_URL: &str = "https://www.deeplearning.ai/the-batch/";

impl BatchNewsletterTool {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

impl Default for BatchNewsletterTool {
    fn default() -> Self {
        Self::new()
    }
}

fn decode_common_html_entities(input: &str) -> String {
    input
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
}

/// Pulls (title, url) pairs for newsletter entries out of the listing
/// page. Anchors under /the-batch/ are taken as entries; tag pages and
/// anchors without a usable title are skipped.
fn parse_newsletter_entries(html: &str, limit: usize) -> Vec<(String, String)> {
    let anchor_re =
        Regex::new(r#"(?is)<a\s[^>]*href="(/the-batch/[^"]+)"[^>]*>(.*?)</a>"#).unwrap();
    let tag_re = Regex::new(r"(?is)<[^>]+>").unwrap();

    let mut entries: Vec<(String, String)> = Vec::new();
    let mut seen: Vec<String> = Vec::new();

    for captures in anchor_re.captures_iter(html) {
        let href = captures[1].trim_end_matches('/').to_string();
        if href.contains("/tag/") || href == "/the-batch" || seen.contains(&href) {
            continue;
        }

        let inner = tag_re.replace_all(&captures[2], " ");
        let decoded = decode_common_html_entities(&inner);
        let title = decoded.split_whitespace().collect::<Vec<_>>().join(" ");
        if title.len() < 8 {
            continue;
        }

        seen.push(href.clone());
        entries.push((title, format!("https://www.deeplearning.ai{href}")));
        if entries.len() >= limit {
            break;
        }
    }

    entries
}

#[async_trait]
impl Tool for BatchNewsletterTool {
    fn name(&self) -> String {
        "get_batch_newsletter".to_string()
    }

    fn description(&self) -> String {
        "Fetch the latest entries from The Batch, the AI newsletter by DeepLearning.AI."
            .to_string()
    }

    fn parameters_schema(&self) -> serde_json::Value {
        clean_schema(serde_json::to_value(schema_for!(EmptyArgs)).unwrap())
    }

    async fn execute(&self, _args: Value) -> Result<String, ToolError> {
        let response = match self
            .client
            .get(BATCH_URL)
            .header(reqwest::header::USER_AGENT, "polyglot-coach/0.1")
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return Ok(format!("Error fetching newsletter: {e}")),
        };

        if !response.status().is_success() {
            return Ok(format!(
                "Error fetching newsletter: HTTP {}",
                response.status()
            ));
        }

        let html = match response.text().await {
            Ok(html) => html,
            Err(e) => return Ok(format!("Error reading newsletter page: {e}")),
        };

        let entries = parse_newsletter_entries(&html, 5);
        if entries.is_empty() {
            return Ok(
                "No newsletter entries found; the page layout may have changed.".to_string(),
            );
        }

        let mut output = String::from("Latest from The Batch:\n");
        for (i, (title, url)) in entries.iter().enumerate() {
            output.push_str(&format!("{}. {}\n   {}\n", i + 1, title, url));
        }
        Ok(output.trim_end().to_string())
    }
}

// --- French Learning Stats Tools ---

pub struct SetFrenchLearningGoalTool {
    stats: Arc<StatsStore>,
}

#[derive(Serialize, Deserialize, JsonSchema)]
pub struct SetGoalArgs {
    /// Target number of French study hours per week
    pub hours_per_week: f64,
}

impl SetFrenchLearningGoalTool {
    pub fn new(stats: Arc<StatsStore>) -> Self {
        Self { stats }
    }
}

#[async_trait]
impl Tool for SetFrenchLearningGoalTool {
    fn name(&self) -> String {
        "set_french_learning_goal".to_string()
    }

    fn description(&self) -> String {
        "Set or update the weekly French learning goal in hours.".to_string()
    }

    fn parameters_schema(&self) -> serde_json::Value {
        clean_schema(serde_json::to_value(schema_for!(SetGoalArgs)).unwrap())
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let parsed: SetGoalArgs =
            serde_json::from_value(args).map_err(|e| ToolError::InvalidArguments(e.to_string()))?;

        let mut record = self.stats.load().unwrap_or_default();
        record.weekly_goal_hours = Some(parsed.hours_per_week);
        record.goal_updated_at = Some(now_timestamp());
        record.goal_week_start = Some(current_week_start().format(DATE_FMT).to_string());
        self.stats.save(&record)?;

        Ok(format!(
            "✓ Weekly French learning goal set to {} hours per week",
            parsed.hours_per_week
        ))
    }
}

pub struct GetFrenchLearningGoalTool {
    stats: Arc<StatsStore>,
}

impl GetFrenchLearningGoalTool {
    pub fn new(stats: Arc<StatsStore>) -> Self {
        Self { stats }
    }
}

#[async_trait]
impl Tool for GetFrenchLearningGoalTool {
    fn name(&self) -> String {
        "get_french_learning_goal".to_string()
    }

    fn description(&self) -> String {
        "Get the current weekly French learning goal.".to_string()
    }

    fn parameters_schema(&self) -> serde_json::Value {
        clean_schema(serde_json::to_value(schema_for!(EmptyArgs)).unwrap())
    }

    async fn execute(&self, _args: Value) -> Result<String, ToolError> {
        let goal = self.stats.load().and_then(|record| {
            record
                .weekly_goal_hours
                .map(|hours| (hours, record.goal_updated_at))
        });

        match goal {
            Some((hours, updated_at)) => Ok(format!(
                "Current French learning goal: {} hours per week (Updated: {})",
                hours,
                updated_at.unwrap_or_else(|| "unknown".to_string())
            )),
            None => Ok(
                "No French learning goal set yet. Use set_french_learning_goal to create one."
                    .to_string(),
            ),
        }
    }
}

pub struct LogFrenchLearningTimeTool {
    stats: Arc<StatsStore>,
}

#[derive(Serialize, Deserialize, JsonSchema)]
pub struct LogTimeArgs {
    /// Number of hours studied
    pub hours: f64,
    /// Session date in YYYY-MM-DD format. Defaults to today.
    pub date: Option<String>,
}

impl LogFrenchLearningTimeTool {
    pub fn new(stats: Arc<StatsStore>) -> Self {
        Self { stats }
    }
}

#[async_trait]
impl Tool for LogFrenchLearningTimeTool {
    fn name(&self) -> String {
        "log_french_learning_time".to_string()
    }

    fn description(&self) -> String {
        "Log hours spent learning French, optionally for a specific date.".to_string()
    }

    fn parameters_schema(&self) -> serde_json::Value {
        let mut val = clean_schema(serde_json::to_value(schema_for!(LogTimeArgs)).unwrap());
        // schemars renders Option<String> as ["string","null"]; keep the
        // concrete type for strict schema parsers
        if let Some(date) = val
            .get_mut("properties")
            .and_then(|p| p.get_mut("date"))
            .and_then(|d| d.as_object_mut())
        {
            if let Some(type_arr) = date.get("type").and_then(|t| t.as_array()) {
                if let Some(first) = type_arr.first() {
                    let f = first.clone();
                    date.insert("type".to_string(), f);
                }
            }
        }
        val
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let parsed: LogTimeArgs =
            serde_json::from_value(args).map_err(|e| ToolError::InvalidArguments(e.to_string()))?;

        let date = parsed.date.unwrap_or_else(today_string);
        let mut record = self.stats.load().unwrap_or_default();
        record.learning_sessions.push(Session {
            date: date.clone(),
            hours: parsed.hours,
            logged_at: now_timestamp(),
        });
        self.stats.save(&record)?;

        Ok(format!(
            "✓ Logged {} hours of French learning on {}",
            parsed.hours, date
        ))
    }
}

pub struct GetFrenchLearningTimeTool {
    stats: Arc<StatsStore>,
}

impl GetFrenchLearningTimeTool {
    pub fn new(stats: Arc<StatsStore>) -> Self {
        Self { stats }
    }
}

#[async_trait]
impl Tool for GetFrenchLearningTimeTool {
    fn name(&self) -> String {
        "get_french_learning_time".to_string()
    }

    fn description(&self) -> String {
        "Get the total French learning time logged this week.".to_string()
    }

    fn parameters_schema(&self) -> serde_json::Value {
        clean_schema(serde_json::to_value(schema_for!(EmptyArgs)).unwrap())
    }

    async fn execute(&self, _args: Value) -> Result<String, ToolError> {
        let Some(record) = self.stats.load() else {
            return Ok("No learning time logged yet.".to_string());
        };
        if record.learning_sessions.is_empty() {
            return Ok("No learning time logged yet.".to_string());
        }

        let week_start = current_week_start().format(DATE_FMT).to_string();
        let this_week = record.sessions_since(&week_start);
        if this_week.is_empty() {
            return Ok(format!(
                "No learning time logged this week yet (week starting {week_start})."
            ));
        }

        let mut output = format!("This week's French learning time (since {week_start}):\n");
        for session in &this_week {
            output.push_str(&format!("- {}: {:.1} hours\n", session.date, session.hours));
        }
        output.push_str(&format!("Total: {:.1} hours", record.hours_since(&week_start)));
        Ok(output)
    }
}

pub struct CompareFrenchLearningProgressTool {
    stats: Arc<StatsStore>,
}

impl CompareFrenchLearningProgressTool {
    pub fn new(stats: Arc<StatsStore>) -> Self {
        Self { stats }
    }
}

/// Renders the weekly progress report. Shared between the comparison
/// tool and the /stats shell command.
pub fn progress_report(stats: &StatsStore) -> String {
    let Some(record) = stats.load() else {
        return "No data available. Please set a weekly goal first with set_french_learning_goal."
            .to_string();
    };
    let Some(goal) = record.weekly_goal_hours else {
        return "No weekly goal set yet. Please set a goal first with set_french_learning_goal."
            .to_string();
    };

    let today = Local::now().date_naive();
    let week_start = week_start_of(today).format(DATE_FMT).to_string();
    let this_week = record.sessions_since(&week_start);
    let actual = record.hours_since(&week_start);
    let percent = if goal > 0.0 { actual / goal * 100.0 } else { 0.0 };

    let status = if percent >= 100.0 {
        "Goal exceeded! Amazing work! 🌟".to_string()
    } else if percent >= 80.0 {
        "On track! Keep it up! 🟢".to_string()
    } else if percent >= 50.0 {
        format!(
            "Behind goal. You need {:.1} more hours to reach your goal.",
            goal - actual
        )
    } else {
        format!(
            "Significantly behind. You need {:.1} more hours to reach your goal.",
            goal - actual
        )
    };

    let mut output = String::from("📊 French Learning Progress Report\n");
    output.push_str(&format!("Weekly Goal: {goal:.1} hours\n"));
    output.push_str(&format!("Actual Time: {actual:.1} hours\n"));
    output.push_str(&format!("Progress: {percent:.1}%\n"));
    output.push_str(&format!("Status: {status}\n"));
    output.push_str(&format!(
        "Days Remaining: {} day(s)\n",
        days_remaining_in_week(today)
    ));

    if this_week.is_empty() {
        output.push_str("\nNo sessions logged this week yet.");
    } else {
        output.push_str("\nSessions this week:\n");
        for session in &this_week {
            output.push_str(&format!("- {}: {:.1} hours\n", session.date, session.hours));
        }
        return output.trim_end().to_string();
    }
    output
}

#[async_trait]
impl Tool for CompareFrenchLearningProgressTool {
    fn name(&self) -> String {
        "compare_french_learning_progress".to_string()
    }

    fn description(&self) -> String {
        "Compare this week's logged French learning time against the weekly goal.".to_string()
    }

    fn parameters_schema(&self) -> serde_json::Value {
        clean_schema(serde_json::to_value(schema_for!(EmptyArgs)).unwrap())
    }

    async fn execute(&self, _args: Value) -> Result<String, ToolError> {
        Ok(progress_report(&self.stats))
    }
}

pub struct CheckNewWeekStatusTool {
    stats: Arc<StatsStore>,
}

impl CheckNewWeekStatusTool {
    pub fn new(stats: Arc<StatsStore>) -> Self {
        Self { stats }
    }
}

#[async_trait]
impl Tool for CheckNewWeekStatusTool {
    fn name(&self) -> String {
        "check_new_week_status".to_string()
    }

    fn description(&self) -> String {
        "Check whether a new week has started since the weekly goal was set.".to_string()
    }

    fn parameters_schema(&self) -> serde_json::Value {
        clean_schema(serde_json::to_value(schema_for!(EmptyArgs)).unwrap())
    }

    async fn execute(&self, _args: Value) -> Result<String, ToolError> {
        let Some(record) = self.stats.load() else {
            return Ok(
                "No data available. Set your first weekly French learning goal with set_french_learning_goal."
                    .to_string(),
            );
        };
        let Some(goal) = record.weekly_goal_hours else {
            return Ok(
                "No weekly goal set yet. Use set_french_learning_goal to set one.".to_string(),
            );
        };

        let current_start = current_week_start().format(DATE_FMT).to_string();
        let goal_start = record.goal_week_start.unwrap_or_default();

        if goal_start == current_start {
            Ok(format!(
                "Week Status: Current Week\nYou're still in the same week that your goal was set (week of {current_start}).\nCurrent goal: {goal:.1} hours per week\nKeep working towards your goal!"
            ))
        } else {
            Ok(format!(
                "Week Status: NEW WEEK!\nYour goal was set for the week of {goal_start}, but we are now in the week of {current_start}.\nPrevious goal: {goal:.1} hours per week\nSet a new weekly goal for this week with set_french_learning_goal!"
            ))
        }
    }
}
