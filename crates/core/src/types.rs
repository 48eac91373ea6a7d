//! Domain models for task extraction
//!
//! This module contains the core types used throughout the engine, including:
//! - Priority and tag types shared with the UI
//! - The analyzer result (`ExtractionResult`) and the task import shape (`TaskDraft`)
//! - Date resolution output (`TimeResolution`)

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::datetime;

// ============================================================================
// Priority & Tags
// ============================================================================

/// Task priority
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    /// Accept only the exact wire literals; anything else is rejected
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "high" => Some(Priority::High),
            "medium" => Some(Priority::Medium),
            "low" => Some(Priority::Low),
            _ => None,
        }
    }
}

/// Color key a tag is rendered with
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagColor {
    #[default]
    Blue,
    Green,
    Red,
    Yellow,
    Purple,
    Pink,
}

/// A tag the user has defined. Owned by the UI and only read here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownTag {
    pub name: String,
    #[serde(default)]
    pub color: TagColor,
}

impl KnownTag {
    pub fn new(name: &str, color: TagColor) -> Self {
        Self {
            name: name.to_string(),
            color,
        }
    }
}

/// The tag set a fresh installation starts with
pub fn default_tags() -> Vec<KnownTag> {
    vec![
        KnownTag::new("工作", TagColor::Blue),
        KnownTag::new("学习", TagColor::Green),
        KnownTag::new("生活", TagColor::Yellow),
        KnownTag::new("重要", TagColor::Red),
    ]
}

/// Tag names in UI order
pub fn tag_names(tags: &[KnownTag]) -> Vec<String> {
    tags.iter().map(|t| t.name.clone()).collect()
}

/// Keep only candidates that name a known tag, first occurrence wins, at most `limit`.
pub fn retain_known_tags<I, S>(candidates: I, known: &[String], limit: usize) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for candidate in candidates {
        let name = candidate.as_ref().trim();
        if name.is_empty() || out.iter().any(|t| t == name) {
            continue;
        }
        if known.iter().any(|k| k == name) {
            out.push(name.to_string());
        }
        if out.len() == limit {
            break;
        }
    }
    out
}

// ============================================================================
// Extraction Results
// ============================================================================

/// Structured fields pulled out of free-form text (analyzer shape)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionResult {
    pub title: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    #[serde(default)]
    pub suggested_tags: Vec<String>,

    #[serde(default)]
    pub priority: Priority,

    /// Free-text time description, not a timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_time: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    #[serde(default)]
    pub participants: Vec<String>,
}

impl ExtractionResult {
    /// A result carrying nothing but the raw text as its title
    pub fn untitled(text: &str) -> Self {
        Self {
            title: text.to_string(),
            notes: None,
            suggested_tags: Vec::new(),
            priority: Priority::default(),
            estimated_time: None,
            location: None,
            participants: Vec::new(),
        }
    }
}

/// A start or due date as the task record stores it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskDate {
    /// Calendar day (`YYYY-MM-DD`), as produced by the import prompt
    Day(NaiveDate),
    /// Absolute instant, as produced by the date resolver
    Instant(DateTime<Utc>),
}

/// Fields ready to populate a task record (task import shape).
///
/// Unlike `ExtractionResult`, people are not a structured field here; they are
/// appended to `notes` as a "相关人员" line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDraft {
    pub title: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<TaskDate>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<TaskDate>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl TaskDraft {
    /// Turn an analyzer result into a task, resolving dates from the title
    /// only when the analysis found an estimated time.
    pub fn from_analysis<Tz: TimeZone>(result: &ExtractionResult, now: &DateTime<Tz>) -> Self {
        let has_time = result
            .estimated_time
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty());

        let resolution = if has_time {
            datetime::resolve(&result.title, now)
        } else {
            TimeResolution::default()
        };

        Self {
            title: result.title.clone(),
            notes: result.notes.clone(),
            tags: result.suggested_tags.clone(),
            priority: Some(result.priority),
            start_date: resolution.start_date.map(TaskDate::Instant),
            due_date: resolution.due_date.map(TaskDate::Instant),
            location: result.location.clone(),
        }
    }
}

impl From<ExtractionResult> for TaskDraft {
    fn from(result: ExtractionResult) -> Self {
        Self {
            notes: fold_people_into_notes(result.notes, &result.participants),
            title: result.title,
            tags: result.suggested_tags,
            priority: Some(result.priority),
            start_date: None,
            due_date: None,
            location: result.location,
        }
    }
}

/// Append a "相关人员" line to the notes, separated by a blank line
pub fn fold_people_into_notes(notes: Option<String>, people: &[String]) -> Option<String> {
    let mut notes = notes.unwrap_or_default();
    let people: Vec<&str> = people
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect();

    if !people.is_empty() {
        if !notes.is_empty() {
            notes.push_str("\n\n");
        }
        notes.push_str(&format!("相关人员: {}", people.join(", ")));
    }

    if notes.is_empty() {
        None
    } else {
        Some(notes)
    }
}

// ============================================================================
// Date Resolution Output
// ============================================================================

/// Result of resolving a relative time phrase. At most one field is set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeResolution {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
}

impl TimeResolution {
    pub fn is_empty(&self) -> bool {
        self.start_date.is_none() && self.due_date.is_none()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_priority_parse_literals_only() {
        assert_eq!(Priority::parse("high"), Some(Priority::High));
        assert_eq!(Priority::parse("low"), Some(Priority::Low));
        assert_eq!(Priority::parse("High"), None);
        assert_eq!(Priority::parse("urgent"), None);
        assert_eq!(Priority::default(), Priority::Medium);
    }

    #[test]
    fn test_retain_known_tags_filters_and_dedupes() {
        let known = names(&["工作", "学习", "生活"]);
        let kept = retain_known_tags(["学习", "旅行", "学习", " 工作 "], &known, 5);
        assert_eq!(kept, names(&["学习", "工作"]));
    }

    #[test]
    fn test_retain_known_tags_limit() {
        let known = names(&["a", "b", "c", "d"]);
        let kept = retain_known_tags(["a", "b", "c", "d"], &known, 3);
        assert_eq!(kept.len(), 3);
    }

    #[test]
    fn test_fold_people_into_notes() {
        let people = names(&["小明", "小红"]);
        assert_eq!(
            fold_people_into_notes(Some("带电脑".to_string()), &people),
            Some("带电脑\n\n相关人员: 小明, 小红".to_string())
        );
        assert_eq!(
            fold_people_into_notes(None, &people),
            Some("相关人员: 小明, 小红".to_string())
        );
        assert_eq!(fold_people_into_notes(None, &[]), None);
    }

    #[test]
    fn test_extraction_result_json_field_names() {
        let result = ExtractionResult {
            estimated_time: Some("周四".to_string()),
            suggested_tags: names(&["工作"]),
            ..ExtractionResult::untitled("开会")
        };
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"suggestedTags\":[\"工作\"]"));
        assert!(json.contains("\"estimatedTime\":\"周四\""));
        assert!(json.contains("\"priority\":\"medium\""));
        assert!(!json.contains("location"));
    }

    #[test]
    fn test_task_date_untagged_roundtrip() {
        let day: TaskDate = serde_json::from_str("\"2026-03-01\"").unwrap();
        assert_eq!(day, TaskDate::Day(NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()));

        let instant: TaskDate = serde_json::from_str("\"2026-03-01T06:00:00Z\"").unwrap();
        assert!(matches!(instant, TaskDate::Instant(_)));
    }

    #[test]
    fn test_draft_from_extraction_folds_participants() {
        let result = ExtractionResult {
            notes: Some("项目方案".to_string()),
            participants: names(&["小明"]),
            ..ExtractionResult::untitled("讨论")
        };
        let draft = TaskDraft::from(result);
        assert_eq!(draft.notes.as_deref(), Some("项目方案\n\n相关人员: 小明"));
        assert_eq!(draft.priority, Some(Priority::Medium));
    }

    #[test]
    fn test_draft_from_analysis_resolves_only_with_estimated_time() {
        let tz = FixedOffset::east_opt(8 * 3600).unwrap();
        // Monday
        let now = tz.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap();

        let mut result = ExtractionResult::untitled("图书馆 讨论 (周四)");
        let draft = TaskDraft::from_analysis(&result, &now);
        assert!(draft.start_date.is_none() && draft.due_date.is_none());

        result.estimated_time = Some("周四".to_string());
        let draft = TaskDraft::from_analysis(&result, &now);
        assert!(draft.start_date.is_some() || draft.due_date.is_some());
    }
}
