//! Rule-based task extraction
//!
//! Deterministic pattern matching over Chinese time, place and people phrases.
//! Used when the model backend is unavailable; never fails.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::{retain_known_tags, ExtractionResult, Priority};

static TIME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[今明后]天|下周|周[一二三四五六日天]|\d{1,2}[:.：]\d{1,2}|[上下]午\d{1,2}[点时]")
        .expect("Invalid regex")
});

/// "在 X 和…": a place followed by a connector that introduces a person
static LOCATION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"在([^，。；]+)(和|跟|与|同)").expect("Invalid regex"));

/// "和 X 讨论…": a person followed by a meeting verb
static PEOPLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(和|跟|与|同)([^，。；]+)(讨论|商议|商量|开会|见面)").expect("Invalid regex")
});

/// "讨论 X": the meeting verb and its subject
static ACTION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(讨论|商议|商量|开会|见面)([^，。；]+)").expect("Invalid regex")
});

static URGENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"重要|紧急|立即|马上|尽快").expect("Invalid regex"));

/// Built-in tag categories. Tags with any other name are never suggested.
static TAG_RULES: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    [
        ("工作", r"工作|会议|报告|项目|方案"),
        ("学习", r"学习|复习|考试|课程|读书|笔记"),
        ("生活", r"吃饭|购物|运动|休息|娱乐"),
        ("重要", r"重要|紧急|立即|马上"),
    ]
    .into_iter()
    .map(|(tag, pattern)| (tag, Regex::new(pattern).expect("Invalid regex")))
    .collect()
});

/// Upper bound on suggested tags, same as the import path
const MAX_RULE_TAGS: usize = 5;

/// Every time-like phrase, in order of appearance
pub fn extract_time_phrases(text: &str) -> Vec<String> {
    TIME_RE
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Known tags whose category keywords appear in the text, in known-tag order
pub fn suggest_tags(text: &str, known_tags: &[String]) -> Vec<String> {
    let lower = text.to_lowercase();
    let matching = known_tags.iter().filter(|tag| {
        let name = tag.to_lowercase();
        TAG_RULES
            .iter()
            .find(|(category, _)| *category == name)
            .is_some_and(|(_, re)| re.is_match(&lower))
    });
    retain_known_tags(matching, known_tags, MAX_RULE_TAGS)
}

/// Extract a task from text with fixed patterns.
///
/// Priority defaults to `Low` here when no urgency word is present, unlike
/// the model path which defaults to `Medium`.
pub fn extract_task_rules(text: &str, known_tags: &[String]) -> ExtractionResult {
    let times = extract_time_phrases(text);

    let location = LOCATION_RE
        .captures(text)
        .map(|c| c[1].trim().to_string())
        .filter(|s| !s.is_empty());

    let participant = PEOPLE_RE
        .captures(text)
        .map(|c| c[2].trim().to_string())
        .filter(|s| !s.is_empty());

    let action = ACTION_RE
        .captures(text)
        .map(|c| (c[1].to_string(), c[2].trim().to_string()));

    let mut title_parts: Vec<&str> = Vec::new();
    if let Some(ref loc) = location {
        title_parts.push(loc);
    }
    if let Some(ref person) = participant {
        title_parts.push(person);
    }
    if let Some((ref verb, _)) = action {
        title_parts.push(verb);
    }

    let mut title = if title_parts.is_empty() {
        text.to_string()
    } else {
        title_parts.join(" ")
    };
    if !times.is_empty() {
        title.push_str(&format!(" ({})", times.join(" ")));
    }

    let notes = action
        .map(|(_, subject)| subject)
        .filter(|s| !s.is_empty());

    let priority = if URGENT_RE.is_match(&text.to_lowercase()) {
        Priority::High
    } else {
        Priority::Low
    };

    ExtractionResult {
        title,
        notes,
        suggested_tags: suggest_tags(text, known_tags),
        priority,
        estimated_time: if times.is_empty() {
            None
        } else {
            Some(times.join(" "))
        },
        location,
        participants: participant.into_iter().collect(),
    }
}
