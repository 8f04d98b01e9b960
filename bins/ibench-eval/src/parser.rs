/// Output Parser - Untrusted Model Text → Program
///
/// **Core Responsibility:**
/// Split a raw completion into reasoning and answer, then pull a single
/// program out of the answer.
///
/// **Critical Property:**
/// Neither operation can fail. Text with no usable code still yields a
/// string, and the failure surfaces later as an execution error so every
/// sample still produces a rollout record.

use ibench_common::types::ParsedOutput;
use regex::Regex;
use std::sync::OnceLock;

/// Line prefixes that start a top-level function definition
const FUNCTION_KEYWORDS: &[&str] = &["def ", "async def "];

fn reasoning_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<think>(.*?)</think>").expect("valid reasoning regex"))
}

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)```[A-Za-z0-9_+.\-]*[ \t]*\r?\n(.*?)```").expect("valid fence regex")
    })
}

/// Split raw model output into reasoning and answer
///
/// Without a complete `<think>…</think>` pair the whole trimmed text is the
/// answer and reasoning is empty.
pub fn parse(raw: &str) -> ParsedOutput {
    match reasoning_re().captures(raw) {
        Some(caps) => {
            let inner = caps.get(1).map_or("", |m| m.as_str());
            let end = caps.get(0).map_or(raw.len(), |m| m.end());
            ParsedOutput {
                reasoning: inner.trim().to_string(),
                answer: raw[end..].trim().to_string(),
            }
        }
        None => ParsedOutput {
            reasoning: String::new(),
            answer: raw.trim().to_string(),
        },
    }
}

/// Extract a program from the answer section
///
/// First match wins:
/// 1. interior of the first fenced code block
/// 2. first top-level function definition
/// 3. the whole trimmed answer
pub fn extract_program(answer: &str) -> String {
    if let Some(body) = fence_re().captures(answer).and_then(|c| c.get(1)) {
        return body.as_str().trim().to_string();
    }

    if let Some(function) = first_top_level_function(answer) {
        return function;
    }

    answer.trim().to_string()
}

/// Structural scan for the first column-0 function definition and its body
fn first_top_level_function(text: &str) -> Option<String> {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines
        .iter()
        .position(|line| FUNCTION_KEYWORDS.iter().any(|kw| starts_definition(line, kw)))?;

    let mut end = start + 1;
    while end < lines.len() {
        let line = lines[end];
        let continues = line.trim().is_empty() || line.starts_with(' ') || line.starts_with('\t');
        if !continues {
            break;
        }
        end += 1;
    }

    let body = lines[start..end].join("\n");
    Some(body.trim().to_string())
}

fn starts_definition(line: &str, keyword: &str) -> bool {
    line.strip_prefix(keyword)
        .and_then(|rest| rest.chars().next())
        .is_some_and(|c| c.is_alphabetic() || c == '_')
}
