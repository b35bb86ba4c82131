//! Model Output Parsing
//!
//! Model output is untrusted free text. Parsing runs an ordered list of
//! strategies — strict JSON, first balanced-brace substring, then a
//! best-effort field scraper — and the final strategy always produces a
//! value, so parsing itself never fails. Whether the scraped value is
//! useful is judged by the caller when it maps fields into a typed result.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{json, Value};

/// One parsing strategy: a value, or hand off to the next strategy.
type Strategy = fn(&str) -> Option<Value>;

/// Ordered strategies, most exact first. The last entry never returns
/// `None`.
const STRATEGIES: &[Strategy] = &[parse_direct, parse_embedded_object, scrape_fields];

/// Parse a model reply into a JSON object, degrading gracefully.
pub fn parse_reply(text: &str) -> Value {
    for (tier, strategy) in STRATEGIES.iter().enumerate() {
        if let Some(value) = strategy(text) {
            if tier > 0 {
                tracing::debug!(tier, "model reply parsed by fallback strategy");
            }
            return value;
        }
    }
    // scrape_fields is total
    unreachable!("terminal parse strategy always yields a value")
}

/// Tier 1: the whole reply is a JSON object.
fn parse_direct(text: &str) -> Option<Value> {
    serde_json::from_str::<Value>(text.trim())
        .ok()
        .filter(Value::is_object)
}

/// Tier 2: the reply wraps a JSON object in prose or a code fence; parse the
/// first balanced `{...}` substring.
fn parse_embedded_object(text: &str) -> Option<Value> {
    let bytes = text.as_bytes();
    let start = text.find('{')?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return serde_json::from_str::<Value>(&text[start..=i])
                        .ok()
                        .filter(Value::is_object);
                }
            }
            _ => {}
        }
    }
    None
}

fn list_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#""?(capabilities|selected_slugs)"?\s*[:=]\s*\[([^\]]*)\]"#)
            .expect("list pattern compiles")
    })
}

fn item_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""([^"]+)"|'([^']+)'"#).expect("item pattern compiles"))
}

fn confidence_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#""?confidence"?\s*[:=]\s*([01]?\.?\d+)"#).expect("confidence pattern compiles")
    })
}

/// Tier 3: scrape recognizable fields out of arbitrary text. Always
/// succeeds; missing fields come back empty with a floor confidence.
fn scrape_fields(text: &str) -> Option<Value> {
    let mut object = json!({
        "reasoning": text.trim(),
        "confidence": 0.3,
    });

    for captures in list_pattern().captures_iter(text) {
        let field = &captures[1];
        let items: Vec<String> = item_pattern()
            .captures_iter(&captures[2])
            .filter_map(|c| {
                c.get(1)
                    .or_else(|| c.get(2))
                    .map(|m| m.as_str().to_string())
            })
            .collect();
        object[field] = json!(items);
    }

    if let Some(captures) = confidence_pattern().captures(text) {
        if let Ok(confidence) = captures[1].parse::<f64>() {
            object["confidence"] = json!(confidence.clamp(0.0, 1.0));
        }
    }

    Some(object)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_json_parses_directly() {
        let value = parse_reply(r#"{"selected_slugs": ["a", "b"], "confidence": 0.8}"#);
        assert_eq!(value["selected_slugs"][0], "a");
        assert_eq!(value["confidence"], 0.8);
    }

    #[test]
    fn code_fenced_json_is_recovered() {
        let reply = "Sure! Here is the selection:\n```json\n{\"selected_slugs\": [\"radicale\"], \"reasoning\": \"CalDAV fits\", \"confidence\": 0.7}\n```\nLet me know if you need more.";
        let value = parse_reply(reply);
        assert_eq!(value["selected_slugs"][0], "radicale");
    }

    #[test]
    fn balanced_braces_respect_strings() {
        let reply = r#"prefix {"reasoning": "a } inside a string", "selected_slugs": ["x"]} suffix"#;
        let value = parse_reply(reply);
        assert_eq!(value["selected_slugs"][0], "x");
        assert_eq!(value["reasoning"], "a } inside a string");
    }

    #[test]
    fn free_text_with_a_list_is_scraped() {
        let reply = "The capabilities: [\"calendar\", \"scheduling\"] seem right, confidence: 0.55";
        let value = parse_reply(reply);
        assert_eq!(value["capabilities"][0], "calendar");
        assert_eq!(value["capabilities"][1], "scheduling");
        assert_eq!(value["confidence"], 0.55);
    }

    #[test]
    fn arbitrary_text_never_fails() {
        let value = parse_reply("I have no idea what you mean.");
        assert_eq!(value["confidence"], 0.3);
        assert!(value["reasoning"]
            .as_str()
            .unwrap()
            .contains("no idea"));
    }
}
