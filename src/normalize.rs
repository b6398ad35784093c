//! Caption extraction from inference responses of unknown shape.
//!
//! Model families disagree on what they return: an object, a list of
//! objects, a list of strings, a bare string. Each strategy below handles
//! one shape and the first one producing a non-empty caption wins.

use serde_json::Value;

use crate::error::NormalizeError;

pub(crate) const CAPTION_FIELDS: [&str; 2] = ["generated_text", "caption"];
const GENERATED_TEXT_TOKEN: &str = "generated_text:";

type Strategy = fn(&Value) -> Option<String>;

const STRATEGIES: [(&str, Strategy); 5] = [
    ("object", from_object),
    ("list_of_objects", from_list_of_objects),
    ("list_of_strings", from_list_of_strings),
    ("bare_string", from_bare_string),
    ("flattened", from_flattened),
];

/// Extract a single caption from an upstream JSON body.
pub fn normalize_caption(body: &Value) -> Result<String, NormalizeError> {
    for (name, strategy) in STRATEGIES {
        if let Some(caption) = strategy(body).and_then(non_empty) {
            tracing::debug!(strategy = name, caption = %caption, "Extracted caption");
            return Ok(caption);
        }
    }
    Err(NormalizeError::EmptyCaption)
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn caption_field(object: &Value) -> Option<String> {
    let map = object.as_object()?;
    CAPTION_FIELDS
        .iter()
        .filter_map(|field| map.get(*field)?.as_str())
        .find(|text| !text.trim().is_empty())
        .map(str::to_string)
}

fn first_element(body: &Value) -> Option<&Value> {
    body.as_array()?.first()
}

fn from_object(body: &Value) -> Option<String> {
    caption_field(body)
}

fn from_list_of_objects(body: &Value) -> Option<String> {
    caption_field(first_element(body)?)
}

fn from_list_of_strings(body: &Value) -> Option<String> {
    first_element(body)?.as_str().map(str::to_string)
}

fn from_bare_string(body: &Value) -> Option<String> {
    body.as_str().map(str::to_string)
}

/// Last resort: flatten the body to text, drop the JSON punctuation and keep
/// whatever follows a `generated_text:` label.
fn from_flattened(body: &Value) -> Option<String> {
    if body.is_null() {
        return None;
    }
    let flat: String = body
        .to_string()
        .chars()
        .filter(|c| !matches!(c, '[' | ']' | '{' | '}' | '"' | '\''))
        .collect();
    let text = match flat.find(GENERATED_TEXT_TOKEN) {
        Some(idx) => &flat[idx + GENERATED_TEXT_TOKEN.len()..],
        None => flat.as_str(),
    };
    Some(text.trim().to_string())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn every_known_shape_yields_the_same_caption() {
        let bodies = [
            json!({"generated_text": "a cat"}),
            json!({"caption": "a cat"}),
            json!([{"generated_text": "a cat"}]),
            json!([{"caption": "a cat"}, {"caption": "a dog"}]),
            json!(["a cat", "a dog"]),
            json!("a cat"),
        ];
        for body in &bodies {
            assert_eq!(normalize_caption(body).unwrap(), "a cat", "body: {body}");
        }
    }

    #[test]
    fn captions_are_trimmed() {
        assert_eq!(
            normalize_caption(&json!({"generated_text": "  a cat on a mat \n"})).unwrap(),
            "a cat on a mat"
        );
    }

    #[test]
    fn empty_field_falls_through_to_the_other_field() {
        let body = json!({"generated_text": "", "caption": "a dog"});
        assert_eq!(normalize_caption(&body).unwrap(), "a dog");
    }

    #[test]
    fn flattened_fallback_takes_text_after_label() {
        // Nested one level deeper than any strategy looks.
        let body = json!([[{"generated_text": "a red bicycle"}]]);
        assert_eq!(normalize_caption(&body).unwrap(), "a red bicycle");
    }

    #[test]
    fn flattened_fallback_without_label_keeps_everything() {
        let body = json!({"label": "sunset"});
        assert_eq!(normalize_caption(&body).unwrap(), "label:sunset");
    }

    #[test]
    fn nothing_to_extract_is_an_error() {
        for body in [json!(null), json!([]), json!({}), json!(""), json!([""])] {
            assert_eq!(
                normalize_caption(&body),
                Err(NormalizeError::EmptyCaption),
                "body: {body}"
            );
        }
    }
}
