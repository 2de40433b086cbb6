use serde_json::{json, Value};

/// Extract plain text from Jira's Atlassian Document Format (ADF).
///
/// Block nodes (paragraphs, headings, list items) are separated by newlines,
/// inline text nodes are concatenated.
pub fn extract_text_from_adf(value: &Value) -> Option<String> {
    let text = collect_blocks(value).join("\n");
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn collect_blocks(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => vec![s.clone()],
        Value::Array(arr) => arr.iter().flat_map(collect_blocks).collect(),
        Value::Object(obj) => {
            let kind = obj.get("type").and_then(|v| v.as_str());
            match kind {
                Some("text") => obj
                    .get("text")
                    .and_then(|v| v.as_str())
                    .map(|s| vec![s.to_string()])
                    .unwrap_or_default(),
                Some("hardBreak") => vec!["\n".into()],
                Some("paragraph") | Some("heading") | Some("codeBlock") => {
                    vec![inline_text(obj.get("content"))]
                }
                _ => obj.get("content").map(collect_blocks).unwrap_or_default(),
            }
        }
        _ => Vec::new(),
    }
}

fn inline_text(content: Option<&Value>) -> String {
    content.map(collect_blocks).unwrap_or_default().concat()
}

/// Wrap plain text as an ADF document, one paragraph per line.
pub fn text_to_adf(text: &str) -> Value {
    let paragraphs: Vec<Value> = text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            json!({
                "type": "paragraph",
                "content": [{ "type": "text", "text": line }]
            })
        })
        .collect();

    json!({
        "type": "doc",
        "version": 1,
        "content": paragraphs
    })
}
