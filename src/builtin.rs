//! Local tools shipped with the CLI.

use std::time::{SystemTime, UNIX_EPOCH};

use parley_tools::{LocalTool, ToolDescriptor, ToolError};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

pub fn tools() -> Vec<LocalTool> {
    vec![unix_time(), word_count()]
}

fn unix_time() -> LocalTool {
    LocalTool::from_fn(
        ToolDescriptor::new("unix_time", "Current time in seconds since the Unix epoch"),
        |_| {
            let secs = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_err(|e| ToolError::execution(e.to_string()))?
                .as_secs();
            Ok(json!(secs))
        },
    )
}

#[derive(Deserialize, JsonSchema)]
struct WordCountArgs {
    /// Text to measure.
    text: String,
}

#[derive(Serialize)]
struct WordCount {
    words: usize,
    chars: usize,
}

fn word_count() -> LocalTool {
    LocalTool::typed(
        "word_count",
        "Count the words and characters in a text",
        |args: WordCountArgs| async move {
            Ok::<_, ToolError>(WordCount {
                words: args.text.split_whitespace().count(),
                chars: args.text.chars().count(),
            })
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn find(name: &str) -> LocalTool {
        tools().into_iter().find(|t| t.name() == name).unwrap()
    }

    #[tokio::test]
    async fn word_count_counts() {
        let out = find("word_count")
            .call(r#"{"text":"one two  three"}"#)
            .await
            .unwrap();
        assert_eq!(out, json!({"words": 3, "chars": 14}));
    }

    #[tokio::test]
    async fn word_count_requires_text() {
        let err = find("word_count").call("{}").await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
    }

    #[tokio::test]
    async fn unix_time_is_recent() {
        let out = find("unix_time").call("{}").await.unwrap();
        assert!(out.as_u64().unwrap() > 1_600_000_000);
    }

    #[test]
    fn word_count_schema_requires_text() {
        let descriptor = find("word_count").descriptor().clone();
        let param = descriptor.find_param("text").unwrap();
        assert!(param.required);
    }
}
