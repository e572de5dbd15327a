//! Current date and time tool

use async_trait::async_trait;
use chrono::{FixedOffset, Utc};
use loomchat_core::error::ToolError;
use loomchat_core::tools::{Tool, ToolOutput};
use serde_json::json;
use tokio_util::sync::CancellationToken;

const TOOL_NAME: &str = "current_time";

pub struct CurrentTimeTool;

impl CurrentTimeTool {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CurrentTimeTool {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse offsets like "+02:00", "-0530" or "Z"
fn parse_offset(raw: &str) -> Option<FixedOffset> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("z") || raw.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0);
    }

    let (sign, rest) = match raw.as_bytes().first()? {
        b'+' => (1, &raw[1..]),
        b'-' => (-1, &raw[1..]),
        _ => return None,
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let hours: i32 = digits[..2].parse().ok()?;
    let minutes: i32 = digits[2..].parse().ok()?;
    if hours > 14 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

#[async_trait]
impl Tool for CurrentTimeTool {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        "Get the current date and time, optionally at a fixed UTC offset."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "utc_offset": {
                    "type": "string",
                    "description": "UTC offset such as \"+02:00\" or \"-05:00\"; defaults to UTC"
                }
            }
        })
    }

    async fn invoke(
        &self,
        args: serde_json::Value,
        _cancel: CancellationToken,
    ) -> Result<ToolOutput, ToolError> {
        let offset = match args.get("utc_offset").and_then(|value| value.as_str()) {
            Some(raw) => parse_offset(raw).ok_or_else(|| ToolError::ArgumentParse {
                name: TOOL_NAME.to_string(),
                message: format!("invalid utc_offset: {raw}"),
            })?,
            None => FixedOffset::east_opt(0)
                .ok_or_else(|| ToolError::failed(TOOL_NAME, "invalid UTC offset"))?,
        };

        let now = Utc::now().with_timezone(&offset);
        let text = now.format("%A, %B %-d, %Y %H:%M:%S %:z").to_string();

        Ok(ToolOutput::text(text).with_data(json!({
            "iso8601": now.to_rfc3339(),
            "unix": now.timestamp(),
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_offset() {
        assert_eq!(parse_offset("+02:00"), FixedOffset::east_opt(7200));
        assert_eq!(parse_offset("-0530"), FixedOffset::east_opt(-19800));
        assert_eq!(parse_offset("Z"), FixedOffset::east_opt(0));
        assert_eq!(parse_offset("02:00"), None);
        assert_eq!(parse_offset("+25:00"), None);
    }

    #[tokio::test]
    async fn test_invoke_reports_offset() {
        let output = CurrentTimeTool::new()
            .invoke(json!({"utc_offset": "+02:00"}), CancellationToken::new())
            .await
            .unwrap();
        assert!(output.content.ends_with("+02:00"));
        let data = output.data.unwrap();
        assert!(data["iso8601"].as_str().unwrap().ends_with("+02:00"));
    }

    #[tokio::test]
    async fn test_bad_offset_is_argument_error() {
        let result = CurrentTimeTool::new()
            .invoke(json!({"utc_offset": "noon"}), CancellationToken::new())
            .await;
        assert!(matches!(result, Err(ToolError::ArgumentParse { .. })));
    }
}
