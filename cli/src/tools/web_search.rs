//! Web search tool backed by a JSON search endpoint

use crate::config::WebSearchConfig;
use async_trait::async_trait;
use loomchat_core::error::ToolError;
use loomchat_core::tools::{Tool, ToolOutput};
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

const TOOL_NAME: &str = "web_search";
const DEFAULT_MAX_RESULTS: u64 = 5;
const MAX_RESULTS_LIMIT: u64 = 10;

/// Queries `GET {endpoint}?q=...&count=...` and expects
/// `{"results": [{"title", "url", "snippet"}]}` back.
pub struct WebSearchTool {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    title: String,
    url: String,
    #[serde(default)]
    snippet: String,
}

impl WebSearchTool {
    pub fn new(config: &WebSearchConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
        }
    }

    async fn search(&self, query: &str, count: u64) -> Result<SearchResponse, ToolError> {
        let count = count.to_string();
        let mut request = self
            .http
            .get(&self.endpoint)
            .query(&[("q", query), ("count", count.as_str())]);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ToolError::failed(TOOL_NAME, format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ToolError::failed(
                TOOL_NAME,
                format!("search API returned {status}"),
            ));
        }

        response
            .json::<SearchResponse>()
            .await
            .map_err(|e| ToolError::failed(TOOL_NAME, format!("invalid search response: {e}")))
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        "Search the web for current information.\n\
         Returns a numbered list of results with title, URL and snippet.\n\
         Use it for recent events, facts that may have changed, or anything you are unsure about."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "q": {
                    "type": "string",
                    "description": "The search query"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Number of results to return (1-10, default 5)",
                    "minimum": 1,
                    "maximum": MAX_RESULTS_LIMIT
                }
            },
            "required": ["q"]
        })
    }

    async fn invoke(
        &self,
        args: serde_json::Value,
        cancel: CancellationToken,
    ) -> Result<ToolOutput, ToolError> {
        let query = args
            .get("q")
            .and_then(|value| value.as_str())
            .map(str::trim)
            .filter(|query| !query.is_empty())
            .ok_or_else(|| ToolError::ArgumentParse {
                name: TOOL_NAME.to_string(),
                message: "missing required string parameter 'q'".to_string(),
            })?;
        let count = args
            .get("max_results")
            .and_then(|value| value.as_u64())
            .unwrap_or(DEFAULT_MAX_RESULTS)
            .clamp(1, MAX_RESULTS_LIMIT);

        tracing::debug!(query = %query, count, "Running web search");

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(ToolError::Cancelled { name: TOOL_NAME.to_string() });
            }
            response = self.search(query, count) => response?,
        };

        let hits: Vec<&SearchHit> = response.results.iter().take(count as usize).collect();
        let data = json!(hits
            .iter()
            .map(|hit| json!({"title": hit.title, "url": hit.url, "snippet": hit.snippet}))
            .collect::<Vec<_>>());

        Ok(ToolOutput::text(format_hits(query, &hits)).with_data(data))
    }
}

fn format_hits(query: &str, hits: &[&SearchHit]) -> String {
    if hits.is_empty() {
        return format!("No results found for \"{query}\".");
    }

    let mut output = format!("Search results for \"{query}\":\n");
    for (position, hit) in hits.iter().enumerate() {
        output.push_str(&format!("\n{}. {}\n   {}\n", position + 1, hit.title, hit.url));
        if !hit.snippet.is_empty() {
            output.push_str(&format!("   {}\n", hit.snippet));
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;

    fn tool(endpoint: String) -> WebSearchTool {
        WebSearchTool::new(&WebSearchConfig {
            endpoint,
            api_key: None,
        })
    }

    #[test]
    fn test_format_hits() {
        let hit = SearchHit {
            title: "Berlin weather".to_string(),
            url: "https://weather.example.com/berlin".to_string(),
            snippet: "Sunny, 24°C".to_string(),
        };
        let text = format_hits("weather", &[&hit]);
        assert!(text.starts_with("Search results for \"weather\""));
        assert!(text.contains("1. Berlin weather"));
        assert!(text.contains("Sunny, 24°C"));

        assert_eq!(format_hits("x", &[]), "No results found for \"x\".");
    }

    #[test]
    fn test_response_parsing_tolerates_missing_snippets() {
        let parsed: SearchResponse = serde_json::from_str(
            r#"{"results": [{"title": "a", "url": "https://a.example"}]}"#,
        )
        .unwrap();
        assert_eq!(parsed.results.len(), 1);
        assert!(parsed.results[0].snippet.is_empty());
    }

    #[tokio::test]
    async fn test_missing_query_is_argument_error() {
        let result = tool("http://127.0.0.1:9".to_string())
            .invoke(json!({}), CancellationToken::new())
            .await;
        assert!(matches!(result, Err(ToolError::ArgumentParse { .. })));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_pending_request() {
        // A server that accepts connections and never answers
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let result = tool(format!("http://{addr}/search"))
            .invoke(json!({"q": "weather"}), cancel)
            .await;
        assert_eq!(
            result,
            Err(ToolError::Cancelled {
                name: "web_search".to_string()
            })
        );
    }
}
