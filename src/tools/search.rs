//! Web 搜索工具：请求可配置的搜索端点，HTML 转可读文本并截断
//!
//! 查询作为 `q` 参数附加到端点上（默认 DuckDuckGo HTML 版）；GET 请求带超时与 User-Agent；
//! 响应超过 max_result_chars 时截断并追加 ...[truncated]。

use std::time::Duration;

use async_trait::async_trait;
use html2text::from_read;
use reqwest::{Client, Url};
use serde_json::Value;

use crate::config::SearchSection;
use crate::tools::Tool;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// 简易去除 HTML 标签（html2text 失败时的回退）
fn strip_html_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                out.push(' ');
            }
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn looks_like_html(s: &str) -> bool {
    let s = s.trim_start().to_lowercase();
    s.starts_with("<!") || s.starts_with("<html") || (s.contains("</") && s.contains('<'))
}

/// 截断到 max_chars 个字符
pub fn truncate_result(body: &str, max_chars: usize) -> String {
    if body.chars().count() > max_chars {
        body.chars().take(max_chars).collect::<String>() + "\n...[truncated]"
    } else {
        body.to_string()
    }
}

pub struct WebSearchTool {
    client: Client,
    endpoint: String,
    max_result_chars: usize,
}

impl WebSearchTool {
    pub fn new(config: &SearchSection) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: config.endpoint.clone(),
            max_result_chars: config.max_result_chars,
        }
    }

    pub fn search_url(&self, query: &str) -> Result<Url, String> {
        Url::parse_with_params(&self.endpoint, &[("q", query)])
            .map_err(|e| format!("Invalid search endpoint {}: {}", self.endpoint, e))
    }

    fn html_to_text(html: &str) -> String {
        match from_read(html.as_bytes(), 120) {
            Ok(text) if !text.trim().is_empty() => text,
            _ => strip_html_tags(html),
        }
    }

    async fn search(&self, query: &str) -> Result<String, String> {
        let url = self.search_url(query)?;
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("Request failed: {}", e))?;
        if !resp.status().is_success() {
            return Err(format!("HTTP {}", resp.status()));
        }
        let body = resp
            .text()
            .await
            .map_err(|e| format!("Read body: {}", e))?;
        let body = body.trim_start_matches('\u{FEFF}');
        let text = if looks_like_html(body) {
            Self::html_to_text(body)
        } else {
            body.to_string()
        };
        Ok(truncate_result(&text, self.max_result_chars))
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web and return page text. Args: {\"query\": \"search terms\"}"
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let query = args
            .get("query")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim();
        if query.is_empty() {
            return Err("Missing query".to_string());
        }
        tracing::info!(query = %query, "web_search tool execute");
        self.search(query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_url_encodes_query() {
        let tool = WebSearchTool::new(&SearchSection::default());
        let url = tool.search_url("weather in 東京 & more").unwrap();
        assert_eq!(url.host_str(), Some("html.duckduckgo.com"));
        let q: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert_eq!(q, vec![("q".to_string(), "weather in 東京 & more".to_string())]);
    }

    #[test]
    fn test_strip_and_truncate() {
        assert_eq!(strip_html_tags("<p>Hello</p><b>world</b>"), "Hello world");
        assert_eq!(truncate_result("abcdef", 3), "abc\n...[truncated]");
        assert_eq!(truncate_result("abc", 3), "abc");
        assert!(looks_like_html("<!DOCTYPE html><html></html>"));
        assert!(!looks_like_html("plain text"));
    }

    #[tokio::test]
    async fn test_empty_query_is_error() {
        let tool = WebSearchTool::new(&SearchSection::default());
        assert!(tool.execute(serde_json::json!({"query": "  "})).await.is_err());
    }
}
