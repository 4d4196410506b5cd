//! Web search resource.
//!
//! Uses the Tavily API if `TAVILY_API_KEY` is set, otherwise falls back to
//! DuckDuckGo HTML.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{Resource, ResourceError, ResourceKind};
use crate::task::TaskNature;

const TAVILY_URL: &str = "https://api.tavily.com/search";
const DDG_URL: &str = "https://html.duckduckgo.com/html/";

#[derive(Debug, Serialize)]
struct TavilySearchRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    max_results: u32,
    include_answer: bool,
    include_raw_content: bool,
}

#[derive(Debug, Deserialize)]
struct TavilySearchResponse {
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    title: String,
    url: String,
    content: String,
}

/// Searches the web and returns result snippets as its answer.
pub struct WebResource {
    unique_name: String,
    client: reqwest::Client,
    tavily_api_key: Option<String>,
    max_results: u32,
}

impl WebResource {
    pub fn new(unique_name: impl Into<String>) -> Result<Self, ResourceError> {
        let unique_name = unique_name.into();
        let client = reqwest::Client::builder()
            .user_agent("Mozilla/5.0 (compatible; ooda-agent/0.1)")
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ResourceError::unavailable(&unique_name, e))?;
        Ok(Self {
            unique_name,
            client,
            tavily_api_key: None,
            max_results: 5,
        })
    }

    /// Pick up `TAVILY_API_KEY` from the environment, if set.
    pub fn from_env(unique_name: impl Into<String>) -> Result<Self, ResourceError> {
        let key = std::env::var("TAVILY_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty());
        Ok(Self {
            tavily_api_key: key,
            ..Self::new(unique_name)?
        })
    }

    pub fn with_max_results(mut self, max_results: u32) -> Self {
        self.max_results = max_results.clamp(1, 10);
        self
    }

    async fn search_tavily(&self, api_key: &str, query: &str) -> Result<String, ResourceError> {
        let request = TavilySearchRequest {
            api_key,
            query,
            max_results: self.max_results,
            include_answer: true,
            include_raw_content: false,
        };
        let response = self
            .client
            .post(TAVILY_URL)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.unavailable(e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(self.unavailable(format!("Tavily API error ({}): {}", status, body)));
        }

        let parsed: TavilySearchResponse = response.json().await.map_err(|e| self.unavailable(e))?;
        if parsed.results.is_empty() {
            return Ok(format!("No web results found for: {}", query));
        }

        let mut output = String::new();
        if let Some(answer) = parsed.answer.filter(|a| !a.is_empty()) {
            output.push_str("Summary: ");
            output.push_str(&answer);
            output.push_str("\n\n");
        }
        for result in &parsed.results {
            output.push_str(&format!(
                "{}\n{}\nURL: {}\n\n",
                result.title, result.content, result.url
            ));
        }
        Ok(output.trim_end().to_string())
    }

    async fn search_duckduckgo(&self, query: &str) -> Result<String, ResourceError> {
        let url = format!("{}?q={}", DDG_URL, urlencoding::encode(query));
        let html = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.unavailable(e))?
            .text()
            .await
            .map_err(|e| self.unavailable(e))?;

        if html.contains("anomaly-modal") || html.contains("Unfortunately, bots") {
            return Err(self.unavailable("DuckDuckGo answered with a CAPTCHA"));
        }

        let results = extract_ddg_results(&html, self.max_results as usize);
        if results.is_empty() {
            Ok(format!("No web results found for: {}", query))
        } else {
            Ok(results.join("\n\n"))
        }
    }

    fn unavailable(&self, reason: impl std::fmt::Display) -> ResourceError {
        ResourceError::unavailable(&self.unique_name, reason)
    }
}

/// Pull `(title, snippet, url)` triples out of DuckDuckGo's HTML results page.
fn extract_ddg_results(html: &str, limit: usize) -> Vec<String> {
    html.split("class=\"result__body\"")
        .skip(1)
        .filter_map(|chunk| {
            let title = inner_text(chunk, "class=\"result__a\"")?;
            let snippet = inner_text(chunk, "class=\"result__snippet\"").unwrap_or_default();
            let url = inner_text(chunk, "class=\"result__url\"").unwrap_or_default();
            Some(format!(
                "{}\n{}\nURL: {}",
                html_decode(&title),
                html_decode(&snippet),
                url.trim()
            ))
        })
        .take(limit)
        .collect()
}

/// Text between the end of the tag carrying `marker` and the next `<`.
fn inner_text(chunk: &str, marker: &str) -> Option<String> {
    let after = chunk.split(marker).nth(1)?;
    let text = after.split('>').nth(1)?.split('<').next()?.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

fn html_decode(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&nbsp;", " ")
}

#[async_trait]
impl Resource for WebResource {
    fn unique_name(&self) -> &str {
        &self.unique_name
    }

    fn name(&self) -> &str {
        "web search"
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::Web
    }

    fn supports(&self, nature: TaskNature) -> bool {
        !matches!(nature, TaskNature::Calculation)
    }

    async fn answer(&self, question: &str, _n_words: usize) -> Result<String, ResourceError> {
        match &self.tavily_api_key {
            Some(key) => self.search_tavily(key, question).await,
            None => self.search_duckduckgo(question).await,
        }
    }

    async fn summarize(&self) -> Result<String, ResourceError> {
        Ok("General web search over public internet pages; good for recent events and \
            widely published facts, weak on private or proprietary data."
            .to_string())
    }
}
