// src/openai_client.rs
//
// Chat-completions client used for catalog work: classifying product links
// into categories and pulling structured values out of nutrition tables.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Sentinel category for anything the model cannot place.
pub const UNCATEGORIZED: &str = "Uncategorized";

#[derive(Debug, Clone)]
pub struct OpenAIConfig {
    pub api_key: String,
    pub base_url: String, // default official; override for proxies/azure
    pub model: String,    // e.g., "gpt-4o-mini"
    pub timeout: Duration,
    pub max_retries: usize,
}

impl OpenAIConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            api_key: env::var("OPENAI_API_KEY")
                .context("Set OPENAI_API_KEY in your environment")?,
            base_url: env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            model: env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            timeout: Duration::from_secs(
                env::var("OPENAI_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60),
            ),
            max_retries: env::var("OPENAI_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3),
        })
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize, Debug)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize, Debug)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize, Debug)]
struct ChoiceMessage {
    content: String,
}

/// One classified product: category from the fixed list plus the product
/// name the model read out of the link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedProduct {
    pub category: String,
    pub name: String,
}

/// Nutrition values per 100g/100ml; `None` where the label had no figure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Nutrition {
    pub kcal: Option<String>,
    pub fat: Option<String>,
    pub carbs: Option<String>,
    pub protein: Option<String>,
}

impl std::fmt::Display for Nutrition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let v = |o: &Option<String>| o.clone().unwrap_or_else(|| "N/A".to_string());
        write!(
            f,
            "kcal: {}, fat: {}, carbs: {}, protein: {}",
            v(&self.kcal),
            v(&self.fat),
            v(&self.carbs),
            v(&self.protein)
        )
    }
}

/// Classify a product link into one of `categories`. Anything the model
/// returns outside the list degrades to [`UNCATEGORIZED`].
pub async fn classify_product(
    cfg: &OpenAIConfig,
    url: &str,
    categories: &[&str],
) -> Result<ClassifiedProduct> {
    let prompt = format!(
        "The following is a product URL from an online grocery store:\n{url}\n\n\
         Your task is:\n\
         1. Extract the product name from the URL.\n\
         2. Assign the product to one of the categories from the following list:\n{}\n\n\
         Return the response in this format:\n\
         Category: <category_name>\n\
         Product Name: <product_name>\n\n\
         Do NOT return anything else.",
        categories.join(", ")
    );

    let content = chat(cfg, None, &prompt, 0.0).await?;
    Ok(parse_classification(&content, categories))
}

/// Extract kcal/fat/carbs/protein from a nutrition table's HTML.
pub async fn extract_nutrition(cfg: &OpenAIConfig, table_html: &str) -> Result<Nutrition> {
    let prompt = format!(
        "You are a nutrition label parser.\n\n\
         Here is an HTML table extracted from a grocery product page:\n{table_html}\n\n\
         Extract the following values (per 100g or 100ml):\n\
         - kcal\n- fat\n- carbohydrates\n- protein\n\n\
         If the value contains a \"<\" sign (e.g. \"<0.5g\"), ignore the sign and return \
         the number only (e.g. \"0.5\").\n\
         Return the result in this format (numbers only, no units):\n\
         kcal: <number>, fat: <number>, carbs: <number>, protein: <number>\n\
         If any value is missing or not present, return 'N/A' for that field."
    );

    let content = chat(cfg, None, &prompt, 0.0).await?;
    Ok(parse_nutrition(&content))
}

/// One chat-completions round trip with bounded retries. 429s sleep for
/// whatever the reset headers or error body ask for; other failures back off
/// linearly.
pub async fn chat(
    cfg: &OpenAIConfig,
    system: Option<&str>,
    user: &str,
    temperature: f32,
) -> Result<String> {
    let client = reqwest::Client::builder().timeout(cfg.timeout).build()?;

    let mut messages = Vec::new();
    if let Some(system) = system {
        messages.push(ChatMessage { role: "system", content: system.to_string() });
    }
    messages.push(ChatMessage { role: "user", content: user.to_string() });

    let req_body = ChatRequest { model: &cfg.model, messages, temperature };
    let url = format!("{}/chat/completions", cfg.base_url);
    let mut last_err: Option<anyhow::Error> = None;

    for attempt in 0..cfg.max_retries {
        let resp = client
            .post(&url)
            .bearer_auth(&cfg.api_key)
            .json(&req_body)
            .send()
            .await;

        match resp {
            Ok(r) => {
                let status = r.status();
                if !status.is_success() {
                    let headers = r.headers().clone();
                    let text = r.text().await.unwrap_or_default();
                    if status.as_u16() == 429 {
                        let wait_ms = compute_rate_limit_sleep_ms(&headers, &text, attempt);
                        eprintln!(
                            "⏳ 429 rate-limited (attempt {}/{}). Sleeping ~{} ms",
                            attempt + 1,
                            cfg.max_retries,
                            wait_ms
                        );
                        tokio::time::sleep(Duration::from_millis(wait_ms)).await;
                        continue;
                    }
                    last_err = Some(anyhow::anyhow!("OpenAI HTTP {}: {}", status, text));
                } else {
                    let parsed: ChatResponse = r.json().await?;
                    let content = parsed
                        .choices
                        .first()
                        .ok_or_else(|| anyhow::anyhow!("No choices from OpenAI"))?
                        .message
                        .content
                        .trim()
                        .to_string();
                    return Ok(strip_code_fences(&content).to_string());
                }
            }
            Err(e) => last_err = Some(anyhow::anyhow!(e)),
        }

        if attempt + 1 < cfg.max_retries {
            tokio::time::sleep(Duration::from_millis(400 * (attempt as u64 + 1))).await;
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("OpenAI request failed")))
}

fn parse_classification(content: &str, categories: &[&str]) -> ClassifiedProduct {
    let mut category = String::new();
    let mut name = String::new();
    for line in content.lines() {
        if let Some(rest) = line.trim().strip_prefix("Category:") {
            category = rest.trim().to_string();
        } else if let Some(rest) = line.trim().strip_prefix("Product Name:") {
            name = rest.trim().to_string();
        }
    }
    if !categories.contains(&category.as_str()) {
        category = UNCATEGORIZED.to_string();
    }
    if name.is_empty() {
        name = "Unknown Product".to_string();
    }
    ClassifiedProduct { category, name }
}

fn parse_nutrition(content: &str) -> Nutrition {
    let mut out = Nutrition::default();
    for part in content.split(',') {
        let Some((key, value)) = part.split_once(':') else { continue };
        let value = value.trim();
        let value = if value.eq_ignore_ascii_case("n/a") || value.is_empty() {
            None
        } else {
            Some(value.to_string())
        };
        match key.trim().to_ascii_lowercase().as_str() {
            "kcal" => out.kcal = value,
            "fat" => out.fat = value,
            "carbs" => out.carbs = value,
            "protein" => out.protein = value,
            _ => {}
        }
    }
    out
}

fn strip_code_fences(s: &str) -> &str {
    let s = s.trim();
    if let Some(rest) = s.strip_prefix("```json") {
        if let Some(end) = rest.strip_suffix("```") {
            return end.trim();
        }
    }
    if let Some(rest) = s.strip_prefix("```") {
        if let Some(end) = rest.strip_suffix("```") {
            return end.trim();
        }
    }
    s
}

/* -------------------- Rate-limit helpers -------------------- */

fn parse_seconds_str_to_ms(s: &str) -> Option<u64> {
    // Accepts "1.686s" or "2" (seconds)
    let t = s.trim().trim_end_matches('s').trim();
    if t.is_empty() {
        return None;
    }
    if let Ok(v) = t.parse::<f64>() {
        return Some((v * 1000.0).round() as u64);
    }
    None
}

fn extract_wait_ms_from_headers(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    // Prefer explicit reset headers if present
    for key in [
        "x-ratelimit-reset-requests",
        "x-ratelimit-reset-tokens",
        "retry-after",
    ] {
        if let Some(val) = headers.get(key) {
            if let Ok(s) = val.to_str() {
                if let Some(ms) = parse_seconds_str_to_ms(s) {
                    return Some(ms);
                }
                // retry-after can be integer seconds
                if let Ok(sec) = s.parse::<u64>() {
                    return Some(sec * 1000);
                }
            }
        }
    }
    None
}

fn extract_wait_ms_from_body(body: &str) -> Option<u64> {
    // Look for "...Please try again in 1.686s."
    if let Some(pos) = body.find("Please try again in") {
        let tail = &body[pos + "Please try again in".len()..];
        let tail = tail.trim_start();
        let mut num = String::new();
        for ch in tail.chars() {
            if ch.is_ascii_digit() || ch == '.' {
                num.push(ch);
            } else {
                break;
            }
        }
        if !num.is_empty() {
            return parse_seconds_str_to_ms(&(num + "s"));
        }
    }
    None
}

/// Decide how long to sleep for a 429, using headers first, then body, then a fallback.
fn compute_rate_limit_sleep_ms(
    headers: &reqwest::header::HeaderMap,
    body: &str,
    attempt: usize,
) -> u64 {
    if let Some(ms) = extract_wait_ms_from_headers(headers) {
        return ms;
    }
    if let Some(ms) = extract_wait_ms_from_body(body) {
        return ms;
    }
    // fallback linear backoff with cap
    let base = 600u64; // 0.6s
    (base * (attempt as u64 + 1)).min(8_000)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_url: String) -> OpenAIConfig {
        OpenAIConfig {
            api_key: "test-key".to_string(),
            base_url,
            model: "gpt-4o-mini".to_string(),
            timeout: Duration::from_secs(5),
            max_retries: 2,
        }
    }

    fn chat_body(content: &str) -> serde_json::Value {
        serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": content } }]
        })
    }

    const CATEGORIES: &[&str] = &["Water", "Tea and coffee", "Cheeses"];

    #[tokio::test]
    async fn classification_accepts_a_listed_category() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_body(
                "Category: Water\nProduct Name: Still Water 2L",
            )))
            .mount(&server)
            .await;

        let cfg = test_config(server.uri());
        let out = classify_product(&cfg, "https://x/still-water-2l", CATEGORIES)
            .await
            .unwrap();
        assert_eq!(out.category, "Water");
        assert_eq!(out.name, "Still Water 2L");
    }

    #[tokio::test]
    async fn unlisted_category_degrades_to_uncategorized() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_body(
                "Category: Fireworks\nProduct Name: Sparkler",
            )))
            .mount(&server)
            .await;

        let cfg = test_config(server.uri());
        let out = classify_product(&cfg, "https://x/sparkler", CATEGORIES).await.unwrap();
        assert_eq!(out.category, UNCATEGORIZED);
        assert_eq!(out.name, "Sparkler");
    }

    #[tokio::test]
    async fn retries_until_the_server_recovers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_body("pong")))
            .mount(&server)
            .await;

        let cfg = test_config(server.uri());
        let out = chat(&cfg, None, "ping", 0.0).await.unwrap();
        assert_eq!(out, "pong");
    }

    #[tokio::test]
    async fn nutrition_extraction_parses_the_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_body(
                "kcal: 52, fat: 0.5, carbs: 11, protein: N/A",
            )))
            .mount(&server)
            .await;

        let cfg = test_config(server.uri());
        let out = extract_nutrition(&cfg, "<table></table>").await.unwrap();
        assert_eq!(out.kcal.as_deref(), Some("52"));
        assert_eq!(out.fat.as_deref(), Some("0.5"));
        assert_eq!(out.carbs.as_deref(), Some("11"));
        assert_eq!(out.protein, None);
        assert_eq!(out.to_string(), "kcal: 52, fat: 0.5, carbs: 11, protein: N/A");
    }

    #[test]
    fn classification_parsing_tolerates_missing_lines() {
        let out = parse_classification("Category: Cheeses", CATEGORIES);
        assert_eq!(out.category, "Cheeses");
        assert_eq!(out.name, "Unknown Product");

        let out = parse_classification("gibberish", CATEGORIES);
        assert_eq!(out.category, UNCATEGORIZED);
    }

    #[test]
    fn code_fences_are_stripped() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\nplain\n```"), "plain");
        assert_eq!(strip_code_fences("no fences"), "no fences");
    }

    #[test]
    fn rate_limit_sleep_prefers_headers_then_body() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("x-ratelimit-reset-tokens", "1.5s".parse().unwrap());
        assert_eq!(compute_rate_limit_sleep_ms(&headers, "", 0), 1500);

        let empty = reqwest::header::HeaderMap::new();
        assert_eq!(
            compute_rate_limit_sleep_ms(&empty, "Please try again in 2.25s.", 0),
            2250
        );
        assert_eq!(compute_rate_limit_sleep_ms(&empty, "", 2), 1800);
    }
}
