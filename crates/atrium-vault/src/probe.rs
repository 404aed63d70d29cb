use std::time::Duration;

use tracing::debug;

use crate::types::Provider;

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of a single probe attempt: `None` means the provider cannot be
/// probed (custom endpoints, azure deployments).
pub type ProbeOutcome = (Option<bool>, Option<String>);

/// Run the cheapest request that proves a key is live for its provider.
pub async fn probe_key(provider: Provider, api_key: &str) -> ProbeOutcome {
    match provider {
        Provider::OpenRouter => probe_openrouter(api_key).await,
        Provider::OpenAi => probe_openai(api_key).await,
        Provider::Anthropic => probe_anthropic(api_key).await,
        Provider::Google => probe_google(api_key).await,
        // No generic probe exists for these; the key stays `untested`.
        Provider::Azure | Provider::Custom => {
            (None, Some("cannot test this provider".to_string()))
        }
    }
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(PROBE_TIMEOUT)
        .build()
        .unwrap_or_default()
}

async fn probe_openrouter(api_key: &str) -> ProbeOutcome {
    let resp = client()
        .get("https://openrouter.ai/api/v1/auth/key")
        .bearer_auth(api_key)
        .send()
        .await;
    simple_outcome(resp).await
}

async fn probe_openai(api_key: &str) -> ProbeOutcome {
    let resp = client()
        .get("https://api.openai.com/v1/models")
        .bearer_auth(api_key)
        .send()
        .await;
    simple_outcome(resp).await
}

/// Anthropic has no auth-check endpoint; a one-token completion is the
/// cheapest probe. Any response other than 401 proves the key is accepted.
async fn probe_anthropic(api_key: &str) -> ProbeOutcome {
    let resp = client()
        .post("https://api.anthropic.com/v1/messages")
        .header("x-api-key", api_key)
        .header("anthropic-version", "2023-06-01")
        .header("content-type", "application/json")
        .json(&serde_json::json!({
            "model": "claude-3-haiku-20240307",
            "max_tokens": 1,
            "messages": [{ "role": "user", "content": "Hi" }],
        }))
        .send()
        .await;

    match resp {
        Ok(r) => {
            let status = r.status().as_u16();
            debug!(status, "anthropic probe response");
            match status {
                200 | 400 | 429 => (Some(true), None),
                401 => (Some(false), Some("Invalid API key".to_string())),
                other => (Some(false), Some(probe_error_body(other, r).await)),
            }
        }
        Err(e) => (Some(false), Some(probe_transport_error(e))),
    }
}

async fn probe_google(api_key: &str) -> ProbeOutcome {
    let resp = client()
        .get(format!(
            "https://generativelanguage.googleapis.com/v1/models?key={api_key}"
        ))
        .send()
        .await;
    simple_outcome(resp).await
}

/// 200 ⇒ valid; anything else ⇒ invalid with a truncated body excerpt.
async fn simple_outcome(resp: reqwest::Result<reqwest::Response>) -> ProbeOutcome {
    match resp {
        Ok(r) if r.status().is_success() => (Some(true), None),
        Ok(r) => {
            let status = r.status().as_u16();
            (Some(false), Some(probe_error_body(status, r).await))
        }
        Err(e) => (Some(false), Some(probe_transport_error(e))),
    }
}

async fn probe_error_body(status: u16, resp: reqwest::Response) -> String {
    let body = resp.text().await.unwrap_or_default();
    let excerpt: String = body.chars().take(200).collect();
    format!("HTTP {status}: {excerpt}")
}

fn probe_transport_error(e: reqwest::Error) -> String {
    if e.is_timeout() {
        "Connection timeout".to_string()
    } else {
        e.to_string()
    }
}
