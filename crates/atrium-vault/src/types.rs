use serde::{Deserialize, Serialize};

/// Supported LLM providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenRouter,
    OpenAi,
    Anthropic,
    Google,
    Azure,
    Custom,
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Provider::OpenRouter => "openrouter",
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Google => "google",
            Provider::Azure => "azure",
            Provider::Custom => "custom",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "openrouter" => Ok(Provider::OpenRouter),
            "openai" => Ok(Provider::OpenAi),
            "anthropic" => Ok(Provider::Anthropic),
            "google" => Ok(Provider::Google),
            "azure" => Ok(Provider::Azure),
            "custom" => Ok(Provider::Custom),
            other => Err(format!("unknown provider: {}", other)),
        }
    }
}

/// Outcome of the most recent liveness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Valid,
    Invalid,
    Untested,
}

impl std::fmt::Display for TestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestStatus::Valid => write!(f, "valid"),
            TestStatus::Invalid => write!(f, "invalid"),
            TestStatus::Untested => write!(f, "untested"),
        }
    }
}

impl std::str::FromStr for TestStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "valid" => Ok(TestStatus::Valid),
            "invalid" => Ok(TestStatus::Invalid),
            "untested" => Ok(TestStatus::Untested),
            other => Err(format!("unknown test status: {}", other)),
        }
    }
}

/// A stored provider credential. The key material only leaves this crate
/// decrypted through `KeyVault::get_active` and the liveness probe.
///
/// Rotation forms a linear history: each rotated key points back at its
/// predecessor via `rotated_from_id`, never the other way around.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderKey {
    pub id: String,
    pub provider: Provider,
    pub name: String,
    /// `enc:`-prefixed AES-GCM ciphertext. Not exposed over the wire.
    #[serde(skip_serializing)]
    pub encrypted_key: String,
    pub is_active: bool,
    pub is_default: bool,
    pub last_used_at: Option<String>,
    pub last_tested_at: Option<String>,
    pub test_status: TestStatus,
    pub test_error: Option<String>,
    pub rotated_from_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Result of a liveness probe, reported to the caller. Latency is not
/// persisted.
#[derive(Debug, Clone, Serialize)]
pub struct TestReport {
    /// `None` when the provider cannot be probed (custom/azure).
    pub valid: Option<bool>,
    pub error: Option<String>,
    pub latency_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_roundtrip() {
        for p in [
            Provider::OpenRouter,
            Provider::OpenAi,
            Provider::Anthropic,
            Provider::Google,
            Provider::Azure,
            Provider::Custom,
        ] {
            let parsed: Provider = p.to_string().parse().unwrap();
            assert_eq!(parsed, p);
        }
    }
}
