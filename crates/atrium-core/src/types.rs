use serde::{Deserialize, Serialize};

/// User roles, totally ordered: Admin > Manager > User.
///
/// The derived `Ord` relies on variant declaration order, so `User` must stay
/// first and `Admin` last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    User,
    Manager,
    Admin,
}

impl UserRole {
    pub fn is_admin(&self) -> bool {
        matches!(self, UserRole::Admin)
    }

    /// True when this role meets or exceeds `required`.
    pub fn allows(&self, required: UserRole) -> bool {
        *self >= required
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UserRole::Admin => write!(f, "admin"),
            UserRole::Manager => write!(f, "manager"),
            UserRole::User => write!(f, "user"),
        }
    }
}

impl std::str::FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "admin" => Ok(UserRole::Admin),
            "manager" => Ok(UserRole::Manager),
            "user" => Ok(UserRole::User),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// Token accounting for one completed assistant turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_ordering() {
        assert!(UserRole::Admin.allows(UserRole::Manager));
        assert!(UserRole::Admin.allows(UserRole::User));
        assert!(UserRole::Manager.allows(UserRole::User));
        assert!(!UserRole::Manager.allows(UserRole::Admin));
        assert!(!UserRole::User.allows(UserRole::Manager));
        assert!(UserRole::User.allows(UserRole::User));
    }

    #[test]
    fn role_roundtrip() {
        for role in [UserRole::Admin, UserRole::Manager, UserRole::User] {
            let parsed: UserRole = role.to_string().parse().unwrap();
            assert_eq!(parsed, role);
        }
        assert!("owner".parse::<UserRole>().is_err());
    }

    #[test]
    fn usage_totals() {
        let usage = TokenUsage::new(120, 30);
        assert_eq!(usage.total_tokens, 150);
    }
}
