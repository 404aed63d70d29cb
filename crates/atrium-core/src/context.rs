use uuid::Uuid;

/// Per-request correlation context.
///
/// Built by the gateway middleware for every inbound request, echoed back in
/// the `X-Request-ID` response header, and passed by value into subsystem
/// calls so log lines can be joined post-hoc. Never stored in a global: a new
/// value per request means nothing leaks across concurrent tasks.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// 128-bit correlation id, generated unless the client supplied one.
    pub request_id: String,
    /// Actor identifier for audit rows: an email, "admin", or "system".
    pub actor: String,
    /// Actor's user id when the principal maps to a user row.
    pub actor_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl RequestContext {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            actor: "system".to_string(),
            actor_id: None,
            ip_address: None,
            user_agent: None,
        }
    }

    /// Context for work that has no originating request (startup, reaper).
    pub fn background() -> Self {
        Self::new(Uuid::new_v4().to_string())
    }

    pub fn with_actor(mut self, actor: impl Into<String>, actor_id: Option<String>) -> Self {
        self.actor = actor.into();
        self.actor_id = actor_id;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn background_contexts_are_unique() {
        let a = RequestContext::background();
        let b = RequestContext::background();
        assert_ne!(a.request_id, b.request_id);
        assert_eq!(a.actor, "system");
    }
}
