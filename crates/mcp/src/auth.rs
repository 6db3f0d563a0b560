//! Caller identity handed to the composer by the authentication layer.
//!
//! The composer only reads the context (for logging and scope lookups);
//! verifying credentials and enforcing scopes happen before a call reaches it.

use std::collections::HashMap;

use {
    chrono::{DateTime, Utc},
    secrecy::Secret,
    serde::{Deserialize, Serialize},
    serde_json::Value,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    ApiKey,
    Jwt,
    Oauth2,
    Mtls,
    #[default]
    None,
}

impl AuthType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApiKey => "api_key",
            Self::Jwt => "jwt",
            Self::Oauth2 => "oauth2",
            Self::Mtls => "mtls",
            Self::None => "none",
        }
    }
}

/// An authenticated caller.
#[derive(Debug, Clone, Serialize)]
pub struct AuthContext {
    pub user_id: String,
    pub auth_type: AuthType,
    #[serde(skip)]
    pub token: Option<Secret<String>>,
    pub scopes: Vec<String>,
    pub metadata: HashMap<String, Value>,
    pub authenticated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl AuthContext {
    pub fn new(user_id: impl Into<String>, auth_type: AuthType) -> Self {
        Self {
            user_id: user_id.into(),
            auth_type,
            token: None,
            scopes: Vec::new(),
            metadata: HashMap::new(),
            authenticated_at: Utc::now(),
            expires_at: None,
        }
    }

    #[must_use]
    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Contexts without an expiry never expire.
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Utc::now() > at)
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, chrono::Duration};

    #[test]
    fn expiry() {
        let ctx = AuthContext::new("alice", AuthType::ApiKey);
        assert!(!ctx.is_expired());

        let past = ctx.clone().with_expiry(Utc::now() - Duration::seconds(5));
        assert!(past.is_expired());

        let future = ctx.with_expiry(Utc::now() + Duration::hours(1));
        assert!(!future.is_expired());
    }

    #[test]
    fn scopes() {
        let ctx = AuthContext::new("bob", AuthType::Jwt).with_scopes(["tools:call", "tools:list"]);
        assert!(ctx.has_scope("tools:call"));
        assert!(!ctx.has_scope("admin"));
    }

    #[test]
    fn token_is_not_serialized() {
        let mut ctx = AuthContext::new("carol", AuthType::Oauth2);
        ctx.token = Some(Secret::new("t0ken".into()));
        let json = serde_json::to_value(&ctx).unwrap();
        assert!(json.get("token").is_none());
        assert_eq!(json["auth_type"], "oauth2");
    }
}
