//! Call context: the (environment, company, endpoint) key of one logical call.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one orchestrated call
///
/// Contexts are not deduplicated; a repeated company in the configuration
/// yields two equal contexts that are processed and recorded independently.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Context {
    pub environment: String,
    pub company: String,
    pub endpoint: String,
}

impl Context {
    pub fn new(
        environment: impl Into<String>,
        company: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            environment: environment.into(),
            company: company.into(),
            endpoint: endpoint.into(),
        }
    }

    /// Slash-delimited label, e.g. `Production/CRONUS/IntercompanyPartner`
    pub fn label(&self) -> String {
        format!("{}/{}/{}", self.environment, self.company, self.endpoint)
    }

    /// Key of the circuit breaker guarding this call
    pub fn breaker_key(&self, scope: BreakerScope) -> String {
        match scope {
            BreakerScope::Global => "global".to_string(),
            BreakerScope::Environment => self.environment.clone(),
            BreakerScope::Company => format!("{}/{}", self.environment, self.company),
            BreakerScope::Endpoint => self.label(),
        }
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.environment, self.company, self.endpoint)
    }
}

/// Granularity at which circuit breakers are shared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BreakerScope {
    /// One breaker for the whole run
    Global,
    /// One breaker per environment
    #[default]
    Environment,
    /// One breaker per environment and company
    Company,
    /// One breaker per context
    Endpoint,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_and_display_agree() {
        let ctx = Context::new("Production", "CRONUS", "IntercompanyPartner");
        assert_eq!(ctx.label(), "Production/CRONUS/IntercompanyPartner");
        assert_eq!(ctx.to_string(), ctx.label());
    }

    #[test]
    fn test_breaker_keys() {
        let ctx = Context::new("Test", "TXO", "Items");
        assert_eq!(ctx.breaker_key(BreakerScope::Global), "global");
        assert_eq!(ctx.breaker_key(BreakerScope::Environment), "Test");
        assert_eq!(ctx.breaker_key(BreakerScope::Company), "Test/TXO");
        assert_eq!(ctx.breaker_key(BreakerScope::Endpoint), "Test/TXO/Items");
    }

    #[test]
    fn test_scope_deserialization() {
        let scope: BreakerScope = serde_json::from_str("\"company\"").unwrap();
        assert_eq!(scope, BreakerScope::Company);
        assert_eq!(BreakerScope::default(), BreakerScope::Environment);
    }
}
