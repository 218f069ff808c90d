//! Gateway inbound policy assembly.
//!
//! A policy document is an ordered list of inbound directives applied by the
//! managed gateway before a request reaches the backend. The order is fixed
//! and intentional: identity headers are injected first so that per-key
//! limiting can key off the authenticated principal, and routing is always
//! the terminal directive.

use std::fmt::Write as _;

use crate::config::RateLimitConfig;

pub type Result<T> = std::result::Result<T, PolicyError>;

/// Errors raised while validating a policy document.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("Directive at position {position} is out of order: {directive}")]
    OutOfOrder { position: usize, directive: String },

    #[error("Policy must contain exactly one route-to-backend directive")]
    MissingRoute,

    #[error("Duplicate {0} directive")]
    DuplicateDirective(&'static str),

    #[error("route-to-backend must be the terminal directive")]
    RouteNotTerminal,
}

/// One inbound processing directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// Inject a caller-identity header derived from the authenticated
    /// principal.
    SetHeader { name: String, value: String },
    /// Rate limit keyed by subscription key.
    RateLimitByKey { calls: u32, renewal_period_secs: u32 },
    /// Rate limit keyed by source address.
    RateLimitBySource { calls: u32, renewal_period_secs: u32 },
    /// Forward to the named backend. Always terminal.
    RouteToBackend { backend_id: String },
}

impl Directive {
    /// Position class in the fixed ordering.
    fn rank(&self) -> u8 {
        match self {
            Self::SetHeader { .. } => 0,
            Self::RateLimitByKey { .. } => 1,
            Self::RateLimitBySource { .. } => 2,
            Self::RouteToBackend { .. } => 3,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::SetHeader { .. } => "set-header",
            Self::RateLimitByKey { .. } => "rate-limit-by-key",
            Self::RateLimitBySource { .. } => "rate-limit-by-source",
            Self::RouteToBackend { .. } => "route-to-backend",
        }
    }
}

/// An ordered, validated inbound policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyDocument {
    directives: Vec<Directive>,
}

impl PolicyDocument {
    /// Compose the policy in the fixed order: identity headers, per-key
    /// limit, per-source limit, backend routing. This is the only ordering
    /// the gateway accepts; it is not configurable.
    pub fn assemble(
        headers: &[(&str, &str)],
        key_limit: RateLimitConfig,
        source_limit: RateLimitConfig,
        backend_id: impl Into<String>,
    ) -> Self {
        let mut directives = Vec::with_capacity(headers.len() + 3);
        for (name, value) in headers {
            directives.push(Directive::SetHeader {
                name: (*name).to_string(),
                value: (*value).to_string(),
            });
        }
        directives.push(Directive::RateLimitByKey {
            calls: key_limit.calls,
            renewal_period_secs: key_limit.renewal_period_secs,
        });
        directives.push(Directive::RateLimitBySource {
            calls: source_limit.calls,
            renewal_period_secs: source_limit.renewal_period_secs,
        });
        directives.push(Directive::RouteToBackend {
            backend_id: backend_id.into(),
        });
        Self { directives }
    }

    /// Build a document from hand-assembled directives, rejecting any that
    /// violate the ordering invariants.
    pub fn from_directives(directives: Vec<Directive>) -> Result<Self> {
        let document = Self { directives };
        document.validate()?;
        Ok(document)
    }

    /// Re-check the ordering invariants: header injection precedes rate
    /// limiting, at most one of each limit, and exactly one terminal route.
    pub fn validate(&self) -> Result<()> {
        let mut last_rank = 0u8;
        let mut key_limits = 0usize;
        let mut source_limits = 0usize;
        let mut routes = 0usize;

        for (position, directive) in self.directives.iter().enumerate() {
            let rank = directive.rank();
            if rank < last_rank {
                return Err(PolicyError::OutOfOrder {
                    position,
                    directive: directive.label().to_string(),
                });
            }
            last_rank = rank;
            match directive {
                Directive::RateLimitByKey { .. } => key_limits += 1,
                Directive::RateLimitBySource { .. } => source_limits += 1,
                Directive::RouteToBackend { .. } => routes += 1,
                Directive::SetHeader { .. } => {}
            }
        }

        if key_limits > 1 {
            return Err(PolicyError::DuplicateDirective("rate-limit-by-key"));
        }
        if source_limits > 1 {
            return Err(PolicyError::DuplicateDirective("rate-limit-by-source"));
        }
        if routes != 1 {
            return Err(PolicyError::MissingRoute);
        }
        if !matches!(
            self.directives.last(),
            Some(Directive::RouteToBackend { .. })
        ) {
            return Err(PolicyError::RouteNotTerminal);
        }
        Ok(())
    }

    pub fn directives(&self) -> &[Directive] {
        &self.directives
    }

    /// Render the gateway's inbound policy wire form.
    pub fn to_xml(&self) -> String {
        let mut xml = String::from("<policies>\n  <inbound>\n    <base />\n");
        for directive in &self.directives {
            match directive {
                Directive::SetHeader { name, value } => {
                    let _ = writeln!(
                        xml,
                        "    <set-header name=\"{name}\" exists-action=\"override\">\n      <value>{value}</value>\n    </set-header>"
                    );
                }
                Directive::RateLimitByKey {
                    calls,
                    renewal_period_secs,
                } => {
                    let _ = writeln!(
                        xml,
                        "    <rate-limit-by-key calls=\"{calls}\" renewal-period=\"{renewal_period_secs}\" counter-key=\"@(context.Subscription.Key)\" />"
                    );
                }
                Directive::RateLimitBySource {
                    calls,
                    renewal_period_secs,
                } => {
                    let _ = writeln!(
                        xml,
                        "    <rate-limit-by-key calls=\"{calls}\" renewal-period=\"{renewal_period_secs}\" counter-key=\"@(context.Request.IpAddress)\" />"
                    );
                }
                Directive::RouteToBackend { backend_id } => {
                    let _ = writeln!(xml, "    <set-backend-service backend-id=\"{backend_id}\" />");
                }
            }
        }
        xml.push_str("  </inbound>\n</policies>\n");
        xml
    }
}
