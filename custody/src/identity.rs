//! # Identity Seam
//!
//! The custody services never run a login flow themselves. They take a
//! [`Principal`], an opaque, stable identifier handed out by whatever
//! identity provider the application uses, and key everything on it:
//! subjects, guardians, inviters.
//!
//! [`IdentityProvider`] is the one call the services expect from that
//! provider. [`StaticIdentity`] answers it with a fixed principal, which is
//! all the operator tool and the tests need.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors from the identity seam.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("principal must not be empty")]
    EmptyPrincipal,

    #[error("not authenticated")]
    Unauthenticated,
}

/// An authenticated party: a note owner, a guardian, or an inviter.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Principal(String);

impl Principal {
    /// Parse a principal, rejecting blank identifiers.
    pub fn parse(id: impl Into<String>) -> Result<Self, IdentityError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(IdentityError::EmptyPrincipal);
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Principal({})", self.0)
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Principal {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// The external identity provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Return the principal of the caller, or fail if nobody is logged in.
    async fn authenticate(&self) -> Result<Principal, IdentityError>;
}

/// An identity provider that always answers with the same principal.
#[derive(Debug, Clone)]
pub struct StaticIdentity {
    principal: Option<Principal>,
}

impl StaticIdentity {
    pub fn new(principal: Principal) -> Self {
        Self {
            principal: Some(principal),
        }
    }

    /// A provider with nobody logged in.
    pub fn anonymous() -> Self {
        Self { principal: None }
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn authenticate(&self) -> Result<Principal, IdentityError> {
        self.principal.clone().ok_or(IdentityError::Unauthenticated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_principals_are_rejected() {
        assert!(Principal::parse("").is_err());
        assert!(Principal::parse("   ").is_err());
        assert_eq!(Principal::parse("alice").unwrap().as_str(), "alice");
    }

    #[test]
    fn principal_serializes_as_plain_string() {
        let p: Principal = "guardian-7".parse().unwrap();
        assert_eq!(serde_json::to_string(&p).unwrap(), "\"guardian-7\"");
    }

    #[tokio::test]
    async fn static_identity_authenticates() {
        let alice = Principal::parse("alice").unwrap();
        let provider = StaticIdentity::new(alice.clone());
        assert_eq!(provider.authenticate().await.unwrap(), alice);

        assert!(matches!(
            StaticIdentity::anonymous().authenticate().await,
            Err(IdentityError::Unauthenticated)
        ));
    }
}
