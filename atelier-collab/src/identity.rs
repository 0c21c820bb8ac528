//! Identity Verifier adapter.
//!
//! Token issuance lives elsewhere; the synchronizer only asks "who is this
//! bearer?". [`StaticTokenVerifier`] is a fixed token table used by the
//! server binary and tests.

use std::collections::HashMap;

use crate::error::SyncError;
use crate::session::Role;

/// Verified identity behind a credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub subject_id: String,
    pub role: Role,
}

/// Validates a bearer credential.
pub trait IdentityVerifier: Send + Sync {
    fn verify(&self, credential: &str) -> Result<Identity, SyncError>;
}

/// Fixed table of bearer tokens.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenVerifier {
    tokens: HashMap<String, Identity>,
}

impl StaticTokenVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: impl Into<String>, subject_id: impl Into<String>, role: Role) -> Self {
        self.tokens.insert(
            token.into(),
            Identity {
                subject_id: subject_id.into(),
                role,
            },
        );
        self
    }

    /// Parse `token=subject:role` pairs (comma separated).
    pub fn parse(spec: &str) -> Result<Self, String> {
        let mut verifier = Self::new();
        for pair in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (token, identity) = pair
                .split_once('=')
                .ok_or_else(|| format!("expected token=subject:role, got '{pair}'"))?;
            let (subject, role) = identity
                .split_once(':')
                .ok_or_else(|| format!("expected subject:role, got '{identity}'"))?;
            if token.is_empty() || subject.is_empty() {
                return Err(format!("empty token or subject in '{pair}'"));
            }
            verifier = verifier.with_token(token, subject, role.parse()?);
        }
        Ok(verifier)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl IdentityVerifier for StaticTokenVerifier {
    fn verify(&self, credential: &str) -> Result<Identity, SyncError> {
        let token = credential.strip_prefix("Bearer ").unwrap_or(credential).trim();
        if token.is_empty() {
            return Err(SyncError::AuthenticationFailure("missing credential".into()));
        }
        self.tokens
            .get(token)
            .cloned()
            .ok_or_else(|| SyncError::AuthenticationFailure("unknown credential".into()))
    }
}
