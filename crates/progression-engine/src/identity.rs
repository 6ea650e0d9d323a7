//! Voter identity resolution.

use crate::error::{Error, Result};

/// Maps a platform user to the identity used for one-vote-per-session.
pub trait IdentityResolver: Send + Sync {
    fn resolve(&self, platform: &str, platform_id: &str, voter_identity: &str) -> Result<String>;
}

/// Uses the voter identity when given, else `platform:platform_id`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultIdentityResolver;

impl IdentityResolver for DefaultIdentityResolver {
    fn resolve(&self, platform: &str, platform_id: &str, voter_identity: &str) -> Result<String> {
        let voter = voter_identity.trim();
        if !voter.is_empty() {
            return Ok(voter.to_string());
        }
        let (platform, platform_id) = (platform.trim(), platform_id.trim());
        if platform.is_empty() || platform_id.is_empty() {
            return Err(Error::UnknownIdentity);
        }
        Ok(format!("{platform}:{platform_id}"))
    }
}
