//! Session state scoping calls to session-gated capabilities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An opaque, expiring session owned by one tenant's session store.
///
/// The token is 256 bits of CSPRNG output, hex-encoded (64 chars). Sessions
/// die with their owning tenant regardless of remaining TTL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub token: String,

    /// Snapshot of the tenant's capability names at creation time.
    pub capabilities: Vec<String>,

    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn expiry_boundary_is_inclusive() {
        let now = Utc::now();
        let session = Session {
            token: "ab".repeat(32),
            capabilities: vec!["listItems".into()],
            expires_at: now,
        };
        assert!(session.is_expired_at(now));
        assert!(!session.is_expired_at(now - Duration::seconds(1)));
        assert!(session.is_expired_at(now + Duration::seconds(1)));
    }
}
