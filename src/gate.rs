use std::sync::Arc;
use tracing::{debug, warn};

use crate::transport::{ChatTransport, UserRef};

/// Subscription check against the configured channel.
pub struct AccessGate {
    transport: Arc<dyn ChatTransport>,
    channel: Option<String>,
}

impl AccessGate {
    pub fn new(transport: Arc<dyn ChatTransport>, channel: Option<String>) -> Self {
        Self { transport, channel }
    }

    pub fn channel(&self) -> Option<&str> {
        self.channel.as_deref()
    }

    /// Always true without a configured channel. Lookup errors count as not
    /// subscribed.
    pub async fn is_authorized(&self, user: UserRef) -> bool {
        let Some(channel) = &self.channel else {
            return true;
        };
        match self.transport.member_status(channel, user).await {
            Ok(status) => {
                debug!(user = user.0, ?status, "membership checked");
                status.is_subscribed()
            }
            Err(e) => {
                warn!(user = user.0, channel, error = %e, "membership lookup failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::RecordingTransport;
    use crate::transport::{MemberStatus, TransportError};

    #[tokio::test]
    async fn test_no_channel_allows_everyone() {
        let transport = Arc::new(RecordingTransport::new());
        let gate = AccessGate::new(transport.clone(), None);
        assert!(gate.is_authorized(UserRef(1)).await);
        assert_eq!(transport.member_lookups(), 0);
    }

    #[tokio::test]
    async fn test_statuses() {
        let transport = Arc::new(RecordingTransport::new());
        transport.set_member(UserRef(1), Ok(MemberStatus::Member));
        transport.set_member(UserRef(2), Ok(MemberStatus::Administrator));
        transport.set_member(UserRef(3), Ok(MemberStatus::Left));
        transport.set_member(UserRef(4), Ok(MemberStatus::Restricted));
        transport.set_member(UserRef(5), Err(TransportError::Rejected("chat not found".into())));
        let gate = AccessGate::new(transport, Some("@channel".into()));

        assert!(gate.is_authorized(UserRef(1)).await);
        assert!(gate.is_authorized(UserRef(2)).await);
        assert!(!gate.is_authorized(UserRef(3)).await);
        assert!(!gate.is_authorized(UserRef(4)).await);
        assert!(!gate.is_authorized(UserRef(5)).await);
    }

    #[tokio::test]
    async fn test_repeated_checks_agree() {
        let transport = Arc::new(RecordingTransport::new());
        transport.set_member(UserRef(7), Ok(MemberStatus::Owner));
        let gate = AccessGate::new(transport.clone(), Some("-1001".into()));

        let first = gate.is_authorized(UserRef(7)).await;
        let second = gate.is_authorized(UserRef(7)).await;
        assert_eq!(first, second);
        assert_eq!(transport.member_lookups(), 2);
    }
}
