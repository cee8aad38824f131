//! Session configuration.

use std::sync::Arc;
use std::time::Duration;

use crate::core::{
    DEFAULT_MAX_FRAGMENT_PAYLOAD, EngineParams, Fingerprint, IdentityKeypair, InstanceTag,
    SessionError, TEARDOWN_TIMEOUT,
};

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Local long-term identity.
    pub identity: Arc<IdentityKeypair>,

    /// Local instance tag, announced to the peer during the handshake.
    pub instance_tag: Option<InstanceTag>,

    /// Fingerprint the peer is expected to present. `None` trusts whatever
    /// the first handshake shows.
    pub expected_fingerprint: Option<Fingerprint>,

    /// Treat unencrypted inbound messages as a protocol violation.
    pub require_encryption: bool,

    /// How long a reset or destroy waits for the old engine to end.
    pub teardown_timeout: Duration,

    /// Plaintext bytes per fragment handed to the engine.
    pub max_fragment_payload: usize,
}

impl SessionConfig {
    /// Start building a configuration.
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::new()
    }

    /// Fingerprint of the local identity.
    pub fn local_fingerprint(&self) -> Fingerprint {
        self.identity.fingerprint()
    }

    /// Parameters every engine generation is created with.
    pub fn engine_params(&self) -> EngineParams {
        EngineParams {
            identity: Arc::clone(&self.identity),
            instance_tag: self.instance_tag,
            require_encryption: self.require_encryption,
            max_fragment_payload: self.max_fragment_payload,
        }
    }
}

/// Builder for [`SessionConfig`].
#[derive(Debug)]
pub struct SessionConfigBuilder {
    identity: Option<Arc<IdentityKeypair>>,
    instance_tag: Option<InstanceTag>,
    expected_fingerprint: Option<Fingerprint>,
    require_encryption: bool,
    teardown_timeout: Duration,
    max_fragment_payload: usize,
}

impl SessionConfigBuilder {
    /// Create a builder with default policy and no identity.
    pub fn new() -> Self {
        Self {
            identity: None,
            instance_tag: None,
            expected_fingerprint: None,
            require_encryption: true,
            teardown_timeout: TEARDOWN_TIMEOUT,
            max_fragment_payload: DEFAULT_MAX_FRAGMENT_PAYLOAD,
        }
    }

    /// Set the local identity.
    pub fn identity(mut self, identity: IdentityKeypair) -> Self {
        self.identity = Some(Arc::new(identity));
        self
    }

    /// Set a local identity shared with other sessions.
    pub fn shared_identity(mut self, identity: Arc<IdentityKeypair>) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Set the local instance tag.
    pub fn instance_tag(mut self, tag: InstanceTag) -> Self {
        self.instance_tag = Some(tag);
        self
    }

    /// Expect the peer to present this fingerprint.
    pub fn expected_fingerprint(mut self, fingerprint: Fingerprint) -> Self {
        self.expected_fingerprint = Some(fingerprint);
        self
    }

    /// Require inbound messages to be encrypted (default: `true`).
    pub fn require_encryption(mut self, required: bool) -> Self {
        self.require_encryption = required;
        self
    }

    /// Set the teardown timeout.
    pub fn teardown_timeout(mut self, timeout: Duration) -> Self {
        self.teardown_timeout = timeout;
        self
    }

    /// Set the plaintext bytes per fragment.
    pub fn max_fragment_payload(mut self, bytes: usize) -> Self {
        self.max_fragment_payload = bytes;
        self
    }

    /// Build the session configuration.
    pub fn build(self) -> Result<SessionConfig, SessionError> {
        let identity = self
            .identity
            .ok_or_else(|| SessionError::Config("an identity key is required".into()))?;
        if self.teardown_timeout.is_zero() {
            return Err(SessionError::Config(
                "teardown timeout must be non-zero".into(),
            ));
        }
        if self.max_fragment_payload == 0 {
            return Err(SessionError::Config(
                "fragments must carry at least one byte".into(),
            ));
        }

        Ok(SessionConfig {
            identity,
            instance_tag: self.instance_tag,
            expected_fingerprint: self.expected_fingerprint,
            require_encryption: self.require_encryption,
            teardown_timeout: self.teardown_timeout,
            max_fragment_payload: self.max_fragment_payload,
        })
    }
}

impl Default for SessionConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let identity = IdentityKeypair::generate();
        let fingerprint = identity.fingerprint();
        let config = SessionConfig::builder().identity(identity).build().unwrap();

        assert!(config.require_encryption);
        assert_eq!(config.teardown_timeout, TEARDOWN_TIMEOUT);
        assert_eq!(config.max_fragment_payload, DEFAULT_MAX_FRAGMENT_PAYLOAD);
        assert!(config.expected_fingerprint.is_none());
        assert_eq!(config.local_fingerprint(), fingerprint);
    }

    #[test]
    fn test_identity_is_required() {
        assert!(matches!(
            SessionConfig::builder().build(),
            Err(SessionError::Config(_))
        ));
    }

    #[test]
    fn test_rejects_degenerate_limits() {
        let zero_timeout = SessionConfig::builder()
            .identity(IdentityKeypair::generate())
            .teardown_timeout(Duration::ZERO)
            .build();
        assert!(matches!(zero_timeout, Err(SessionError::Config(_))));

        let zero_fragment = SessionConfig::builder()
            .identity(IdentityKeypair::generate())
            .max_fragment_payload(0)
            .build();
        assert!(matches!(zero_fragment, Err(SessionError::Config(_))));
    }

    #[test]
    fn test_engine_params_follow_config() {
        let tag = InstanceTag::new(0x4242).unwrap();
        let config = SessionConfig::builder()
            .identity(IdentityKeypair::generate())
            .instance_tag(tag)
            .require_encryption(false)
            .max_fragment_payload(512)
            .build()
            .unwrap();

        let params = config.engine_params();
        assert_eq!(params.instance_tag, Some(tag));
        assert!(!params.require_encryption);
        assert_eq!(params.max_fragment_payload, 512);
        assert!(Arc::ptr_eq(&params.identity, &config.identity));
    }
}
