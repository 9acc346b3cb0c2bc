//! Connection parameters for the remote host.

use anyhow::anyhow;
use russh::keys::ssh_key;

pub const DEFAULT_PORT: u16 = 22;
pub const DEFAULT_CONNECT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

const SHA256_PREFIX: &str = "SHA256:";

/// How the server's host key is checked while connecting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostKeyPolicy {
    /// Accept any host key without verification.
    ///
    /// INSECURE: anyone able to intercept the connection can impersonate the server and collect
    /// the password. Every connection made this way logs a warning with the key it accepted.
    AcceptAny,
    /// Accept only a host key with this SHA-256 fingerprint (base64, `SHA256:` prefix optional).
    Fingerprint(String),
}

impl HostKeyPolicy {
    pub fn fingerprint(fingerprint: &str) -> Self {
        let bare = fingerprint
            .trim()
            .strip_prefix(SHA256_PREFIX)
            .unwrap_or(fingerprint.trim());
        Self::Fingerprint(bare.to_string())
    }

    /// Checks the key presented by `host` against the policy.
    pub fn accepts(&self, host: &str, key: &ssh_key::PublicKey) -> bool {
        let presented = key.fingerprint(ssh_key::HashAlg::Sha256).to_string();
        match self {
            HostKeyPolicy::AcceptAny => {
                tracing::warn!(
                    "accepting host key {} of {} without verification",
                    presented,
                    host
                );
                true
            }
            HostKeyPolicy::Fingerprint(expected) => {
                let matches = presented.strip_prefix(SHA256_PREFIX) == Some(expected.as_str());
                if !matches {
                    tracing::error!(
                        "host key {} of {} does not match the expected {}{}",
                        presented,
                        host,
                        SHA256_PREFIX,
                        expected
                    );
                }
                matches
            }
        }
    }
}

/// Everything needed to reach and authenticate against the remote host.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionParameters {
    pub host: String,
    pub port: u16,
    pub user: String,
    /// Password used for authentication.
    pub secret: String,
    /// Size of the buffer files are streamed through, in bytes.
    pub buffer_size: usize,
    pub connect_timeout: std::time::Duration,
    pub host_key_policy: HostKeyPolicy,
}

impl ConnectionParameters {
    /// Parameters with the default port, buffer size and connect timeout. Host keys are checked
    /// with [`HostKeyPolicy::AcceptAny`] unless changed.
    pub fn new(host: impl Into<String>, user: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            user: user.into(),
            secret: secret.into(),
            buffer_size: common::copy::DEFAULT_BUFFER_SIZE,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            host_key_policy: HostKeyPolicy::AcceptAny,
        }
    }

    /// `host:port`, with IPv6 literals bracketed.
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.host.is_empty() {
            return Err(anyhow!("host must not be empty"));
        }
        if self.user.is_empty() {
            return Err(anyhow!("user must not be empty"));
        }
        if self.buffer_size == 0 {
            return Err(anyhow!("buffer size must be greater than zero"));
        }
        Ok(())
    }
}

// the secret never ends up in logs
impl std::fmt::Debug for ConnectionParameters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionParameters")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("secret", &"<redacted>")
            .field("buffer_size", &self.buffer_size)
            .field("connect_timeout", &self.connect_timeout)
            .field("host_key_policy", &self.host_key_policy)
            .finish()
    }
}
