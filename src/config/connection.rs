//! Broker connection profile shared by every reader and writer

use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// SASL/PLAIN credentials
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// SASL username
    pub username: String,
    /// SASL password
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Immutable connection parameters for the broker cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionProfile {
    addresses: Vec<String>,
    client_id: String,
    dial_timeout: Duration,
    read_timeout: Duration,
    write_timeout: Duration,
    credentials: Option<Credentials>,
}

impl ConnectionProfile {
    /// Create a new profile builder
    pub fn builder() -> ConnectionProfileBuilder {
        ConnectionProfileBuilder::new()
    }

    /// Broker addresses (never empty)
    pub fn addresses(&self) -> &[String] {
        &self.addresses
    }

    /// Addresses joined the way `bootstrap.servers` expects them
    pub fn bootstrap_servers(&self) -> String {
        self.addresses.join(",")
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn dial_timeout(&self) -> Duration {
        self.dial_timeout
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    pub fn write_timeout(&self) -> Duration {
        self.write_timeout
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }
}

/// Builder for ConnectionProfile
#[derive(Debug, Clone)]
pub struct ConnectionProfileBuilder {
    addresses: Vec<String>,
    client_id: String,
    dial_timeout: Duration,
    read_timeout: Duration,
    write_timeout: Duration,
    username: String,
    password: String,
}

impl ConnectionProfileBuilder {
    /// Create a builder with the default timeouts
    pub fn new() -> Self {
        Self {
            addresses: Vec::new(),
            client_id: "sc-kafka".to_string(),
            dial_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(10),
            username: String::new(),
            password: String::new(),
        }
    }

    /// Set the broker addresses
    pub fn addresses<I, S>(mut self, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.addresses = addresses.into_iter().map(Into::into).collect();
        self
    }

    /// Add a single broker address
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.addresses.push(address.into());
        self
    }

    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set SASL/PLAIN credentials; both halves must be given together
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Validate and build the profile
    pub fn build(self) -> EngineResult<ConnectionProfile> {
        let addresses: Vec<String> = self
            .addresses
            .iter()
            .map(|address| address.trim())
            .filter(|address| !address.is_empty())
            .map(str::to_string)
            .collect();

        if addresses.is_empty() {
            return Err(EngineError::ConfigInvalid(
                "at least one broker address is required".to_string(),
            ));
        }

        let credentials = match (self.username.is_empty(), self.password.is_empty()) {
            (true, true) => None,
            (false, false) => Some(Credentials {
                username: self.username,
                password: self.password,
            }),
            _ => {
                return Err(EngineError::ConfigInvalid(
                    "broker username and password must be set together".to_string(),
                ))
            }
        };

        Ok(ConnectionProfile {
            addresses,
            client_id: self.client_id,
            dial_timeout: self.dial_timeout,
            read_timeout: self.read_timeout,
            write_timeout: self.write_timeout,
            credentials,
        })
    }
}

impl Default for ConnectionProfileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Split a comma-separated broker list, dropping blank entries
pub fn parse_addresses(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}
