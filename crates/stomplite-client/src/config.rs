//! Client configuration types.

use stomplite_core::DEFAULT_MAX_FRAME_SIZE;

/// Session-level configuration.
///
/// Transport settings (addresses, timeouts) live on the transport adapters.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Virtual host sent as the CONNECT `host` header.
    pub host: Option<String>,
    /// Protocol versions sent as the CONNECT `accept-version` header.
    pub accept_version: Option<String>,
    /// Largest partial frame buffered before the connection is dropped (0 = no limit).
    pub max_frame_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: None,
            accept_version: None,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the virtual host.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Set the `accept-version` header, e.g. `"1.0,1.1,1.2"`.
    pub fn accept_version(mut self, versions: impl Into<String>) -> Self {
        self.accept_version = Some(versions.into());
        self
    }

    /// Set the maximum buffered frame size in bytes.
    pub fn max_frame_size(mut self, bytes: usize) -> Self {
        self.max_frame_size = bytes;
        self
    }
}
