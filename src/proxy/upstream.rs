//! Upstream (rendering origin) peer and request preparation.
//!
//! Functions return plain data instead of touching Pingora request headers so
//! the logic stays testable; the proxy applies the result.

use std::time::Duration;

use pingora_core::upstreams::peer::HttpPeer;

use crate::config::OriginConfig;

/// Upstream peer configuration ready to create HttpPeer.
#[derive(Debug, Clone)]
pub struct UpstreamPeerConfig {
    /// Origin hostname or IP.
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
    pub connection_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
}

impl UpstreamPeerConfig {
    pub fn from_origin(origin: &OriginConfig) -> Self {
        let timeout = Duration::from_secs(origin.timeout_secs);
        Self {
            host: origin.host.clone(),
            port: origin.port,
            use_tls: origin.tls,
            connection_timeout: timeout,
            read_timeout: timeout,
            write_timeout: timeout,
        }
    }

    /// `Host` header value; the port is omitted when it is the scheme default.
    pub fn host_header(&self) -> String {
        let default_port = if self.use_tls { 443 } else { 80 };
        if self.port == default_port {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Build an HttpPeer from this configuration.
    pub fn build_peer(&self) -> Box<HttpPeer> {
        let mut peer = Box::new(HttpPeer::new(
            (self.host.clone(), self.port),
            self.use_tls,
            self.host.clone(),
        ));

        peer.options.connection_timeout = Some(self.connection_timeout);
        peer.options.read_timeout = Some(self.read_timeout);
        peer.options.write_timeout = Some(self.write_timeout);

        peer
    }
}

/// Headers added to every forwarded request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardHeaders {
    pub host: String,
    pub request_id: String,
    /// Original browser-facing target when the path was rewritten
    pub rewritten_from: Option<String>,
}

/// Prepare the forwarding headers for one request.
pub fn forward_headers(
    peer: &UpstreamPeerConfig,
    request_id: &str,
    original_target: &str,
    rewrite_target: Option<&str>,
) -> ForwardHeaders {
    ForwardHeaders {
        host: peer.host_header(),
        request_id: request_id.to_string(),
        rewritten_from: rewrite_target.map(|_| original_target.to_string()),
    }
}
