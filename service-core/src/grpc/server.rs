//! gRPC server builder utilities.

use std::time::Duration;

use tonic::transport::Server;

/// Transport settings shared by every gRPC listener of a service.
pub struct GrpcServerBuilder {
    service_name: String,
    keepalive: Option<(Duration, Duration)>,
    request_timeout: Option<Duration>,
    concurrency_limit: Option<usize>,
}

impl GrpcServerBuilder {
    /// HTTP/2 keepalive pings every 30s, dropped after 10s without an ack.
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            keepalive: Some((Duration::from_secs(30), Duration::from_secs(10))),
            request_timeout: None,
            concurrency_limit: None,
        }
    }

    pub fn with_keepalive(mut self, interval: Duration, timeout: Duration) -> Self {
        self.keepalive = Some((interval, timeout));
        self
    }

    /// Server-side deadline applied when the caller sends none.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Set concurrency limit per connection.
    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = Some(limit);
        self
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Build a tonic Server with the configured settings.
    pub fn build_server(&self) -> Server {
        tracing::debug!(
            service = %self.service_name,
            keepalive = ?self.keepalive,
            request_timeout = ?self.request_timeout,
            concurrency_limit = ?self.concurrency_limit,
            "Configuring gRPC server"
        );

        let mut server = Server::builder().tcp_nodelay(true);

        if let Some((interval, timeout)) = self.keepalive {
            server = server
                .http2_keepalive_interval(Some(interval))
                .http2_keepalive_timeout(Some(timeout));
        }

        if let Some(timeout) = self.request_timeout {
            server = server.timeout(timeout);
        }

        if let Some(limit) = self.concurrency_limit {
            server = server.concurrency_limit_per_connection(limit);
        }

        server
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_keep_connections_alive() {
        let builder = GrpcServerBuilder::new("auth-service");

        assert_eq!(builder.service_name(), "auth-service");
        assert_eq!(
            builder.keepalive,
            Some((Duration::from_secs(30), Duration::from_secs(10)))
        );
        assert!(builder.request_timeout.is_none());
    }

    #[test]
    fn overrides_are_recorded() {
        let builder = GrpcServerBuilder::new("auth-service")
            .with_keepalive(Duration::from_secs(60), Duration::from_secs(5))
            .with_request_timeout(Duration::from_secs(15))
            .with_concurrency_limit(100);

        assert_eq!(
            builder.keepalive,
            Some((Duration::from_secs(60), Duration::from_secs(5)))
        );
        assert_eq!(builder.request_timeout, Some(Duration::from_secs(15)));
        assert_eq!(builder.concurrency_limit, Some(100));
    }
}
