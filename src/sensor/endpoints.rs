//! Client/server role normalization and endpoint rows
//!
//! A captured exchange arrives in whatever direction the wire had it; the
//! DNS QR bit recovers which endpoint acted as the server. The resolver
//! then pins both endpoints to store rows so analyzers share stable ids.

use std::net::IpAddr;
use std::sync::Arc;

use crate::sensor::decode::TransportSegment;
use crate::storage::{EndpointKind, EndpointRow, EndpointStore, StorageError};

/// The 4-tuple reordered into roles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointRoles {
    pub server_ip: IpAddr,
    pub server_port: u16,
    pub client_ip: IpAddr,
    pub client_port: u16,
}

impl EndpointRoles {
    /// Derive roles from a segment and the message's QR bit: the source of
    /// an answer is the server, the source of a question is the client.
    pub fn from_segment(segment: &TransportSegment, response: bool) -> EndpointRoles {
        if response {
            EndpointRoles {
                server_ip: segment.src_ip,
                server_port: segment.src_port,
                client_ip: segment.dst_ip,
                client_port: segment.dst_port,
            }
        } else {
            EndpointRoles {
                server_ip: segment.dst_ip,
                server_port: segment.dst_port,
                client_ip: segment.src_ip,
                client_port: segment.src_port,
            }
        }
    }
}

pub struct EndpointResolver {
    store: Arc<EndpointStore>,
}

impl EndpointResolver {
    pub fn new(store: Arc<EndpointStore>) -> EndpointResolver {
        EndpointResolver { store }
    }

    /// Find-or-create both endpoint rows. Ports are per-event data and stay
    /// out of the store.
    pub async fn resolve(
        &self,
        roles: &EndpointRoles,
    ) -> std::result::Result<(EndpointRow, EndpointRow), StorageError> {
        let server = self
            .find_or_create_retry(EndpointKind::Server, roles.server_ip)
            .await?;
        let client = self
            .find_or_create_retry(EndpointKind::Client, roles.client_ip)
            .await?;
        Ok((server, client))
    }

    /// One retry absorbs transient store failures (including a lost
    /// uniqueness race); the second failure propagates and the event is
    /// dropped by the pipeline.
    async fn find_or_create_retry(
        &self,
        kind: EndpointKind,
        ip: IpAddr,
    ) -> std::result::Result<EndpointRow, StorageError> {
        let ip = ip.to_string();
        match self.store.find_or_create(kind, &ip).await {
            Ok(row) => Ok(row),
            Err(first) => {
                log::debug!("find_or_create {} retrying after: {}", ip, first);
                self.store.find_or_create(kind, &ip).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::decode::Transport;
    use std::net::Ipv4Addr;

    fn segment() -> TransportSegment {
        TransportSegment {
            proto: Transport::Udp,
            src_ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)),
            dst_ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            src_port: 54321,
            dst_port: 53,
            payload: Vec::new(),
        }
    }

    #[test]
    fn test_question_roles() {
        let roles = EndpointRoles::from_segment(&segment(), false);

        assert_eq!(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), roles.server_ip);
        assert_eq!(53, roles.server_port);
        assert_eq!(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)), roles.client_ip);
        assert_eq!(54321, roles.client_port);
    }

    #[test]
    fn test_answer_roles() {
        // Same wire direction, but QR=1 flips the interpretation.
        let roles = EndpointRoles::from_segment(&segment(), true);

        assert_eq!(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)), roles.server_ip);
        assert_eq!(54321, roles.server_port);
        assert_eq!(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), roles.client_ip);
        assert_eq!(53, roles.client_port);
    }

    #[tokio::test]
    async fn test_resolver_pins_rows() {
        let store = Arc::new(EndpointStore::connect(":memory:").await.unwrap());
        let resolver = EndpointResolver::new(store);

        let roles = EndpointRoles::from_segment(&segment(), false);
        let (server_a, client_a) = resolver.resolve(&roles).await.unwrap();
        let (server_b, client_b) = resolver.resolve(&roles).await.unwrap();

        assert_eq!("10.0.0.1", server_a.ip);
        assert_eq!("10.0.0.5", client_a.ip);
        assert_eq!(server_a.id, server_b.id);
        assert_eq!(client_a.id, client_b.id);
    }
}
