use super::resources::{
    Cluster, DiscoveryType, DnsLookupFamily, LbPolicy, SocketAddress, UpstreamTlsContext,
};

pub const CONNECT_TIMEOUT_SECS: u64 = 5;

/// Clusters are identified by DNS name and port: `{host}-{port}`.
pub fn cluster_name(host: &str, port: u16) -> String {
    format!("{host}-{port}")
}

pub fn plain_cluster(name: &str, host: &str, port: u16) -> Cluster {
    Cluster {
        name: name.to_string(),
        connect_timeout_secs: CONNECT_TIMEOUT_SECS,
        discovery_type: DiscoveryType::LogicalDns,
        lb_policy: LbPolicy::RoundRobin,
        dns_lookup_family: DnsLookupFamily::V4Only,
        endpoint: SocketAddress {
            address: host.to_string(),
            port,
        },
        transport_socket: None,
    }
}

/// Same policy as [`plain_cluster`], connecting over TLS with `host` as SNI.
pub fn tls_cluster(name: &str, host: &str, port: u16) -> Cluster {
    Cluster {
        transport_socket: Some(UpstreamTlsContext {
            sni: host.to_string(),
        }),
        ..plain_cluster(name, host, port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_defaults() {
        let name = cluster_name("svc.ns.svc.cluster.local.", 8080);
        assert_eq!(name, "svc.ns.svc.cluster.local.-8080");

        let cluster = plain_cluster(&name, "svc.ns.svc.cluster.local.", 8080);
        assert_eq!(cluster.connect_timeout_secs, 5);
        assert_eq!(cluster.discovery_type, DiscoveryType::LogicalDns);
        assert_eq!(cluster.dns_lookup_family, DnsLookupFamily::V4Only);
        assert!(cluster.transport_socket.is_none());

        let tls = tls_cluster("jwks", "keys.example.com", 443);
        assert_eq!(tls.transport_socket.unwrap().sni, "keys.example.com");
    }
}
