use std::net::SocketAddr;

/// Address other members should use to reach a listener bound on `bound`.
///
/// A configured `advertise` address wins; its port 0 stands for the bound
/// port. Without one the bound address is advertised as is, which
/// configuration validation only allows for concrete binds.
pub fn advertised_addr(
    advertise: Option<SocketAddr>,
    bound: SocketAddr,
) -> SocketAddr {
    match advertise {
        Some(addr) if addr.port() == 0 => SocketAddr::new(addr.ip(), bound.port()),
        Some(addr) => addr,
        None => bound,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concrete_bind_is_advertised_as_is() {
        let addr: SocketAddr = "10.1.2.3:7000".parse().unwrap();
        assert_eq!(advertised_addr(None, addr), addr);
    }

    #[test]
    fn configured_address_replaces_wildcard_bind() {
        let bound: SocketAddr = "0.0.0.0:7000".parse().unwrap();
        let advertise: SocketAddr = "10.1.2.3:7100".parse().unwrap();
        assert_eq!(advertised_addr(Some(advertise), bound), advertise);
    }

    #[test]
    fn configured_address_without_port_takes_bound_port() {
        let bound: SocketAddr = "[::]:7000".parse().unwrap();
        let advertise: SocketAddr = "[fd00::5]:0".parse().unwrap();
        assert_eq!(
            advertised_addr(Some(advertise), bound),
            "[fd00::5]:7000".parse().unwrap()
        );
    }
}
