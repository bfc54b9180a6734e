use std::net::{IpAddr, Ipv4Addr, UdpSocket};

/// Outward-facing address of this host.
///
/// "Connects" a UDP socket to `probe` and reads back the local endpoint the
/// kernel picked. UDP connect sends nothing. Falls back to loopback when no
/// route exists.
pub fn local_ip(probe: &str) -> IpAddr {
    match probe_local_ip(probe) {
        Ok(ip) => ip,
        Err(err) => {
            log::warn!(
                "could not determine outward-facing address via {} ({}); advertising loopback",
                probe,
                err
            );
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}

fn probe_local_ip(probe: &str) -> std::io::Result<IpAddr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    socket.connect(probe)?;
    Ok(socket.local_addr()?.ip())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_probe_resolves_to_loopback() {
        assert!(local_ip("127.0.0.1:9").is_loopback());
    }

    #[test]
    fn unusable_probe_falls_back() {
        assert_eq!(local_ip("not an address"), IpAddr::V4(Ipv4Addr::LOCALHOST));
    }
}
