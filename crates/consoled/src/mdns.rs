//! mDNS advertisement of the console
//!
//! Publishes `<hostname>.local` with a `_telnet._tcp` service so operators
//! can reach the device without knowing its address.

use anyhow::{Context, Result};
use mdns_sd::{ServiceDaemon, ServiceInfo};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use tracing::{info, warn};

const SERVICE_TYPE: &str = "_telnet._tcp.local.";

/// Register the telnet service; keep the daemon alive for as long as it
/// should stay published
pub fn advertise(hostname: &str, port: u16) -> Result<ServiceDaemon> {
    let ip = get_local_ip()?.to_string();
    let host = format!("{}.local.", hostname);

    let daemon = ServiceDaemon::new().context("Failed to start mDNS daemon")?;
    let service = ServiceInfo::new(
        SERVICE_TYPE,
        hostname,
        &host,
        ip.as_str(),
        port,
        HashMap::<String, String>::new(),
    )
    .context("Invalid mDNS service description")?;

    daemon
        .register(service)
        .context("Failed to register mDNS service")?;

    info!("Publish mDNS hostname {} ({}) port {}", host, ip, port);
    Ok(daemon)
}

/// Address of the interface that routes outward
///
/// Filters out Docker bridge (172.17.x.x) and loopback addresses.
fn get_local_ip() -> Result<IpAddr> {
    // Connecting a UDP socket sends nothing; it only selects the interface
    let socket = UdpSocket::bind("0.0.0.0:0").context("Failed to bind probe socket")?;
    socket
        .connect("8.8.8.8:80")
        .context("No route to determine local address")?;

    let local_ip = socket.local_addr()?.ip();
    if let IpAddr::V4(ipv4) = local_ip {
        if is_docker_or_loopback(ipv4) {
            warn!("Detected Docker/loopback IP {}, mDNS may be unreachable", local_ip);
        }
    }
    Ok(local_ip)
}

fn is_docker_or_loopback(ip: Ipv4Addr) -> bool {
    let octets = ip.octets();
    octets[0] == 172 && octets[1] == 17 || octets[0] == 127
}
