// Discovery scanner: finds the appliance on the local /24 when no host is
// given. Every candidate is probed by a bounded pool of worker threads; all
// probes run to completion (there is no early exit on the first hit).

use anyhow::{bail, Context, Result};
use reqwest::blocking::Client;
use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use tracing::{debug, trace};

/// Text the appliance's landing page is known to contain.
pub const FINGERPRINT: &str = "WiFi Book Transfer";
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(2);
pub const MAX_WORKERS: usize = 64;

/// Subnets scanned when the local address cannot be determined.
pub const FALLBACK_SUBNETS: &[[u8; 3]] = &[[192, 168, 1], [192, 168, 0], [10, 0, 0]];

/// Something that can tell whether a candidate address runs the service.
pub trait Probe: Sync {
    fn probe(&self, ip: Ipv4Addr) -> bool;
}

impl<F> Probe for F
where
    F: Fn(Ipv4Addr) -> bool + Sync,
{
    fn probe(&self, ip: Ipv4Addr) -> bool {
        self(ip)
    }
}

/// Probes `http://ip:port/` and looks for [`FINGERPRINT`] in a 200 body.
pub struct HttpProbe {
    client: Client,
    port: u16,
}

impl HttpProbe {
    pub fn new(port: u16) -> Result<Self> {
        let client = Client::builder()
            .timeout(PROBE_TIMEOUT)
            .connect_timeout(PROBE_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(HttpProbe { client, port })
    }
}

impl Probe for HttpProbe {
    fn probe(&self, ip: Ipv4Addr) -> bool {
        let url = format!("http://{}:{}/", ip, self.port);
        match self.client.get(&url).send() {
            Ok(res) if res.status() == reqwest::StatusCode::OK => match res.text() {
                Ok(body) => body.contains(FINGERPRINT),
                Err(e) => {
                    trace!(%ip, error = %e, "probe body unreadable");
                    false
                }
            },
            Ok(res) => {
                trace!(%ip, status = %res.status(), "probe rejected");
                false
            }
            Err(e) => {
                trace!(%ip, error = %e, "probe failed");
                false
            }
        }
    }
}

/// The address of the interface the routing table prefers for outbound
/// traffic. Connecting a UDP socket sends nothing; it only picks a route.
pub fn local_ipv4() -> Option<Ipv4Addr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    match socket.local_addr().ok()?.ip() {
        IpAddr::V4(ip) if !ip.is_loopback() && !ip.is_unspecified() => Some(ip),
        _ => None,
    }
}

/// All host addresses `.1` to `.254` of the /24 containing `ip`.
pub fn subnet_hosts(ip: Ipv4Addr) -> Vec<Ipv4Addr> {
    let [a, b, c, _] = ip.octets();
    (1..=254).map(|d| Ipv4Addr::new(a, b, c, d)).collect()
}

/// Candidates for the local subnet, or for every fallback subnet.
pub fn candidates(local: Option<Ipv4Addr>) -> Vec<Ipv4Addr> {
    match local {
        Some(ip) => subnet_hosts(ip),
        None => FALLBACK_SUBNETS
            .iter()
            .flat_map(|[a, b, c]| subnet_hosts(Ipv4Addr::new(*a, *b, *c, 0)))
            .collect(),
    }
}

/// Probe every candidate with at most `workers` threads and return the
/// confirmed addresses, deduplicated and in ascending numeric order
/// (octet by octet, so `10.0.0.9` sorts before `10.0.0.10`).
pub fn scan<P: Probe>(candidates: &[Ipv4Addr], probe: &P, workers: usize) -> Vec<Ipv4Addr> {
    let workers = workers.clamp(1, candidates.len().max(1));
    let next = AtomicUsize::new(0);
    let (tx, rx) = mpsc::channel();

    thread::scope(|s| {
        for _ in 0..workers {
            let tx = tx.clone();
            let next = &next;
            s.spawn(move || loop {
                let i = next.fetch_add(1, Ordering::Relaxed);
                let Some(&ip) = candidates.get(i) else { break };
                if probe.probe(ip) {
                    debug!(%ip, "service found");
                    // The receiver outlives the scope.
                    let _ = tx.send(ip);
                }
            });
        }
    });
    drop(tx);

    rx.into_iter()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Scan the local subnet (or the fallbacks) for the appliance.
pub fn discover(port: u16) -> Result<Vec<Ipv4Addr>> {
    let local = local_ipv4();
    match local {
        Some(ip) => debug!(%ip, "local address"),
        None => debug!("no route; scanning fallback subnets"),
    }
    let probe = HttpProbe::new(port)?;
    Ok(scan(&candidates(local), &probe, MAX_WORKERS))
}

/// The endpoint to use from a scan result: the lowest address, with the
/// rest returned as alternates.
pub fn select(found: &[Ipv4Addr]) -> Result<(Ipv4Addr, &[Ipv4Addr])> {
    match found.split_first() {
        Some((first, rest)) => Ok((*first, rest)),
        None => bail!("No server found on the local network. Use -H to give its address."),
    }
}
