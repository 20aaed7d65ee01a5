use std::net::IpAddr;

use axum::http::HeaderMap;
use ipnet::IpNet;
use serde_json::{Value, json};

/// Who sent a submission, as far as the request tells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestMeta {
    pub ip: IpAddr,
    pub user_agent: String,
    pub referer: String,
}

impl RequestMeta {
    pub fn to_json(&self) -> Value {
        json!({
            "ip": self.ip.to_string(),
            "user_agent": self.user_agent,
            "referer": self.referer,
        })
    }
}

pub fn extract(headers: &HeaderMap, peer_addr: Option<IpAddr>, trusted_proxies: &[IpNet]) -> RequestMeta {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string()
    };

    RequestMeta {
        ip: client_ip(headers, peer_addr, trusted_proxies),
        user_agent: header("user-agent"),
        referer: header("referer"),
    }
}

/// The client address. `X-Forwarded-For` is only believed when the direct
/// peer is a trusted proxy, and then the first hop that isn't one wins.
pub fn client_ip(headers: &HeaderMap, peer_addr: Option<IpAddr>, trusted_proxies: &[IpNet]) -> IpAddr {
    let peer = peer_addr.unwrap_or(IpAddr::from([127, 0, 0, 1]));
    let trusted = |ip: &IpAddr| trusted_proxies.iter().any(|net| net.contains(ip));

    if !trusted(&peer) {
        return peer;
    }

    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|xff| {
            xff.split(',')
                .filter_map(|s| s.trim().parse::<IpAddr>().ok())
                .find(|ip| !trusted(ip))
        })
        .unwrap_or(peer)
}
