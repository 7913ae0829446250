use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use tracing::{debug, warn};

use crate::{
    error::ApiError,
    state::{AppState, AuthRateLimiter},
};

/// Client address for rate limiting.
///
/// Each trusted proxy appends the address it received the request from, so the
/// entry `trusted_hops` from the right is the first one no client can forge.
/// Falls back to the socket peer when the header is missing, short or garbled.
pub(crate) fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>, trusted_hops: usize) -> IpAddr {
    let forwarded = || {
        let hops: Vec<&str> = headers
            .get_all("x-forwarded-for")
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .collect();
        let idx = hops.len().checked_sub(trusted_hops)?;
        hops[idx].parse::<IpAddr>().ok()
    };

    (trusted_hops > 0)
        .then(forwarded)
        .flatten()
        .or_else(|| peer.map(|p| p.ip()))
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

pub async fn limit_by_ip(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let ip = client_ip(req.headers(), peer, state.config.trusted_proxy_hops);

    if state.auth_limiter.check_key(&ip).is_err() {
        warn!(%ip, path = %req.uri().path(), "auth rate limit exceeded");
        return Err(ApiError::TooManyRequests);
    }
    Ok(next.run(req).await)
}

/// Periodically drops limiter keys whose quota has fully replenished.
pub fn spawn_limiter_cleanup(limiter: Arc<AuthRateLimiter>, every: Duration) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(every);
        loop {
            tick.tick().await;
            limiter.retain_recent();
            limiter.shrink_to_fit();
            debug!(keys = limiter.len(), "auth rate limiter pruned");
        }
    });
}
