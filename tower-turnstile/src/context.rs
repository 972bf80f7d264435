//! Read-only request facts used to derive rate limit, quota and cache keys.

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use http::Method;
use http::Request;

/// The route template a request was matched against (`/events/:id`, not `/events/42`).
///
/// Inserted as a request extension by whatever does the routing. With the
/// `axum` feature, axum's `MatchedPath` is used when this is absent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteTemplate(pub String);

impl RouteTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self(template.into())
    }
}

/// Address of the connected client, inserted as a request extension by the server.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClientAddr(pub IpAddr);

/// Numeric identity of an authenticated caller.
///
/// The authentication stage (outside this crate) inserts it as a request
/// extension once a token has been verified.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UserId(pub u64);

/// Everything key functions are allowed to look at.
#[derive(Clone, Debug)]
pub struct RequestContext<'a> {
    pub method: &'a Method,
    pub route: Option<&'a str>,
    pub path: &'a str,
    pub query: Option<&'a str>,
    pub client_addr: Option<IpAddr>,
    pub user_id: Option<UserId>,
}

impl<'a> RequestContext<'a> {
    pub fn from_request<B>(req: &'a Request<B>) -> Self {
        let extensions = req.extensions();
        Self {
            method: req.method(),
            route: route_template(req),
            path: req.uri().path(),
            query: req.uri().query(),
            client_addr: extensions
                .get::<ClientAddr>()
                .map(|addr| addr.0)
                .or_else(|| connect_info(req)),
            user_id: extensions.get::<UserId>().copied(),
        }
    }
}

fn route_template<B>(req: &Request<B>) -> Option<&str> {
    if let Some(template) = req.extensions().get::<RouteTemplate>() {
        return Some(template.0.as_str());
    }
    #[cfg(feature = "axum")]
    if let Some(matched) = req.extensions().get::<axum::extract::MatchedPath>() {
        return Some(matched.as_str());
    }
    None
}

#[cfg(feature = "axum")]
fn connect_info<B>(req: &Request<B>) -> Option<IpAddr> {
    req.extensions()
        .get::<axum::extract::ConnectInfo<std::net::SocketAddr>>()
        .map(|info| info.0.ip())
}

#[cfg(not(feature = "axum"))]
fn connect_info<B>(_req: &Request<B>) -> Option<IpAddr> {
    None
}

type KeyFnInner = dyn Fn(&RequestContext<'_>) -> Option<String> + Send + Sync;

/// Maps a request to the key it is limited or accounted under.
///
/// `None`, or an empty string, means "do not limit this request".
#[derive(Clone)]
pub struct KeyFn(Arc<KeyFnInner>);

impl fmt::Debug for KeyFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyFn(..)")
    }
}

impl KeyFn {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&RequestContext<'_>) -> Option<String> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// The same key for every request.
    pub fn fixed(key: impl Into<String>) -> Self {
        let key = key.into();
        Self::new(move |_| Some(key.clone()))
    }

    /// `{prefix}:{client ip}`.
    ///
    /// Requests with no known address share a single `{prefix}:unknown` key.
    pub fn client_ip(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        Self::new(move |ctx| match ctx.client_addr {
            Some(ip) => Some(format!("{prefix}:{ip}")),
            None => Some(format!("{prefix}:unknown")),
        })
    }

    /// `{prefix}:{user id}`; unauthenticated requests are not limited.
    pub fn user(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        Self::new(move |ctx| ctx.user_id.map(|UserId(id)| format!("{prefix}:{id}")))
    }

    /// `quota:user:{user id}:day`, the per-user daily quota key.
    pub fn user_daily_quota() -> Self {
        Self::new(|ctx| ctx.user_id.map(|UserId(id)| format!("quota:user:{id}:day")))
    }

    /// Evaluates the function, folding an empty key into `None`.
    pub fn key(&self, ctx: &RequestContext<'_>) -> Option<String> {
        (self.0)(ctx).filter(|key| !key.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    fn request(uri: &str) -> Request<()> {
        Request::builder().uri(uri).body(()).unwrap()
    }

    #[test]
    fn context_reads_extensions() {
        let mut req = request("/events/42?x=1");
        req.extensions_mut().insert(RouteTemplate::new("/events/:id"));
        req.extensions_mut()
            .insert(ClientAddr(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))));
        req.extensions_mut().insert(UserId(7));

        let ctx = RequestContext::from_request(&req);
        assert_eq!(ctx.method, &Method::GET);
        assert_eq!(ctx.route, Some("/events/:id"));
        assert_eq!(ctx.path, "/events/42");
        assert_eq!(ctx.query, Some("x=1"));
        assert_eq!(ctx.client_addr, Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))));
        assert_eq!(ctx.user_id, Some(UserId(7)));
    }

    #[test]
    fn builtin_key_functions() {
        let mut req = request("/events");
        req.extensions_mut()
            .insert(ClientAddr(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 9))));
        let anonymous = RequestContext::from_request(&req);

        assert_eq!(
            KeyFn::client_ip("ip").key(&anonymous),
            Some("ip:192.168.1.9".to_string())
        );
        assert_eq!(KeyFn::user("u").key(&anonymous), None);
        assert_eq!(KeyFn::user_daily_quota().key(&anonymous), None);

        req.extensions_mut().insert(UserId(7));
        let signed_in = RequestContext::from_request(&req);
        assert_eq!(KeyFn::user("u").key(&signed_in), Some("u:7".to_string()));
        assert_eq!(
            KeyFn::user_daily_quota().key(&signed_in),
            Some("quota:user:7:day".to_string())
        );
    }

    #[test]
    fn empty_key_means_skip() {
        let req = request("/");
        let ctx = RequestContext::from_request(&req);

        assert_eq!(KeyFn::fixed("").key(&ctx), None);
        assert_eq!(KeyFn::new(|_| Some(String::new())).key(&ctx), None);
        assert_eq!(KeyFn::fixed("k").key(&ctx), Some("k".to_string()));
    }

    #[test]
    fn unknown_clients_share_a_key() {
        let req = request("/");
        let ctx = RequestContext::from_request(&req);

        assert_eq!(
            KeyFn::client_ip("login").key(&ctx),
            Some("login:unknown".to_string())
        );
    }
}
