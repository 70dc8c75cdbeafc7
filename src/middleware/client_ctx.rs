use crate::get_db_pool;
use crate::user::{get_client_user, ClientUser, UserStatus};
use actix_session::Session;
use actix_utils::future::{ok, Ready};
use actix_web::dev::{
    forward_ready, Extensions, Payload, Service, ServiceRequest, ServiceResponse, Transform,
};
use actix_web::http::header::HeaderMap;
use actix_web::{Error, FromRequest, HttpMessage, HttpRequest};
use futures_util::future::{FutureExt as _, LocalBoxFuture};
use std::time::{Duration, Instant};
use std::{cell::RefCell, rc::Rc};

/// Session key holding the logged in user's id. Written by the external auth flow.
pub const SESSION_USER_ID: &str = "user_id";
/// Session key holding the random per-browser guest token.
pub const SESSION_VOTER_TOKEN: &str = "voter_token";

/// Client data stored for a single request cycle.
/// Distinct from ClientCtx because it is defined through request data.
#[derive(Clone)]
pub struct ClientCtxInner {
    pub client: Option<ClientUser>,
    pub ip_address: Option<String>,
    pub session: Option<Session>,
    pub request_start: Instant,
}

impl std::fmt::Debug for ClientCtxInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCtxInner")
            .field("client", &self.client)
            .field("ip_address", &self.ip_address)
            .field("has_session", &self.session.is_some())
            .finish()
    }
}

impl ClientCtxInner {
    fn new() -> Self {
        Self {
            client: None,
            ip_address: None,
            session: None,
            request_start: Instant::now(),
        }
    }
}

/// Client context passed to routes.
/// Wraps ClientCtxInner, which is set at the beginning of the request.
#[derive(Clone, Debug)]
pub struct ClientCtx(Rc<RefCell<ClientCtxInner>>);

impl Default for ClientCtx {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientCtx {
    pub fn new() -> Self {
        Self(Rc::new(RefCell::new(ClientCtxInner::new())))
    }

    /// Builds a context around a known user. Used by background jobs acting as a persona.
    pub fn for_user(client: ClientUser) -> Self {
        let ctx = Self::new();
        ctx.0.borrow_mut().client = Some(client);
        ctx
    }

    fn get_client_ctx(extensions: &mut Extensions) -> Self {
        match extensions.get::<Rc<RefCell<ClientCtxInner>>>() {
            // Existing record in extensions; pull it.
            Some(s_impl) => Self(Rc::clone(s_impl)),
            // No existing record; create and insert it.
            None => {
                let inner = Rc::new(RefCell::new(ClientCtxInner::new()));
                extensions.insert(inner.clone());
                Self(inner)
            }
        }
    }

    /// Returns either the user's id or None.
    pub fn get_id(&self) -> Option<i32> {
        self.0.borrow().client.as_ref().map(|u| u.id)
    }

    /// Returns either the user's name or the anonymous name.
    pub fn get_name(&self) -> String {
        let inner = self.0.borrow();
        crate::user::display_name(inner.client.as_ref().and_then(|u| u.name.as_deref()))
    }

    pub fn get_ip(&self) -> Option<String> {
        self.0.borrow().ip_address.to_owned()
    }

    pub fn is_user(&self) -> bool {
        self.0.borrow().client.is_some()
    }

    pub fn is_admin(&self) -> bool {
        matches!(
            self.0.borrow().client.as_ref().map(|u| u.status),
            Some(UserStatus::Admin)
        )
    }

    fn is_owner(&self, owner: Option<i32>) -> bool {
        self.is_user() && owner.is_some() && self.get_id() == owner
    }

    pub fn can_update_post(&self, post: &crate::orm::posts::Model) -> bool {
        self.is_owner(post.user_id) || self.is_admin()
    }

    pub fn can_delete_post(&self, post: &crate::orm::posts::Model) -> bool {
        self.is_owner(post.user_id) || self.is_admin()
    }

    /// Deleted posts are only visible to their author and admins.
    pub fn can_read_post(&self, post: &crate::orm::posts::Model) -> bool {
        post.status != crate::post::PostStatus::Deleted || self.can_update_post(post)
    }

    pub fn can_delete_comment(&self, comment: &crate::orm::comments::Model) -> bool {
        self.is_owner(comment.user_id) || self.is_admin()
    }

    /// Returns the random guest token for this browser, creating it on first use.
    /// None when no session is attached to the request.
    pub fn voter_token(&self) -> Option<String> {
        let inner = self.0.borrow();
        let session = inner.session.as_ref()?;

        match session.get::<String>(SESSION_VOTER_TOKEN) {
            Ok(Some(token)) => Some(token),
            Ok(None) => {
                let token = uuid::Uuid::new_v4().to_string();
                if let Err(e) = session.insert(SESSION_VOTER_TOKEN, &token) {
                    log::error!("ClientCtx::voter_token: {}", e);
                    return None;
                }
                Some(token)
            }
            Err(e) => {
                log::error!("ClientCtx::voter_token: {}", e);
                None
            }
        }
    }

    /// Returns the stored form of the guest token.
    pub fn voter_hash(&self) -> Option<String> {
        self.voter_token().map(|t| hash_voter_token(&t))
    }

    /// Returns Duration representing request time.
    pub fn request_time(&self) -> Duration {
        Instant::now() - self.0.borrow().request_start
    }
}

/// Only the hash of a guest token is ever written to the database.
pub fn hash_voter_token(token: &str) -> String {
    blake3::hash(token.as_bytes()).to_hex().to_string()
}

/// Client address from `x-forwarded-for` (first hop), then `x-real-ip`, then the peer.
pub fn client_ip(headers: &HeaderMap, peer: Option<String>) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = forwarded {
        return Some(ip.to_owned());
    }

    let real = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = real {
        return Some(ip.to_owned());
    }

    peer
}

/// This implementation is what actually provides the `client: ClientCtx` in the parameters of route functions.
impl FromRequest for ClientCtx {
    /// The associated error which can be returned.
    type Error = Error;
    /// Future that resolves to a Self.
    type Future = Ready<Result<Self, Self::Error>>;

    /// Create a Self from request parts asynchronously.
    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ok(ClientCtx::get_client_ctx(&mut req.extensions_mut()))
    }
}

impl<S, B> Transform<S, ServiceRequest> for ClientCtx
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = ClientCtxMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(ClientCtxMiddleware {
            service: Rc::new(service),
        })
    }
}

/// Client context middleware
pub struct ClientCtxMiddleware<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for ClientCtxMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        // Borrows of `req` must be done in a precise way to avoid conflicts. This order is important.
        let (httpreq, payload) = req.into_parts();
        let session = Session::extract(&httpreq).into_inner();
        let peer = httpreq.peer_addr().map(|addr| addr.ip().to_string());
        let ip_address = client_ip(httpreq.headers(), peer);
        let req = ServiceRequest::from_parts(httpreq, payload);

        let ctx = ClientCtx::get_client_ctx(&mut *req.extensions_mut());
        let service = Rc::clone(&self.service);

        async move {
            let user_id = {
                let mut inner = ctx.0.borrow_mut();
                inner.ip_address = ip_address;
                match session {
                    Ok(session) => {
                        let user_id = session.get::<i32>(SESSION_USER_ID).unwrap_or_else(|e| {
                            log::error!("ClientCtxMiddleware: Session::get(): {}", e);
                            None
                        });
                        inner.session = Some(session);
                        user_id
                    }
                    Err(e) => {
                        log::error!("ClientCtxMiddleware: Session::extract(): {}", e);
                        None
                    }
                }
            };

            if let Some(user_id) = user_id {
                // The RefCell borrow must not be held across the await.
                let client = match get_client_user(get_db_pool(), user_id).await {
                    Ok(client) => client,
                    Err(e) => {
                        log::error!("ClientCtxMiddleware: get_client_user(): {}", e);
                        None
                    }
                };
                ctx.0.borrow_mut().client = client;
            }

            // The client is resolved before the route runs.
            service.call(req).await
        }
        .boxed_local()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::header::{HeaderName, HeaderValue};

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(
                HeaderName::from_static(k),
                HeaderValue::from_static(v),
            );
        }
        map
    }

    fn user(id: i32, status: UserStatus) -> ClientUser {
        ClientUser {
            id,
            name: Some("tester".to_owned()),
            status,
        }
    }

    #[test]
    fn test_client_ip_precedence() {
        let peer = Some("10.0.0.1".to_owned());

        let h = headers(&[
            ("x-forwarded-for", "203.0.113.5, 10.1.1.1"),
            ("x-real-ip", "198.51.100.2"),
        ]);
        assert_eq!(client_ip(&h, peer.clone()).as_deref(), Some("203.0.113.5"));

        let h = headers(&[("x-real-ip", "198.51.100.2")]);
        assert_eq!(client_ip(&h, peer.clone()).as_deref(), Some("198.51.100.2"));

        let h = headers(&[]);
        assert_eq!(client_ip(&h, peer).as_deref(), Some("10.0.0.1"));
    }

    #[test]
    fn test_voter_hash_is_stable_and_opaque() {
        let a = hash_voter_token("token-a");
        assert_eq!(a, hash_voter_token("token-a"));
        assert_ne!(a, hash_voter_token("token-b"));
        assert_eq!(a.len(), 64);
        assert!(!a.contains("token"));
    }

    #[test]
    fn test_guest_context() {
        let ctx = ClientCtx::new();
        assert!(!ctx.is_user());
        assert!(!ctx.is_admin());
        assert_eq!(ctx.get_id(), None);
        assert_eq!(ctx.get_name(), crate::user::ANONYMOUS_NAME);
        assert_eq!(ctx.voter_token(), None);
    }

    #[test]
    fn test_admin_detection() {
        assert!(ClientCtx::for_user(user(1, UserStatus::Admin)).is_admin());
        assert!(!ClientCtx::for_user(user(1, UserStatus::Editor)).is_admin());
        assert!(!ClientCtx::for_user(user(1, UserStatus::Member)).is_admin());
    }
}
