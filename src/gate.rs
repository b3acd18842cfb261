//! Request gate evaluating allow/refresh/deny/redirect ahead of every
//! protected route.
//!
//! The gate is framework-free: it consumes a path + cookie carrier and
//! returns a [`GateOutcome`] that the hosting layer maps onto responses. All
//! role knowledge lives in [`RoutePolicy`] + [`Claims::roles_for`], the one
//! enforcement pair shared with route handlers, so the gate and handlers
//! cannot drift apart.

// crates.io
use cookie::CookieJar;
// self
use crate::{
	_prelude::*,
	auth::Claims,
	http::TokenHttpClient,
	provider::TransportErrorMapper,
	session::SessionBroker,
};
#[cfg(feature = "reqwest")]
use crate::{http::ReqwestHttpClient, provider::ReqwestTransportErrorMapper};

#[cfg(feature = "reqwest")]
/// Request gate specialized for the crate's default reqwest transport.
pub type ReqwestRequestGate = RequestGate<ReqwestHttpClient, ReqwestTransportErrorMapper>;

/// How a denied request should be answered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RouteKind {
	/// Structured-error surface (`/api/...`).
	Api,
	/// Browser-facing page; denials redirect.
	Page,
}
impl RouteKind {
	/// Classifies a request path.
	pub fn of(path: &str) -> Self {
		if path == "/api" || path.starts_with("/api/") { Self::Api } else { Self::Page }
	}
}

/// Role requirement attached to a path prefix.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoleRule {
	/// Path prefix the rule applies to.
	pub prefix: String,
	/// Role that must be present in the session claims.
	pub role: String,
}

/// Route classification policy consumed by the gate and by handlers.
#[derive(Clone, Debug)]
pub struct RoutePolicy {
	public_prefixes: Vec<String>,
	role_rules: Vec<RoleRule>,
	login_route: String,
	denied_route: String,
}
impl RoutePolicy {
	/// Adds a public path prefix that bypasses the gate entirely.
	pub fn with_public_prefix(mut self, prefix: impl Into<String>) -> Self {
		self.public_prefixes.push(prefix.into());

		self
	}

	/// Adds a role requirement for a path prefix.
	///
	/// Rules are evaluated in insertion order; the first matching prefix
	/// wins.
	pub fn with_role_rule(mut self, prefix: impl Into<String>, role: impl Into<String>) -> Self {
		self.role_rules.push(RoleRule { prefix: prefix.into(), role: role.into() });

		self
	}

	/// Overrides the login route page denials redirect to.
	pub fn with_login_route(mut self, route: impl Into<String>) -> Self {
		self.login_route = route.into();

		self
	}

	/// Overrides the neutral route forbidden page requests redirect to.
	pub fn with_denied_route(mut self, route: impl Into<String>) -> Self {
		self.denied_route = route.into();

		self
	}

	/// Replaces the public prefix allowlist wholesale.
	pub fn with_public_prefixes(
		mut self,
		prefixes: impl IntoIterator<Item = impl Into<String>>,
	) -> Self {
		self.public_prefixes = prefixes.into_iter().map(Into::into).collect();

		self
	}

	/// Whether the path bypasses every gate check.
	pub fn is_public(&self, path: &str) -> bool {
		self.public_prefixes.iter().any(|prefix| path.starts_with(prefix.as_str()))
	}

	/// The role required for this path, if it falls under a gated prefix.
	pub fn required_role(&self, path: &str) -> Option<&str> {
		self.role_rules
			.iter()
			.find(|rule| path.starts_with(rule.prefix.as_str()))
			.map(|rule| rule.role.as_str())
	}

	/// Login route used for unauthorized page requests.
	pub fn login_route(&self) -> &str {
		&self.login_route
	}

	/// How an unauthorized request on this route kind is answered.
	pub fn unauthorized_disposition(&self, kind: &RouteKind) -> Disposition {
		match kind {
			RouteKind::Api => Disposition::Status,
			RouteKind::Page => Disposition::Redirect(self.login_route.clone()),
		}
	}

	/// How a forbidden request on this route kind is answered.
	pub fn forbidden_disposition(&self, kind: &RouteKind) -> Disposition {
		match kind {
			RouteKind::Api => Disposition::Status,
			RouteKind::Page => Disposition::Redirect(self.denied_route.clone()),
		}
	}
}
impl Default for RoutePolicy {
	/// Default policy matching the claims portal's route surface: session
	/// endpoints and static assets are public, `/admin` needs `approver`,
	/// `/user` needs `user`.
	fn default() -> Self {
		Self {
			public_prefixes: [
				"/login",
				"/api/login",
				"/api/refresh",
				"/api/introspect",
				"/api/logout",
				"/static",
				"/assets",
				"/favicon.ico",
			]
			.map(ToOwned::to_owned)
			.into(),
			role_rules: vec![
				RoleRule { prefix: "/api/admin".into(), role: "approver".into() },
				RoleRule { prefix: "/admin".into(), role: "approver".into() },
				RoleRule { prefix: "/api/user".into(), role: "user".into() },
				RoleRule { prefix: "/user".into(), role: "user".into() },
			],
			login_route: "/login".into(),
			denied_route: "/".into(),
		}
	}
}

/// How a denial should be rendered by the hosting layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Disposition {
	/// Answer with the structured status body for the outcome (401/403).
	Status,
	/// Redirect to the given location.
	Redirect(String),
}

/// Terminal outcome of one gate evaluation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GateOutcome {
	/// Valid session (or public route); continue into the route handler.
	PassThrough,
	/// Session was renewed during evaluation; continue, carrying the new
	/// credential on the outgoing response.
	RefreshedPassThrough,
	/// No usable session and renewal failed.
	Unauthorized(Disposition),
	/// Authenticated but missing the required role. Never clears tokens.
	Forbidden(Disposition),
}

/// Authorization middleware core evaluated once per inbound request.
pub struct RequestGate<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	broker: Arc<SessionBroker<C, M>>,
	policy: RoutePolicy,
}
impl<C, M> RequestGate<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Creates a gate over the shared broker with the given policy.
	pub fn new(broker: Arc<SessionBroker<C, M>>, policy: RoutePolicy) -> Self {
		Self { broker, policy }
	}

	/// Shared session broker.
	pub fn broker(&self) -> &Arc<SessionBroker<C, M>> {
		&self.broker
	}

	/// Route policy in force.
	pub fn policy(&self) -> &RoutePolicy {
		&self.policy
	}

	/// Runs the gate state machine for one request.
	///
	/// Expiry comparisons use the wall clock at this call, never a value
	/// cached earlier in the request lifecycle.
	pub async fn evaluate(&self, path: &str, jar: &mut CookieJar) -> GateOutcome {
		if self.policy.is_public(path) {
			return GateOutcome::PassThrough;
		}

		let kind = RouteKind::of(path);
		let now = OffsetDateTime::now_utc();
		let stored = self.broker.store.read(jar);
		let valid = stored.as_ref().is_some_and(|stored| stored.is_access_valid_at(now));

		// Absent and expired tokens take the same path: one explicit refresh
		// attempt, then denial.
		if !valid {
			return match self.broker.refresh_session(jar).await {
				Ok(_) => GateOutcome::RefreshedPassThrough,
				Err(_) => {
					GateOutcome::Unauthorized(self.policy.unauthorized_disposition(&kind))
				},
			};
		}

		if let Some(required) = self.policy.required_role(path) {
			let Some(claims) = self.session_claims(jar, stored.as_ref()) else {
				// Malformed claims demote to unauthenticated; the gate never
				// crashes on a garbled cookie.
				return GateOutcome::Unauthorized(self.policy.unauthorized_disposition(&kind));
			};

			if !claims.roles_for(self.broker.idp.client_id()).contains(required) {
				return GateOutcome::Forbidden(self.policy.forbidden_disposition(&kind));
			}
		}

		GateOutcome::PassThrough
	}

	/// Claims from the stored user-info field, falling back to decoding the
	/// access token when the cached copy is missing or garbled.
	fn session_claims(
		&self,
		jar: &CookieJar,
		stored: Option<&crate::auth::StoredCredential>,
	) -> Option<Claims> {
		self.broker.current_claims(jar).or_else(|| {
			stored.and_then(|stored| Claims::decode(stored.access_token.expose()).ok())
		})
	}
}
impl<C, M> Debug for RequestGate<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RequestGate").field("policy", &self.policy).finish()
	}
}
