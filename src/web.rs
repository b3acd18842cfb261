//! Axum integration: cookie carrier plumbing, the gate as middleware, and
//! the collaborator-facing session routes.
//!
//! The session routes are the app's own API surface consumed by UI code;
//! they are all listed in the default public-prefix allowlist so the gate
//! passes them through untouched. Responses never carry provider payloads or
//! stack traces, only fixed JSON messages and redirects.

// crates.io
use axum::{
	Json, Router,
	extract::{Request, State},
	http::{HeaderMap, HeaderValue, StatusCode, header},
	middleware::{self, Next},
	response::{IntoResponse, Redirect, Response},
	routing::{get, post},
};
use cookie::{Cookie, CookieJar};
// self
use crate::{
	_prelude::*,
	gate::{Disposition, GateOutcome, RequestGate},
	http::TokenHttpClient,
	provider::TransportErrorMapper,
	session::SessionBroker,
};

/// Parses the request's `Cookie` headers into a carrier jar.
///
/// Cookies are recorded as originals so the jar's delta only ever contains
/// fields the core actually rewrote during this request.
pub fn jar_from_headers(headers: &HeaderMap) -> CookieJar {
	let mut jar = CookieJar::new();

	for value in headers.get_all(header::COOKIE) {
		let Ok(raw) = value.to_str() else { continue };

		for piece in raw.split(';') {
			if let Ok(cookie) = Cookie::parse_encoded(piece.trim().to_owned()) {
				jar.add_original(cookie);
			}
		}
	}

	jar
}

/// Appends the jar's changed cookies to the response as `Set-Cookie`
/// headers.
pub fn apply_jar_delta(jar: &CookieJar, response: &mut Response) {
	for cookie in jar.delta() {
		if let Ok(value) = HeaderValue::from_str(&cookie.encoded().to_string()) {
			response.headers_mut().append(header::SET_COOKIE, value);
		}
	}
}

/// Wraps `router` with the gate middleware.
///
/// Public prefixes bypass the gate inside [`RequestGate::evaluate`], so the
/// layer can sit above the whole application router, session routes
/// included.
pub fn protect<C, M>(router: Router, gate: Arc<RequestGate<C, M>>) -> Router
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	router.layer(middleware::from_fn_with_state(gate, gate_middleware::<C, M>))
}

/// Gate middleware body; use [`protect`] unless the layer needs manual
/// wiring.
pub async fn gate_middleware<C, M>(
	State(gate): State<Arc<RequestGate<C, M>>>,
	mut request: Request,
	next: Next,
) -> Response
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	let path = request.uri().path().to_owned();
	let mut jar = jar_from_headers(request.headers());

	match gate.evaluate(&path, &mut jar).await {
		GateOutcome::PassThrough => next.run(request).await,
		GateOutcome::RefreshedPassThrough => {
			// Handlers downstream must see the renewed credential, and the
			// browser must receive it on the way out.
			rewrite_cookie_header(&jar, &mut request);

			let mut response = next.run(request).await;

			apply_jar_delta(&jar, &mut response);

			response
		},
		GateOutcome::Unauthorized(disposition) =>
			deny(StatusCode::UNAUTHORIZED, "Unauthorized", disposition, &jar),
		GateOutcome::Forbidden(disposition) =>
			deny(StatusCode::FORBIDDEN, "Forbidden", disposition, &jar),
	}
}

/// Builds the session route surface over a shared broker.
///
/// Mirrors the portal's API: `POST /api/login`, `POST /api/refresh`,
/// `POST /api/logout`, `POST /api/introspect`, `GET /api/me`.
pub fn session_routes<C, M>(broker: Arc<SessionBroker<C, M>>) -> Router
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	Router::new()
		.route("/api/login", post(login::<C, M>))
		.route("/api/refresh", post(refresh::<C, M>))
		.route("/api/logout", post(logout::<C, M>))
		.route("/api/introspect", post(introspect::<C, M>))
		.route("/api/me", get(me::<C, M>))
		.with_state(broker)
}

#[derive(Deserialize)]
struct LoginBody {
	username: Option<String>,
	password: Option<String>,
}

async fn login<C, M>(
	State(broker): State<Arc<SessionBroker<C, M>>>,
	headers: HeaderMap,
	Json(body): Json<LoginBody>,
) -> Response
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	let (Some(username), Some(password)) = (body.username, body.password) else {
		return error_json(StatusCode::BAD_REQUEST, "Username and password are required.");
	};
	let mut jar = jar_from_headers(&headers);

	match broker.login(&username, &password, &mut jar).await {
		Ok(_) => with_jar(&jar, message_json(StatusCode::OK, "Login successful.")),
		Err(Error::InvalidCredentials) =>
			error_json(StatusCode::UNAUTHORIZED, "Invalid credentials."),
		Err(e) => internal_error(e),
	}
}

async fn refresh<C, M>(
	State(broker): State<Arc<SessionBroker<C, M>>>,
	headers: HeaderMap,
) -> Response
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	let mut jar = jar_from_headers(&headers);

	match broker.refresh_session(&mut jar).await {
		Ok(_) => with_jar(&jar, message_json(StatusCode::OK, "Token refreshed successfully.")),
		Err(_) => {
			// An unrenewable session is cleared on the spot so the caller
			// re-authenticates instead of retrying a doomed refresh.
			broker.clear_local(&mut jar);

			with_jar(&jar, error_json(StatusCode::UNAUTHORIZED, "Token refresh failed."))
		},
	}
}

async fn logout<C, M>(
	State(broker): State<Arc<SessionBroker<C, M>>>,
	headers: HeaderMap,
) -> Response
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	let mut jar = jar_from_headers(&headers);

	broker.logout(&mut jar).await;

	with_jar(&jar, message_json(StatusCode::OK, "Logout successful."))
}

#[derive(Deserialize)]
struct IntrospectBody {
	token: Option<String>,
}

async fn introspect<C, M>(
	State(broker): State<Arc<SessionBroker<C, M>>>,
	Json(body): Json<IntrospectBody>,
) -> Response
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	let Some(token) = body.token else {
		return error_json(StatusCode::BAD_REQUEST, "Token is required.");
	};
	let active = broker.introspect(&token).await;

	(StatusCode::OK, Json(serde_json::json!({ "active": active }))).into_response()
}

async fn me<C, M>(
	State(broker): State<Arc<SessionBroker<C, M>>>,
	headers: HeaderMap,
) -> Response
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	let mut jar = jar_from_headers(&headers);

	match broker.profile(&jar) {
		Some(profile) => (StatusCode::OK, Json(profile)).into_response(),
		None => {
			broker.clear_local(&mut jar);

			with_jar(&jar, error_json(StatusCode::UNAUTHORIZED, "Unauthorized"))
		},
	}
}

fn rewrite_cookie_header(jar: &CookieJar, request: &mut Request) {
	let joined =
		jar.iter().map(|cookie| cookie.encoded().to_string()).collect::<Vec<_>>().join("; ");

	if let Ok(value) = HeaderValue::from_str(&joined) {
		request.headers_mut().insert(header::COOKIE, value);
	}
}

fn deny(
	status: StatusCode,
	message: &'static str,
	disposition: Disposition,
	jar: &CookieJar,
) -> Response {
	let response = match disposition {
		Disposition::Status => error_json(status, message),
		Disposition::Redirect(location) => Redirect::to(&location).into_response(),
	};

	with_jar(jar, response)
}

fn with_jar(jar: &CookieJar, mut response: Response) -> Response {
	apply_jar_delta(jar, &mut response);

	response
}

fn error_json(status: StatusCode, message: &str) -> Response {
	(status, Json(serde_json::json!({ "error": message }))).into_response()
}

fn message_json(status: StatusCode, message: &str) -> Response {
	(status, Json(serde_json::json!({ "message": message }))).into_response()
}

fn internal_error(e: Error) -> Response {
	#[cfg(feature = "tracing")]
	tracing::error!(error = %e, "Session operation failed unexpectedly.");
	#[cfg(not(feature = "tracing"))]
	let _ = e;

	error_json(StatusCode::INTERNAL_SERVER_ERROR, "Something went wrong.")
}
