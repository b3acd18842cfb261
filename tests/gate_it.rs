#![cfg(all(feature = "axum", feature = "reqwest"))]

// crates.io
use axum::{
	Router,
	body::Body,
	http::{Request, Response, StatusCode, header},
	routing::get,
};
use http_body_util::BodyExt;
use httpmock::prelude::*;
use tower::ServiceExt;
// self
use session_gate::{
	_preludet::*,
	auth::{Claims, Credential},
	cookie::{Cookie, CookieJar},
	gate::{RequestGate, RoutePolicy},
	session::ReqwestSessionBroker,
	web,
};

const CLIENT_ID: &str = "claims-portal";
const CLIENT_SECRET: &str = "portal-secret";

fn forge_portal_token(exp: i64, roles: &[&str]) -> String {
	forge_access_token(&serde_json::json!({
		"sub": "f3a1-alice",
		"iat": exp - 300,
		"exp": exp,
		"preferred_username": "alice",
		"resource_access": { CLIENT_ID: { "roles": roles } }
	}))
}

fn build_app(server: &MockServer) -> (Arc<ReqwestSessionBroker>, Router) {
	let broker = Arc::new(build_test_broker(
		test_endpoints(&server.base_url()),
		CLIENT_ID,
		CLIENT_SECRET,
	));
	let gate = Arc::new(RequestGate::new(broker.clone(), RoutePolicy::default()));
	let router = Router::new()
		.route("/login", get(|| async { "login page" }))
		.route("/claims", get(|| async { "claims page" }))
		.route("/api/claims", get(|| async { "claims api" }))
		.route("/admin/show-claim", get(|| async { "admin page" }))
		.route("/api/admin/change-status", get(|| async { "admin api" }))
		.merge(web::session_routes(broker.clone()));

	(broker, web::protect(router, gate))
}

fn seed_session(
	broker: &ReqwestSessionBroker,
	jar: &mut CookieJar,
	roles: &[&str],
	expired: bool,
) {
	let issued = if expired {
		OffsetDateTime::now_utc() - Duration::minutes(10)
	} else {
		OffsetDateTime::now_utc()
	};
	let access = forge_portal_token((issued + Duration::minutes(5)).unix_timestamp(), roles);
	let credential =
		Credential::issue(access.clone(), "refresh-1", issued, Duration::minutes(5), Duration::days(1));
	let claims = Claims::decode(&access).expect("Forged token should decode.");

	broker.store.write(jar, &credential, &claims).expect("Seeding the session should succeed.");
}

fn cookie_header(jar: &CookieJar) -> String {
	jar.iter()
		.map(|cookie| format!("{}={}", cookie.name(), cookie.value()))
		.collect::<Vec<_>>()
		.join("; ")
}

fn get_request(path: &str, jar: Option<&CookieJar>) -> Request<Body> {
	let mut builder = Request::builder().method("GET").uri(path);

	if let Some(jar) = jar {
		builder = builder.header(header::COOKIE, cookie_header(jar));
	}

	builder.body(Body::empty()).expect("Test request should build.")
}

fn jar_from_response(response: &Response<axum::body::Body>) -> CookieJar {
	let mut jar = CookieJar::new();

	for value in response.headers().get_all(header::SET_COOKIE) {
		let Ok(raw) = value.to_str() else { continue };

		if let Ok(cookie) = Cookie::parse_encoded(raw.to_owned()) {
			jar.add_original(cookie);
		}
	}

	jar
}

async fn body_string(response: Response<Body>) -> String {
	let bytes = response
		.into_body()
		.collect()
		.await
		.expect("Response body should collect.")
		.to_bytes();

	String::from_utf8_lossy(&bytes).into_owned()
}

#[tokio::test]
async fn public_routes_bypass_the_gate() {
	let server = MockServer::start_async().await;
	let (_broker, app) = build_app(&server);
	let response = app
		.oneshot(get_request("/login", None))
		.await
		.expect("Router call should succeed.");

	assert_eq!(response.status(), StatusCode::OK);
	assert_eq!(body_string(response).await, "login page");
}

#[tokio::test]
async fn missing_token_on_api_paths_is_a_structured_401() {
	let server = MockServer::start_async().await;
	let (_broker, app) = build_app(&server);
	let response = app
		.oneshot(get_request("/api/claims", None))
		.await
		.expect("Router call should succeed.");

	assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

	let body = body_string(response).await;

	assert_eq!(body, "{\"error\":\"Unauthorized\"}");
}

#[tokio::test]
async fn missing_token_on_page_paths_redirects_to_login() {
	let server = MockServer::start_async().await;
	let (_broker, app) = build_app(&server);
	let response = app
		.oneshot(get_request("/claims", None))
		.await
		.expect("Router call should succeed.");

	assert_eq!(response.status(), StatusCode::SEE_OTHER);
	assert_eq!(
		response.headers().get(header::LOCATION).and_then(|value| value.to_str().ok()),
		Some("/login")
	);
}

#[tokio::test]
async fn expired_access_with_a_live_refresh_token_renews_and_passes() {
	let server = MockServer::start_async().await;
	let (broker, app) = build_app(&server);
	let mut jar = CookieJar::new();

	seed_session(&broker, &mut jar, &["user"], true);

	let old_expiry =
		broker.store.read(&jar).expect("Seeded credential should read back.").access_expires_at;
	let fresh = forge_portal_token(
		(OffsetDateTime::now_utc() + Duration::seconds(300)).unix_timestamp(),
		&["user"],
	);
	let token = server
		.mock_async(|when, then| {
			when.method(POST).path("/token");
			then.status(200).header("content-type", "application/json").body(format!(
				"{{\"access_token\":\"{fresh}\",\"expires_in\":300,\
				 \"refresh_expires_in\":1800,\"refresh_token\":\"refresh-2\",\
				 \"token_type\":\"bearer\"}}"
			));
		})
		.await;
	let response = app
		.oneshot(get_request("/api/claims", Some(&jar)))
		.await
		.expect("Router call should succeed.");

	token.assert_async().await;

	assert_eq!(response.status(), StatusCode::OK);

	// The response carries the renewed credential with a later expiry.
	let renewed = jar_from_response(&response);
	let stored = broker
		.store
		.read(&renewed)
		.expect("The response cookies should contain the renewed credential.");

	assert_eq!(stored.access_token.expose(), fresh);
	assert!(stored.access_expires_at > old_expiry);
	assert_eq!(body_string(response).await, "claims api");
}

#[tokio::test]
async fn admin_paths_without_the_approver_role_are_forbidden() {
	let server = MockServer::start_async().await;
	let (broker, app) = build_app(&server);
	let mut jar = CookieJar::new();

	seed_session(&broker, &mut jar, &["user"], false);

	let token = server
		.mock_async(|when, then| {
			when.method(POST).path("/token");
			then.status(200);
		})
		.await;
	let api_response = app
		.clone()
		.oneshot(get_request("/api/admin/change-status", Some(&jar)))
		.await
		.expect("Router call should succeed.");

	assert_eq!(api_response.status(), StatusCode::FORBIDDEN);
	assert_eq!(body_string(api_response).await, "{\"error\":\"Forbidden\"}");

	let page_response = app
		.oneshot(get_request("/admin/show-claim", Some(&jar)))
		.await
		.expect("Router call should succeed.");

	assert_eq!(page_response.status(), StatusCode::SEE_OTHER);
	assert_eq!(
		page_response.headers().get(header::LOCATION).and_then(|value| value.to_str().ok()),
		Some("/")
	);

	// Role denials never renew or clear the session.
	token.assert_calls_async(0).await;
}

#[tokio::test]
async fn admin_paths_with_the_approver_role_pass_through() {
	let server = MockServer::start_async().await;
	let (broker, app) = build_app(&server);
	let mut jar = CookieJar::new();

	seed_session(&broker, &mut jar, &["approver", "user"], false);

	let api_response = app
		.clone()
		.oneshot(get_request("/api/admin/change-status", Some(&jar)))
		.await
		.expect("Router call should succeed.");

	assert_eq!(api_response.status(), StatusCode::OK);
	assert_eq!(body_string(api_response).await, "admin api");

	let page_response = app
		.oneshot(get_request("/admin/show-claim", Some(&jar)))
		.await
		.expect("Router call should succeed.");

	assert_eq!(page_response.status(), StatusCode::OK);
}

#[tokio::test]
async fn garbled_session_claims_demote_to_unauthorized() {
	let server = MockServer::start_async().await;
	let (broker, app) = build_app(&server);
	let mut jar = CookieJar::new();
	// A credential whose access token is opaque (undecodable) and whose
	// user-info cookie is about to go missing.
	let credential = Credential::issue(
		"opaque-access-token",
		"refresh-1",
		OffsetDateTime::now_utc(),
		Duration::minutes(5),
		Duration::days(1),
	);
	let claims = Claims {
		sub: "f3a1-alice".into(),
		iat: 0,
		exp: 0,
		preferred_username: None,
		email: None,
		name: None,
		resource_access: Default::default(),
	};

	broker
		.store
		.write(&mut jar, &credential, &claims)
		.expect("Seeding the session should succeed.");

	// Strip the user-info cookie so the gate has nothing to derive roles
	// from but the opaque token.
	let header_value = jar
		.iter()
		.filter(|cookie| cookie.name() != "user_info")
		.map(|cookie| format!("{}={}", cookie.name(), cookie.value()))
		.collect::<Vec<_>>()
		.join("; ");
	let request = Request::builder()
		.method("GET")
		.uri("/admin/show-claim")
		.header(header::COOKIE, header_value)
		.body(Body::empty())
		.expect("Test request should build.");
	let response = app.oneshot(request).await.expect("Router call should succeed.");

	assert_eq!(response.status(), StatusCode::SEE_OTHER);
	assert_eq!(
		response.headers().get(header::LOCATION).and_then(|value| value.to_str().ok()),
		Some("/login")
	);
}

#[tokio::test]
async fn login_route_establishes_the_session_cookies() {
	let server = MockServer::start_async().await;
	let (broker, app) = build_app(&server);
	let access = forge_portal_token(
		(OffsetDateTime::now_utc() + Duration::seconds(300)).unix_timestamp(),
		&["approver", "user"],
	);
	let token = server
		.mock_async(|when, then| {
			when.method(POST).path("/token");
			then.status(200).header("content-type", "application/json").body(format!(
				"{{\"access_token\":\"{access}\",\"expires_in\":300,\
				 \"refresh_expires_in\":1800,\"refresh_token\":\"refresh-1\",\
				 \"token_type\":\"bearer\"}}"
			));
		})
		.await;
	let request = Request::builder()
		.method("POST")
		.uri("/api/login")
		.header(header::CONTENT_TYPE, "application/json")
		.body(Body::from("{\"username\":\"alice\",\"password\":\"correct-pw\"}"))
		.expect("Test request should build.");
	let response = app.oneshot(request).await.expect("Router call should succeed.");

	token.assert_async().await;

	assert_eq!(response.status(), StatusCode::OK);

	let set_cookies = response.headers().get_all(header::SET_COOKIE).iter().count();

	assert_eq!(set_cookies, 4);

	let jar = jar_from_response(&response);

	assert!(broker.is_authenticated(&jar));
	assert_eq!(
		broker.roles(&jar),
		["approver", "user"].iter().map(ToString::to_string).collect::<BTreeSet<_>>()
	);
}

#[tokio::test]
async fn me_route_projects_the_stored_claims() {
	let server = MockServer::start_async().await;
	let (broker, app) = build_app(&server);
	let mut jar = CookieJar::new();

	seed_session(&broker, &mut jar, &["user"], false);

	let response = app
		.oneshot(get_request("/api/me", Some(&jar)))
		.await
		.expect("Router call should succeed.");

	assert_eq!(response.status(), StatusCode::OK);

	let profile: serde_json::Value = serde_json::from_str(&body_string(response).await)
		.expect("Profile body should be JSON.");

	assert_eq!(profile["username"], "alice");
	assert_eq!(profile["roles"], serde_json::json!(["user"]));
}
