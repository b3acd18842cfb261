#![cfg(feature = "reqwest")]

// crates.io
use httpmock::prelude::*;
// self
use session_gate::{
	_preludet::*,
	auth::{Claims, Credential},
	cookie::CookieJar,
	session::ReqwestSessionBroker,
};

const CLIENT_ID: &str = "claims-portal";
const CLIENT_SECRET: &str = "portal-secret";

fn forge_portal_token(exp: i64, roles: &[&str]) -> String {
	forge_access_token(&serde_json::json!({
		"sub": "f3a1-alice",
		"iat": exp - 300,
		"exp": exp,
		"preferred_username": "alice",
		"email": "alice@example.com",
		"name": "Alice Doe",
		"resource_access": { CLIENT_ID: { "roles": roles } }
	}))
}

fn broker_for(server: &MockServer) -> ReqwestSessionBroker {
	build_test_broker(test_endpoints(&server.base_url()), CLIENT_ID, CLIENT_SECRET)
}

/// Seeds the jar with a session whose access token expired five minutes ago
/// but whose refresh token is still alive.
fn seed_expired_session(broker: &ReqwestSessionBroker, jar: &mut CookieJar, refresh: &str) {
	let issued = OffsetDateTime::now_utc() - Duration::minutes(10);
	let access = forge_portal_token((issued + Duration::minutes(5)).unix_timestamp(), &["user"]);
	let credential =
		Credential::issue(access.clone(), refresh, issued, Duration::minutes(5), Duration::days(1));
	let claims = Claims::decode(&access).expect("Forged token should decode.");

	broker.store.write(jar, &credential, &claims).expect("Seeding the session should succeed.");
}

#[tokio::test]
async fn login_writes_a_future_dated_credential_and_roles() {
	let server = MockServer::start_async().await;
	let broker = broker_for(&server);
	let exp = (OffsetDateTime::now_utc() + Duration::seconds(300)).unix_timestamp();
	let access = forge_portal_token(exp, &["approver", "user"]);
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/token");
			then.status(200).header("content-type", "application/json").body(format!(
				"{{\"access_token\":\"{access}\",\"expires_in\":300,\
				 \"refresh_expires_in\":1800,\"refresh_token\":\"refresh-1\",\
				 \"token_type\":\"bearer\"}}"
			));
		})
		.await;
	let mut jar = CookieJar::new();
	let before = OffsetDateTime::now_utc();
	let claims = broker
		.login("alice", "correct-pw", &mut jar)
		.await
		.expect("Login with valid credentials should succeed.");
	let after = OffsetDateTime::now_utc();

	mock.assert_async().await;

	assert_eq!(claims.preferred_username.as_deref(), Some("alice"));

	let stored = broker.store.read(&jar).expect("Login should write a stored credential.");

	assert_eq!(stored.access_token.expose(), access);
	assert!(stored.refresh_token.is_some());
	// Expiry is the issue instant plus the reported lifetime, and the issue
	// instant falls inside the login call window. The stored value is
	// truncated to whole milliseconds.
	assert!(stored.access_expires_at >= before + Duration::seconds(300) - Duration::milliseconds(1));
	assert!(stored.access_expires_at <= after + Duration::seconds(300));
	assert!(broker.is_authenticated(&jar));
	assert_eq!(
		broker.roles(&jar),
		["approver", "user"].iter().map(ToString::to_string).collect::<BTreeSet<_>>()
	);
}

#[tokio::test]
async fn expired_sessions_read_as_unauthenticated() {
	let server = MockServer::start_async().await;
	let broker = broker_for(&server);
	let mut jar = CookieJar::new();

	seed_expired_session(&broker, &mut jar, "refresh-1");

	assert_eq!(broker.valid_access_token(&jar), None);
	assert!(!broker.is_authenticated(&jar));
	// Role reads share the trust window of the access token.
	assert!(broker.roles(&jar).is_empty());
	// The refresh token itself is still present for an explicit renewal.
	assert!(broker.store.refresh_token(&jar).is_some());
}

#[tokio::test]
async fn refresh_fully_replaces_the_credential() {
	let server = MockServer::start_async().await;
	let broker = broker_for(&server);
	let mut jar = CookieJar::new();

	seed_expired_session(&broker, &mut jar, "refresh-old");

	let old_expiry =
		broker.store.read(&jar).expect("Seeded credential should read back.").access_expires_at;
	let exp = (OffsetDateTime::now_utc() + Duration::seconds(300)).unix_timestamp();
	let access = forge_portal_token(exp, &["user"]);
	// The provider reports no rotated refresh token here; the previous
	// secret must survive the full replacement.
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/token");
			then.status(200).header("content-type", "application/json").body(format!(
				"{{\"access_token\":\"{access}\",\"expires_in\":300,\"token_type\":\"bearer\"}}"
			));
		})
		.await;
	let credential = broker
		.refresh_session(&mut jar)
		.await
		.expect("Refresh with a live refresh token should succeed.");

	mock.assert_async().await;

	assert_eq!(credential.refresh_token.expose(), "refresh-old");

	let stored = broker.store.read(&jar).expect("Refreshed credential should read back.");

	assert_eq!(stored.access_token.expose(), access);
	assert!(stored.access_expires_at > old_expiry);
	assert!(broker.is_authenticated(&jar));
}

#[tokio::test]
async fn refresh_without_a_token_fails_without_calling_the_provider() {
	let server = MockServer::start_async().await;
	let broker = broker_for(&server);
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/token");
			then.status(200);
		})
		.await;
	let mut jar = CookieJar::new();
	let err = broker
		.refresh_session(&mut jar)
		.await
		.expect_err("Refreshing an empty session should fail.");

	assert!(matches!(err, Error::NoRefreshToken));

	mock.assert_calls_async(0).await;
}

#[tokio::test]
async fn logout_clears_locally_even_when_revocation_fails() {
	let server = MockServer::start_async().await;
	let broker = broker_for(&server);
	let mut jar = CookieJar::new();

	seed_expired_session(&broker, &mut jar, "refresh-1");

	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/logout");
			then.status(500).body("revocation exploded");
		})
		.await;

	broker.logout(&mut jar).await;

	mock.assert_async().await;

	assert!(broker.store.read(&jar).is_none());
	assert!(broker.store.refresh_token(&jar).is_none());
	assert!(!broker.is_authenticated(&jar));
}

#[tokio::test]
async fn logout_without_a_refresh_token_skips_revocation() {
	let server = MockServer::start_async().await;
	let broker = broker_for(&server);
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/logout");
			then.status(204);
		})
		.await;
	let mut jar = CookieJar::new();

	broker.logout(&mut jar).await;

	mock.assert_calls_async(0).await;
}
