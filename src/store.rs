//! Signed-cookie credential store.
//!
//! The store owns the four session fields and their attribute policy. Every
//! field is written through a keyed signed jar as HttpOnly, SameSite=Strict,
//! Path=/ so page script never sees token material and cross-site requests
//! never carry it. Validity checks always compare against a wall-clock `now`
//! supplied by the caller at the comparison site.

// crates.io
use cookie::{Cookie, CookieJar, Key, SameSite};
// self
use crate::{
	_prelude::*,
	auth::{Claims, Credential, StoredCredential, TokenSecret, credential},
	error::StoreError,
};

/// Cookie holding the bearer access token.
pub const ACCESS_TOKEN_COOKIE: &str = "access_token";
/// Cookie holding the refresh token.
pub const REFRESH_TOKEN_COOKIE: &str = "refresh_token";
/// Cookie holding the access expiry as epoch milliseconds.
pub const TOKEN_EXPIRY_COOKIE: &str = "token_expiry";
/// Cookie holding the serialized claims document.
pub const USER_INFO_COOKIE: &str = "user_info";

const SESSION_COOKIES: [&str; 4] =
	[ACCESS_TOKEN_COOKIE, REFRESH_TOKEN_COOKIE, TOKEN_EXPIRY_COOKIE, USER_INFO_COOKIE];

/// Attribute policy applied to every session cookie.
#[derive(Clone, Debug)]
pub struct CookiePolicy {
	/// Restrict cookies to TLS transports. Disable only for local
	/// development.
	pub secure: bool,
	/// Retention window for the user-info field.
	///
	/// The field outlives the access token so UI personalization survives
	/// token rollover, but its trust window for authorization decisions is
	/// always the access expiry, never this retention.
	pub user_info_retention: Duration,
}
impl CookiePolicy {
	/// Overrides the secure flag.
	pub fn with_secure(mut self, secure: bool) -> Self {
		self.secure = secure;

		self
	}

	/// Overrides the user-info retention window.
	pub fn with_user_info_retention(mut self, retention: Duration) -> Self {
		self.user_info_retention = retention;

		self
	}
}
impl Default for CookiePolicy {
	fn default() -> Self {
		Self { secure: true, user_info_retention: Duration::days(7) }
	}
}

/// Reads and writes the credential pair + claims on a cookie carrier.
#[derive(Clone)]
pub struct CredentialStore {
	key: Key,
	policy: CookiePolicy,
}
impl CredentialStore {
	/// Creates a store signing with `key` under the default policy.
	pub fn new(key: Key) -> Self {
		Self { key, policy: CookiePolicy::default() }
	}

	/// Overrides the cookie attribute policy.
	pub fn with_policy(mut self, policy: CookiePolicy) -> Self {
		self.policy = policy;

		self
	}

	/// Reads the stored credential, when the token + expiry fields are
	/// present and well formed.
	///
	/// Presence is not validity: callers decide with
	/// [`StoredCredential::is_access_valid_at`] against their own `now`.
	pub fn read(&self, jar: &CookieJar) -> Option<StoredCredential> {
		let signed = jar.signed(&self.key);
		let access = signed.get(ACCESS_TOKEN_COOKIE)?;
		let expiry_ms = signed.get(TOKEN_EXPIRY_COOKIE)?.value().parse::<i64>().ok()?;
		let refresh =
			signed.get(REFRESH_TOKEN_COOKIE).map(|cookie| TokenSecret::new(cookie.value()));

		Some(StoredCredential {
			access_token: TokenSecret::new(access.value()),
			refresh_token: refresh,
			access_expires_at: credential::from_unix_ms(expiry_ms),
		})
	}

	/// Returns the access token only when it is still valid at `now`.
	pub fn valid_access_token(&self, jar: &CookieJar, now: OffsetDateTime) -> Option<String> {
		let stored = self.read(jar)?;

		stored.is_access_valid_at(now).then(|| stored.access_token.expose().to_owned())
	}

	/// Returns the refresh token independently of access token state.
	///
	/// The access cookie expires before the refresh cookie, so a session can
	/// hold a refresh token while its access fields are already gone.
	pub fn refresh_token(&self, jar: &CookieJar) -> Option<String> {
		self.key_value(jar, REFRESH_TOKEN_COOKIE)
	}

	/// Returns the stored claims while their trust window is open.
	///
	/// The window is bounded by the access expiry field; the user-info
	/// cookie's own longer retention only serves non-authoritative UI reads.
	/// Malformed documents read as absent.
	pub fn claims(&self, jar: &CookieJar, now: OffsetDateTime) -> Option<Claims> {
		let expiry_ms = self.key_value(jar, TOKEN_EXPIRY_COOKIE)?.parse::<i64>().ok()?;

		if credential::from_unix_ms(expiry_ms) <= now {
			return None;
		}

		serde_json::from_str(&self.key_value(jar, USER_INFO_COOKIE)?).ok()
	}

	/// Writes a full credential replacement plus its derived claims.
	///
	/// All four fields are replaced in one pass over the in-memory jar;
	/// partial writes cannot reach the response.
	pub fn write(
		&self,
		jar: &mut CookieJar,
		credential: &Credential,
		claims: &Claims,
	) -> Result<(), StoreError> {
		let user_info = serde_json::to_string(claims)
			.map_err(|e| StoreError::Serialization { message: e.to_string() })?;
		let now = OffsetDateTime::now_utc();
		let access_ttl = credential.access_expires_at - now;
		let refresh_ttl = credential.refresh_expires_at - now;
		let expiry_ms = credential.access_expiry_unix_ms().to_string();
		let mut signed = jar.signed_mut(&self.key);

		signed.add(self.session_cookie(
			ACCESS_TOKEN_COOKIE,
			credential.access_token.expose().to_owned(),
			access_ttl,
		));
		signed.add(self.session_cookie(
			REFRESH_TOKEN_COOKIE,
			credential.refresh_token.expose().to_owned(),
			refresh_ttl,
		));
		signed.add(self.session_cookie(TOKEN_EXPIRY_COOKIE, expiry_ms, access_ttl));
		signed.add(self.session_cookie(
			USER_INFO_COOKIE,
			user_info,
			self.policy.user_info_retention,
		));

		Ok(())
	}

	/// Removes all four session fields.
	pub fn clear(&self, jar: &mut CookieJar) {
		for name in SESSION_COOKIES {
			let mut removal = Cookie::from(name);

			removal.set_path("/");
			jar.remove(removal);
		}
	}

	fn key_value(&self, jar: &CookieJar, name: &'static str) -> Option<String> {
		jar.signed(&self.key).get(name).map(|cookie| cookie.value().to_owned())
	}

	fn session_cookie(
		&self,
		name: &'static str,
		value: String,
		max_age: Duration,
	) -> Cookie<'static> {
		Cookie::build((name, value))
			.http_only(true)
			.secure(self.policy.secure)
			.same_site(SameSite::Strict)
			.path("/")
			.max_age(max_age)
			.build()
	}
}
impl Debug for CredentialStore {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CredentialStore").field("policy", &self.policy).finish()
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use cookie::CookieJar;
	// self
	use super::*;
	use crate::auth::ClientAccess;

	fn store() -> CredentialStore {
		CredentialStore::new(Key::generate())
	}

	fn claims() -> Claims {
		Claims {
			sub: "subject".into(),
			iat: 1_748_000_000,
			exp: 1_748_000_300,
			preferred_username: Some("alice".into()),
			email: None,
			name: None,
			resource_access: [("claims-portal".to_owned(), ClientAccess {
				roles: vec!["user".into()],
			})]
			.into(),
		}
	}

	fn write_fresh(store: &CredentialStore, jar: &mut CookieJar, lifetime: Duration) -> Credential {
		let credential = Credential::issue(
			"access-value",
			"refresh-value",
			OffsetDateTime::now_utc(),
			lifetime,
			Duration::days(1),
		);

		store
			.write(jar, &credential, &claims())
			.expect("Writing session cookies should succeed.");

		credential
	}

	#[test]
	fn write_then_read_round_trips() {
		let store = store();
		let mut jar = CookieJar::new();
		let credential = write_fresh(&store, &mut jar, Duration::minutes(5));
		let stored = store.read(&jar).expect("Stored credential should read back.");

		assert_eq!(stored.access_token.expose(), "access-value");
		assert_eq!(
			stored.refresh_token.as_ref().map(TokenSecret::expose),
			Some("refresh-value")
		);
		assert_eq!(
			credential::unix_ms(stored.access_expires_at),
			credential.access_expiry_unix_ms()
		);
	}

	#[test]
	fn expired_access_reads_as_invalid() {
		let store = store();
		let mut jar = CookieJar::new();

		write_fresh(&store, &mut jar, Duration::minutes(5));

		let now = OffsetDateTime::now_utc();

		assert!(store.valid_access_token(&jar, now).is_some());
		assert!(store.valid_access_token(&jar, now + Duration::minutes(6)).is_none());
		// The refresh token outlives the access pair.
		assert!(store.refresh_token(&jar).is_some());
	}

	#[test]
	fn claims_trust_window_matches_access_expiry() {
		let store = store();
		let mut jar = CookieJar::new();

		write_fresh(&store, &mut jar, Duration::minutes(5));

		let now = OffsetDateTime::now_utc();

		assert!(store.claims(&jar, now).is_some());
		// The user-info cookie is retained for days, but trust ends with the
		// access token.
		assert!(store.claims(&jar, now + Duration::minutes(6)).is_none());
	}

	#[test]
	fn clear_removes_every_field() {
		let store = store();
		let mut jar = CookieJar::new();

		write_fresh(&store, &mut jar, Duration::minutes(5));
		store.clear(&mut jar);

		assert!(store.read(&jar).is_none());
		assert!(store.refresh_token(&jar).is_none());
		assert!(store.claims(&jar, OffsetDateTime::now_utc()).is_none());
	}

	#[test]
	fn tampered_cookies_fail_signature_checks() {
		let store = store();
		let mut jar = CookieJar::new();

		write_fresh(&store, &mut jar, Duration::minutes(5));
		jar.add(Cookie::new(ACCESS_TOKEN_COOKIE, "forged-value"));

		assert!(store.read(&jar).is_none());
	}

	#[test]
	fn malformed_user_info_reads_as_absent() {
		let store = store();
		let mut jar = CookieJar::new();

		write_fresh(&store, &mut jar, Duration::minutes(5));
		jar.signed_mut(&store.key).add(Cookie::new(USER_INFO_COOKIE, "{not json"));

		assert!(store.claims(&jar, OffsetDateTime::now_utc()).is_none());
	}
}
