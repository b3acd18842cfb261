//! Session lifecycle broker orchestrating store, codec, and provider client.
//!
//! [`SessionBroker`] is a stateless orchestrator: its only state is
//! configuration, and every operation takes the cookie carrier explicitly.
//! One broker is constructed at the composition root and shared by the gate,
//! the resource client, and the session routes; there is deliberately no
//! global accessor.

// crates.io
use cookie::CookieJar;
// self
use crate::{
	_prelude::*,
	auth::{Claims, Credential, UserProfile},
	error::ProviderError,
	http::TokenHttpClient,
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	provider::{IdpClient, TokenGrant, TransportErrorMapper},
	store::CredentialStore,
};
#[cfg(feature = "reqwest")]
use crate::{http::ReqwestHttpClient, provider::ReqwestTransportErrorMapper};

#[cfg(feature = "reqwest")]
/// Session broker specialized for the crate's default reqwest transport.
pub type ReqwestSessionBroker = SessionBroker<ReqwestHttpClient, ReqwestTransportErrorMapper>;

/// Retention applied to the refresh cookie when the provider reports no
/// bounded refresh lifetime.
const DEFAULT_REFRESH_RETENTION: Duration = Duration::days(30);

/// Token lifecycle manager: login, refresh, logout, and validity reads over
/// an explicit cookie carrier.
pub struct SessionBroker<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Identity provider client executing the remote operations.
	pub idp: IdpClient<C, M>,
	/// Cookie-backed credential store.
	pub store: CredentialStore,
}
impl<C, M> SessionBroker<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Assembles a broker from its two collaborators.
	pub fn new(idp: IdpClient<C, M>, store: CredentialStore) -> Self {
		Self { idp, store }
	}

	/// Exchanges a username/password pair for a session.
	///
	/// On success the carrier holds a full credential replacement and the
	/// decoded claims are returned. Propagates
	/// [`Error::InvalidCredentials`](crate::error::Error::InvalidCredentials)
	/// when the provider rejects the pair.
	pub async fn login(
		&self,
		username: &str,
		password: &str,
		jar: &mut CookieJar,
	) -> Result<Claims> {
		const KIND: FlowKind = FlowKind::Login;

		let span = FlowSpan::new(KIND, "login");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span
			.instrument(async move {
				let grant = self.idp.password_login(username, password).await?;
				let credential =
					credential_from_grant(&grant, None, OffsetDateTime::now_utc())?;
				let claims = Claims::decode(credential.access_token.expose())?;

				self.store.write(jar, &credential, &claims)?;

				Ok(claims)
			})
			.await;

		obs::record_flow_result(KIND, &result);

		result
	}

	/// Renews the session from the stored refresh token.
	///
	/// The written credential is a full replacement; when the provider does
	/// not rotate the refresh token the previous secret is carried into the
	/// new credential. Concurrent callers must serialize through the
	/// resource client's refresh coordination; the broker itself does not
	/// deduplicate calls.
	pub async fn refresh_session(&self, jar: &mut CookieJar) -> Result<Credential> {
		const KIND: FlowKind = FlowKind::Refresh;

		let span = FlowSpan::new(KIND, "refresh_session");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span
			.instrument(async move {
				let refresh_token =
					self.store.refresh_token(jar).ok_or(Error::NoRefreshToken)?;
				let grant = self.idp.refresh(&refresh_token).await?;
				let credential = credential_from_grant(
					&grant,
					Some(refresh_token),
					OffsetDateTime::now_utc(),
				)?;
				let claims = Claims::decode(credential.access_token.expose())?;

				self.store.write(jar, &credential, &claims)?;

				Ok(credential)
			})
			.await;

		obs::record_flow_result(KIND, &result);

		result
	}

	/// Writes a credential obtained by another request's refresh onto this
	/// carrier.
	pub fn adopt_credential(
		&self,
		credential: &Credential,
		jar: &mut CookieJar,
	) -> Result<Claims> {
		let claims = Claims::decode(credential.access_token.expose())?;

		self.store.write(jar, credential, &claims)?;

		Ok(claims)
	}

	/// Ends the session: best-effort remote revocation, unconditional local
	/// clear.
	pub async fn logout(&self, jar: &mut CookieJar) {
		const KIND: FlowKind = FlowKind::Logout;

		let span = FlowSpan::new(KIND, "logout");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);
		span.instrument(async {
			if let Some(refresh_token) = self.store.refresh_token(jar) {
				if let Err(e) = self.idp.revoke(&refresh_token).await {
					obs::record_flow_outcome(KIND, FlowOutcome::Failure);

					#[cfg(feature = "tracing")]
					tracing::warn!(error = %e, "Remote revocation failed during logout.");
					#[cfg(not(feature = "tracing"))]
					let _ = e;
				}
			}
		})
		.await;
		// Local clearing never waits on the provider.
		self.store.clear(jar);
		obs::record_flow_outcome(KIND, FlowOutcome::Success);
	}

	/// Clears local session state without contacting the provider.
	///
	/// This is logout's local half, used when a refresh is known doomed and
	/// subsequent requests should fail fast.
	pub fn clear_local(&self, jar: &mut CookieJar) {
		self.store.clear(jar);
	}

	/// Returns the access token only when present and unexpired by wall
	/// clock. Never refreshes implicitly.
	pub fn valid_access_token(&self, jar: &CookieJar) -> Option<String> {
		self.store.valid_access_token(jar, OffsetDateTime::now_utc())
	}

	/// Roles granted to this session for the configured client, empty when
	/// the session is absent or expired.
	pub fn roles(&self, jar: &CookieJar) -> BTreeSet<String> {
		self.current_claims(jar)
			.map(|claims| claims.roles_for(self.idp.client_id()))
			.unwrap_or_default()
	}

	/// Stored claims while their trust window is open.
	pub fn current_claims(&self, jar: &CookieJar) -> Option<Claims> {
		self.store.claims(jar, OffsetDateTime::now_utc())
	}

	/// Flat profile document for UI collaborators.
	pub fn profile(&self, jar: &CookieJar) -> Option<UserProfile> {
		self.current_claims(jar).map(|claims| claims.profile(self.idp.client_id()))
	}

	/// Whether the carrier holds a currently valid access token.
	pub fn is_authenticated(&self, jar: &CookieJar) -> bool {
		self.valid_access_token(jar).is_some()
	}

	/// Asks the provider whether `token` is active; fails closed.
	pub async fn introspect(&self, token: &str) -> bool {
		const KIND: FlowKind = FlowKind::Introspect;

		let span = FlowSpan::new(KIND, "introspect");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let active = span.instrument(self.idp.introspect(token)).await;

		obs::record_flow_outcome(
			KIND,
			if active { FlowOutcome::Success } else { FlowOutcome::Failure },
		);

		active
	}
}
impl<C, M> Debug for SessionBroker<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("SessionBroker")
			.field("idp", &self.idp)
			.field("store", &self.store)
			.finish()
	}
}

fn credential_from_grant(
	grant: &TokenGrant,
	previous_refresh: Option<String>,
	issued_at: OffsetDateTime,
) -> Result<Credential> {
	let refresh_token = grant
		.refresh_token
		.clone()
		.or(previous_refresh)
		.ok_or(ProviderError::MissingRefreshToken)?;
	let refresh_lifetime = grant.refresh_expires_in.unwrap_or(DEFAULT_REFRESH_RETENTION);

	Ok(Credential::issue(
		grant.access_token.clone(),
		refresh_token,
		issued_at,
		grant.expires_in,
		refresh_lifetime,
	))
}
