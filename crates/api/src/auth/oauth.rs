//! OAuth profile lookup
//!
//! The mobile client completes the provider's sign-in flow itself and hands us
//! the provider access token; we exchange it for the user's profile.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use vendeai_shared::OAuthProvider;

use crate::error::{ApiError, ApiResult};

const GOOGLE_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v3/userinfo";
const FACEBOOK_GRAPH_URL: &str = "https://graph.facebook.com";

/// Identity asserted by an OAuth provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthProfile {
    pub provider: OAuthProvider,
    pub provider_id: String,
    pub email: String,
    /// Whether the provider vouches that `email` belongs to this user
    pub email_verified: bool,
    pub name: String,
    pub avatar: Option<String>,
}

#[async_trait]
pub trait OAuthVerifier: Send + Sync {
    async fn fetch_profile(
        &self,
        provider: OAuthProvider,
        access_token: &str,
    ) -> ApiResult<OAuthProfile>;
}

#[derive(Deserialize)]
struct GoogleUserInfo {
    sub: String,
    email: Option<String>,
    #[serde(default)]
    email_verified: bool,
    name: Option<String>,
    picture: Option<String>,
}

#[derive(Deserialize)]
struct FacebookUser {
    id: String,
    name: Option<String>,
    email: Option<String>,
    picture: Option<FacebookPicture>,
}

#[derive(Deserialize)]
struct FacebookPicture {
    data: FacebookPictureData,
}

#[derive(Deserialize)]
struct FacebookPictureData {
    url: Option<String>,
}

/// Profile lookups against the providers' public APIs
#[derive(Clone)]
pub struct HttpOAuthVerifier {
    http: Client,
    google_userinfo_url: String,
    facebook_graph_url: String,
}

impl HttpOAuthVerifier {
    pub fn new() -> ApiResult<Self> {
        Self::with_endpoints(GOOGLE_USERINFO_URL, FACEBOOK_GRAPH_URL)
    }

    pub fn with_endpoints(google_userinfo_url: &str, facebook_graph_url: &str) -> ApiResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ApiError::Internal(format!("http client: {e}")))?;
        Ok(Self {
            http,
            google_userinfo_url: google_userinfo_url.trim_end_matches('/').to_string(),
            facebook_graph_url: facebook_graph_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        provider: OAuthProvider,
        request: reqwest::RequestBuilder,
    ) -> ApiResult<T> {
        let response = request
            .send()
            .await
            .map_err(|e| ApiError::Upstream(format!("{provider} profile request: {e}")))?;

        match response.status() {
            s if s.is_success() => response
                .json::<T>()
                .await
                .map_err(|e| ApiError::Upstream(format!("{provider} profile body: {e}"))),
            StatusCode::UNAUTHORIZED | StatusCode::BAD_REQUEST | StatusCode::FORBIDDEN => Err(
                ApiError::Authentication(format!("{provider} rejected the access token")),
            ),
            s => Err(ApiError::Upstream(format!("{provider} profile returned {s}"))),
        }
    }

    async fn google(&self, access_token: &str) -> ApiResult<OAuthProfile> {
        let info: GoogleUserInfo = self
            .get_json(
                OAuthProvider::Google,
                self.http
                    .get(&self.google_userinfo_url)
                    .bearer_auth(access_token),
            )
            .await?;

        let email = info
            .email
            .filter(|e| !e.is_empty())
            .ok_or_else(|| ApiError::Validation("Google account has no e-mail".to_string()))?;

        Ok(OAuthProfile {
            provider: OAuthProvider::Google,
            provider_id: info.sub,
            email,
            email_verified: info.email_verified,
            name: info.name.unwrap_or_default(),
            avatar: info.picture,
        })
    }

    async fn facebook(&self, access_token: &str) -> ApiResult<OAuthProfile> {
        let user: FacebookUser = self
            .get_json(
                OAuthProvider::Facebook,
                self.http
                    .get(format!("{}/me", self.facebook_graph_url))
                    .query(&[
                        ("fields", "id,name,email,picture"),
                        ("access_token", access_token),
                    ]),
            )
            .await?;

        // Facebook only returns confirmed addresses; accounts without one get
        // a placeholder that can never match an existing account.
        let (email, email_verified) = match user.email.filter(|e| !e.is_empty()) {
            Some(email) => (email, true),
            None => (format!("{}@facebook.com", user.id), false),
        };

        Ok(OAuthProfile {
            provider: OAuthProvider::Facebook,
            avatar: user.picture.and_then(|p| p.data.url),
            provider_id: user.id,
            email,
            email_verified,
            name: user.name.unwrap_or_default(),
        })
    }
}

#[async_trait]
impl OAuthVerifier for HttpOAuthVerifier {
    async fn fetch_profile(
        &self,
        provider: OAuthProvider,
        access_token: &str,
    ) -> ApiResult<OAuthProfile> {
        if access_token.trim().is_empty() {
            return Err(ApiError::Validation("access_token is required".to_string()));
        }
        match provider {
            OAuthProvider::Google => self.google(access_token).await,
            OAuthProvider::Facebook => self.facebook(access_token).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn verifier(server: &mockito::Server) -> HttpOAuthVerifier {
        HttpOAuthVerifier::with_endpoints(
            &format!("{}/oauth2/v3/userinfo", server.url()),
            &server.url(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_google_profile() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/oauth2/v3/userinfo")
            .match_header("authorization", "Bearer ya29.token")
            .with_status(200)
            .with_body(
                r#"{"sub":"1089","email":"ana@gmail.com","email_verified":true,
                    "name":"Ana Souza","picture":"https://lh3.googleusercontent.com/a"}"#,
            )
            .create_async()
            .await;

        let profile = verifier(&server)
            .fetch_profile(OAuthProvider::Google, "ya29.token")
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(profile.provider_id, "1089");
        assert_eq!(profile.email, "ana@gmail.com");
        assert!(profile.email_verified);
        assert_eq!(profile.name, "Ana Souza");
    }

    #[tokio::test]
    async fn test_facebook_without_email_gets_unverified_placeholder() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/me")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("fields".into(), "id,name,email,picture".into()),
                Matcher::UrlEncoded("access_token".into(), "EAAB".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"id":"5551","name":"Caio"}"#)
            .create_async()
            .await;

        let profile = verifier(&server)
            .fetch_profile(OAuthProvider::Facebook, "EAAB")
            .await
            .unwrap();

        assert_eq!(profile.email, "5551@facebook.com");
        assert!(!profile.email_verified);
        assert!(profile.avatar.is_none());
    }

    #[tokio::test]
    async fn test_rejected_token_is_authentication_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/oauth2/v3/userinfo")
            .with_status(401)
            .with_body(r#"{"error":"invalid_token"}"#)
            .create_async()
            .await;

        let err = verifier(&server)
            .fetch_profile(OAuthProvider::Google, "expired")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Authentication(_)));
    }

    #[tokio::test]
    async fn test_provider_outage_is_upstream_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/me")
            .match_query(Matcher::Any)
            .with_status(503)
            .create_async()
            .await;

        let err = verifier(&server)
            .fetch_profile(OAuthProvider::Facebook, "EAAB")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Upstream(_)));
    }

    #[tokio::test]
    async fn test_blank_token_rejected_without_request() {
        let server = mockito::Server::new_async().await;
        let err = verifier(&server)
            .fetch_profile(OAuthProvider::Google, "  ")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }
}
