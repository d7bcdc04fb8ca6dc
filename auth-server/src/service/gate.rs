//! Bearer token gate for protected routes
//!
//! The gate admits a request only if it carries `Authorization: Bearer <token>` with a token
//! signed by the service and not yet expired. With store verification enabled the session of the
//! token also has to be alive. Admitted requests get the typed [`Identity`] attached, rejected
//! ones never reach the handler and are answered with `401` and a reason specific message.

use std::future::{Ready, ready};

use actix_web::body::{EitherBody, MessageBody};
use actix_web::dev::{Payload, ServiceRequest, ServiceResponse};
use actix_web::http::StatusCode;
use actix_web::http::header::{self, HeaderValue};
use actix_web::middleware::Next;
use actix_web::web::Data;
use actix_web::{FromRequest, HttpMessage, HttpRequest, HttpResponse, ResponseError};
use thiserror::Error;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::model::Model;
use crate::model::token::TokenError;
use crate::model::users::UserId;
use crate::service::handlers::ApiError;
use crate::service::{ErrorBody, client_info};

const BEARER_SCHEME: &str = "Bearer ";

/// Reason of rejecting a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("Authorization header is required")]
    AuthHeaderRequired,
    #[error("Authorization header must start with 'Bearer'")]
    SchemeMismatch,
    #[error("Token is required")]
    CredentialRequired,
    #[error("Token has expired")]
    TokenExpired,
    #[error("Invalid token")]
    TokenInvalid,
    #[error("Session has been revoked")]
    SessionRevoked,
    #[error("Internal server error")]
    Internal,
}

impl ResponseError for Rejection {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNAUTHORIZED,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorBody {
            error: &self.to_string(),
        })
    }
}

/// Authenticated caller of an admitted request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    /// Authenticated user
    pub user_id: UserId,
    /// Id of the presented token
    pub token_id: Uuid,
}

/// Handlers behind the gate can take the identity directly, outside of it the extraction fails
/// with `401`
impl FromRequest for Identity {
    type Error = ApiError;
    type Future = Ready<Result<Self, ApiError>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(
            req.extensions()
                .get::<Identity>()
                .copied()
                .ok_or(ApiError::Unauthorized("Not authenticated")),
        )
    }
}

/// Returns the user admitted by the gate, or `UserId::ANONYMOUS` if there is none
pub fn user_id(req: &HttpRequest) -> UserId {
    req.extensions()
        .get::<Identity>()
        .map(|identity| identity.user_id)
        .unwrap_or(UserId::ANONYMOUS)
}

/// Extracts the bearer credential from the `Authorization` header value
pub fn bearer_credential(header: Option<&HeaderValue>) -> Result<&str, Rejection> {
    let header = match header {
        Some(header) if !header.is_empty() => header,
        _ => return Err(Rejection::AuthHeaderRequired),
    };

    let token = header
        .to_str()
        .ok()
        .and_then(|header| header.strip_prefix(BEARER_SCHEME))
        .ok_or(Rejection::SchemeMismatch)?;

    if token.is_empty() {
        return Err(Rejection::CredentialRequired);
    }

    Ok(token)
}

/// Resolves the identity of the request
async fn authenticate(req: &ServiceRequest) -> Result<Identity, Rejection> {
    let token = bearer_credential(req.headers().get(header::AUTHORIZATION))?;

    let model = req.app_data::<Data<Model>>().ok_or_else(|| {
        error!("Missing model in application data");
        Rejection::Internal
    })?;
    let sessions = model.sessions();

    let claims = sessions
        .decode_and_validate(token)
        .map_err(|err| match err {
            TokenError::Expired => Rejection::TokenExpired,
            err => {
                debug!(%err, "Token verification failed");
                Rejection::TokenInvalid
            }
        })?;

    if sessions.verifies_store() {
        let (client_ip, user_agent) = client_info(req.request());
        let live = sessions
            .touch(model.db(), &claims, &client_ip, &user_agent)
            .await
            .map_err(|err| {
                error!(%err, "Cannot verify session");
                Rejection::Internal
            })?;

        if !live {
            return Err(Rejection::SessionRevoked);
        }
    }

    Ok(Identity {
        user_id: claims.user_id,
        token_id: claims.jti,
    })
}

/// Gate middleware, to be used with `actix_web::middleware::from_fn`
pub async fn middleware<B>(
    req: ServiceRequest,
    next: Next<B>,
) -> Result<ServiceResponse<EitherBody<B>>, actix_web::Error>
where
    B: MessageBody + 'static,
{
    match authenticate(&req).await {
        Ok(identity) => {
            debug!(user_id = %identity.user_id, "Request authenticated");
            req.extensions_mut().insert(identity);
            next.call(req).await.map(ServiceResponse::map_into_left_body)
        }
        Err(rejection) => {
            warn!(?rejection, path = req.path(), "Request rejected");
            Ok(req.error_response(rejection).map_into_right_body())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use actix_web::middleware::from_fn;
    use actix_web::test::{self, TestRequest};
    use actix_web::{App, web};
    use chrono::{TimeDelta, Utc};
    use serde_json::Value;

    use crate::model::auth::{SessionManager, TEST_SECRET};
    use crate::model::sessions::Session;
    use crate::model::token::{self, Secret};
    use crate::service::tests::insert_user;

    /// Protected handler reporting the user it sees
    async fn whoami(req: HttpRequest) -> HttpResponse {
        HttpResponse::Ok().body(user_id(&req).to_string())
    }

    /// Sends the request to `/whoami` behind the gate, returns status and body
    async fn call(model: &Model, req: TestRequest) -> (StatusCode, String) {
        let app = test::init_service(
            App::new().app_data(Data::new(model.clone())).service(
                web::scope("")
                    .wrap(from_fn(middleware))
                    .route("/whoami", web::get().to(whoami)),
            ),
        )
        .await;

        let resp = test::call_service(&app, req.uri("/whoami").to_request()).await;
        let status = resp.status();
        let body = test::read_body(resp).await;
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    fn error_message(body: &str) -> String {
        let body: Value = serde_json::from_str(body).unwrap();
        body["error"].as_str().unwrap().to_owned()
    }

    fn bearer(token: &str) -> TestRequest {
        TestRequest::get().insert_header((header::AUTHORIZATION, format!("Bearer {token}")))
    }

    async fn issue_for_user_123(model: &Model) -> Session {
        let user = insert_user(model.db(), 123, "test@example.com").await;
        model
            .sessions()
            .issue(model.db(), user, "127.0.0.1", "test-agent")
            .await
            .unwrap()
    }

    #[actix_web::test]
    async fn valid_token_is_admitted() {
        let model = Model::test().await.unwrap();
        let session = issue_for_user_123(&model).await;

        let (status, body) = call(&model, bearer(session.token.unwrap().as_str())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "123");
    }

    #[actix_web::test]
    async fn admitted_request_refreshes_last_use() {
        let model = Model::test().await.unwrap();
        let session = issue_for_user_123(&model).await;

        let req = bearer(session.token.unwrap().as_str())
            .insert_header((header::USER_AGENT, "probe-agent/1.0"));
        let (status, _) = call(&model, req).await;
        assert_eq!(status, StatusCode::OK);

        let stored = Session::fetch_for_user(model.db(), UserId::from(123))
            .await
            .unwrap();
        assert_eq!(stored[0].last_used_loc, "probe-agent/1.0");
        assert!(stored[0].last_used_at >= session.last_used_at);
    }

    #[actix_web::test]
    async fn missing_header() {
        let model = Model::test().await.unwrap();

        let (status, body) = call(&model, TestRequest::get()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(error_message(&body), "Authorization header is required");
    }

    #[actix_web::test]
    async fn empty_header() {
        let model = Model::test().await.unwrap();

        let req = TestRequest::get().insert_header((header::AUTHORIZATION, ""));
        let (status, body) = call(&model, req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(error_message(&body), "Authorization header is required");
    }

    #[actix_web::test]
    async fn other_scheme() {
        let model = Model::test().await.unwrap();

        for value in ["Basic abc", "Basic token123", "bearer abc", "Bearer"] {
            let req = TestRequest::get().insert_header((header::AUTHORIZATION, value));
            let (status, body) = call(&model, req).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "{value}");
            assert_eq!(
                error_message(&body),
                "Authorization header must start with 'Bearer'",
                "{value}"
            );
        }
    }

    #[actix_web::test]
    async fn empty_token() {
        let model = Model::test().await.unwrap();

        let req = TestRequest::get().insert_header((header::AUTHORIZATION, "Bearer "));
        let (status, body) = call(&model, req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(error_message(&body), "Token is required");
    }

    #[actix_web::test]
    async fn invalid_token() {
        let model = Model::test().await.unwrap();

        let (status, body) = call(&model, bearer("invalid.token.string")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(error_message(&body), "Invalid token");
    }

    #[actix_web::test]
    async fn token_signed_with_other_secret() {
        let model = Model::test().await.unwrap();
        let secret = Secret::new("wrong-secret").unwrap();
        let encoded = token::encode(UserId::from(123), &secret, TimeDelta::hours(1)).unwrap();

        let (status, body) = call(&model, bearer(&encoded.token)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(error_message(&body), "Invalid token");
    }

    #[actix_web::test]
    async fn expired_token() {
        let model = Model::test().await.unwrap();
        let secret = Secret::new(TEST_SECRET).unwrap();
        let issued = Utc::now() - TimeDelta::hours(2);
        let encoded =
            token::encode_at(UserId::from(123), &secret, TimeDelta::hours(1), issued).unwrap();

        let (status, body) = call(&model, bearer(&encoded.token)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(error_message(&body), "Token has expired");
    }

    #[actix_web::test]
    async fn revoked_session() {
        let model = Model::test().await.unwrap();
        let session = issue_for_user_123(&model).await;
        let token = session.token.unwrap();

        let (status, _) = call(&model, bearer(token.as_str())).await;
        assert_eq!(status, StatusCode::OK);

        model
            .sessions()
            .invalidate(model.db(), UserId::from(123))
            .await
            .unwrap();

        let (status, body) = call(&model, bearer(token.as_str())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(error_message(&body), "Session has been revoked");
    }

    #[actix_web::test]
    async fn never_stored_session() {
        let model = Model::test().await.unwrap();
        let secret = Secret::new(TEST_SECRET).unwrap();
        let encoded = token::encode(UserId::from(123), &secret, TimeDelta::hours(1)).unwrap();

        let (status, body) = call(&model, bearer(&encoded.token)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(error_message(&body), "Session has been revoked");
    }

    #[actix_web::test]
    async fn without_store_verification_revoked_token_passes() {
        let sessions = SessionManager::test().with_store_verification(false);
        let model = Model::test_with(sessions).await.unwrap();
        let session = issue_for_user_123(&model).await;
        let token = session.token.unwrap();

        model
            .sessions()
            .invalidate(model.db(), UserId::from(123))
            .await
            .unwrap();

        let (status, body) = call(&model, bearer(token.as_str())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "123");

        // Expiry still applies
        let secret = Secret::new(TEST_SECRET).unwrap();
        let issued = Utc::now() - TimeDelta::hours(2);
        let expired =
            token::encode_at(UserId::from(123), &secret, TimeDelta::hours(1), issued).unwrap();
        let (status, body) = call(&model, bearer(&expired.token)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(error_message(&body), "Token has expired");
    }

    #[test]
    fn credential_precedence() {
        assert_eq!(bearer_credential(None), Err(Rejection::AuthHeaderRequired));
        assert_eq!(
            bearer_credential(Some(&HeaderValue::from_static(""))),
            Err(Rejection::AuthHeaderRequired)
        );
        // Scheme is checked before the credential emptiness
        assert_eq!(
            bearer_credential(Some(&HeaderValue::from_static("Basic "))),
            Err(Rejection::SchemeMismatch)
        );
        assert_eq!(
            bearer_credential(Some(&HeaderValue::from_bytes(b"Bearer \xff").unwrap())),
            Err(Rejection::SchemeMismatch)
        );
        assert_eq!(
            bearer_credential(Some(&HeaderValue::from_static("Bearer "))),
            Err(Rejection::CredentialRequired)
        );
        assert_eq!(
            bearer_credential(Some(&HeaderValue::from_static("Bearer abc.def.ghi"))),
            Ok("abc.def.ghi")
        );
    }

    #[test]
    fn rejection_responses() {
        for rejection in [
            Rejection::AuthHeaderRequired,
            Rejection::SchemeMismatch,
            Rejection::CredentialRequired,
            Rejection::TokenExpired,
            Rejection::TokenInvalid,
            Rejection::SessionRevoked,
        ] {
            assert_eq!(rejection.status_code(), StatusCode::UNAUTHORIZED);
        }
        assert_eq!(
            Rejection::Internal.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn user_id_without_identity() {
        let req = TestRequest::default().to_http_request();
        assert_eq!(user_id(&req), UserId::ANONYMOUS);
    }

    #[test]
    fn user_id_with_identity() {
        let req = TestRequest::default().to_http_request();
        req.extensions_mut().insert(Identity {
            user_id: UserId::from(123),
            token_id: Uuid::new_v4(),
        });
        assert_eq!(user_id(&req), UserId::from(123));
    }

    #[test]
    fn user_id_with_unexpected_type() {
        let req = TestRequest::default().to_http_request();
        req.extensions_mut().insert(String::from("invalid"));
        req.extensions_mut().insert(123_u32);
        req.extensions_mut().insert(UserId::from(123));
        assert_eq!(user_id(&req), UserId::ANONYMOUS);
    }
}
