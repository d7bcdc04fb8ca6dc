//! Credential endpoints: registration, login and logout

use actix_web::http::StatusCode;
use actix_web::web::{Data, Json};
use actix_web::{HttpRequest, HttpResponse, ResponseError, post};
use derivative::Derivative;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::model::Model;
use crate::model::auth;
use crate::model::sessions::Session;
use crate::model::users::{self, NewUser, User};
use crate::service::gate;
use crate::service::{ErrorBody, client_info};

/// Error reported to API clients
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("Email already registered")]
    Conflict,
    #[error("{0}")]
    Unauthorized(&'static str),
    #[error("Internal server error")]
    Internal,
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Conflict => StatusCode::CONFLICT,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorBody {
            error: &self.to_string(),
        })
    }
}

impl From<users::Error> for ApiError {
    fn from(err: users::Error) -> Self {
        use users::Error::*;

        match err {
            InvalidEmail | PasswordTooShort => Self::BadRequest(err.to_string()),
            EmailTaken => Self::Conflict,
            Password(_) | Database(_) => {
                error!(%err, "Users storage failure");
                Self::Internal
            }
        }
    }
}

impl From<auth::Error> for ApiError {
    fn from(err: auth::Error) -> Self {
        error!(%err, "Session handling failure");
        Self::Internal
    }
}

/// Login or registration request body
#[derive(Derivative, Deserialize)]
#[derivative(Debug)]
pub struct Credentials {
    pub email: String,
    #[derivative(Debug = "ignore")]
    pub password: String,
}

#[derive(Debug, Serialize)]
struct RegisterResponse {
    user: User,
}

#[derive(Debug, Serialize)]
struct LoginResponse {
    user: User,
    session: Session,
}

#[derive(Debug, Serialize)]
struct MessageResponse {
    message: &'static str,
}

/// Creates a new user account
#[post("/register")]
#[instrument(skip_all, fields(email = %credentials.email))]
pub async fn register(
    model: Data<Model>,
    credentials: Json<Credentials>,
) -> Result<HttpResponse, ApiError> {
    let Credentials { email, password } = credentials.into_inner();
    let user = NewUser::new(email, password).create(model.db()).await?;

    info!(user_id = %user.meta.id, "User registered");
    Ok(HttpResponse::Created().json(RegisterResponse { user }))
}

/// Authenticates with email and password, opening a new session
#[post("/login")]
#[instrument(skip_all, fields(email = %credentials.email))]
pub async fn login(
    req: HttpRequest,
    model: Data<Model>,
    credentials: Json<Credentials>,
) -> Result<HttpResponse, ApiError> {
    let Credentials { email, password } = credentials.into_inner();
    users::validate_credentials(&email, &password)?;

    // Unknown email and wrong password are indistinguishable for the client
    let user = match User::fetch_by_email(model.db(), &email).await? {
        Some(user) if user.verify_password(&password)? => user,
        _ => {
            warn!("Login failed");
            return Err(ApiError::Unauthorized("Invalid email or password"));
        }
    };

    let (client_ip, user_agent) = client_info(&req);
    let session = model
        .sessions()
        .issue(model.db(), user.meta.id, &client_ip, &user_agent)
        .await?;

    Ok(HttpResponse::Ok().json(LoginResponse { user, session }))
}

/// Closes all sessions of the authenticated user
///
/// Expects to be mounted behind the gate.
#[instrument(skip_all, fields(user_id))]
pub async fn logout(req: HttpRequest, model: Data<Model>) -> Result<HttpResponse, ApiError> {
    let user_id = gate::user_id(&req);
    if user_id.is_anonymous() {
        return Err(ApiError::Unauthorized("Not authenticated"));
    }
    tracing::Span::current().record("user_id", tracing::field::display(user_id));

    model.sessions().invalidate(model.db(), user_id).await?;

    Ok(HttpResponse::Ok().json(MessageResponse {
        message: "Successfully logged out",
    }))
}
