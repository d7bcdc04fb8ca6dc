//! Utilities for services building

use actix_web::http::header;
use actix_web::middleware::from_fn;
use actix_web::web::{self, Data, ServiceConfig};
use actix_web::{HttpRequest, HttpResponse, Result, get};
use async_graphql::http::GraphiQLSource;
use async_graphql::{EmptyMutation, EmptySubscription};
use async_graphql_actix_web::{GraphQLRequest, GraphQLResponse};
use serde::Serialize;


pub mod gate;
pub mod handlers;

use crate::model::Model;
use crate::query::Query;
use crate::service::gate::Identity;
use crate::service::handlers::ApiError;

/// Root GraphQL schema
pub type Schema = async_graphql::Schema<Query, EmptyMutation, EmptySubscription>;

/// Body of every error response
#[derive(Debug, Serialize)]
pub struct ErrorBody<'a> {
    pub error: &'a str,
}

/// Client address and user agent of the request, empty when unknown
///
/// The address honors `Forwarded` / `X-Forwarded-For`, so it is only as trustworthy as the proxy
/// in front of the service.
pub(crate) fn client_info(req: &HttpRequest) -> (String, String) {
    let client_ip = req
        .connection_info()
        .realip_remote_addr()
        .unwrap_or_default()
        .to_owned();

    let user_agent = req
        .headers()
        .get(header::USER_AGENT)
        .and_then(|agent| agent.to_str().ok())
        .unwrap_or_default()
        .to_owned();

    (client_ip, user_agent)
}

/// ActixWeb GraphQL endpoint
async fn api(
    schema: Data<Schema>,
    identity: Identity,
    request: GraphQLRequest,
) -> GraphQLResponse {
    let request = request.into_inner().data(identity);
    schema.execute(request).await.into()
}

/// ActixWeb GraphQLi endpoint
#[get("/pg")]
async fn graphiql() -> Result<HttpResponse> {
    Ok(HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(GraphiQLSource::build().endpoint("/api").finish()))
}

/// Returns configuration function for the ActixWeb services
///
/// `/auth/register` and `/auth/login` are public, `/auth/logout` and `/api` are behind the gate.
pub fn configure(graphiql_enabled: bool, model: Model) -> impl Fn(&mut ServiceConfig) + Clone {
    move |cfg: &mut ServiceConfig| {
        let json_config = web::JsonConfig::default()
            .error_handler(|err, _| ApiError::BadRequest(err.to_string()).into());

        let auth = web::scope("/auth")
            .service(handlers::register)
            .service(handlers::login)
            .service(
                web::resource("/logout")
                    .wrap(from_fn(gate::middleware))
                    .route(web::post().to(handlers::logout)),
            );

        let graphql = web::resource("/api")
            .wrap(from_fn(gate::middleware))
            .route(web::post().to(api));

        cfg.app_data(Data::new(model.schema()))
            .app_data(Data::new(model.clone()))
            .app_data(json_config)
            .service(auth)
            .service(graphql);

        if graphiql_enabled {
            cfg.service(graphiql);
        }
    }
}
