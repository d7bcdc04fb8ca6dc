//! User-related queries

use async_graphql::{Context, Object, Result};

use crate::model::Model;
use crate::model::sessions::Session;
use crate::model::users::User;
use crate::query::identity;

#[derive(Debug, Default)]
pub struct UsersQueries;

#[Object]
impl UsersQueries {
    /// Authenticated user
    async fn me(&self, ctx: &Context<'_>) -> Result<User> {
        let identity = identity(ctx)?;
        let model = ctx.data::<Model>()?;

        User::fetch(model.db(), identity.user_id)
            .await?
            .ok_or_else(|| "User not found".into())
    }

    /// Live sessions of the authenticated user, oldest first
    async fn sessions(&self, ctx: &Context<'_>) -> Result<Vec<Session>> {
        let identity = identity(ctx)?;
        let model = ctx.data::<Model>()?;

        Session::fetch_for_user(model.db(), identity.user_id)
            .await
            .map_err(Into::into)
    }
}
