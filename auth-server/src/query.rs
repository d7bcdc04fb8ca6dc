//! Main query entry point

use async_graphql::{Context, Object, Result};
use derivative::Derivative;

use crate::service::gate::Identity;

mod users;

#[derive(Debug, Derivative)]
#[derivative(Default = "new")]
pub struct Query {
    /// User related queries
    users: users::UsersQueries,
}

#[Object]
impl Query {
    async fn users(&self) -> &users::UsersQueries {
        &self.users
    }
}

/// Identity of the caller attached to the GraphQL request
fn identity<'a>(ctx: &Context<'a>) -> Result<&'a Identity> {
    ctx.data_opt::<Identity>()
        .ok_or_else(|| "Not authenticated".into())
}
