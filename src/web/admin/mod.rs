use axum::{Router, routing::get};

use crate::web::AppState;

mod users;

pub use users::{create_account, delete_account, list_accounts};

pub fn router() -> Router<AppState> {
    Router::new().route(
        "/api/admin/users",
        get(list_accounts).post(create_account).delete(delete_account),
    )
}
