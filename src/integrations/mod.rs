pub mod axum;
pub mod handlers;
