pub mod api;
pub mod core;
pub mod domain;
pub mod graphql;
pub mod models;
pub mod routes;
pub mod schema;
pub mod search;
