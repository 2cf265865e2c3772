pub mod api_errors;
pub mod manual;
pub mod ops;
pub mod provider_client;
pub mod redirect;
pub mod routes;
pub mod webhook;
