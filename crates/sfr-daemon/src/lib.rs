pub mod api_types;
pub mod bootstrap;
pub mod relay;
pub mod routes;
pub mod state;
