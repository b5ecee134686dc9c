mod handlers;
mod models;
mod scratch;
mod state;

pub use handlers::run_server;
