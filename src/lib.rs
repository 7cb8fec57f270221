pub mod auth;
pub mod codes;
pub mod config;
pub mod db;
pub mod error;
pub mod matching;
pub mod models;
pub mod routes;
pub mod schema;
pub mod sheets;
pub mod state;

pub mod utils {
    pub mod json;
}
