pub mod config;
pub mod database;
pub mod entities;
pub mod init;
pub mod middleware;
pub mod routes;
pub mod services;
pub mod utils;
