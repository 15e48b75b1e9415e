pub mod config;
pub mod db;
pub mod mapping;
pub mod model;
pub mod paginate;
pub mod reconcile;
pub mod refindex;
pub mod sweep;
pub mod sync;
pub mod webhook;
pub mod wp;
