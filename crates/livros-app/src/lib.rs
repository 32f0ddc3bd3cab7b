pub mod catalog;
pub mod csrf;
pub mod error;
pub mod rest_api;
pub mod state;
