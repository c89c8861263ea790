pub mod ast;
pub mod config;
pub mod db;
pub mod dialect;
pub mod error;
pub mod orm;

pub use error::{Error, Result};
