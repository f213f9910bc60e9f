pub mod api;
pub mod db;
pub mod error;
pub mod models;
pub mod trading;

pub use error::{CopyError, DataError, OrderError, Result};
