pub mod error;
pub mod proto;

pub use error::{BoxError, Error, InsertError, Result, StoreError};
