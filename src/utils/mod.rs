pub mod errors;

pub use errors::{RouterError, RouterResult};
