mod connection;
mod error;
mod executor;
mod value;

pub use connection::*;
pub use error::*;
pub use executor::*;
pub use value::*;
