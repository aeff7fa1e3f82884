mod error;

pub use error::CtapError;
