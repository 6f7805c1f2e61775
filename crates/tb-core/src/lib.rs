pub mod error;
pub mod runtime;
pub mod strings;
pub mod types;
pub mod value;

pub use error::BridgeError;
pub use runtime::*;
pub use strings::SharedStr;
pub use types::*;
pub use value::FieldValue;
