pub mod address;
pub mod engine;

pub use address::{matches, parse_spec, AddressError};
pub use engine::{RelayAclEngine, DEFAULT_STORE_TIMEOUT};
