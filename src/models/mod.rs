pub mod payload;
pub mod webservice;

pub use payload::{value_to_string, Payload};
pub use webservice::*;
