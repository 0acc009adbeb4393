pub mod domain;
pub mod mqtt;
pub mod radio;

pub use domain::*;
pub use mqtt::*;
pub use radio::*;
