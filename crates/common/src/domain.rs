mod clock;
mod frame;
mod record;
mod result;
mod settings;
mod sink;

pub use clock::*;
pub use frame::*;
pub use record::*;
pub use result::*;
pub use settings::*;
pub use sink::*;
