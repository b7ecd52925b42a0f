mod checkpoint;
mod record;
mod tenant;

pub use checkpoint::*;
pub use record::*;
pub use tenant::*;
