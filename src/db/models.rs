mod catalog;
mod migration;
mod value;
mod verification;

pub use catalog::*;
pub use migration::*;
pub use value::*;
pub use verification::*;
