mod dataset;
mod job;

pub use dataset::*;
pub use job::*;
