mod grade;
mod reading;
pub mod source;

pub use grade::Grade;
pub use reading::{Entry, Reading};
pub use source::{keys, SamplingInterval, Source};
