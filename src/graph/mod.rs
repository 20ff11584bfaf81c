pub mod conversion;
pub mod definition;
pub mod variables;

pub use conversion::*;
pub use definition::*;
pub use variables::*;
