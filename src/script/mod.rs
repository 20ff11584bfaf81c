//! Flow-script: the executable program format.
//!
//! The compiler emits flow-script source; the executor parses it back
//! ([`parser`]), resolves its imports and control flow ([`link`]), and
//! runs it ([`interp`]). Keeping the format line-oriented and JSON-quoted
//! means programs stay diffable and safe to materialize as plain files.

pub mod ast;
pub mod interp;
pub mod link;
pub mod parser;

pub use ast::*;
pub use interp::*;
pub use link::*;
pub use parser::*;
