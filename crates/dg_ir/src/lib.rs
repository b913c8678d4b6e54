//! The IR model consumed by the dependence graph constructor.
//!
//! A front-end lowers a program into a [`Module`], either through
//! [`ModuleBuilder`] or by serializing it as JSON for [`Module::from_json`].
//! The constructor only ever reads from the module.

mod builder;
mod ir;
mod ty;

pub use builder::ModuleBuilder;
pub use ir::*;
pub use ty::Type;
