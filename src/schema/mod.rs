//! Schema input, compilation, and the resulting type environment (C2, C3).

pub mod compiler;
pub mod environment;
pub mod raw;

pub use compiler::{compile, is_valid_qualified_ident, SchemaError};
pub use environment::{ActionTypeInfo, ActionUid, EntityTypeInfo, TypeEnvironment, ValidatorOptions};
pub use raw::{
    RawAction, RawActionRef, RawAppliesTo, RawAttrDesc, RawEntityType, RawNamespace, RawSchema,
    RawTypeDesc,
};
