//! A static validator for a policy-based authorization language.
//!
//! Given a compiled schema (entity types, action types, the context shape
//! each action expects) and a set of parsed policies, this crate decides
//! whether every policy is well-typed and, where decidable, whether a
//! policy can structurally never authorize any request. It also checks
//! concrete entity instances and authorization requests for conformance
//! against the same schema.
//!
//! The crate is a pure, synchronous analysis library: it owns no I/O, no
//! background tasks, and no mutable shared state beyond the immutable
//! environment built once by [`Validator::create`]. Surface-syntax parsing
//! of policies and JSON decoding of schema documents are the caller's
//! responsibility; this crate starts from already-parsed trees.

pub mod analyzer;
pub mod ast;
pub mod conformance;
pub mod diagnostics;
pub mod schema;
pub mod typecheck;
pub mod types;
pub mod validator;

pub use analyzer::{analyze, PolicyResult};
pub use ast::{
    ActionConstraint, Condition, ConditionKind, Effect, EntityUid, Expr, Literal, Policy,
    PolicyScope, PrincipalOrResourceConstraint, Var,
};
pub use conformance::{check_entities, check_entity, check_request, EntityInstance, Request, RuntimeValue};
pub use diagnostics::{Diagnostic, DiagnosticSink, ErrorCode};
pub use schema::{
    ActionTypeInfo, ActionUid, EntityTypeInfo, RawSchema, SchemaError, TypeEnvironment,
    ValidatorOptions,
};
pub use types::{AttrType, Category, ExtensionKind, RecordType, Type};
pub use validator::{EntitiesReport, PoliciesReport, RequestReport, Validator};
