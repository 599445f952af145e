//! The top-level public API (§6.1): schema compilation plus the three
//! validation entry points, wired with structured logging per the ambient
//! stack this crate carries.

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::analyzer::{self, PolicyResult};
use crate::ast::Policy;
use crate::conformance::{self, EntityInstance, Request};
use crate::diagnostics::{Diagnostic, DiagnosticSink};
use crate::schema::{compile, RawSchema, SchemaError, TypeEnvironment, ValidatorOptions};

/// A compiled, immutable environment ready to check policies, entities, and
/// requests against (§3.6 "Lifecycle"). Cheap to clone — the environment is
/// held behind an [`Arc`] and never mutated after [`Validator::create`].
#[derive(Debug, Clone)]
pub struct Validator {
    env: Arc<TypeEnvironment>,
}

#[derive(Debug, Clone)]
pub struct PoliciesReport {
    pub valid: bool,
    pub results: Vec<PolicyResult>,
}

impl PoliciesReport {
    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.results.iter().flat_map(|r| r.diagnostics.iter())
    }
}

#[derive(Debug, Clone)]
pub struct EntitiesReport {
    pub valid: bool,
    pub errors: Vec<Diagnostic>,
}

#[derive(Debug, Clone)]
pub struct RequestReport {
    pub valid: bool,
    pub errors: Vec<Diagnostic>,
}

impl Validator {
    /// Compile a raw schema tree into an immutable validator (§4.2). Fails
    /// only on schema well-formedness violations, returned as a single
    /// aggregate [`SchemaError`].
    #[instrument(skip(schema))]
    pub fn create(schema: RawSchema, options: ValidatorOptions) -> Result<Self, SchemaError> {
        debug!("compiling schema");
        let env = compile(schema, options)?;
        debug!(
            entity_types = env.entity_types.len(),
            actions = env.action_types.len(),
            "validator created"
        );
        Ok(Self { env: Arc::new(env) })
    }

    /// The compiled environment this validator checks against.
    pub fn environment(&self) -> &TypeEnvironment {
        &self.env
    }

    /// §4.5/§4.4: type-check and analyze every policy independently.
    #[instrument(skip_all, fields(count = policies.len()))]
    pub fn validate_policies(&self, policies: &[Policy]) -> PoliciesReport {
        debug!("validating policies");
        let results: Vec<PolicyResult> = policies
            .iter()
            .map(|policy| analyzer::analyze(&self.env, policy))
            .collect();
        let valid = results.iter().all(PolicyResult::is_valid);
        if !valid {
            warn!(
                invalid = results.iter().filter(|r| !r.is_valid()).count(),
                "some policies failed validation"
            );
        }
        PoliciesReport { valid, results }
    }

    /// §4.6: structural conformance of entity instances against the schema.
    #[instrument(skip_all, fields(count = entities.len()))]
    pub fn validate_entities(&self, entities: &[EntityInstance]) -> EntitiesReport {
        debug!("validating entities");
        let errors = conformance::check_entities(&self.env, entities);
        let valid = errors.is_empty();
        if !valid {
            warn!(errors = errors.len(), "entity conformance failures");
        }
        EntitiesReport { valid, errors }
    }

    /// §4.6: structural conformance of a single authorization request.
    #[instrument(skip_all)]
    pub fn validate_request(&self, request: &Request) -> RequestReport {
        let mut sink = DiagnosticSink::new();
        conformance::check_request(&self.env, request, &mut sink);
        let errors = sink.into_vec();
        let valid = errors.is_empty();
        debug!(valid, errors = errors.len(), "request validated");
        RequestReport { valid, errors }
    }
}
