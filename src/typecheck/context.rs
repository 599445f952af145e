//! The mutable-per-policy typing context (§4.4).

use std::collections::BTreeSet;

use crate::schema::{ActionUid, TypeEnvironment};
use crate::types::RecordType;

/// Everything the expression checker needs to resolve `principal`,
/// `resource`, `action`, and `context`, computed once per policy by the
/// analyzer (§4.5) and then held fixed for every clause of that policy.
#[derive(Debug, Clone)]
pub struct TypingContext<'env> {
    pub env: &'env TypeEnvironment,
    pub principal_types: BTreeSet<String>,
    pub resource_types: BTreeSet<String>,
    /// Set when the action scope pins a single action (`action == A`).
    pub action_uid: Option<ActionUid>,
    /// The shared `NS::Action` prefix of the effective action set, when one
    /// exists, used to type `action` even when no single UID is pinned.
    pub action_type_prefix: Option<String>,
    pub context_type: RecordType,
}

impl<'env> TypingContext<'env> {
    pub fn new(env: &'env TypeEnvironment) -> Self {
        Self {
            env,
            principal_types: BTreeSet::new(),
            resource_types: BTreeSet::new(),
            action_uid: None,
            action_type_prefix: None,
            context_type: RecordType::unknown_open(),
        }
    }
}
