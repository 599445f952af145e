//! The type environment (C3): immutable lookup tables the checker
//! consults. Built once by [`super::compiler`] and never mutated again
//! (§3.6, §5).

use std::collections::{BTreeMap, BTreeSet};

use crate::types::Type;

/// Recognized options (§6.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatorOptions {
    /// `allow-unknown-entity-types`: skip the existence checks in §4.2.
    pub lenient: bool,
    /// `strict-entity-validation`: reject undeclared attributes on closed
    /// shapes during value conformance.
    pub strict_entity_validation: bool,
    /// `max-attribute-level`: 0 means unlimited.
    pub max_attribute_level: usize,
}

impl Default for ValidatorOptions {
    fn default() -> Self {
        Self {
            lenient: false,
            strict_entity_validation: false,
            max_attribute_level: 0,
        }
    }
}

impl ValidatorOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lenient(mut self, lenient: bool) -> Self {
        self.lenient = lenient;
        self
    }

    pub fn with_strict_entity_validation(mut self, strict: bool) -> Self {
        self.strict_entity_validation = strict;
        self
    }

    pub fn with_max_attribute_level(mut self, max: usize) -> Self {
        self.max_attribute_level = max;
        self
    }
}

/// Per-entity-type record (§3.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityTypeInfo {
    /// `true` iff no shape was declared in the schema.
    pub open: bool,
    pub attrs: BTreeMap<String, crate::types::AttrType>,
    pub member_of_types: BTreeSet<String>,
}

/// An action entity UID: `(type = NS::Action, id = name)` (§3.3).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ActionUid {
    pub ty: String,
    pub id: String,
}

impl ActionUid {
    pub fn new(ty: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            ty: ty.into(),
            id: id.into(),
        }
    }
}

impl std::fmt::Display for ActionUid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}::\"{}\"", self.ty, self.id)
    }
}

/// Per-action record (§3.3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionTypeInfo {
    pub principal_types: BTreeSet<String>,
    pub resource_types: BTreeSet<String>,
    pub context: crate::types::RecordType,
    pub member_of: BTreeSet<ActionUid>,
}

/// The immutable compiled environment (C3).
#[derive(Debug, Clone)]
pub struct TypeEnvironment {
    pub entity_types: BTreeMap<String, EntityTypeInfo>,
    pub action_types: BTreeMap<ActionUid, ActionTypeInfo>,
    pub common_types: BTreeMap<String, Type>,
    pub options: ValidatorOptions,
}

impl TypeEnvironment {
    pub fn entity_type(&self, name: &str) -> Option<&EntityTypeInfo> {
        self.entity_types.get(name)
    }

    pub fn action_type(&self, uid: &ActionUid) -> Option<&ActionTypeInfo> {
        self.action_types.get(uid)
    }

    pub fn entity_type_exists(&self, name: &str) -> bool {
        self.entity_types.contains_key(name)
    }

    /// Transitive, cycle-safe walk of `memberOfTypes`: can an entity of
    /// type `child` ever declare `ancestor` as a permitted parent type,
    /// directly or transitively? (§4.3, §9).
    pub fn can_be_descendant_of(&self, child: &str, ancestor: &str) -> bool {
        if child == ancestor {
            return true;
        }
        let mut visited: BTreeSet<&str> = BTreeSet::new();
        let mut stack = vec![child];
        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }
            let Some(info) = self.entity_types.get(current) else {
                continue;
            };
            for parent in &info.member_of_types {
                if parent == ancestor {
                    return true;
                }
                stack.push(parent.as_str());
            }
        }
        false
    }

    /// All actions declared in the environment, in a stable order.
    pub fn all_actions(&self) -> impl Iterator<Item = (&ActionUid, &ActionTypeInfo)> {
        self.action_types.iter()
    }

    /// Does `ty` look like the namespace-qualified `Action` entity-type
    /// prefix (I5)? Checked against the declared action UIDs first, falling
    /// back to a name-shape check for namespaces whose action set is empty.
    pub fn is_action_type_prefix(&self, ty: &str) -> bool {
        self.action_types.keys().any(|uid| uid.ty == ty) || ty == "Action" || ty.ends_with("::Action")
    }
}
