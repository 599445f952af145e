//! The schema compiler (C2): turns a [`super::raw::RawSchema`] into the
//! immutable [`super::environment::TypeEnvironment`].

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use super::environment::{ActionTypeInfo, ActionUid, EntityTypeInfo, TypeEnvironment, ValidatorOptions};
use super::raw::{RawAction, RawActionRef, RawAppliesTo, RawEntityType, RawSchema, RawTypeDesc};
use crate::types::{AttrType, ExtensionKind, RecordType, Type};

/// Schema compilation / well-formedness failure (§7: "Schema
/// well-formedness errors DO abort environment creation, reported as a
/// single aggregate error").
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub struct SchemaError {
    pub violations: Vec<String>,
}

impl std::fmt::Display for SchemaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "schema is not well-formed ({} violation(s)): {}",
            self.violations.len(),
            self.violations.join("; ")
        )
    }
}

/// Is `name` a syntactically valid qualified identifier — `::`-separated
/// segments, each an ASCII letter or underscore followed by alnum/underscore
/// (§4.2)?
pub fn is_valid_qualified_ident(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }
    name.split("::").all(|segment| {
        let mut chars = segment.chars();
        match chars.next() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
            _ => return false,
        }
        chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    })
}

/// Rewrite a bare identifier to be namespace-qualified; identifiers already
/// containing `::` are left untouched (§4.2).
fn qualify(namespace: &str, name: &str) -> String {
    if name.contains("::") || namespace.is_empty() {
        name.to_string()
    } else {
        format!("{namespace}::{name}")
    }
}

struct CommonTypeTable {
    /// qualified common-type name -> (declaring namespace, raw descriptor)
    raw: BTreeMap<String, (String, RawTypeDesc)>,
}

impl CommonTypeTable {
    fn resolve(&self, qualified_name: &str, cache: &mut BTreeMap<String, Type>) -> Option<Type> {
        if let Some(t) = cache.get(qualified_name) {
            return Some(t.clone());
        }
        let (namespace, desc) = self.raw.get(qualified_name)?;
        // Cycle guard: insert a placeholder before recursing so a common
        // type that (directly or transitively) refers to itself resolves
        // to `Unspecified` rather than looping forever.
        cache.insert(qualified_name.to_string(), Type::Unspecified);
        let resolved = resolve_type_desc(desc, namespace, self, cache);
        cache.insert(qualified_name.to_string(), resolved.clone());
        Some(resolved)
    }
}

fn resolve_type_desc(
    desc: &RawTypeDesc,
    namespace: &str,
    common_types: &CommonTypeTable,
    cache: &mut BTreeMap<String, Type>,
) -> Type {
    match desc {
        RawTypeDesc::Boolean => Type::Bool,
        RawTypeDesc::Long => Type::Long,
        RawTypeDesc::String => Type::String,
        RawTypeDesc::Entity { name } => {
            if name.is_empty() {
                Type::AnyEntity
            } else {
                Type::Entity(Some(qualify(namespace, name)))
            }
        }
        RawTypeDesc::Set { element } => {
            Type::set_of(resolve_type_desc(element, namespace, common_types, cache))
        }
        RawTypeDesc::Record {
            attributes,
            additional_attributes,
        } => {
            let mut attrs = BTreeMap::new();
            for (name, attr_desc) in attributes {
                let ty = resolve_type_desc(&attr_desc.ty, namespace, common_types, cache);
                attrs.insert(
                    name.clone(),
                    AttrType {
                        ty,
                        required: attr_desc.required,
                    },
                );
            }
            Type::Record(RecordType::known(attrs, *additional_attributes))
        }
        RawTypeDesc::Extension { name } => ExtensionKind::from_name(name)
            .map(Type::Extension)
            .unwrap_or(Type::Unspecified),
        RawTypeDesc::TypeRef(name) => resolve_type_ref(name, namespace, common_types, cache),
    }
}

/// §4.2 "Type reference resolution": common-type alias first, then
/// entity-type reference if syntactically valid, else `Unspecified`.
fn resolve_type_ref(
    name: &str,
    namespace: &str,
    common_types: &CommonTypeTable,
    cache: &mut BTreeMap<String, Type>,
) -> Type {
    if name.is_empty() {
        return Type::Unspecified;
    }
    if let Some(t) = common_types.resolve(name, cache) {
        return t;
    }
    let qualified = qualify(namespace, name);
    if qualified != name {
        if let Some(t) = common_types.resolve(&qualified, cache) {
            return t;
        }
    }
    if is_valid_qualified_ident(name) {
        Type::Entity(Some(qualified))
    } else {
        Type::Unspecified
    }
}

fn compile_entity_type(
    raw: &RawEntityType,
    namespace: &str,
    common_types: &CommonTypeTable,
    cache: &mut BTreeMap<String, Type>,
) -> EntityTypeInfo {
    let (open, attrs) = match &raw.shape {
        None => (true, BTreeMap::new()),
        Some(shape) => match resolve_type_desc(shape, namespace, common_types, cache) {
            Type::Record(rec) => (
                rec.open,
                rec.attrs.unwrap_or_default(),
            ),
            _ => (true, BTreeMap::new()),
        },
    };
    let member_of_types: BTreeSet<String> = raw
        .member_of_types
        .iter()
        .map(|n| qualify(namespace, n))
        .collect();
    EntityTypeInfo {
        open,
        attrs,
        member_of_types,
    }
}

fn context_type(
    applies_to: Option<&RawAppliesTo>,
    action_level_context: Option<&RawTypeDesc>,
    namespace: &str,
    common_types: &CommonTypeTable,
    cache: &mut BTreeMap<String, Type>,
) -> RecordType {
    // Action-level `context` overrides `appliesTo.context` if both are
    // present (§4.2).
    let desc = action_level_context.or_else(|| applies_to.and_then(|a| a.context.as_ref()));
    match desc {
        None => RecordType::known(BTreeMap::new(), true),
        Some(desc) => match resolve_type_desc(desc, namespace, common_types, cache) {
            Type::Record(rec) => rec,
            _ => RecordType::known(BTreeMap::new(), true),
        },
    }
}

fn compile_action(
    raw: &RawAction,
    namespace: &str,
    common_types: &CommonTypeTable,
    cache: &mut BTreeMap<String, Type>,
) -> ActionTypeInfo {
    let principal_types: BTreeSet<String> = raw
        .applies_to
        .as_ref()
        .map(|a| a.principal_types.iter().map(|n| qualify(namespace, n)).collect())
        .unwrap_or_default();
    let resource_types: BTreeSet<String> = raw
        .applies_to
        .as_ref()
        .map(|a| a.resource_types.iter().map(|n| qualify(namespace, n)).collect())
        .unwrap_or_default();
    let context = context_type(
        raw.applies_to.as_ref(),
        raw.context.as_ref(),
        namespace,
        common_types,
        cache,
    );
    let action_type = qualify(namespace, "Action");
    let member_of: BTreeSet<ActionUid> = raw
        .member_of
        .iter()
        .map(|r: &RawActionRef| {
            let ty = r
                .ty
                .as_ref()
                .map(|t| qualify(namespace, t))
                .unwrap_or_else(|| action_type.clone());
            ActionUid::new(ty, r.id.clone())
        })
        .collect();
    ActionTypeInfo {
        principal_types,
        resource_types,
        context,
        member_of,
    }
}

/// Compile a [`RawSchema`] into an immutable [`TypeEnvironment`]
/// (§4.2–§4.3).
pub fn compile(schema: RawSchema, options: ValidatorOptions) -> Result<TypeEnvironment, SchemaError> {
    debug!(namespaces = schema.0.len(), "compiling schema");

    // First pass: collect qualified common-type descriptors across all
    // namespaces so references can be resolved regardless of declaration
    // order within/between namespaces.
    let mut raw_common = BTreeMap::new();
    for (namespace, ns) in &schema.0 {
        for (name, desc) in &ns.common_types {
            raw_common.insert(qualify(namespace, name), (namespace.clone(), desc.clone()));
        }
    }
    let common_table = CommonTypeTable { raw: raw_common };
    let mut resolved_common_cache = BTreeMap::new();

    let mut entity_types = BTreeMap::new();
    let mut action_types = BTreeMap::new();

    for (namespace, ns) in &schema.0 {
        for (name, raw_entity) in &ns.entity_types {
            let qualified = qualify(namespace, name);
            let info = compile_entity_type(
                raw_entity,
                namespace,
                &common_table,
                &mut resolved_common_cache,
            );
            entity_types.insert(qualified, info);
        }
        let action_type = qualify(namespace, "Action");
        for (name, raw_action) in &ns.actions {
            let uid = ActionUid::new(action_type.clone(), name.clone());
            let info = compile_action(raw_action, namespace, &common_table, &mut resolved_common_cache);
            action_types.insert(uid, info);
        }
    }

    let mut common_types = BTreeMap::new();
    for qualified_name in common_table.raw.keys() {
        if let Some(t) = common_table.resolve(qualified_name, &mut resolved_common_cache) {
            common_types.insert(qualified_name.clone(), t);
        }
    }

    let env = TypeEnvironment {
        entity_types,
        action_types,
        common_types,
        options,
    };

    if !options.lenient {
        well_formed(&env)?;
    }

    debug!(
        entity_types = env.entity_types.len(),
        actions = env.action_types.len(),
        "schema compiled"
    );
    Ok(env)
}

/// §4.2 well-formedness check: every name in a memberOfTypes,
/// principalTypes, resourceTypes list must resolve to a defined entity
/// type. Cycles and duplicates are accepted.
fn well_formed(env: &TypeEnvironment) -> Result<(), SchemaError> {
    let mut violations = Vec::new();

    for (name, info) in &env.entity_types {
        for parent in &info.member_of_types {
            if !env.entity_type_exists(parent) {
                violations.push(format!(
                    "entity type '{name}' declares undefined memberOfTypes entry '{parent}'"
                ));
            }
        }
    }

    for (uid, info) in &env.action_types {
        for ty in &info.principal_types {
            if !env.entity_type_exists(ty) {
                violations.push(format!(
                    "action '{uid}' declares undefined principalTypes entry '{ty}'"
                ));
            }
        }
        for ty in &info.resource_types {
            if !env.entity_type_exists(ty) {
                violations.push(format!(
                    "action '{uid}' declares undefined resourceTypes entry '{ty}'"
                ));
            }
        }
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(SchemaError { violations })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema_from_str(s: &str) -> RawSchema {
        serde_json::from_str(s).expect("valid raw schema json")
    }

    #[test]
    fn qualifies_bare_identifiers() {
        assert_eq!(qualify("NS", "User"), "NS::User");
        assert_eq!(qualify("NS", "Other::User"), "Other::User");
        assert_eq!(qualify("", "User"), "User");
    }

    #[test]
    fn valid_qualified_ident_rules() {
        assert!(is_valid_qualified_ident("User"));
        assert!(is_valid_qualified_ident("NS::User"));
        assert!(is_valid_qualified_ident("_User"));
        assert!(!is_valid_qualified_ident(""));
        assert!(!is_valid_qualified_ident("1User"));
        assert!(!is_valid_qualified_ident("NS::"));
    }

    #[test]
    fn compiles_minimal_schema() {
        let json = r#"{
            "": {
                "entityTypes": {
                    "User": {},
                    "Document": {}
                },
                "actions": {
                    "view": {
                        "appliesTo": {
                            "principalTypes": ["User"],
                            "resourceTypes": ["Document"]
                        }
                    }
                }
            }
        }"#;
        let env = compile(schema_from_str(json), ValidatorOptions::default()).unwrap();
        assert!(env.entity_type_exists("User"));
        assert!(env.entity_type_exists("Document"));
        let uid = ActionUid::new("Action", "view");
        let action = env.action_type(&uid).unwrap();
        assert!(action.principal_types.contains("User"));
        assert!(action.resource_types.contains("Document"));
    }

    #[test]
    fn rejects_undefined_member_of_type_unless_lenient() {
        let json = r#"{
            "": {
                "entityTypes": {
                    "User": { "memberOfTypes": ["Ghost"] }
                },
                "actions": {}
            }
        }"#;
        let err = compile(schema_from_str(json), ValidatorOptions::default()).unwrap_err();
        assert_eq!(err.violations.len(), 1);

        let env = compile(
            schema_from_str(json),
            ValidatorOptions::default().with_lenient(true),
        )
        .unwrap();
        assert!(env.entity_type_exists("User"));
    }

    #[test]
    fn action_level_context_overrides_applies_to_context() {
        let json = r#"{
            "": {
                "entityTypes": { "User": {}, "Doc": {} },
                "actions": {
                    "view": {
                        "appliesTo": {
                            "principalTypes": ["User"],
                            "resourceTypes": ["Doc"],
                            "context": { "type": "Record", "attributes": { "a": {"type": "Long"} } }
                        },
                        "context": { "type": "Record", "attributes": { "b": {"type": "String"} } }
                    }
                }
            }
        }"#;
        let env = compile(schema_from_str(json), ValidatorOptions::default()).unwrap();
        let uid = ActionUid::new("Action", "view");
        let ctx = &env.action_type(&uid).unwrap().context;
        assert!(ctx.get("b").is_some());
        assert!(ctx.get("a").is_none());
    }

    #[test]
    fn common_type_alias_resolves_lazily() {
        let json = r#"{
            "NS": {
                "entityTypes": {
                    "User": { "shape": { "type": "Record", "attributes": { "level": {"type": "Level"} } } }
                },
                "actions": {},
                "commonTypes": {
                    "Level": { "type": "Long" }
                }
            }
        }"#;
        let env = compile(schema_from_str(json), ValidatorOptions::default()).unwrap();
        let user = env.entity_type("NS::User").unwrap();
        assert_eq!(user.attrs.get("level").unwrap().ty, Type::Long);
    }

    #[test]
    fn unresolved_type_ref_becomes_entity_or_unspecified() {
        let json = r#"{
            "NS": {
                "entityTypes": {
                    "User": { "shape": { "type": "Record", "attributes": { "mgr": {"type": "Manager"} } } }
                },
                "actions": {}
            }
        }"#;
        let env = compile(
            schema_from_str(json),
            ValidatorOptions::default().with_lenient(true),
        )
        .unwrap();
        let user = env.entity_type("NS::User").unwrap();
        assert_eq!(
            user.attrs.get("mgr").unwrap().ty,
            Type::entity("NS::Manager")
        );
    }
}
