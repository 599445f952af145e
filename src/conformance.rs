//! Value conformance (C6): structural checking of concrete entity instances
//! and authorization requests against a compiled [`TypeEnvironment`].

use std::collections::BTreeMap;

use tracing::debug;

use crate::ast::EntityUid;
use crate::diagnostics::{Diagnostic, DiagnosticSink, ErrorCode};
use crate::schema::{ActionUid, TypeEnvironment};
use crate::types::{self, AttrType, RecordType, Type};

/// A concrete runtime value (§4.6 "value type inference").
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeValue {
    Bool(bool),
    Long(i64),
    String(String),
    Entity(EntityUid),
    Set(Vec<RuntimeValue>),
    Record(BTreeMap<String, RuntimeValue>),
    IpAddr(String),
    Decimal(String),
    DateTime(String),
    Duration(String),
}

/// Infer the nominal type of a concrete runtime value (§4.6).
pub fn infer_value_type(value: &RuntimeValue) -> Type {
    match value {
        RuntimeValue::Bool(_) => Type::Bool,
        RuntimeValue::Long(_) => Type::Long,
        RuntimeValue::String(_) => Type::String,
        RuntimeValue::Entity(uid) => Type::entity(uid.ty.clone()),
        RuntimeValue::Set(elems) => match elems.first() {
            Some(first) => Type::set_of(infer_value_type(first)),
            None => Type::set_of(Type::Unknown),
        },
        RuntimeValue::Record(fields) => {
            let attrs = fields
                .iter()
                .map(|(k, v)| (k.clone(), AttrType::required(infer_value_type(v))))
                .collect();
            Type::Record(RecordType::known(attrs, false))
        }
        RuntimeValue::IpAddr(_) => Type::Extension(crate::types::ExtensionKind::IpAddr),
        RuntimeValue::Decimal(_) => Type::Extension(crate::types::ExtensionKind::Decimal),
        RuntimeValue::DateTime(_) => Type::Extension(crate::types::ExtensionKind::DateTime),
        RuntimeValue::Duration(_) => Type::Extension(crate::types::ExtensionKind::Duration),
    }
}

/// A concrete entity as it would appear in an entity store: identity,
/// attribute values, and declared parents.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityInstance {
    pub uid: EntityUid,
    pub attrs: BTreeMap<String, RuntimeValue>,
    pub parents: Vec<EntityUid>,
}

/// A concrete authorization request tuple.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub principal: EntityUid,
    pub action: EntityUid,
    pub resource: EntityUid,
    pub context: BTreeMap<String, RuntimeValue>,
}

/// §4.6 "Entity instance conformance".
pub fn check_entity(env: &TypeEnvironment, instance: &EntityInstance, sink: &mut DiagnosticSink) {
    if env.is_action_type_prefix(&instance.uid.ty) {
        return;
    }
    let Some(info) = env.entity_type(&instance.uid.ty) else {
        sink.push(
            Diagnostic::new(ErrorCode::UnknownEntity, "entity instance has an undefined type")
                .with_detail("entityType", instance.uid.ty.clone())
                .with_detail("entity", instance.uid.to_string()),
        );
        return;
    };

    for (name, at) in &info.attrs {
        match instance.attrs.get(name) {
            Some(value) => {
                let actual = infer_value_type(value);
                if !types::assignable(&at.ty, &actual) {
                    sink.push(
                        Diagnostic::new(ErrorCode::TypeMismatch, "entity attribute has the wrong type")
                            .with_detail("attribute", name.clone())
                            .with_detail("expected", types::render(&at.ty))
                            .with_detail("actual", types::render(&actual)),
                    );
                }
            }
            None if at.required => {
                sink.push(
                    Diagnostic::new(ErrorCode::MissingAttribute, "required attribute absent from entity instance")
                        .with_detail("attribute", name.clone())
                        .with_detail("entityType", instance.uid.ty.clone()),
                );
            }
            None => {}
        }
    }

    if env.options.strict_entity_validation && !info.open {
        for name in instance.attrs.keys() {
            if !info.attrs.contains_key(name) {
                sink.push(
                    Diagnostic::new(
                        ErrorCode::UndeclaredAttribute,
                        "closed entity type does not declare this attribute",
                    )
                    .with_detail("attribute", name.clone())
                    .with_detail("entityType", instance.uid.ty.clone()),
                );
            }
        }
    }

    for parent in &instance.parents {
        if !info.member_of_types.contains(&parent.ty) {
            sink.push(
                Diagnostic::new(ErrorCode::InvalidParent, "parent type is not permitted by memberOfTypes")
                    .with_detail("entityType", instance.uid.ty.clone())
                    .with_detail("parentType", parent.ty.clone()),
            );
        }
    }
}

/// §4.6 "Request conformance".
pub fn check_request(env: &TypeEnvironment, request: &Request, sink: &mut DiagnosticSink) {
    let uid = ActionUid::new(request.action.ty.clone(), request.action.id.clone());
    let Some(action) = env.action_type(&uid) else {
        sink.push(
            Diagnostic::new(ErrorCode::UnknownAction, "request names an undefined action")
                .with_detail("action", uid.to_string()),
        );
        return;
    };

    if !action.principal_types.contains(&request.principal.ty) {
        sink.push(
            Diagnostic::new(ErrorCode::InvalidScope, "principal type is not permitted by this action")
                .with_detail("action", uid.to_string())
                .with_detail("principalType", request.principal.ty.clone()),
        );
    }
    if !action.resource_types.contains(&request.resource.ty) {
        sink.push(
            Diagnostic::new(ErrorCode::InvalidScope, "resource type is not permitted by this action")
                .with_detail("action", uid.to_string())
                .with_detail("resourceType", request.resource.ty.clone()),
        );
    }

    let context_value = RuntimeValue::Record(request.context.clone());
    let context_type = infer_value_type(&context_value);
    if !record_conforms(&action.context, &context_type) {
        sink.push(
            Diagnostic::new(ErrorCode::TypeMismatch, "request context does not conform to the action's declared context")
                .with_detail("action", uid.to_string()),
        );
    }
}

fn record_conforms(expected: &RecordType, actual_ty: &Type) -> bool {
    let Type::Record(actual) = actual_ty else {
        return false;
    };
    types::assignable(&Type::Record(expected.clone()), &Type::Record(actual.clone()))
}

/// Check a whole batch of entities, logging the aggregate outcome.
pub fn check_entities(env: &TypeEnvironment, instances: &[EntityInstance]) -> Vec<Diagnostic> {
    let mut sink = DiagnosticSink::new();
    for instance in instances {
        check_entity(env, instance, &mut sink);
    }
    debug!(count = instances.len(), diagnostics = sink.len(), "entities checked");
    sink.into_vec()
}
