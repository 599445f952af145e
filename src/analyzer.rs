//! The policy analyzer (C5): per-policy orchestration around the
//! expression checker in [`crate::typecheck`].

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::ast::{ActionConstraint, ConditionKind, Expr, Literal, Policy, PrincipalOrResourceConstraint};
use crate::diagnostics::{Diagnostic, DiagnosticSink, ErrorCode};
use crate::schema::{ActionTypeInfo, ActionUid, TypeEnvironment};
use crate::typecheck::{self, TypingContext};
use crate::types::{self, AttrType, RecordType};

/// The diagnostics produced for a single policy (§6.1).
#[derive(Debug, Clone)]
pub struct PolicyResult {
    pub policy_id: String,
    pub diagnostics: Vec<Diagnostic>,
}

impl PolicyResult {
    pub fn is_valid(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

/// Analyze one policy against a compiled environment (§4.5).
pub fn analyze(env: &TypeEnvironment, policy: &Policy) -> PolicyResult {
    let mut sink = DiagnosticSink::new();

    check_scope_types_exist(env, policy, &mut sink);

    let unfiltered: Vec<(&ActionUid, &ActionTypeInfo)> = action_candidates(env, &policy.scope.action);
    let eff = filter_by_principal_resource(env, &policy.scope, unfiltered.clone());

    if eff.is_empty() && !unfiltered.is_empty() {
        sink.emit(
            ErrorCode::InvalidScope,
            "no action in the schema accepts the declared principal/resource types",
        );
    }

    check_in_scope_reachability(env, &policy.scope, &eff, &mut sink);

    let ctx = build_typing_context(env, &policy.scope, &eff);

    for condition in &policy.conditions {
        typecheck::check_condition(&ctx, &mut sink, &condition.body);
        check_constant_condition(&condition.kind, &condition.body, &mut sink);
    }

    debug!(
        policy_id = %policy.id,
        diagnostics = sink.len(),
        effective_actions = eff.len(),
        "policy analyzed"
    );

    PolicyResult {
        policy_id: policy.id.clone(),
        diagnostics: sink.into_vec(),
    }
}

fn check_scope_types_exist(env: &TypeEnvironment, policy: &Policy, sink: &mut DiagnosticSink) {
    if !env.options.lenient {
        for ty in scope_entity_type_names(&policy.scope.principal) {
            check_entity_type_exists(env, ty, sink);
        }
        for ty in scope_entity_type_names(&policy.scope.resource) {
            check_entity_type_exists(env, ty, sink);
        }
    }

    match &policy.scope.action {
        ActionConstraint::Any => {}
        ActionConstraint::Eq(uid) => check_action_exists(env, &uid.ty, &uid.id, sink),
        ActionConstraint::In(uids) => {
            for uid in uids {
                check_action_exists(env, &uid.ty, &uid.id, sink);
            }
        }
    }
}

fn scope_entity_type_names(constraint: &PrincipalOrResourceConstraint) -> Vec<&str> {
    match constraint {
        PrincipalOrResourceConstraint::Any => vec![],
        PrincipalOrResourceConstraint::Eq(uid) => vec![uid.ty.as_str()],
        PrincipalOrResourceConstraint::Is(ty) => vec![ty.as_str()],
        PrincipalOrResourceConstraint::In(uid) => vec![uid.ty.as_str()],
        PrincipalOrResourceConstraint::IsIn(ty, uid) => vec![ty.as_str(), uid.ty.as_str()],
    }
}

fn check_entity_type_exists(env: &TypeEnvironment, ty: &str, sink: &mut DiagnosticSink) {
    if !env.entity_type_exists(ty) {
        sink.push(
            Diagnostic::new(ErrorCode::UnknownEntity, "scope refers to an undefined entity type")
                .with_detail("entityType", ty.to_string()),
        );
    }
}

fn check_action_exists(env: &TypeEnvironment, ty: &str, id: &str, sink: &mut DiagnosticSink) {
    let uid = ActionUid::new(ty.to_string(), id.to_string());
    if env.action_type(&uid).is_none() {
        sink.push(
            Diagnostic::new(ErrorCode::UnknownAction, "scope refers to an undefined action")
                .with_detail("action", uid.to_string()),
        );
    }
}

/// Candidate actions before principal/resource narrowing (§4.5 step 1).
fn action_candidates<'e>(
    env: &'e TypeEnvironment,
    constraint: &ActionConstraint,
) -> Vec<(&'e ActionUid, &'e ActionTypeInfo)> {
    match constraint {
        ActionConstraint::Any => env.all_actions().collect(),
        ActionConstraint::Eq(uid) => {
            let key = ActionUid::new(uid.ty.clone(), uid.id.clone());
            env.action_types
                .get_key_value(&key)
                .map(|(k, v)| vec![(k, v)])
                .unwrap_or_default()
        }
        ActionConstraint::In(uids) => uids
            .iter()
            .filter_map(|uid| {
                let key = ActionUid::new(uid.ty.clone(), uid.id.clone());
                env.action_types.get_key_value(&key)
            })
            .collect(),
    }
}

/// §4.5 steps 2–3: narrow by the declared principal/resource scope type.
fn filter_by_principal_resource<'e>(
    _env: &'e TypeEnvironment,
    scope: &crate::ast::PolicyScope,
    candidates: Vec<(&'e ActionUid, &'e ActionTypeInfo)>,
) -> Vec<(&'e ActionUid, &'e ActionTypeInfo)> {
    let mut result = candidates;
    if let Some(ty) = scope.principal.explicit_type() {
        result.retain(|(_, info)| info.principal_types.contains(ty));
    }
    if let Some(ty) = scope.resource.explicit_type() {
        result.retain(|(_, info)| info.resource_types.contains(ty));
    }
    result
}

fn check_in_scope_reachability(
    env: &TypeEnvironment,
    scope: &crate::ast::PolicyScope,
    eff: &[(&ActionUid, &ActionTypeInfo)],
    sink: &mut DiagnosticSink,
) {
    check_one_side_reachability(env, &scope.principal, eff, true, sink);
    check_one_side_reachability(env, &scope.resource, eff, false, sink);
}

fn check_one_side_reachability(
    env: &TypeEnvironment,
    constraint: &PrincipalOrResourceConstraint,
    eff: &[(&ActionUid, &ActionTypeInfo)],
    is_principal: bool,
    sink: &mut DiagnosticSink,
) {
    let (restrict_type, ancestor) = match constraint {
        PrincipalOrResourceConstraint::In(uid) => (None, Some(uid.ty.as_str())),
        PrincipalOrResourceConstraint::IsIn(ty, uid) => (Some(ty.as_str()), Some(uid.ty.as_str())),
        _ => (None, None),
    };
    let Some(ancestor) = ancestor else {
        return;
    };
    let candidates: Vec<String> = match restrict_type {
        Some(ty) => vec![ty.to_string()],
        None => {
            let types: BTreeSet<String> = eff
                .iter()
                .map(|(_, info)| {
                    if is_principal {
                        &info.principal_types
                    } else {
                        &info.resource_types
                    }
                })
                .flat_map(|set| set.iter().cloned())
                .collect();
            types.into_iter().collect()
        }
    };
    if candidates.is_empty() {
        return;
    }
    let reachable = candidates
        .iter()
        .any(|c| c == ancestor || env.can_be_descendant_of(c, ancestor));
    if !reachable {
        sink.emit(
            ErrorCode::ImpossiblePolicy,
            "scope's `in` target is unreachable from every candidate type via memberOfTypes",
        );
    }
}

fn build_typing_context<'e>(
    env: &'e TypeEnvironment,
    scope: &crate::ast::PolicyScope,
    eff: &[(&ActionUid, &ActionTypeInfo)],
) -> TypingContext<'e> {
    let mut ctx = TypingContext::new(env);

    ctx.principal_types = candidate_types(&scope.principal, eff, true);
    ctx.resource_types = candidate_types(&scope.resource, eff, false);

    ctx.action_uid = match &scope.action {
        ActionConstraint::Eq(uid) => Some(ActionUid::new(uid.ty.clone(), uid.id.clone())),
        _ => None,
    };
    ctx.action_type_prefix = eff.first().and_then(|(first, _)| {
        if eff.iter().all(|(u, _)| u.ty == first.ty) {
            Some(first.ty.clone())
        } else {
            None
        }
    });

    ctx.context_type = context_type_for(eff);
    ctx
}

fn candidate_types(
    constraint: &PrincipalOrResourceConstraint,
    eff: &[(&ActionUid, &ActionTypeInfo)],
    is_principal: bool,
) -> BTreeSet<String> {
    if let Some(ty) = constraint.explicit_type() {
        return BTreeSet::from([ty.to_string()]);
    }
    eff.iter()
        .flat_map(|(_, info)| {
            if is_principal {
                info.principal_types.iter().cloned()
            } else {
                info.resource_types.iter().cloned()
            }
        })
        .collect()
}

/// §4.5 "Context type for Eff": 0 actions -> unknown-open, 1 -> that
/// action's context, >1 -> the narrowing intersection (distinct from the
/// widening [`types::lub`] used elsewhere).
fn context_type_for(eff: &[(&ActionUid, &ActionTypeInfo)]) -> RecordType {
    match eff.len() {
        0 => RecordType::unknown_open(),
        1 => eff[0].1.context.clone(),
        _ => {
            let mut iter = eff.iter().map(|(_, info)| &info.context);
            let first = iter.next().expect("len > 1").clone();
            iter.fold(first, |acc, next| intersect_context(&acc, next))
        }
    }
}

fn intersect_context(a: &RecordType, b: &RecordType) -> RecordType {
    let (Some(a_attrs), Some(b_attrs)) = (&a.attrs, &b.attrs) else {
        return RecordType::unknown_open();
    };
    let mut merged = BTreeMap::new();
    for (name, a_at) in a_attrs {
        if let Some(b_at) = b_attrs.get(name) {
            if let Some(ty) = types::lub(&a_at.ty, &b_at.ty) {
                merged.insert(
                    name.clone(),
                    AttrType {
                        ty,
                        required: a_at.required && b_at.required,
                    },
                );
            }
        }
    }
    RecordType::known(merged, false)
}

/// §4.5 "Condition analysis": fold obviously-constant boolean expressions.
fn check_constant_condition(kind: &ConditionKind, body: &Expr, sink: &mut DiagnosticSink) {
    let Some(value) = fold_constant_bool(body) else {
        return;
    };
    let triggers = match kind {
        ConditionKind::When => !value,
        ConditionKind::Unless => value,
    };
    if triggers {
        sink.emit(
            ErrorCode::ImpossiblePolicy,
            "condition is a constant that can never hold",
        );
    }
}

fn fold_constant_bool(expr: &Expr) -> Option<bool> {
    match expr {
        Expr::Literal(Literal::Bool(b)) => Some(*b),
        Expr::Not(inner) => fold_constant_bool(inner).map(|b| !b),
        Expr::And(l, r) => {
            let (lv, rv) = (fold_constant_bool(l), fold_constant_bool(r));
            match (lv, rv) {
                (Some(false), _) | (_, Some(false)) => Some(false),
                (Some(true), Some(true)) => Some(true),
                _ => None,
            }
        }
        Expr::Or(l, r) => {
            let (lv, rv) = (fold_constant_bool(l), fold_constant_bool(r));
            match (lv, rv) {
                (Some(true), _) | (_, Some(true)) => Some(true),
                (Some(false), Some(false)) => Some(false),
                _ => None,
            }
        }
        Expr::If {
            cond,
            then_branch,
            else_branch,
        } => match fold_constant_bool(cond) {
            Some(true) => fold_constant_bool(then_branch),
            Some(false) => fold_constant_bool(else_branch),
            None => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Condition, EntityUid, Effect, PolicyScope, Var};
    use crate::schema::{EntityTypeInfo, ValidatorOptions};
    use crate::types::Type;

    fn schema_view_edit() -> TypeEnvironment {
        let mut entity_types = BTreeMap::new();
        entity_types.insert(
            "User".to_string(),
            EntityTypeInfo {
                open: true,
                attrs: BTreeMap::new(),
                member_of_types: BTreeSet::new(),
            },
        );
        entity_types.insert(
            "Document".to_string(),
            EntityTypeInfo {
                open: true,
                attrs: BTreeMap::new(),
                member_of_types: BTreeSet::new(),
            },
        );
        let mut action_types = BTreeMap::new();
        let mut view_ctx_attrs = BTreeMap::new();
        view_ctx_attrs.insert("ip".to_string(), AttrType::required(Type::String));
        action_types.insert(
            ActionUid::new("Action", "view"),
            ActionTypeInfo {
                principal_types: BTreeSet::from(["User".to_string()]),
                resource_types: BTreeSet::from(["Document".to_string()]),
                context: RecordType::known(view_ctx_attrs, false),
                member_of: BTreeSet::new(),
            },
        );
        action_types.insert(
            ActionUid::new("Action", "edit"),
            ActionTypeInfo {
                principal_types: BTreeSet::from(["User".to_string()]),
                resource_types: BTreeSet::from(["Document".to_string()]),
                context: RecordType::known(BTreeMap::new(), true),
                member_of: BTreeSet::new(),
            },
        );
        TypeEnvironment {
            entity_types,
            action_types,
            common_types: BTreeMap::new(),
            options: ValidatorOptions::default(),
        }
    }

    #[test]
    fn s1_fully_open_policy_is_valid() {
        let env = schema_view_edit();
        let scope = PolicyScope {
            principal: PrincipalOrResourceConstraint::Eq(EntityUid::new("User", "alice")),
            action: ActionConstraint::Eq(EntityUid::new("Action", "view")),
            resource: PrincipalOrResourceConstraint::Any,
        };
        let policy = Policy::new("s1", Effect::Permit, scope);
        let result = analyze(&env, &policy);
        assert!(result.is_valid(), "{:?}", result.diagnostics);
    }

    #[test]
    fn s4_empty_context_intersection_yields_attribute_not_found() {
        let env = schema_view_edit();
        let scope = PolicyScope::unconstrained();
        let policy = Policy::new("s4", Effect::Permit, scope).with_condition(Condition::when(
            Expr::eq(Expr::getattr(Expr::var(Var::Context), "anything"), Expr::string("x")),
        ));
        let result = analyze(&env, &policy);
        assert!(result
            .diagnostics
            .iter()
            .any(|d| d.code == ErrorCode::AttributeNotFound));
    }

    #[test]
    fn p8_matching_context_attribute_types_are_accepted() {
        let env = schema_view_edit();
        // Both actions declare `shared` as String; matching type should be
        // accessible after intersection.
        let mut env = env;
        for info in env.action_types.values_mut() {
            info.context.attrs.get_or_insert_with(BTreeMap::new).insert(
                "shared".to_string(),
                AttrType::required(Type::String),
            );
        }
        let scope = PolicyScope::unconstrained();
        let policy = Policy::new("p8", Effect::Permit, scope).with_condition(Condition::when(
            Expr::eq(Expr::getattr(Expr::var(Var::Context), "shared"), Expr::string("x")),
        ));
        let result = analyze(&env, &policy);
        assert!(!result
            .diagnostics
            .iter()
            .any(|d| d.code == ErrorCode::AttributeNotFound));
    }

    #[test]
    fn p3_disjoint_principal_resource_types_make_equality_impossible() {
        let env = schema_view_edit();
        let scope = PolicyScope::unconstrained();
        let policy = Policy::new("p3", Effect::Permit, scope).with_condition(Condition::when(
            Expr::eq(Expr::var(Var::Principal), Expr::var(Var::Resource)),
        ));
        let result = analyze(&env, &policy);
        assert!(result
            .diagnostics
            .iter()
            .any(|d| d.code == ErrorCode::ImpossiblePolicy));
    }

    #[test]
    fn constant_false_when_clause_is_impossible() {
        let env = schema_view_edit();
        let scope = PolicyScope::unconstrained();
        let policy = Policy::new("const", Effect::Permit, scope)
            .with_condition(Condition::when(Expr::bool(false)));
        let result = analyze(&env, &policy);
        assert!(result
            .diagnostics
            .iter()
            .any(|d| d.code == ErrorCode::ImpossiblePolicy));
    }

    #[test]
    fn constant_true_unless_clause_is_impossible() {
        let env = schema_view_edit();
        let scope = PolicyScope::unconstrained();
        let policy = Policy::new("const2", Effect::Permit, scope)
            .with_condition(Condition::unless(Expr::and(Expr::bool(true), Expr::bool(true))));
        let result = analyze(&env, &policy);
        assert!(result
            .diagnostics
            .iter()
            .any(|d| d.code == ErrorCode::ImpossiblePolicy));
    }

    /// `permit(principal in Group::"admins", action == Action::"view", resource)`
    /// must validate cleanly when `view` only declares `principalTypes:
    /// ["User"]` and `User` has `memberOfTypes: ["Group"]` — a bare `in`
    /// is a reachability check, not a type pin, so it must not drop
    /// `view` out of `Eff`.
    #[test]
    fn bare_in_scope_constraint_does_not_pin_principal_type() {
        let mut env = schema_view_edit();
        env.entity_types.get_mut("User").unwrap().member_of_types =
            BTreeSet::from(["Group".to_string()]);
        env.entity_types.insert(
            "Group".to_string(),
            EntityTypeInfo {
                open: true,
                attrs: BTreeMap::new(),
                member_of_types: BTreeSet::new(),
            },
        );
        let scope = PolicyScope {
            principal: PrincipalOrResourceConstraint::In(EntityUid::new("Group", "admins")),
            action: ActionConstraint::Eq(EntityUid::new("Action", "view")),
            resource: PrincipalOrResourceConstraint::Any,
        };
        let policy = Policy::new("group_in", Effect::Permit, scope);
        let result = analyze(&env, &policy);
        assert!(result.is_valid(), "{:?}", result.diagnostics);
    }

    #[test]
    fn scope_naming_undefined_action_is_unknown_action() {
        let env = schema_view_edit();
        let scope = PolicyScope {
            principal: PrincipalOrResourceConstraint::Any,
            action: ActionConstraint::Eq(EntityUid::new("Action", "delete")),
            resource: PrincipalOrResourceConstraint::Any,
        };
        let policy = Policy::new("s_unknown_action", Effect::Permit, scope);
        let result = analyze(&env, &policy);
        assert!(result
            .diagnostics
            .iter()
            .any(|d| d.code == ErrorCode::UnknownAction));
    }
}
