//! The expression type-checker (C4): a syntax-directed inference pass over
//! policy condition expressions.

pub mod context;
pub mod extensions;

pub use context::TypingContext;

use std::collections::BTreeMap;

use crate::ast::{EntityUid, Expr, Literal, Var};
use crate::diagnostics::{Diagnostic, DiagnosticSink, ErrorCode};
use crate::types::{self, AttrType, RecordType, Type};

/// Top-level rule for a `when`/`unless` body (§4.4): the result must be
/// `Bool` or `Unknown`.
pub fn check_condition(ctx: &TypingContext, sink: &mut DiagnosticSink, body: &Expr) {
    let ty = infer(ctx, sink, body);
    match ty {
        Type::Bool | Type::Unknown => {}
        Type::Unspecified => sink.emit(
            ErrorCode::UnexpectedType,
            "condition uses value with unspecified type",
        ),
        other => sink.push(
            Diagnostic::new(
                ErrorCode::UnexpectedType,
                "condition must evaluate to a boolean value",
            )
            .with_detail("actual", types::render(&other)),
        ),
    }
}

/// Infer the type of `expr`, accumulating diagnostics into `sink`. Diagnostic
/// nodes still return their nominal result type so later errors stay
/// localized rather than cascading.
pub fn infer(ctx: &TypingContext, sink: &mut DiagnosticSink, expr: &Expr) -> Type {
    infer_at_depth(ctx, sink, expr, 0)
}

fn infer_at_depth(ctx: &TypingContext, sink: &mut DiagnosticSink, expr: &Expr, depth: usize) -> Type {
    match expr {
        Expr::Literal(lit) => infer_literal(ctx, sink, lit),
        Expr::Var(v) => infer_var(ctx, *v),

        Expr::And(l, r) | Expr::Or(l, r) => {
            let lt = infer_reset(ctx, sink, l);
            let rt = infer_reset(ctx, sink, r);
            require_bool(sink, &lt);
            require_bool(sink, &rt);
            Type::Bool
        }
        Expr::Not(inner) => {
            let t = infer_reset(ctx, sink, inner);
            require_bool(sink, &t);
            Type::Bool
        }
        Expr::Neg(inner) => {
            let t = infer_reset(ctx, sink, inner);
            require_long(sink, &t);
            Type::Long
        }
        Expr::Add(l, r) | Expr::Sub(l, r) | Expr::Mul(l, r) => {
            let lt = infer_reset(ctx, sink, l);
            let rt = infer_reset(ctx, sink, r);
            require_long(sink, &lt);
            require_long(sink, &rt);
            Type::Long
        }
        Expr::Lt(l, r) | Expr::Le(l, r) | Expr::Gt(l, r) | Expr::Ge(l, r) => {
            let lt = infer_reset(ctx, sink, l);
            let rt = infer_reset(ctx, sink, r);
            require_long(sink, &lt);
            require_long(sink, &rt);
            Type::Bool
        }
        Expr::Eq(l, r) | Expr::NotEq(l, r) => {
            let lt = infer_reset(ctx, sink, l);
            let rt = infer_reset(ctx, sink, r);
            if !types::comparable(&lt, &rt) {
                sink.push(
                    Diagnostic::new(ErrorCode::TypeMismatch, "operands are not comparable")
                        .with_detail("left", types::render(&lt))
                        .with_detail("right", types::render(&rt)),
                );
            }
            check_impossible_principal_resource_equality(ctx, sink, l, r);
            Type::Bool
        }

        Expr::Is { expr: inner, .. } => {
            infer_reset(ctx, sink, inner);
            Type::Bool
        }
        Expr::IsIn {
            expr: inner,
            entity_type,
            in_expr,
        } => {
            infer_reset(ctx, sink, inner);
            infer_reset(ctx, sink, in_expr);
            check_in_reachability(
                ctx,
                sink,
                inner,
                in_expr,
                Some(std::slice::from_ref(entity_type)),
            );
            Type::Bool
        }
        Expr::In(l, r) => {
            let lt = infer_reset(ctx, sink, l);
            let rt = infer_reset(ctx, sink, r);
            require_entity_like(sink, &lt);
            require_entity_set_like(sink, &rt);
            check_in_reachability(ctx, sink, l, r, None);
            Type::Bool
        }

        Expr::GetAttr { expr: base, attr } => {
            let new_depth = depth + 1;
            let max = ctx.env.options.max_attribute_level;
            if max > 0 && new_depth > max {
                sink.push(
                    Diagnostic::new(ErrorCode::LevelExceeded, "attribute access depth exceeded")
                        .with_detail("limit", max.to_string())
                        .with_detail("depth", new_depth.to_string()),
                );
            }
            let base_ty = infer_at_depth(ctx, sink, base, new_depth);
            infer_get_attr(ctx, sink, &base_ty, attr)
        }
        Expr::Has { expr: inner, .. } => {
            infer_reset(ctx, sink, inner);
            Type::Bool
        }

        Expr::Contains(l, r) | Expr::ContainsAll(l, r) | Expr::ContainsAny(l, r) => {
            let lt = infer_reset(ctx, sink, l);
            infer_reset(ctx, sink, r);
            require_set(sink, &lt);
            Type::Bool
        }
        Expr::IsEmpty(inner) => {
            let t = infer_reset(ctx, sink, inner);
            require_set(sink, &t);
            Type::Bool
        }

        Expr::Like { expr: inner, .. } => {
            let t = infer_reset(ctx, sink, inner);
            require_string(sink, &t);
            Type::Bool
        }

        Expr::If {
            cond,
            then_branch,
            else_branch,
        } => {
            let ct = infer_reset(ctx, sink, cond);
            require_bool(sink, &ct);
            let tt = infer_reset(ctx, sink, then_branch);
            let et = infer_reset(ctx, sink, else_branch);
            match types::lub(&tt, &et) {
                Some(t) => t,
                None => {
                    sink.push(
                        Diagnostic::new(ErrorCode::IncompatibleTypes, "if branches have incompatible types")
                            .with_detail("then", types::render(&tt))
                            .with_detail("else", types::render(&et)),
                    );
                    Type::Unknown
                }
            }
        }

        Expr::Set(elems) => infer_set_literal(ctx, sink, elems),
        Expr::Record(fields) => infer_record_literal(ctx, sink, fields),

        Expr::ExtensionCall { name, args } => infer_extension_call(ctx, sink, name, args),

        Expr::GetTag { expr: base, tag } => {
            infer_reset(ctx, sink, base);
            infer_reset(ctx, sink, tag);
            Type::Unknown
        }
        Expr::HasTag { expr: base, tag } => {
            infer_reset(ctx, sink, base);
            infer_reset(ctx, sink, tag);
            Type::Bool
        }
    }
}

/// Sub-expressions that are not themselves part of an attribute-access
/// chain start a fresh chain of their own.
fn infer_reset(ctx: &TypingContext, sink: &mut DiagnosticSink, expr: &Expr) -> Type {
    infer_at_depth(ctx, sink, expr, 0)
}

fn infer_literal(ctx: &TypingContext, sink: &mut DiagnosticSink, lit: &Literal) -> Type {
    match lit {
        Literal::Bool(_) => Type::Bool,
        Literal::Long(_) => Type::Long,
        Literal::String(_) => Type::String,
        Literal::EntityUid(uid) => infer_entity_literal(ctx, sink, uid),
    }
}

fn infer_entity_literal(ctx: &TypingContext, sink: &mut DiagnosticSink, uid: &EntityUid) -> Type {
    if ctx.env.is_action_type_prefix(&uid.ty) {
        let action_uid = crate::schema::ActionUid::new(uid.ty.clone(), uid.id.clone());
        if ctx.env.action_type(&action_uid).is_none() {
            sink.push(
                Diagnostic::new(ErrorCode::UnknownAction, "action literal is not defined in schema")
                    .with_detail("action", action_uid.to_string()),
            );
        }
    } else if !ctx.env.entity_type_exists(&uid.ty) && !ctx.env.options.lenient {
        sink.push(
            Diagnostic::new(ErrorCode::UnknownEntity, "entity literal has an undefined type")
                .with_detail("entityType", uid.ty.clone()),
        );
    }
    Type::entity(uid.ty.clone())
}

fn infer_var(ctx: &TypingContext, var: Var) -> Type {
    match var {
        Var::Principal => candidate_entity_type(&ctx.principal_types),
        Var::Resource => candidate_entity_type(&ctx.resource_types),
        Var::Action => match &ctx.action_uid {
            Some(uid) => Type::entity(uid.ty.clone()),
            None => match &ctx.action_type_prefix {
                Some(prefix) => Type::entity(prefix.clone()),
                None => Type::unresolved_entity(),
            },
        },
        Var::Context => Type::Record(ctx.context_type.clone()),
    }
}

fn candidate_entity_type(candidates: &std::collections::BTreeSet<String>) -> Type {
    if candidates.len() == 1 {
        Type::entity(candidates.iter().next().unwrap().clone())
    } else {
        Type::unresolved_entity()
    }
}

fn require_bool(sink: &mut DiagnosticSink, ty: &Type) {
    if !ty.is_bool() {
        unexpected_type(sink, "Bool", ty);
    }
}

fn require_long(sink: &mut DiagnosticSink, ty: &Type) {
    if !ty.is_long() {
        unexpected_type(sink, "Long", ty);
    }
}

fn require_string(sink: &mut DiagnosticSink, ty: &Type) {
    if !ty.is_string() {
        unexpected_type(sink, "String", ty);
    }
}

fn require_set(sink: &mut DiagnosticSink, ty: &Type) {
    if !ty.is_set_like() {
        unexpected_type(sink, "Set", ty);
    }
}

fn require_entity_like(sink: &mut DiagnosticSink, ty: &Type) {
    if !ty.is_entity_like() {
        unexpected_type(sink, "Entity", ty);
    }
}

fn require_entity_set_like(sink: &mut DiagnosticSink, ty: &Type) {
    if ty.is_entity_like() || matches!(ty, Type::Set(_)) {
        return;
    }
    unexpected_type(sink, "Entity or Set<Entity>", ty);
}

fn unexpected_type(sink: &mut DiagnosticSink, expected: &str, actual: &Type) {
    sink.push(
        Diagnostic::new(ErrorCode::UnexpectedType, "operand has the wrong type")
            .with_detail("expected", expected.to_string())
            .with_detail("actual", types::render(actual)),
    );
}

fn var_role(expr: &Expr) -> Option<Var> {
    match expr {
        Expr::Var(v) => Some(*v),
        _ => None,
    }
}

fn entity_literal_type(expr: &Expr) -> Option<&str> {
    match expr {
        Expr::Literal(Literal::EntityUid(uid)) => Some(uid.ty.as_str()),
        _ => None,
    }
}

fn check_impossible_principal_resource_equality(
    ctx: &TypingContext,
    sink: &mut DiagnosticSink,
    l: &Expr,
    r: &Expr,
) {
    let roles = (var_role(l), var_role(r));
    let disjoint = match roles {
        (Some(Var::Principal), Some(Var::Resource)) | (Some(Var::Resource), Some(Var::Principal)) => {
            ctx.principal_types.is_disjoint(&ctx.resource_types)
        }
        _ => false,
    };
    if disjoint {
        sink.emit(
            ErrorCode::ImpossiblePolicy,
            "principal and resource candidate types are disjoint; equality can never hold",
        );
    }
}

/// §4.4 "is T in E" / "in": candidate-reachability check for P4.
fn check_in_reachability(
    ctx: &TypingContext,
    sink: &mut DiagnosticSink,
    var_expr: &Expr,
    target_expr: &Expr,
    restrict_to: Option<&[String]>,
) {
    let Some(role) = var_role(var_expr) else {
        return;
    };
    let Some(target_ty) = entity_literal_type(target_expr) else {
        return;
    };
    let candidates: Vec<String> = match restrict_to {
        Some(r) => r.to_vec(),
        None => match role {
            Var::Principal => ctx.principal_types.iter().cloned().collect(),
            Var::Resource => ctx.resource_types.iter().cloned().collect(),
            _ => return,
        },
    };
    if candidates.is_empty() {
        return;
    }
    let reachable = candidates
        .iter()
        .any(|c| c == target_ty || ctx.env.can_be_descendant_of(c, target_ty));
    if !reachable {
        sink.emit(
            ErrorCode::ImpossiblePolicy,
            "target entity type is unreachable from every candidate type via memberOfTypes",
        );
    }
}

fn infer_get_attr(ctx: &TypingContext, sink: &mut DiagnosticSink, base_ty: &Type, attr: &str) -> Type {
    match base_ty {
        Type::Entity(Some(name)) => {
            let Some(info) = ctx.env.entity_type(name) else {
                sink.push(
                    Diagnostic::new(ErrorCode::UnknownEntity, "entity type not defined in schema")
                        .with_detail("entityType", name.clone()),
                );
                return Type::Unknown;
            };
            match info.attrs.get(attr) {
                Some(at) => {
                    if !at.required {
                        sink.push(
                            Diagnostic::new(
                                ErrorCode::AttributeAccess,
                                "optional attribute accessed without a prior `has` check",
                            )
                            .with_detail("attribute", attr.to_string()),
                        );
                    }
                    at.ty.clone()
                }
                None => {
                    sink.push(
                        Diagnostic::new(ErrorCode::AttributeNotFound, "no such attribute")
                            .with_detail("attribute", attr.to_string())
                            .with_detail("entityType", name.clone()),
                    );
                    Type::Unknown
                }
            }
        }
        Type::Entity(None) | Type::Unknown => Type::Unknown,
        Type::Record(rec) => infer_record_get_attr(sink, rec, attr),
        other => {
            unexpected_type(sink, "Entity or Record", other);
            Type::Unknown
        }
    }
}

fn infer_record_get_attr(sink: &mut DiagnosticSink, rec: &RecordType, attr: &str) -> Type {
    match &rec.attrs {
        None => Type::Unknown,
        Some(attrs) => match attrs.get(attr) {
            Some(at) => {
                if !at.required {
                    sink.push(
                        Diagnostic::new(
                            ErrorCode::AttributeAccess,
                            "optional attribute accessed without a prior `has` check",
                        )
                        .with_detail("attribute", attr.to_string()),
                    );
                }
                at.ty.clone()
            }
            None => {
                sink.push(
                    Diagnostic::new(ErrorCode::AttributeNotFound, "no such attribute")
                        .with_detail("attribute", attr.to_string()),
                );
                Type::Unknown
            }
        },
    }
}

fn infer_set_literal(ctx: &TypingContext, sink: &mut DiagnosticSink, elems: &[Expr]) -> Type {
    let Some((first, rest)) = elems.split_first() else {
        sink.emit(ErrorCode::EmptySet, "cannot infer element type of empty set literal");
        return Type::set_of(Type::Unknown);
    };
    let mut running = infer_reset(ctx, sink, first);
    for elem in rest {
        let next = infer_reset(ctx, sink, elem);
        match types::lub(&running, &next) {
            Some(t) => running = t,
            None => {
                sink.push(
                    Diagnostic::new(ErrorCode::IncompatibleTypes, "set elements have incompatible types")
                        .with_detail("left", types::render(&running))
                        .with_detail("right", types::render(&next)),
                );
                running = Type::Unknown;
            }
        }
    }
    Type::set_of(running)
}

fn infer_record_literal(
    ctx: &TypingContext,
    sink: &mut DiagnosticSink,
    fields: &BTreeMap<String, Expr>,
) -> Type {
    let mut attrs = BTreeMap::new();
    for (name, expr) in fields {
        let ty = infer_reset(ctx, sink, expr);
        attrs.insert(name.clone(), AttrType::required(ty));
    }
    Type::Record(RecordType::known(attrs, false))
}

fn infer_extension_call(
    ctx: &TypingContext,
    sink: &mut DiagnosticSink,
    name: &str,
    args: &[Expr],
) -> Type {
    let arg_types: Vec<Type> = args.iter().map(|a| infer_reset(ctx, sink, a)).collect();

    if let Some(kind) = extensions::constructor_kind(name) {
        if let [Expr::Literal(Literal::String(text))] = args {
            if !extensions::parse_literal(kind, text) {
                sink.push(
                    Diagnostic::new(ErrorCode::InvalidLiteral, "extension literal failed to parse")
                        .with_detail("function", name.to_string())
                        .with_detail("literal", text.clone()),
                );
            }
        }
    }

    let Some(sig) = extensions::signature(name) else {
        // Unknown function name: permissive (§6.4).
        return Type::Unknown;
    };

    if sig.params.len() != arg_types.len() {
        sink.push(
            Diagnostic::new(ErrorCode::ExtensionError, "wrong number of arguments")
                .with_detail("function", name.to_string())
                .with_detail("expected", sig.params.len().to_string())
                .with_detail("actual", arg_types.len().to_string()),
        );
        return sig.ret;
    }
    for (expected, actual) in sig.params.iter().zip(arg_types.iter()) {
        if !types::assignable(expected, actual) && !matches!(actual, Type::Unknown) {
            sink.push(
                Diagnostic::new(ErrorCode::ExtensionError, "argument has the wrong type")
                    .with_detail("function", name.to_string())
                    .with_detail("expected", types::render(expected))
                    .with_detail("actual", types::render(actual)),
            );
        }
    }
    sig.ret
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ActionTypeInfo, ActionUid as SchemaActionUid, EntityTypeInfo, TypeEnvironment, ValidatorOptions};
    use std::collections::BTreeSet;

    fn env_with_user_doc() -> TypeEnvironment {
        let mut entity_types = BTreeMap::new();
        let mut attrs = BTreeMap::new();
        attrs.insert("age".to_string(), AttrType::required(Type::Long));
        attrs.insert("email".to_string(), AttrType::optional(Type::String));
        entity_types.insert(
            "User".to_string(),
            EntityTypeInfo {
                open: false,
                attrs,
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
        action_types.insert(
            SchemaActionUid::new("Action", "view"),
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

    fn ctx_for_user(env: &TypeEnvironment) -> TypingContext<'_> {
        let mut ctx = TypingContext::new(env);
        ctx.principal_types = BTreeSet::from(["User".to_string()]);
        ctx.resource_types = BTreeSet::from(["Document".to_string()]);
        ctx
    }

    #[test]
    fn optional_attribute_access_without_has_flags_attribute_access() {
        let env = env_with_user_doc();
        let ctx = ctx_for_user(&env);
        let mut sink = DiagnosticSink::new();
        let expr = Expr::eq(
            Expr::getattr(Expr::var(Var::Principal), "email"),
            Expr::string("x"),
        );
        let ty = infer(&ctx, &mut sink, &expr);
        assert_eq!(ty, Type::Bool);
        assert!(sink
            .as_slice()
            .iter()
            .any(|d| d.code == ErrorCode::AttributeAccess));
    }

    #[test]
    fn missing_attribute_on_entity_emits_attribute_not_found() {
        let env = env_with_user_doc();
        let ctx = ctx_for_user(&env);
        let mut sink = DiagnosticSink::new();
        let expr = Expr::getattr(Expr::var(Var::Principal), "name");
        let ty = infer(&ctx, &mut sink, &expr);
        assert_eq!(ty, Type::Unknown);
        assert!(sink
            .as_slice()
            .iter()
            .any(|d| d.code == ErrorCode::AttributeNotFound));
    }

    #[test]
    fn disjoint_principal_resource_equality_is_impossible() {
        let env = env_with_user_doc();
        let mut ctx = ctx_for_user(&env);
        ctx.resource_types = BTreeSet::from(["Document".to_string()]);
        let mut sink = DiagnosticSink::new();
        let expr = Expr::eq(Expr::var(Var::Principal), Expr::var(Var::Resource));
        infer(&ctx, &mut sink, &expr);
        assert!(sink
            .as_slice()
            .iter()
            .any(|d| d.code == ErrorCode::ImpossiblePolicy));
    }

    #[test]
    fn empty_set_literal_emits_empty_set() {
        let env = env_with_user_doc();
        let ctx = ctx_for_user(&env);
        let mut sink = DiagnosticSink::new();
        let ty = infer(&ctx, &mut sink, &Expr::Set(vec![]));
        assert_eq!(ty, Type::set_of(Type::Unknown));
        assert!(sink.as_slice().iter().any(|d| d.code == ErrorCode::EmptySet));
    }

    #[test]
    fn invalid_ip_literal_emits_invalid_literal() {
        let env = env_with_user_doc();
        let ctx = ctx_for_user(&env);
        let mut sink = DiagnosticSink::new();
        let expr = Expr::ExtensionCall {
            name: "ip".to_string(),
            args: vec![Expr::string("not-an-ip")],
        };
        infer(&ctx, &mut sink, &expr);
        assert!(sink
            .as_slice()
            .iter()
            .any(|d| d.code == ErrorCode::InvalidLiteral));
    }

    #[test]
    fn attribute_depth_limit_is_enforced() {
        let mut env = env_with_user_doc();
        env.options = ValidatorOptions::default().with_max_attribute_level(1);
        let ctx = ctx_for_user(&env);
        let mut sink = DiagnosticSink::new();
        let deep = Expr::getattr(Expr::getattr(Expr::var(Var::Principal), "age"), "nested");
        infer(&ctx, &mut sink, &deep);
        assert!(sink
            .as_slice()
            .iter()
            .any(|d| d.code == ErrorCode::LevelExceeded));
    }

    #[test]
    fn impossible_in_when_ancestor_unreachable() {
        let env = env_with_user_doc();
        let ctx = ctx_for_user(&env);
        let mut sink = DiagnosticSink::new();
        let expr = Expr::is_in(
            Expr::var(Var::Principal),
            Expr::euid(EntityUid::new("Ghost", "x")),
        );
        infer(&ctx, &mut sink, &expr);
        assert!(sink
            .as_slice()
            .iter()
            .any(|d| d.code == ErrorCode::ImpossiblePolicy));
    }
}
