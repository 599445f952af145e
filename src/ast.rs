//! Policy abstract syntax (§3, §4.4 input). Surface-syntax parsing is out of
//! scope for this core; callers hand it an already-parsed [`Policy`] tree.

use std::collections::BTreeMap;

/// A concrete `(type, id)` pair naming one entity, including action
/// entities (§3.3, GLOSSARY "EntityUID").
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityUid {
    pub ty: String,
    pub id: String,
}

impl EntityUid {
    pub fn new(ty: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            ty: ty.into(),
            id: id.into(),
        }
    }
}

impl std::fmt::Display for EntityUid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}::\"{}\"", self.ty, self.id)
    }
}

/// One of the four policy variables (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Var {
    Principal,
    Action,
    Resource,
    Context,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Bool(bool),
    Long(i64),
    String(String),
    EntityUid(EntityUid),
}

/// A policy condition expression tree (§4.4 "per-node rules").
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    Var(Var),

    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),

    Neg(Box<Expr>),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),

    Lt(Box<Expr>, Box<Expr>),
    Le(Box<Expr>, Box<Expr>),
    Gt(Box<Expr>, Box<Expr>),
    Ge(Box<Expr>, Box<Expr>),

    Eq(Box<Expr>, Box<Expr>),
    NotEq(Box<Expr>, Box<Expr>),

    /// `e is T`
    Is { expr: Box<Expr>, entity_type: String },
    /// `e is T in e2`
    IsIn {
        expr: Box<Expr>,
        entity_type: String,
        in_expr: Box<Expr>,
    },
    /// `e in e2`
    In(Box<Expr>, Box<Expr>),

    /// `e.attr`
    GetAttr { expr: Box<Expr>, attr: String },
    /// `e has attr`
    Has { expr: Box<Expr>, attr: String },

    Contains(Box<Expr>, Box<Expr>),
    ContainsAll(Box<Expr>, Box<Expr>),
    ContainsAny(Box<Expr>, Box<Expr>),
    IsEmpty(Box<Expr>),

    Like { expr: Box<Expr>, pattern: String },

    If {
        cond: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Box<Expr>,
    },

    Set(Vec<Expr>),
    Record(BTreeMap<String, Expr>),

    /// A call to one of the named extension functions (§6.4).
    ExtensionCall { name: String, args: Vec<Expr> },

    GetTag { expr: Box<Expr>, tag: Box<Expr> },
    HasTag { expr: Box<Expr>, tag: Box<Expr> },
}

impl Expr {
    pub fn val(lit: Literal) -> Self {
        Self::Literal(lit)
    }

    pub fn bool(b: bool) -> Self {
        Self::Literal(Literal::Bool(b))
    }

    pub fn long(n: i64) -> Self {
        Self::Literal(Literal::Long(n))
    }

    pub fn string(s: impl Into<String>) -> Self {
        Self::Literal(Literal::String(s.into()))
    }

    pub fn euid(uid: EntityUid) -> Self {
        Self::Literal(Literal::EntityUid(uid))
    }

    pub fn var(v: Var) -> Self {
        Self::Var(v)
    }

    pub fn getattr(base: Expr, attr: impl Into<String>) -> Self {
        Self::GetAttr {
            expr: Box::new(base),
            attr: attr.into(),
        }
    }

    pub fn has(base: Expr, attr: impl Into<String>) -> Self {
        Self::Has {
            expr: Box::new(base),
            attr: attr.into(),
        }
    }

    pub fn eq(lhs: Expr, rhs: Expr) -> Self {
        Self::Eq(Box::new(lhs), Box::new(rhs))
    }

    pub fn and(lhs: Expr, rhs: Expr) -> Self {
        Self::And(Box::new(lhs), Box::new(rhs))
    }

    pub fn or(lhs: Expr, rhs: Expr) -> Self {
        Self::Or(Box::new(lhs), Box::new(rhs))
    }

    pub fn not(inner: Expr) -> Self {
        Self::Not(Box::new(inner))
    }

    pub fn is_in(base: Expr, other: Expr) -> Self {
        Self::In(Box::new(base), Box::new(other))
    }
}

/// A scope constraint on `principal` or `resource` (§3.5 GLOSSARY "Scope").
#[derive(Debug, Clone, PartialEq)]
pub enum PrincipalOrResourceConstraint {
    Any,
    Eq(EntityUid),
    Is(String),
    In(EntityUid),
    IsIn(String, EntityUid),
}

impl PrincipalOrResourceConstraint {
    /// The explicit entity-type name this constraint pins the variable to,
    /// if any (§4.5 "candidate type computation"). A bare `in` does not
    /// pin the type — `principal in Group::"admins"` is satisfied by any
    /// entity type reachable to `Group`, not just `Group` itself — so only
    /// `==`/`is`/`is ... in` narrow the candidate set.
    pub fn explicit_type(&self) -> Option<&str> {
        match self {
            Self::Any => None,
            Self::Eq(uid) => Some(uid.ty.as_str()),
            Self::Is(ty) => Some(ty.as_str()),
            Self::In(_) => None,
            Self::IsIn(ty, _) => Some(ty.as_str()),
        }
    }
}

/// A scope constraint on `action`.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionConstraint {
    Any,
    Eq(EntityUid),
    In(Vec<EntityUid>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PolicyScope {
    pub principal: PrincipalOrResourceConstraint,
    pub action: ActionConstraint,
    pub resource: PrincipalOrResourceConstraint,
}

impl PolicyScope {
    pub fn unconstrained() -> Self {
        Self {
            principal: PrincipalOrResourceConstraint::Any,
            action: ActionConstraint::Any,
            resource: PrincipalOrResourceConstraint::Any,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionKind {
    When,
    Unless,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub kind: ConditionKind,
    pub body: Expr,
}

impl Condition {
    pub fn when(body: Expr) -> Self {
        Self {
            kind: ConditionKind::When,
            body,
        }
    }

    pub fn unless(body: Expr) -> Self {
        Self {
            kind: ConditionKind::Unless,
            body,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Permit,
    Forbid,
}

/// A full policy: effect, scope, and zero or more `when`/`unless` clauses.
#[derive(Debug, Clone, PartialEq)]
pub struct Policy {
    pub id: String,
    pub effect: Effect,
    pub scope: PolicyScope,
    pub conditions: Vec<Condition>,
}

impl Policy {
    pub fn new(id: impl Into<String>, effect: Effect, scope: PolicyScope) -> Self {
        Self {
            id: id.into(),
            effect,
            scope,
            conditions: Vec::new(),
        }
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_uid_display() {
        let uid = EntityUid::new("User", "alice");
        assert_eq!(uid.to_string(), "User::\"alice\"");
    }

    #[test]
    fn scope_explicit_type_extraction() {
        assert_eq!(PrincipalOrResourceConstraint::Any.explicit_type(), None);
        assert_eq!(
            PrincipalOrResourceConstraint::Eq(EntityUid::new("User", "alice")).explicit_type(),
            Some("User")
        );
        assert_eq!(
            PrincipalOrResourceConstraint::Is("User".to_string()).explicit_type(),
            Some("User")
        );
        assert_eq!(
            PrincipalOrResourceConstraint::In(EntityUid::new("Group", "admins")).explicit_type(),
            None,
            "a bare `in` must not pin the candidate type to the ancestor's type"
        );
        assert_eq!(
            PrincipalOrResourceConstraint::IsIn("User".to_string(), EntityUid::new("Group", "admins"))
                .explicit_type(),
            Some("User")
        );
    }

    #[test]
    fn policy_builder_accumulates_conditions() {
        let policy = Policy::new("p0", Effect::Permit, PolicyScope::unconstrained())
            .with_condition(Condition::when(Expr::bool(true)))
            .with_condition(Condition::unless(Expr::bool(false)));
        assert_eq!(policy.conditions.len(), 2);
        assert_eq!(policy.conditions[0].kind, ConditionKind::When);
        assert_eq!(policy.conditions[1].kind, ConditionKind::Unless);
    }
}
