//! The type lattice (C1): representation, equality categories,
//! assignability, and least-upper-bound.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

/// One of the closed set of nominal extension tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum ExtensionKind {
    IpAddr,
    Decimal,
    DateTime,
    Duration,
}

impl ExtensionKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::IpAddr => "ipaddr",
            Self::Decimal => "decimal",
            Self::DateTime => "datetime",
            Self::Duration => "duration",
        }
    }

    /// Recognizes both schema-facing spellings (`ip`/`ipaddr`) and the
    /// canonical extension tag name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "ipaddr" | "ip" => Some(Self::IpAddr),
            "decimal" => Some(Self::Decimal),
            "datetime" => Some(Self::DateTime),
            "duration" => Some(Self::Duration),
            _ => None,
        }
    }
}

/// An attribute's declared type plus whether it is required.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttrType {
    pub ty: Type,
    pub required: bool,
}

impl AttrType {
    pub fn required(ty: Type) -> Self {
        Self { ty, required: true }
    }

    pub fn optional(ty: Type) -> Self {
        Self {
            ty,
            required: false,
        }
    }
}

/// A record type. The distinction between "no attribute map at all" (an
/// *unknown*-shaped record, e.g. the context of zero effective actions) and
/// "an attribute map that happens to be empty" (a *known*, closed, empty
/// record, e.g. the result of an empty context intersection) is load
/// bearing for §4.5's context-intersection rule, so it is represented
/// explicitly rather than folded into `open`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordType {
    /// `None` means the shape is unknown: any attribute access silently
    /// yields `Unknown`. `Some(map)` (even if `map` is empty) means the
    /// shape is fully known: accessing a name outside `map` is an error.
    pub attrs: Option<BTreeMap<String, AttrType>>,
    /// Whether attributes outside `attrs` are tolerated. Only meaningful
    /// when `attrs` is `Some`; an unknown-shaped record is always
    /// permissive regardless of this flag.
    pub open: bool,
}

impl RecordType {
    /// The "unknown shape" record used when there is no schema information
    /// to go on (e.g. zero effective actions).
    pub fn unknown_open() -> Self {
        Self {
            attrs: None,
            open: true,
        }
    }

    /// A fully known record with the given attributes.
    pub fn known(attrs: BTreeMap<String, AttrType>, open: bool) -> Self {
        Self {
            attrs: Some(attrs),
            open,
        }
    }

    /// The known, closed, empty record produced by an empty context
    /// intersection (§9 design note).
    pub fn closed_empty() -> Self {
        Self::known(BTreeMap::new(), false)
    }

    pub fn is_unknown_shaped(&self) -> bool {
        self.attrs.is_none()
    }

    pub fn get(&self, name: &str) -> Option<&AttrType> {
        self.attrs.as_ref().and_then(|m| m.get(name))
    }
}

/// A type in the policy language's type system (§3.1).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Type {
    Bool,
    Long,
    String,
    /// `None` is a bare, unresolved `Entity()` position.
    Entity(Option<String>),
    AnyEntity,
    Set(Box<Type>),
    Record(RecordType),
    Extension(ExtensionKind),
    /// The checker's "do not complain" placeholder.
    Unknown,
    /// "Schema declared an attribute without a usable type."
    Unspecified,
}

impl Type {
    pub fn entity(name: impl Into<String>) -> Self {
        Self::Entity(Some(name.into()))
    }

    pub fn unresolved_entity() -> Self {
        Self::Entity(None)
    }

    pub fn set_of(elem: Type) -> Self {
        Self::Set(Box::new(elem))
    }

    pub fn is_bool(&self) -> bool {
        matches!(self, Self::Bool | Self::Unknown)
    }

    pub fn is_long(&self) -> bool {
        matches!(self, Self::Long | Self::Unknown)
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Self::String | Self::Unknown)
    }

    pub fn is_entity_like(&self) -> bool {
        matches!(self, Self::Entity(_) | Self::AnyEntity | Self::Unknown)
    }

    pub fn is_set_like(&self) -> bool {
        matches!(self, Self::Set(_) | Self::Unknown)
    }

    pub fn concrete_entity_name(&self) -> Option<&str> {
        match self {
            Self::Entity(Some(n)) => Some(n.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&render(self))
    }
}

/// Render a type the way diagnostic messages quote it.
pub fn render(ty: &Type) -> String {
    match ty {
        Type::Bool => "Bool".to_string(),
        Type::Long => "Long".to_string(),
        Type::String => "String".to_string(),
        Type::Entity(Some(n)) => format!("Entity<{n}>"),
        Type::Entity(None) => "Entity<?>".to_string(),
        Type::AnyEntity => "Entity".to_string(),
        Type::Set(elem) => format!("Set<{}>", render(elem)),
        Type::Record(rec) => match &rec.attrs {
            None => "Record<?>".to_string(),
            Some(attrs) => {
                let mut parts: Vec<String> = attrs
                    .iter()
                    .map(|(name, at)| {
                        if at.required {
                            format!("{name}: {}", render(&at.ty))
                        } else {
                            format!("{name}?: {}", render(&at.ty))
                        }
                    })
                    .collect();
                if rec.open {
                    parts.push("...".to_string());
                }
                format!("{{{}}}", parts.join(", "))
            }
        },
        Type::Extension(k) => k.name().to_string(),
        Type::Unknown => "Unknown".to_string(),
        Type::Unspecified => "Unspecified".to_string(),
    }
}

/// The equality-comparability category of a type (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Bool,
    Long,
    String,
    /// All entity names and `AnyEntity` share one category.
    Entity,
    Set,
    Record,
    Extension(ExtensionKind),
    Unknown,
    Unspecified,
}

/// `category(t)` from the contract in §4.1.
pub fn category(ty: &Type) -> Category {
    match ty {
        Type::Bool => Category::Bool,
        Type::Long => Category::Long,
        Type::String => Category::String,
        Type::Entity(_) | Type::AnyEntity => Category::Entity,
        Type::Set(_) => Category::Set,
        Type::Record(_) => Category::Record,
        Type::Extension(k) => Category::Extension(*k),
        Type::Unknown => Category::Unknown,
        Type::Unspecified => Category::Unspecified,
    }
}

fn is_wildcard(ty: &Type) -> bool {
    matches!(ty, Type::Unknown | Type::Unspecified)
}

/// Are `t1` and `t2` comparable with `==`/`!=`? Categories must match, or
/// at least one side must be `Unknown`/`Unspecified`; records additionally
/// require a valid LUB.
pub fn comparable(t1: &Type, t2: &Type) -> bool {
    if is_wildcard(t1) || is_wildcard(t2) {
        return true;
    }
    if category(t1) != category(t2) {
        return false;
    }
    if matches!((t1, t2), (Type::Record(_), Type::Record(_))) {
        return lub(t1, t2).is_some();
    }
    true
}

/// `assignable(expected, actual)` from §4.1.
pub fn assignable(expected: &Type, actual: &Type) -> bool {
    if expected == actual {
        return true;
    }
    match (expected, actual) {
        (Type::Unknown, _) => true,
        (_, Type::Unknown) => false,
        (Type::AnyEntity, Type::Entity(_)) | (Type::Entity(_), Type::AnyEntity) => true,
        (Type::AnyEntity, Type::AnyEntity) => true,
        (Type::Entity(a), Type::Entity(b)) => a == b,
        (Type::Set(a), Type::Set(b)) => assignable(a, b),
        (Type::Record(exp), Type::Record(act)) => record_assignable(exp, act),
        (Type::Extension(a), Type::Extension(b)) => a == b,
        _ => false,
    }
}

fn record_assignable(expected: &RecordType, actual: &RecordType) -> bool {
    let Some(exp_attrs) = &expected.attrs else {
        return true;
    };
    let Some(act_attrs) = &actual.attrs else {
        // An unknown-shaped actual can't be shown to satisfy concrete
        // required attributes.
        return exp_attrs.values().all(|at| !at.required);
    };
    for (name, exp_at) in exp_attrs {
        match act_attrs.get(name) {
            Some(act_at) => {
                if !assignable(&exp_at.ty, &act_at.ty) {
                    return false;
                }
            }
            None => {
                if exp_at.required {
                    return false;
                }
            }
        }
    }
    true
}

/// `lub(t1, t2)` from §4.1. Returns `None` (⊥) when no common supertype
/// exists.
pub fn lub(t1: &Type, t2: &Type) -> Option<Type> {
    if t1 == t2 {
        return Some(t1.clone());
    }
    match (t1, t2) {
        (Type::Unknown, other) | (other, Type::Unknown) => Some(other.clone()),
        (Type::Set(a), Type::Set(b)) => lub(a, b).map(|e| Type::Set(Box::new(e))),
        (Type::Record(a), Type::Record(b)) => record_lub(a, b).map(Type::Record),
        _ => None,
    }
}

fn record_lub(a: &RecordType, b: &RecordType) -> Option<RecordType> {
    let (Some(a_attrs), Some(b_attrs)) = (&a.attrs, &b.attrs) else {
        return Some(RecordType::unknown_open());
    };
    let mut merged = BTreeMap::new();
    for (name, a_at) in a_attrs {
        match b_attrs.get(name) {
            Some(b_at) => {
                let ty = lub(&a_at.ty, &b_at.ty)?;
                merged.insert(
                    name.clone(),
                    AttrType {
                        ty,
                        required: a_at.required && b_at.required,
                    },
                );
            }
            None => {
                // Attribute exclusive to `a`: only acceptable if `b` is open.
                if !b.open {
                    return None;
                }
                merged.insert(name.clone(), AttrType::optional(a_at.ty.clone()));
            }
        }
    }
    for (name, b_at) in b_attrs {
        if !a_attrs.contains_key(name) {
            if !a.open {
                return None;
            }
            merged.insert(name.clone(), AttrType::optional(b_at.ty.clone()));
        }
    }
    Some(RecordType::known(merged, a.open || b.open))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_assignable_as_expected_but_not_as_actual() {
        assert!(assignable(&Type::Unknown, &Type::Long));
        assert!(!assignable(&Type::Long, &Type::Unknown));
    }

    #[test]
    fn any_entity_matches_named_entity_both_ways() {
        assert!(assignable(&Type::AnyEntity, &Type::entity("User")));
        assert!(assignable(&Type::entity("User"), &Type::AnyEntity));
    }

    #[test]
    fn entity_names_must_match() {
        assert!(assignable(&Type::entity("User"), &Type::entity("User")));
        assert!(!assignable(&Type::entity("User"), &Type::entity("Doc")));
    }

    #[test]
    fn set_assignability_is_covariant_over_elem() {
        assert!(assignable(
            &Type::set_of(Type::Unknown),
            &Type::set_of(Type::Long)
        ));
        assert!(!assignable(
            &Type::set_of(Type::Long),
            &Type::set_of(Type::String)
        ));
    }

    #[test]
    fn record_assignability_allows_missing_optional_and_extra_actual_attrs() {
        let mut exp = BTreeMap::new();
        exp.insert("a".to_string(), AttrType::required(Type::Long));
        exp.insert("b".to_string(), AttrType::optional(Type::String));
        let expected = Type::Record(RecordType::known(exp, false));

        let mut act = BTreeMap::new();
        act.insert("a".to_string(), AttrType::required(Type::Long));
        act.insert("c".to_string(), AttrType::required(Type::Bool));
        let actual = Type::Record(RecordType::known(act, false));

        assert!(assignable(&expected, &actual));
    }

    #[test]
    fn record_assignability_fails_missing_required() {
        let mut exp = BTreeMap::new();
        exp.insert("a".to_string(), AttrType::required(Type::Long));
        let expected = Type::Record(RecordType::known(exp, false));
        let actual = Type::Record(RecordType::known(BTreeMap::new(), false));
        assert!(!assignable(&expected, &actual));
    }

    #[test]
    fn extension_matches_only_same_tag() {
        assert!(assignable(
            &Type::Extension(ExtensionKind::IpAddr),
            &Type::Extension(ExtensionKind::IpAddr)
        ));
        assert!(!assignable(
            &Type::Extension(ExtensionKind::IpAddr),
            &Type::Extension(ExtensionKind::Decimal)
        ));
    }

    #[test]
    fn lub_equal_types_is_identity() {
        assert_eq!(lub(&Type::Long, &Type::Long), Some(Type::Long));
    }

    #[test]
    fn lub_unknown_yields_other_side() {
        assert_eq!(lub(&Type::Unknown, &Type::Bool), Some(Type::Bool));
        assert_eq!(lub(&Type::String, &Type::Unknown), Some(Type::String));
    }

    #[test]
    fn lub_incompatible_scalars_is_bottom() {
        assert_eq!(lub(&Type::Long, &Type::String), None);
    }

    #[test]
    fn lub_entity_and_any_entity_is_bottom() {
        assert_eq!(lub(&Type::entity("User"), &Type::AnyEntity), None);
        assert_eq!(lub(&Type::AnyEntity, &Type::entity("User")), None);
    }

    #[test]
    fn lub_record_with_exclusive_attrs_requires_open_on_other_side() {
        let mut a = BTreeMap::new();
        a.insert("x".to_string(), AttrType::required(Type::Long));
        let rec_a = Type::Record(RecordType::known(a, false));

        let mut b = BTreeMap::new();
        b.insert("y".to_string(), AttrType::required(Type::Bool));
        let rec_b_closed = Type::Record(RecordType::known(b.clone(), false));
        let rec_b_open = Type::Record(RecordType::known(b, true));

        assert_eq!(lub(&rec_a, &rec_b_closed), None);
        assert!(lub(&rec_a, &rec_b_open).is_some());
    }

    #[test]
    fn comparable_requires_matching_category_unless_wildcard() {
        assert!(comparable(&Type::Long, &Type::Long));
        assert!(!comparable(&Type::Long, &Type::String));
        assert!(comparable(&Type::Long, &Type::Unknown));
        assert!(comparable(&Type::Unspecified, &Type::Bool));
    }

    #[test]
    fn comparable_entity_group_spans_anyentity_and_names() {
        assert!(comparable(&Type::AnyEntity, &Type::entity("User")));
        assert!(comparable(&Type::entity("User"), &Type::entity("Doc")));
    }

    #[test]
    fn record_type_unknown_vs_closed_empty_distinction() {
        let unknown = RecordType::unknown_open();
        let closed_empty = RecordType::closed_empty();
        assert!(unknown.is_unknown_shaped());
        assert!(!closed_empty.is_unknown_shaped());
        assert_eq!(unknown.get("anything"), None);
        assert_eq!(closed_empty.get("anything"), None);
    }
}
