use crate::host::HostValue;
use crate::matcher::MemberMatcher;
use crate::state::{ScriptState, ScriptValue};
use crate::types::{FieldAccess, FieldInfo, MethodInfo, PropertyInfo, TypeRef, Visibility};
use indexmap::IndexMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Members reached through an object handle.
    Instance,
    /// Members reached through a type handle.
    Static,
}

/// Overloads sharing one name. Generic definitions are kept apart so the
/// group can be indexed by type arguments.
#[derive(Clone)]
pub struct MethodGroup {
    pub name: String,
    pub overloads: Vec<MethodInfo>,
    pub generics: Vec<MethodInfo>,
}

impl MethodGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            overloads: Vec::new(),
            generics: Vec::new(),
        }
    }

    pub fn single(method: MethodInfo) -> Self {
        let mut group = Self::new(method.name.clone());
        group.add(method);
        group
    }

    fn add(&mut self, method: MethodInfo) {
        if method.is_generic() {
            self.generics.push(method);
        } else {
            self.overloads.push(method);
        }
    }

    pub fn is_generic(&self) -> bool {
        !self.generics.is_empty()
    }

    pub fn generic_arities(&self) -> Vec<usize> {
        let mut arities: Vec<usize> = self.generics.iter().map(MethodInfo::generic_arity).collect();
        arities.sort_unstable();
        arities.dedup();
        arities
    }
}

#[derive(Clone)]
pub enum Member {
    /// Literal field, resolved once when the table is built.
    Constant(HostValue),
    Field(FieldInfo),
    Property(PropertyInfo),
    Methods(MethodGroup),
    NestedType(TypeRef),
}

impl Member {
    pub fn describe(&self) -> &'static str {
        match self {
            Member::Constant(_) => "constant",
            Member::Field(_) => "field",
            Member::Property(_) => "property",
            Member::Methods(_) => "method",
            Member::NestedType(_) => "nested type",
        }
    }
}

/// Ordered, immutable view of the members one handle kind exposes.
pub struct MemberTable {
    ty: TypeRef,
    scope: Scope,
    members: IndexMap<String, Member>,
    matcher: MemberMatcher,
}

fn listed_field(field: &FieldInfo, scope: Scope) -> bool {
    if field.visibility != Visibility::Public {
        return false;
    }
    match (&field.access, scope) {
        (FieldAccess::Literal(_), Scope::Static) => true,
        (FieldAccess::Literal(_), Scope::Instance) => false,
        (_, Scope::Static) => field.is_static,
        (_, Scope::Instance) => !field.is_static,
    }
}

fn listed_property(property: &PropertyInfo, scope: Scope) -> bool {
    let scoped = match scope {
        Scope::Static => property.is_static,
        Scope::Instance => !property.is_static,
    };
    // Properties with one hidden accessor stay listed so access errors can
    // name them; fully hidden ones are not part of the surface.
    let visible = property.getter.as_ref().map_or(false, |g| g.is_public())
        || property.setter.as_ref().map_or(false, |s| s.is_public())
        || (property.getter.is_some() != property.setter.is_some());
    scoped && visible
}

impl MemberTable {
    /// Collects the members of `ty` and its bases for `scope`; declarations
    /// on derived types shadow inherited ones with the same name.
    pub fn build(state: &mut ScriptState, ty: &TypeRef, scope: Scope) -> Self {
        let mut members: IndexMap<String, Member> = IndexMap::new();
        let mut current = Some(ty.clone());
        while let Some(level) = current {
            let declared = level.members();
            let mut local: IndexMap<String, Member> = IndexMap::new();

            for field in declared.fields.iter().filter(|f| listed_field(f, scope)) {
                let member = match &field.access {
                    FieldAccess::Literal(value) => Member::Constant(value.clone()),
                    _ => Member::Field(field.clone()),
                };
                local.entry(field.name.clone()).or_insert(member);
            }
            for property in declared
                .properties
                .iter()
                .filter(|p| listed_property(p, scope))
            {
                local
                    .entry(property.name.clone())
                    .or_insert_with(|| Member::Property(property.clone()));
            }
            let wants_static = scope == Scope::Static;
            for method in declared
                .methods
                .iter()
                .filter(|m| m.visibility == Visibility::Public && m.is_static == wants_static)
            {
                let entry = local
                    .entry(method.name.clone())
                    .or_insert_with(|| Member::Methods(MethodGroup::new(method.name.clone())));
                if let Member::Methods(group) = entry {
                    group.add(method.clone());
                }
            }
            if scope == Scope::Static {
                for nested in &declared.nested {
                    local
                        .entry(nested.base_name().to_string())
                        .or_insert_with(|| Member::NestedType(nested.clone()));
                }
            }

            for (name, member) in local {
                members.entry(name).or_insert(member);
            }
            current = level.base().cloned();
        }

        let names: Vec<&str> = members.keys().map(String::as_str).collect();
        let matcher = MemberMatcher::intern(state, &names);
        Self {
            ty: ty.clone(),
            scope,
            members,
            matcher,
        }
    }

    /// Empty table for handles without named members.
    pub fn empty(ty: &TypeRef, scope: Scope) -> Self {
        Self {
            ty: ty.clone(),
            scope,
            members: IndexMap::new(),
            matcher: MemberMatcher::default(),
        }
    }

    pub fn ty(&self) -> &TypeRef {
        &self.ty
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// Position of the member named by `key`, if any.
    pub fn position(&self, key: &ScriptValue) -> Option<usize> {
        self.matcher.match_value(key)
    }

    pub fn entry(&self, position: usize) -> Option<(&str, &Member)> {
        self.members
            .get_index(position)
            .map(|(name, member)| (name.as_str(), member))
    }

    pub fn get(&self, name: &str) -> Option<&Member> {
        self.members.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Member)> {
        self.members.iter().map(|(name, member)| (name.as_str(), member))
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
