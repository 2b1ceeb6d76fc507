//! Relationship collection naming.
//!
//! Join collections are named from the participating types and the properties
//! that declare the relationship:
//!
//! - one-to-many `Author.Books -> Book`: `[Author~Book(Books)]`
//! - many-to-many `Post.Tags <-> Tag.Posts`, owned by `Post`: `[(Tags)Post~Tag(Posts)]`
//!
//! Both sides of a many-to-many relationship resolve to the owner-first name,
//! so they share one physical collection. The characters `[ ] ( ) ~` are
//! reserved by the encoding and rejected in type and property names, which
//! keeps distinct relationships from colliding.
//!
//! [`discovery_pattern`] matches every collection name in which a type takes
//! part, on either side, in both the one-to-many and many-to-many forms.

use crate::error::LinkError;
use crate::store::JoinField;
use regex::Regex;
use std::fmt;

const RESERVED: [char; 5] = ['[', ']', '(', ')', '~'];

/// Which side of a relationship a wrapper stands on
///
/// On the normal side the owning entity is the join record's parent; on the
/// inverse side of a many-to-many relationship it is the child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Side {
    #[default]
    Normal,
    Inverse,
}

impl Side {
    /// Join field matched against the owning entity's ID
    pub fn owner_field(self) -> JoinField {
        match self {
            Side::Normal => JoinField::Parent,
            Side::Inverse => JoinField::Child,
        }
    }

    /// Join field holding the related entity's ID
    pub fn target_field(self) -> JoinField {
        self.owner_field().opposite()
    }

    /// `(ParentID, ChildID)` for an edge between `owner_id` and `target_id`
    pub fn pair(self, owner_id: &str, target_id: &str) -> (String, String) {
        match self {
            Side::Normal => (owner_id.to_string(), target_id.to_string()),
            Side::Inverse => (target_id.to_string(), owner_id.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationKind {
    OneToMany,
    ManyToMany,
}

/// A validated relationship declaration
///
/// For many-to-many relationships the parent is the owner side.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelationDef {
    kind: RelationKind,
    parent: String,
    parent_property: String,
    child: String,
    child_property: Option<String>,
}

impl RelationDef {
    /// `parent.property` holds many `child`s
    pub fn one_to_many(parent: &str, property: &str, child: &str) -> Result<Self, LinkError> {
        validate_name("type", parent)?;
        validate_name("property", property)?;
        validate_name("type", child)?;
        Ok(Self {
            kind: RelationKind::OneToMany,
            parent: parent.to_string(),
            parent_property: property.to_string(),
            child: child.to_string(),
            child_property: None,
        })
    }

    /// `owner.owner_property` and `target.target_property` reference each other
    pub fn many_to_many(
        owner: &str,
        owner_property: &str,
        target: &str,
        target_property: &str,
    ) -> Result<Self, LinkError> {
        validate_name("type", owner)?;
        validate_name("property", owner_property)?;
        validate_name("type", target)?;
        validate_name("property", target_property)?;
        Ok(Self {
            kind: RelationKind::ManyToMany,
            parent: owner.to_string(),
            parent_property: owner_property.to_string(),
            child: target.to_string(),
            child_property: Some(target_property.to_string()),
        })
    }

    pub fn kind(&self) -> RelationKind {
        self.kind
    }

    pub fn parent_type(&self) -> &str {
        &self.parent
    }

    pub fn child_type(&self) -> &str {
        &self.child
    }

    pub fn collection_name(&self) -> String {
        collection_name(
            &self.parent,
            &self.parent_property,
            &self.child,
            self.child_property.as_deref(),
            Side::Normal,
        )
    }

    /// Whether `type_name` takes part on either side
    pub fn mentions(&self, type_name: &str) -> bool {
        self.parent == type_name || self.child == type_name
    }
}

impl fmt::Display for RelationDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.collection_name())
    }
}

/// Join collection name for a relationship seen from `parent`'s side
///
/// `child_property` is `None` for one-to-many relationships. For
/// many-to-many, calling from the inverse side with the arguments mirrored
/// and [`Side::Inverse`] yields the same name as the owner side.
///
/// ```
/// use lifelink::relation::{collection_name, Side};
///
/// assert_eq!(collection_name("Author", "Books", "Book", None, Side::Normal), "[Author~Book(Books)]");
/// assert_eq!(
///     collection_name("Tag", "Posts", "Post", Some("Tags"), Side::Inverse),
///     collection_name("Post", "Tags", "Tag", Some("Posts"), Side::Normal),
/// );
/// ```
pub fn collection_name(
    parent: &str,
    parent_property: &str,
    child: &str,
    child_property: Option<&str>,
    side: Side,
) -> String {
    match (child_property, side) {
        (None, _) => format!("[{parent}~{child}({parent_property})]"),
        (Some(child_property), Side::Normal) => {
            format!("[({parent_property}){parent}~{child}({child_property})]")
        }
        (Some(child_property), Side::Inverse) => {
            format!("[({child_property}){child}~{parent}({parent_property})]")
        }
    }
}

/// Pattern matching every join collection name that mentions `type_name`
pub fn discovery_pattern(type_name: &str) -> Result<Regex, LinkError> {
    validate_name("type", type_name)?;
    let name = regex::escape(type_name);
    Regex::new(&format!(r"^\[(?:\([^()]*\))?{name}~|~{name}\("))
        .map_err(|e| LinkError::InvalidName(e.to_string()))
}

fn validate_name(what: &str, name: &str) -> Result<(), LinkError> {
    if name.is_empty() {
        return Err(LinkError::InvalidName(format!("{what} name is empty")));
    }
    if let Some(c) = name.chars().find(|c| RESERVED.contains(c)) {
        return Err(LinkError::InvalidName(format!(
            "{what} name `{name}` contains reserved character `{c}`"
        )));
    }
    Ok(())
}
