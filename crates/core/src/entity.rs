use std::fmt;

use serde::{Deserialize, Serialize};

use crate::field_value::{FieldValue, Fields};
use crate::ids::EntityId;

/// A level of the course hierarchy, root first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Course,
    Level,
    Section,
    Module,
    Lesson,
    Exercise,
}

impl EntityKind {
    pub const ALL: [EntityKind; 6] = [
        Self::Course,
        Self::Level,
        Self::Section,
        Self::Module,
        Self::Lesson,
        Self::Exercise,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Course => "course",
            Self::Level => "level",
            Self::Section => "section",
            Self::Module => "module",
            Self::Lesson => "lesson",
            Self::Exercise => "exercise",
        }
    }

    pub fn parent(&self) -> Option<EntityKind> {
        match self {
            Self::Course => None,
            Self::Level => Some(Self::Course),
            Self::Section => Some(Self::Level),
            Self::Module => Some(Self::Section),
            Self::Lesson => Some(Self::Module),
            Self::Exercise => Some(Self::Lesson),
        }
    }

    pub fn child(&self) -> Option<EntityKind> {
        match self {
            Self::Course => Some(Self::Level),
            Self::Level => Some(Self::Section),
            Self::Section => Some(Self::Module),
            Self::Module => Some(Self::Lesson),
            Self::Lesson => Some(Self::Exercise),
            Self::Exercise => None,
        }
    }

    /// Siblings under a parent carry a dense `order`. Courses are roots and
    /// are listed, not ordered.
    pub fn is_orderable(&self) -> bool {
        self.parent().is_some()
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A node of the catalog as the server (or an optimistic write) describes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub kind: EntityKind,
    pub parent_id: Option<EntityId>,
    /// 1-based position among siblings.
    pub order: u32,
    pub fields: Fields,
}

impl Entity {
    pub fn new(id: impl Into<EntityId>, kind: EntityKind, parent_id: Option<EntityId>, order: u32) -> Self {
        Self {
            id: id.into(),
            kind,
            parent_id,
            order,
            fields: Fields::new(),
        }
    }

    pub fn with_field(mut self, key: &str, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub fn field(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    /// Overlay `patch` onto this entity's fields; keys absent from the patch
    /// keep their current value.
    pub fn merge_fields(&mut self, patch: &Fields) {
        for (key, value) in patch {
            self.fields.insert(key.clone(), value.clone());
        }
    }

    pub fn is_provisional(&self) -> bool {
        self.id.is_provisional()
    }
}

/// A new position for one entity, as sent in a reorder request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderAssignment {
    pub id: EntityId,
    pub order: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hierarchy_is_consistent() {
        for kind in EntityKind::ALL {
            if let Some(parent) = kind.parent() {
                assert_eq!(parent.child(), Some(kind));
            }
            if let Some(child) = kind.child() {
                assert_eq!(child.parent(), Some(kind));
            }
        }
        assert!(!EntityKind::Course.is_orderable());
        assert!(EntityKind::Level.is_orderable());
        assert!(EntityKind::Exercise.is_orderable());
    }

    #[test]
    fn merge_fields_overlays_patch() {
        let mut lesson = Entity::new("l1", EntityKind::Lesson, Some("m1".into()), 1)
            .with_field("title", "Greetings")
            .with_field("minutes", 10i64);
        let mut patch = Fields::new();
        patch.insert("title".into(), FieldValue::from("Saludos"));
        lesson.merge_fields(&patch);

        assert_eq!(lesson.field("title"), Some(&FieldValue::from("Saludos")));
        assert_eq!(lesson.field("minutes"), Some(&FieldValue::Integer(10)));
    }
}
