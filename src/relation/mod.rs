//! Relations between entities.
//!
//! A [`Relation`] is declared on the owning entity's schema and names the
//! related entity by its registry key, never by its schema value, so
//! entities can reference each other in cycles (`User -> Post -> User`)
//! without recursing at declaration time. Loading is depth-bounded by the
//! caller; see [`resolver`].

pub mod resolver;

use crate::model::Model;
use crate::query::SoftDelete;

/// Kind of association.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    /// The related table holds a foreign key to this entity; at most one row.
    HasOne,
    /// The related table holds a foreign key to this entity.
    HasMany,
    /// This entity holds a foreign key to the related entity.
    BelongsTo,
    /// Linked through a pivot table.
    ManyToMany,
}

impl RelationKind {
    /// Whether loading yields an array rather than a single object.
    pub fn is_collection(&self) -> bool {
        matches!(self, RelationKind::HasMany | RelationKind::ManyToMany)
    }
}

/// Pivot table of a many-to-many relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Through {
    pub table: String,
    /// Pivot column referencing the owning entity's primary key.
    pub foreign_key: String,
    /// Pivot column referencing the related entity's primary key.
    pub related_foreign_key: String,
}

/// A declared association. Column names are database column names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    pub name: String,
    pub kind: RelationKind,
    pub related_entity: String,
    /// `HasOne`/`HasMany`: column on the related table.
    /// `BelongsTo`: column on the owning table.
    /// `ManyToMany`: the pivot column referencing the owner (see [`Through`]).
    pub foreign_key: String,
    pub through: Option<Through>,
    /// Applied to every query the relation issues. Defaults to the related
    /// entity's own policy when unset.
    pub soft_delete: Option<SoftDelete>,
}

impl Relation {
    fn new<M: Model>(name: &str, kind: RelationKind, foreign_key: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            related_entity: M::ENTITY.to_string(),
            foreign_key: foreign_key.to_string(),
            through: None,
            soft_delete: None,
        }
    }

    pub fn has_one<M: Model>(name: &str, foreign_key: &str) -> Self {
        Self::new::<M>(name, RelationKind::HasOne, foreign_key)
    }

    pub fn has_many<M: Model>(name: &str, foreign_key: &str) -> Self {
        Self::new::<M>(name, RelationKind::HasMany, foreign_key)
    }

    pub fn belongs_to<M: Model>(name: &str, foreign_key: &str) -> Self {
        Self::new::<M>(name, RelationKind::BelongsTo, foreign_key)
    }

    /// `through_foreign_key` references this entity, `related_foreign_key`
    /// the related one.
    pub fn many_to_many<M: Model>(
        name: &str,
        through_table: &str,
        through_foreign_key: &str,
        related_foreign_key: &str,
    ) -> Self {
        let mut relation = Self::new::<M>(name, RelationKind::ManyToMany, through_foreign_key);
        relation.through = Some(Through {
            table: through_table.to_string(),
            foreign_key: through_foreign_key.to_string(),
            related_foreign_key: related_foreign_key.to_string(),
        });
        relation
    }

    pub fn with_soft_delete(mut self, soft_delete: SoftDelete) -> Self {
        self.soft_delete = Some(soft_delete);
        self
    }
}

pub use resolver::LoadRequest;
