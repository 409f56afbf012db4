/// Per-entity schema and the registry that owns them
///
/// A schema is built once (props resolved, indices built) and then shared
/// read-only between any number of planning calls.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::index::{build_indexes, Index, KeySpec};
use crate::prop::{find_prop, Prop};
use crate::strategy::{select_strategy, Strategy};
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct EntitySchema {
    pub name: String,
    pub table: String,
    pub props: Vec<Prop>,
    pub indexes: Vec<Index>,
}

impl EntitySchema {
    /// Resolves key declarations against the props and builds the indices.
    ///
    /// Schema errors are prefixed with the entity name.
    pub fn build(
        name: impl Into<String>,
        table: impl Into<String>,
        mut props: Vec<Prop>,
        keys: &[KeySpec],
    ) -> Result<Self> {
        let name = name.into();
        let indexes = build_indexes(keys, &mut props).map_err(|e| e.with_entity(&name))?;

        Ok(Self {
            name,
            table: table.into(),
            props,
            indexes,
        })
    }

    pub fn prop(&self, name: &str) -> Option<&Prop> {
        find_prop(&self.props, name)
    }

    pub fn primary(&self) -> &Index {
        &self.indexes[0]
    }

    /// Picks the access plan for a filter over this entity.
    pub fn strategy(&self, filter: &serde_json::Map<String, serde_json::Value>) -> Strategy {
        select_strategy(&self.table, &self.indexes, filter)
    }
}

/// Explicit registry of entity schemas, keyed by entity name
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    entities: RwLock<HashMap<String, Arc<EntitySchema>>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a built schema; names must be unique.
    pub fn register(&self, schema: EntitySchema) -> Result<Arc<EntitySchema>> {
        let mut entities = self.entities.write();
        if entities.contains_key(&schema.name) {
            return Err(Error::AlreadyExists(schema.name));
        }
        let schema = Arc::new(schema);
        entities.insert(schema.name.clone(), schema.clone());
        Ok(schema)
    }

    pub fn get(&self, name: &str) -> Result<Arc<EntitySchema>> {
        self.entities
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::EntityNotFound(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.entities.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
