/// Index model builder
///
/// Turns an entity's ordered key declarations into physical indices:
/// slot 0 is the primary table key, slots 1..N are global secondary indices.
///
/// Each key component is declared as `[PREFIX#]name`. An empty name declares
/// a static key whose value is always the prefix.

use serde::{Deserialize, Serialize};

use crate::prop::{Prop, PropKind};
use crate::{Error, Result};

/// Index projection type - which attributes to include in index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexProjection {
    /// Project all attributes (default)
    All,
    /// Project only key attributes
    KeysOnly,
    /// Project specific attributes
    Include(Vec<String>),
}

impl Default for IndexProjection {
    fn default() -> Self {
        IndexProjection::All
    }
}

/// Declared read/write capacity; both halves must be given together
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacitySpec {
    pub read: Option<u64>,
    pub write: Option<u64>,
}

/// Provisioned capacity of a built index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityUnits {
    pub read: u64,
    pub write: u64,
}

/// One key declaration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySpec {
    /// Partition key, `[PREFIX#]name`
    pub pk: String,
    /// Sort key, defaults to the partition key declaration
    pub sk: Option<String>,
    pub capacity: Option<CapacitySpec>,
    /// Projected attribute names; `None` projects everything
    pub project: Option<Vec<String>>,
}

impl KeySpec {
    pub fn new(pk: impl Into<String>) -> Self {
        Self {
            pk: pk.into(),
            ..Default::default()
        }
    }

    pub fn with_sk(pk: impl Into<String>, sk: impl Into<String>) -> Self {
        Self {
            pk: pk.into(),
            sk: Some(sk.into()),
            ..Default::default()
        }
    }

    pub fn capacity(mut self, read: u64, write: u64) -> Self {
        self.capacity = Some(CapacitySpec {
            read: Some(read),
            write: Some(write),
        });
        self
    }

    pub fn project(mut self, attributes: Vec<String>) -> Self {
        self.project = Some(attributes);
        self
    }
}

/// One physical key schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    pub slot: usize,
    pub pk: Prop,
    pub sk: Prop,
    pub capacity: Option<CapacityUnits>,
    pub projection: IndexProjection,
}

impl Index {
    pub fn is_primary(&self) -> bool {
        self.slot == 0
    }

    /// Physical index name; the primary key has none.
    pub fn name(&self, table: &str) -> Option<String> {
        if self.is_primary() {
            None
        } else {
            Some(format!("{}-gsi-{}", table, self.slot))
        }
    }

    pub fn key_props(&self) -> [&Prop; 2] {
        [&self.pk, &self.sk]
    }

    /// True when the sort key was defaulted from the partition key.
    pub fn sort_key_mirrors_partition_key(&self) -> bool {
        self.pk.name() == self.sk.name() && self.pk.prefix == self.sk.prefix
    }
}

/// Alias of a key component: `pk`/`sk` for slot 0, `pk{N}`/`sk{N}` otherwise.
pub fn key_alias(role: &str, slot: usize) -> String {
    if slot == 0 {
        role.to_string()
    } else {
        format!("{}{}", role, slot)
    }
}

/// Splits `PREFIX#name` into (`PREFIX#`, `name`) at the last `#`.
pub fn parse_key_component(spec: &str) -> (&str, &str) {
    match spec.rfind('#') {
        Some(pos) => (&spec[..=pos], &spec[pos + 1..]),
        None => ("", spec),
    }
}

/// Builds the ordered index list for an entity.
///
/// Props resolved as keys are updated in place the first time they are used;
/// a prop already committed as a key is cloned for every later use so a
/// field can take part in several indices with different prefixes.
pub fn build_indexes(specs: &[KeySpec], props: &mut [Prop]) -> Result<Vec<Index>> {
    if specs.is_empty() {
        return Err(Error::InvalidKeySchema("at least one key is required".into()));
    }

    let mut indexes = Vec::with_capacity(specs.len());
    for (slot, spec) in specs.iter().enumerate() {
        let capacity = resolve_capacity(slot, spec.capacity)?;
        let projection = resolve_projection(slot, spec.project.as_deref(), props)?;

        let pk = resolve_key(slot, "pk", &spec.pk, props)?;
        let sk_spec = spec.sk.as_deref().unwrap_or(&spec.pk);
        let sk = resolve_key(slot, "sk", sk_spec, props)?;

        tracing::debug!(
            slot,
            pk = %pk.alias,
            sk = %sk.alias,
            "built index"
        );

        indexes.push(Index {
            slot,
            pk,
            sk,
            capacity,
            projection,
        });
    }

    Ok(indexes)
}

fn resolve_key(slot: usize, role: &str, spec: &str, props: &mut [Prop]) -> Result<Prop> {
    let (prefix, name) = parse_key_component(spec);
    let alias = key_alias(role, slot);

    if name.is_empty() {
        if prefix.is_empty() {
            return Err(Error::InvalidKeySchema(format!("key[{}] {} is empty", slot, role)));
        }
        return Ok(Prop {
            kind: PropKind::Static,
            alias,
            prefix: prefix.to_string(),
            ty: crate::PropType::String,
            required: false,
            key: true,
            index: slot,
        });
    }

    let prop = props
        .iter_mut()
        .find(|p| !p.is_static() && p.name() == name)
        .ok_or_else(|| Error::InvalidKeySchema(format!("key[{}] {} is not a prop", slot, name)))?;

    if prop.key {
        let mut cloned = prop.clone();
        cloned.alias = alias;
        cloned.prefix = prefix.to_string();
        cloned.index = slot;
        cloned.required = slot == 0;
        return Ok(cloned);
    }

    prop.alias = alias;
    prop.prefix = prefix.to_string();
    prop.key = true;
    prop.index = slot;
    if slot == 0 {
        prop.required = true;
    }
    Ok(prop.clone())
}

fn resolve_capacity(slot: usize, capacity: Option<CapacitySpec>) -> Result<Option<CapacityUnits>> {
    match capacity {
        None => Ok(None),
        Some(CapacitySpec { read: None, write: None }) => Ok(None),
        Some(CapacitySpec {
            read: Some(read),
            write: Some(write),
        }) => Ok(Some(CapacityUnits { read, write })),
        Some(_) => Err(Error::InvalidKeySchema(format!(
            "key[{}] capacity requires both read and write units",
            slot
        ))),
    }
}

fn resolve_projection(slot: usize, project: Option<&[String]>, props: &[Prop]) -> Result<IndexProjection> {
    let Some(attributes) = project else {
        return Ok(IndexProjection::All);
    };

    for attribute in attributes {
        if crate::prop::find_prop(props, attribute).is_none() {
            return Err(Error::InvalidKeySchema(format!(
                "key[{}] projected attribute {} is not a prop",
                slot, attribute
            )));
        }
    }

    if attributes.is_empty() {
        Ok(IndexProjection::KeysOnly)
    } else {
        Ok(IndexProjection::Include(attributes.to_vec()))
    }
}
