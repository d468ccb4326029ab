//! Resolved model: one entry per exposed table with its field rules and embeddable relations.
//! Routes dispatch on the table name through this registry.

use crate::catalog::{Catalog, ForeignKeyDescriptor, TableDescriptor};
use crate::fields::FieldSet;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// to_one: we hold the foreign key; to_many: they hold a foreign key to us.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IncludeDirection {
    ToOne,
    ToMany,
}

/// An embeddable relation, requested with `?embed=<name>`.
#[derive(Clone, Debug, Serialize)]
pub struct IncludeSpec {
    pub name: String,
    pub direction: IncludeDirection,
    pub related_table: String,
    /// Our side of the join (our FK columns for to_one; the referenced columns for to_many).
    pub our_columns: Vec<String>,
    /// Their side, positionally matching `our_columns`.
    pub their_columns: Vec<String>,
    #[serde(skip)]
    pub constraint: String,
}

#[derive(Clone, Debug)]
pub struct ResolvedEntity {
    pub table: Arc<TableDescriptor>,
    pub fields: FieldSet,
    pub includes: Vec<IncludeSpec>,
}

impl ResolvedEntity {
    pub fn name(&self) -> &str {
        &self.table.name
    }

    pub fn include(&self, name: &str) -> Option<&IncludeSpec> {
        self.includes.iter().find(|i| i.name == name)
    }
}

#[derive(Clone, Debug, Default)]
pub struct ResolvedModel {
    pub catalog: Arc<Catalog>,
    entities: BTreeMap<String, Arc<ResolvedEntity>>,
}

fn to_one_name(fk: &ForeignKeyDescriptor) -> String {
    match fk.columns.as_slice() {
        [single] => single
            .strip_suffix("_id")
            .filter(|s| !s.is_empty())
            .unwrap_or(&fk.referenced_table)
            .to_string(),
        _ => fk.referenced_table.clone(),
    }
}

fn includes_for(table: &TableDescriptor, catalog: &Catalog) -> Vec<IncludeSpec> {
    let mut candidates: Vec<IncludeSpec> = table
        .foreign_keys
        .iter()
        .map(|fk| IncludeSpec {
            name: to_one_name(fk),
            direction: IncludeDirection::ToOne,
            related_table: fk.referenced_table.clone(),
            our_columns: fk.columns.clone(),
            their_columns: fk.referenced_columns.clone(),
            constraint: fk.name.clone(),
        })
        .collect();
    for (other, fk) in catalog.referencing(&table.name) {
        candidates.push(IncludeSpec {
            name: other.name.clone(),
            direction: IncludeDirection::ToMany,
            related_table: other.name.clone(),
            our_columns: fk.referenced_columns.clone(),
            their_columns: fk.columns.clone(),
            constraint: fk.name.clone(),
        });
    }

    let columns: HashSet<&str> = table.columns.iter().map(|c| c.name.as_str()).collect();
    let mut counts: HashMap<String, usize> = HashMap::new();
    for c in &candidates {
        *counts.entry(c.name.clone()).or_default() += 1;
    }
    for c in &mut candidates {
        if columns.contains(c.name.as_str()) || counts.get(&c.name).copied().unwrap_or(0) > 1 {
            c.name = c.constraint.clone();
        }
    }
    candidates
}

impl ResolvedModel {
    /// Resolve every catalog table into an entity.
    pub fn resolve(catalog: Catalog) -> Self {
        let catalog = Arc::new(catalog);
        let mut model = ResolvedModel {
            catalog: catalog.clone(),
            entities: BTreeMap::new(),
        };
        for table in catalog.tables() {
            let entity = ResolvedEntity {
                table: table.clone(),
                fields: FieldSet::for_table(table),
                includes: includes_for(table, &catalog),
            };
            model.register(entity);
        }
        model
    }

    /// Register an entity, replacing and returning any previous one for the same table.
    pub fn register(&mut self, entity: ResolvedEntity) -> Option<Arc<ResolvedEntity>> {
        tracing::debug!(table = %entity.name(), includes = entity.includes.len(), "registering endpoints");
        self.entities.insert(entity.name().to_string(), Arc::new(entity))
    }

    pub fn entity(&self, table: &str) -> Option<&Arc<ResolvedEntity>> {
        self.entities.get(table)
    }

    pub fn entities(&self) -> impl Iterator<Item = &Arc<ResolvedEntity>> {
        self.entities.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Description of every generated endpoint, served at the API root.
    pub fn describe(&self, prefix: &str, allow_bulk_delete: bool) -> Value {
        let tables: Vec<Value> = self
            .entities()
            .map(|e| {
                let mut collection = vec!["GET", "POST"];
                if allow_bulk_delete {
                    collection.push("DELETE");
                }
                json!({
                    "name": e.name(),
                    "path": format!("{}/{}", prefix, e.name()),
                    "primary_key": e.table.primary_key,
                    "fields": e.fields,
                    "embeds": e.includes,
                    "methods": {
                        "collection": collection,
                        "item": ["GET", "PATCH", "PUT", "DELETE"],
                    },
                })
            })
            .collect();
        let excluded: Vec<Value> = self
            .catalog
            .excluded
            .iter()
            .map(|x| json!({"name": x.name, "reason": x.reason}))
            .collect();
        json!({
            "schema": self.catalog.schema,
            "tables": tables,
            "excluded": excluded,
        })
    }
}
