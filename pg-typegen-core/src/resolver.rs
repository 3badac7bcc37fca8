use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::casing::{is_identifier, to_pascal};
use crate::catalog::{Catalog, CatalogFailure, TypeEntry, TypeKind, bounded};
use crate::types::{ArrayType, CompositeField, CompositeType, EnumType, ResolvedType, ScalarType, TypeId};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolutionError {
    #[error("types {first} and {second} both generate the name {name}")]
    DuplicateName {
        name: String,
        first: String,
        second: String,
    },
    #[error("type cycle: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },
    #[error("type {name} declares a dependency on itself")]
    SelfReference { name: String },
    #[error("type {name} ({type_id}) has no mapping")]
    Unmapped { type_id: TypeId, name: String },
    #[error("declaration {name} depends on undeclared type {missing}")]
    MissingDeclaration { name: String, missing: TypeId },
}

/// What the catalog told us about a non built-in type.
#[derive(Debug, Clone)]
enum LoadedType {
    Enum(TypeEntry, Vec<String>),
    Composite(TypeEntry, Vec<(String, TypeId)>),
    Array(TypeEntry, TypeId),
    Domain(TypeEntry, TypeId),
    Unsupported(TypeEntry),
}

/// Maps database types to [`ResolvedType`]s, once per type per run.
///
/// Resolution is split in two. [`TypeResolver::load`] walks the catalog for
/// every type reachable from a root type. [`TypeResolver::resolve`] then
/// builds the resolved type from the loaded entries without further I/O.
#[derive(Debug, Default)]
pub struct TypeResolver {
    loaded: HashMap<TypeId, LoadedType>,
    resolved: HashMap<TypeId, Arc<ResolvedType>>,
    // generated name -> (type id, qualified pg name)
    names: HashMap<String, (TypeId, String)>,
    // declared element type id -> its array, shared by arrays over domains
    arrays: HashMap<TypeId, Arc<ResolvedType>>,
    in_progress: Vec<TypeId>,
}

impl TypeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetches catalog entries for `root` and every type it refers to.
    pub async fn load<C: Catalog>(
        &mut self,
        catalog: &C,
        root: TypeId,
        timeout: Duration,
    ) -> Result<(), CatalogFailure> {
        let mut pending = vec![root];
        while let Some(type_id) = pending.pop() {
            if ScalarType::builtin(type_id).is_some() || self.loaded.contains_key(&type_id) {
                continue;
            }
            let entry = bounded(timeout, catalog.lookup_type(type_id)).await?;
            debug!(%type_id, name = %entry.qualified_name(), "loading type");
            let loaded = match entry.kind {
                TypeKind::Enum => {
                    let labels = bounded(timeout, catalog.enum_labels(type_id)).await?;
                    LoadedType::Enum(entry, labels)
                }
                TypeKind::Composite => {
                    let fields = bounded(timeout, catalog.composite_fields(type_id)).await?;
                    // Reversed so fields load in declaration order.
                    pending.extend(fields.iter().rev().map(|(_, field_type)| *field_type));
                    LoadedType::Composite(entry, fields)
                }
                TypeKind::Array { elem } => {
                    pending.push(elem);
                    LoadedType::Array(entry, elem)
                }
                TypeKind::Domain { base } => {
                    pending.push(base);
                    LoadedType::Domain(entry, base)
                }
                TypeKind::Base | TypeKind::Range | TypeKind::Pseudo => LoadedType::Unsupported(entry),
            };
            self.loaded.insert(type_id, loaded);
        }
        Ok(())
    }

    /// Returns the memoized resolution of `type_id`. The type must be built in
    /// or have been loaded.
    pub fn resolve(&mut self, type_id: TypeId) -> Result<Arc<ResolvedType>, ResolutionError> {
        if let Some(resolved) = self.resolved.get(&type_id) {
            return Ok(resolved.clone());
        }
        if let Some(scalar) = ScalarType::builtin(type_id) {
            let resolved = Arc::new(ResolvedType::Scalar { type_id, scalar });
            self.resolved.insert(type_id, resolved.clone());
            return Ok(resolved);
        }
        if self.in_progress.contains(&type_id) {
            let mut path: Vec<String> = self
                .in_progress
                .iter()
                .skip_while(|&&active| active != type_id)
                .map(|active| self.display_name(*active))
                .collect();
            path.push(self.display_name(type_id));
            return Err(ResolutionError::Cycle { path });
        }

        self.in_progress.push(type_id);
        let resolved = self.resolve_loaded(type_id);
        self.in_progress.pop();
        let resolved = resolved?;
        debug!(%type_id, resolved = %resolved, "resolved type");
        self.resolved.insert(type_id, resolved.clone());
        Ok(resolved)
    }

    fn resolve_loaded(&mut self, type_id: TypeId) -> Result<Arc<ResolvedType>, ResolutionError> {
        let Some(loaded) = self.loaded.get(&type_id).cloned() else {
            return Err(ResolutionError::Unmapped {
                type_id,
                name: "<not loaded>".to_owned(),
            });
        };
        let resolved = match loaded {
            LoadedType::Enum(entry, labels) => {
                let name = self.claim_name(to_pascal(&entry.name), &entry)?;
                ResolvedType::Enum(EnumType {
                    type_id,
                    pg_name: entry.qualified_name(),
                    name,
                    labels,
                })
            }
            LoadedType::Composite(entry, fields) => {
                let name = self.claim_name(to_pascal(&entry.name), &entry)?;
                let mut resolved_fields = Vec::with_capacity(fields.len());
                for (idx, (pg_name, field_type)) in fields.into_iter().enumerate() {
                    let ty = self.resolve(field_type)?;
                    resolved_fields.push(CompositeField {
                        name: field_name(&pg_name, idx),
                        pg_name,
                        ty,
                    });
                }
                ResolvedType::Composite(CompositeType {
                    type_id,
                    pg_name: entry.qualified_name(),
                    name,
                    fields: resolved_fields,
                })
            }
            LoadedType::Array(entry, elem) => {
                let elem = self.resolve(elem)?;
                match &*elem {
                    ResolvedType::Scalar { scalar, .. } => ResolvedType::Scalar {
                        type_id,
                        scalar: ScalarType::Array(Box::new(scalar.clone())),
                    },
                    ResolvedType::Enum(EnumType { name, .. })
                    | ResolvedType::Composite(CompositeType { name, .. }) => {
                        if let Some(array) = self.arrays.get(&elem.type_id()) {
                            return Ok(array.clone());
                        }
                        let name = self.claim_name(format!("{name}Array"), &entry)?;
                        let array = Arc::new(ResolvedType::Array(ArrayType {
                            type_id,
                            pg_name: entry.qualified_name(),
                            name,
                            elem: elem.clone(),
                        }));
                        self.arrays.insert(elem.type_id(), array.clone());
                        return Ok(array);
                    }
                    ResolvedType::Array(_) => {
                        return Err(ResolutionError::Unmapped {
                            type_id,
                            name: entry.qualified_name(),
                        });
                    }
                }
            }
            // Domains share the resolution of their base type.
            LoadedType::Domain(_, base) => return self.resolve(base),
            LoadedType::Unsupported(entry) => {
                return Err(ResolutionError::Unmapped {
                    type_id,
                    name: entry.qualified_name(),
                });
            }
        };
        Ok(Arc::new(resolved))
    }

    fn claim_name(&mut self, name: String, entry: &TypeEntry) -> Result<String, ResolutionError> {
        if let Some((owner, owner_name)) = self.names.get(&name) {
            if *owner != entry.type_id {
                return Err(ResolutionError::DuplicateName {
                    name,
                    first: owner_name.clone(),
                    second: entry.qualified_name(),
                });
            }
        }
        self.names
            .insert(name.clone(), (entry.type_id, entry.qualified_name()));
        Ok(name)
    }

    fn display_name(&self, type_id: TypeId) -> String {
        match self.loaded.get(&type_id) {
            Some(
                LoadedType::Enum(entry, _)
                | LoadedType::Composite(entry, _)
                | LoadedType::Array(entry, _)
                | LoadedType::Domain(entry, _)
                | LoadedType::Unsupported(entry),
            ) => entry.qualified_name(),
            None => type_id.to_string(),
        }
    }
}

fn field_name(pg_name: &str, idx: usize) -> String {
    let name = crate::casing::to_snake(pg_name);
    match is_identifier(&name) {
        true => name,
        false => format!("field_{idx}"),
    }
}
