use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::resolver::ResolutionError;
use crate::types::{ResolvedType, TypeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeclarationKind {
    Enum,
    Composite,
    Array,
}

/// One named type that generated code must declare.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclarationNode {
    pub key: TypeId,
    pub kind: DeclarationKind,
    pub ty: Arc<ResolvedType>,
    /// Keys of declarations this one refers to, in first seen order.
    pub dependencies: Vec<TypeId>,
}

impl DeclarationNode {
    /// Returns `None` for scalars, which are never declared.
    pub fn for_type(ty: &Arc<ResolvedType>) -> Option<Self> {
        let (kind, referenced): (_, Vec<&Arc<ResolvedType>>) = match &**ty {
            ResolvedType::Scalar { .. } => return None,
            ResolvedType::Enum(_) => (DeclarationKind::Enum, vec![]),
            ResolvedType::Composite(composite) => (
                DeclarationKind::Composite,
                composite.fields.iter().map(|field| &field.ty).collect(),
            ),
            ResolvedType::Array(array) => (DeclarationKind::Array, vec![&array.elem]),
        };
        let mut dependencies = vec![];
        for dependency in referenced {
            if dependency.declared_name().is_none() {
                continue;
            }
            let key = dependency.type_id();
            if !dependencies.contains(&key) {
                dependencies.push(key);
            }
        }
        Some(Self {
            key: ty.type_id(),
            kind,
            ty: ty.clone(),
            dependencies,
        })
    }

    pub fn name(&self) -> &str {
        self.ty.declared_name().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    Active,
    Done,
}

/// Every declaration touched during a run, kept in first encountered order.
#[derive(Debug, Default)]
pub struct DeclarationGraph {
    nodes: Vec<DeclarationNode>,
    index: HashMap<TypeId, usize>,
}

impl DeclarationGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Registers `ty` and every declared type reachable from it.
    pub fn add_type(&mut self, ty: &Arc<ResolvedType>) -> Result<(), ResolutionError> {
        let mut pending = vec![ty.clone()];
        while let Some(ty) = pending.pop() {
            if self.index.contains_key(&ty.type_id()) {
                continue;
            }
            let Some(node) = DeclarationNode::for_type(&ty) else {
                continue;
            };
            self.insert(node)?;
            match &*ty {
                ResolvedType::Scalar { .. } | ResolvedType::Enum(_) => {}
                ResolvedType::Composite(composite) => {
                    pending.extend(composite.fields.iter().rev().map(|field| field.ty.clone()));
                }
                ResolvedType::Array(array) => pending.push(array.elem.clone()),
            }
        }
        Ok(())
    }

    /// Adds a node unless its key is already present.
    pub fn insert(&mut self, node: DeclarationNode) -> Result<(), ResolutionError> {
        if node.dependencies.contains(&node.key) {
            return Err(ResolutionError::SelfReference {
                name: node.name().to_owned(),
            });
        }
        if self.index.contains_key(&node.key) {
            return Ok(());
        }
        self.index.insert(node.key, self.nodes.len());
        self.nodes.push(node);
        Ok(())
    }

    /// Orders declarations so each one follows all of its dependencies. Ties
    /// keep insertion order, so identical runs give identical output.
    pub fn ordered(&self) -> Result<Vec<DeclarationNode>, ResolutionError> {
        let mut marks = vec![Mark::Unvisited; self.nodes.len()];
        let mut stack = vec![];
        let mut ordered = Vec::with_capacity(self.nodes.len());
        for idx in 0..self.nodes.len() {
            self.visit(idx, &mut marks, &mut stack, &mut ordered)?;
        }
        Ok(ordered)
    }

    fn visit(
        &self,
        idx: usize,
        marks: &mut [Mark],
        stack: &mut Vec<usize>,
        ordered: &mut Vec<DeclarationNode>,
    ) -> Result<(), ResolutionError> {
        match marks[idx] {
            Mark::Done => return Ok(()),
            Mark::Active => {
                let start = stack.iter().position(|&active| active == idx).unwrap_or(0);
                let mut path: Vec<String> = stack[start..]
                    .iter()
                    .map(|&active| self.nodes[active].name().to_owned())
                    .collect();
                path.push(self.nodes[idx].name().to_owned());
                return Err(ResolutionError::Cycle { path });
            }
            Mark::Unvisited => {}
        }

        let node = &self.nodes[idx];
        marks[idx] = Mark::Active;
        stack.push(idx);
        for dependency in &node.dependencies {
            let Some(&dependency_idx) = self.index.get(dependency) else {
                return Err(ResolutionError::MissingDeclaration {
                    name: node.name().to_owned(),
                    missing: *dependency,
                });
            };
            self.visit(dependency_idx, marks, stack, ordered)?;
        }
        stack.pop();
        marks[idx] = Mark::Done;
        ordered.push(node.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{DeclarationGraph, DeclarationKind, DeclarationNode};
    use crate::resolver::ResolutionError;
    use crate::types::{
        ArrayType, CompositeField, CompositeType, EnumType, ResolvedType, ScalarType, TypeId,
    };

    fn scalar(oid: u32, scalar: ScalarType) -> Arc<ResolvedType> {
        Arc::new(ResolvedType::Scalar {
            type_id: TypeId(oid),
            scalar,
        })
    }

    fn enum_type(oid: u32, name: &str) -> Arc<ResolvedType> {
        Arc::new(ResolvedType::Enum(EnumType {
            type_id: TypeId(oid),
            pg_name: format!("public.{oid}"),
            name: name.to_owned(),
            labels: vec!["a".into()],
        }))
    }

    fn composite(oid: u32, name: &str, fields: &[&Arc<ResolvedType>]) -> Arc<ResolvedType> {
        Arc::new(ResolvedType::Composite(CompositeType {
            type_id: TypeId(oid),
            pg_name: format!("public.{oid}"),
            name: name.to_owned(),
            fields: fields
                .iter()
                .enumerate()
                .map(|(idx, &ty)| CompositeField {
                    pg_name: format!("f{idx}"),
                    name: format!("f{idx}"),
                    ty: ty.clone(),
                })
                .collect(),
        }))
    }

    fn names(nodes: &[DeclarationNode]) -> Vec<&str> {
        nodes.iter().map(DeclarationNode::name).collect()
    }

    fn assert_dependencies_first(nodes: &[DeclarationNode]) {
        for (idx, node) in nodes.iter().enumerate() {
            for dependency in &node.dependencies {
                let position = nodes.iter().position(|other| other.key == *dependency);
                assert!(
                    position.is_some_and(|position| position < idx),
                    "{} is emitted before its dependency {dependency}",
                    node.name()
                );
            }
        }
    }

    #[test]
    fn scalars_are_never_declared() {
        let mut graph = DeclarationGraph::new();
        graph.add_type(&scalar(23, ScalarType::Int4)).unwrap();
        graph
            .add_type(&scalar(1007, ScalarType::Array(Box::new(ScalarType::Int4))))
            .unwrap();
        assert!(graph.is_empty());
    }

    #[test]
    fn nested_types_come_first() {
        let device = enum_type(1, "DeviceType");
        let foo = composite(2, "FooType", &[&scalar(25, ScalarType::Text)]);
        let table = composite(3, "SomeTable", &[&foo, &device, &scalar(25, ScalarType::Text)]);
        let array = Arc::new(ResolvedType::Array(ArrayType {
            type_id: TypeId(4),
            pg_name: "public._some_table".into(),
            name: "SomeTableArray".into(),
            elem: table.clone(),
        }));

        let mut graph = DeclarationGraph::new();
        graph.add_type(&array).unwrap();
        let ordered = graph.ordered().unwrap();
        assert_eq!(names(&ordered), ["FooType", "DeviceType", "SomeTable", "SomeTableArray"]);
        assert_eq!(ordered[2].dependencies, [TypeId(2), TypeId(1)]);
        assert_eq!(ordered[3].kind, DeclarationKind::Array);
        assert_dependencies_first(&ordered);
    }

    #[test]
    fn shared_types_are_declared_once() {
        let status = enum_type(1, "Status");
        let left = composite(2, "Left", &[&status]);
        let right = composite(3, "Right", &[&status, &status]);
        let mut graph = DeclarationGraph::new();
        for ty in [&left, &right, &status, &left] {
            graph.add_type(ty).unwrap();
        }
        let ordered = graph.ordered().unwrap();
        assert_eq!(names(&ordered), ["Status", "Left", "Right"]);
        assert_eq!(ordered[2].dependencies, [TypeId(1)]);
    }

    #[test]
    fn ordering_is_deterministic() {
        let build = || {
            let status = enum_type(1, "Status");
            let mood = enum_type(5, "Mood");
            let inner = composite(2, "Inner", &[&mood]);
            let outer = composite(3, "Outer", &[&inner, &status]);
            let mut graph = DeclarationGraph::new();
            graph.add_type(&status).unwrap();
            graph.add_type(&outer).unwrap();
            graph.ordered().unwrap()
        };
        let first = build();
        assert_eq!(names(&first), ["Status", "Mood", "Inner", "Outer"]);
        assert_eq!(first, build());
    }

    #[test]
    fn self_reference_is_rejected() {
        let status = enum_type(1, "Status");
        let mut node = DeclarationNode::for_type(&status).unwrap();
        node.dependencies.push(node.key);
        let err = DeclarationGraph::new().insert(node).unwrap_err();
        assert_eq!(
            err,
            ResolutionError::SelfReference {
                name: "Status".into()
            }
        );
    }

    #[test]
    fn cycles_are_reported_with_their_path() {
        let a = composite(10, "A", &[]);
        let b = composite(11, "B", &[]);
        let c = composite(12, "C", &[]);
        let mut graph = DeclarationGraph::new();
        for (ty, dependency) in [(&a, 11), (&b, 12), (&c, 10)] {
            let mut node = DeclarationNode::for_type(ty).unwrap();
            node.dependencies.push(TypeId(dependency));
            graph.insert(node).unwrap();
        }
        let err = graph.ordered().unwrap_err();
        assert_eq!(
            err,
            ResolutionError::Cycle {
                path: vec!["A".into(), "B".into(), "C".into(), "A".into()]
            }
        );
    }

    #[test]
    fn missing_dependencies_are_reported() {
        let a = composite(10, "A", &[]);
        let mut node = DeclarationNode::for_type(&a).unwrap();
        node.dependencies.push(TypeId(99));
        let mut graph = DeclarationGraph::new();
        graph.insert(node).unwrap();
        assert_eq!(
            graph.ordered().unwrap_err(),
            ResolutionError::MissingDeclaration {
                name: "A".into(),
                missing: TypeId(99)
            }
        );
    }
}
