//! The generic dependency graph and its identity model.
//!
//! Every element stored in a [`Graph`] is content-addressed. A vertex states
//! its identity through [`Hashable`], and an edge derives its own identity
//! from the identities of both of its endpoints. This is what allows the
//! graph to deduplicate vertices and edges that were built independently.
//!
//! ## Content vs address identity
//!
//! Structured vertices hash their logical content ([`HashCode::Content`]),
//! so two deep copies of the same vertex collide. Opaque vertices, which have
//! no meaningful content, fall back to their storage address
//! ([`HashCode::Address`]). The address is only stable while the value stays
//! put, so opaque vertices are best kept behind an [`Arc`]: smart pointers
//! always delegate to the value they point at.
//!
//! ## Direction
//!
//! An edge `source -> target` means that *target depends on source*. Walks
//! therefore run sources before targets.

use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::fmt::{Display, Formatter};
use std::hash::Hash;
use std::sync::Arc;

use petgraph::Direction;
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::stable_graph::{NodeIndex, StableGraph};
use petgraph::visit::{Bfs, EdgeRef, IntoEdgeReferences, Reversed, Walker};

use crate::core::Hash32;
use crate::error::GraphError;

/// Identifier of a vertex inside a single [`Graph`].
pub type VertexId = NodeIndex;

/// The identity of a graph element.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum HashCode {
    /// Deterministic structural hash over the logical value.
    Content(Hash32),
    /// Storage address, only meaningful within one process run.
    Address(usize),
}

impl HashCode {
    /// Structural identity of any hashable value.
    pub fn of<T: Hash + ?Sized>(value: &T) -> Self {
        HashCode::Content(Hash32::of(value))
    }

    /// Structural identity tagged with the concrete type of `value`.
    ///
    /// Values of different types hashing the same fields stay distinct.
    /// The tag is the type name, which is only stable for one build.
    pub fn typed<T: Hash + ?Sized>(value: &T) -> Self {
        HashCode::of(&(std::any::type_name::<T>(), value))
    }

    /// Address identity of a value that has no meaningful content.
    pub fn address_of<T: ?Sized>(value: &T) -> Self {
        HashCode::Address(address_of(value))
    }

    pub fn is_content(&self) -> bool {
        matches!(self, HashCode::Content(_))
    }
}

impl Display for HashCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            HashCode::Content(hash) => write!(f, "{hash}"),
            HashCode::Address(addr) => write!(f, "{addr:#x}"),
        }
    }
}

fn address_of<T: ?Sized>(value: &T) -> usize {
    (value as *const T).cast::<()>() as usize
}

/// Capability of every graph element: produce a stable identity.
pub trait Hashable {
    fn hashcode(&self) -> HashCode;

    /// Storage address used when content identity is unavailable.
    fn address(&self) -> usize {
        address_of(self)
    }
}

impl<T: Hashable + ?Sized> Hashable for Arc<T> {
    fn hashcode(&self) -> HashCode {
        (**self).hashcode()
    }

    fn address(&self) -> usize {
        (**self).address()
    }
}

impl<T: Hashable + ?Sized> Hashable for Box<T> {
    fn hashcode(&self) -> HashCode {
        (**self).hashcode()
    }

    fn address(&self) -> usize {
        (**self).address()
    }
}

impl<T: Hashable + ?Sized> Hashable for &T {
    fn hashcode(&self) -> HashCode {
        (**self).hashcode()
    }

    fn address(&self) -> usize {
        (**self).address()
    }
}

/// A unit of planned work.
pub trait Vertex: Hashable + Send + Sync {
    /// Human readable name used in logs, errors and diagrams.
    fn name(&self) -> Cow<'_, str>;
}

impl<T: Vertex + ?Sized> Vertex for Arc<T> {
    fn name(&self) -> Cow<'_, str> {
        (**self).name()
    }
}

impl<T: Vertex + ?Sized> Vertex for Box<T> {
    fn name(&self) -> Cow<'_, str> {
        (**self).name()
    }
}

/// Identity of an edge, derived from both of its endpoints.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct EdgeHash(String);

impl EdgeHash {
    /// Combines the identities of `source` and `target`, in that order.
    ///
    /// When both endpoints carry content identity the result is
    /// `<source hex>-<target hex>`, which survives deep copies. Otherwise
    /// both endpoints fall back to their addresses.
    pub fn between<S, T>(source: &S, target: &T) -> Self
    where
        S: Hashable + ?Sized,
        T: Hashable + ?Sized,
    {
        match (source.hashcode(), target.hashcode()) {
            (HashCode::Content(s), HashCode::Content(t)) => EdgeHash(format!("{s}-{t}")),
            _ => EdgeHash(format!("{:#x}-{:#x}", source.address(), target.address())),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for EdgeHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A directed dependency between two vertices.
pub trait Edge<V> {
    fn source(&self) -> &V;
    fn target(&self) -> &V;
    fn hashcode(&self) -> EdgeHash;
}

/// The default edge: carries both endpoints and nothing else.
#[derive(Clone, Debug)]
pub struct BasicEdge<V> {
    source: V,
    target: V,
}

impl<V> BasicEdge<V> {
    pub fn new(source: V, target: V) -> Self {
        Self { source, target }
    }
}

impl<V: Hashable> Edge<V> for BasicEdge<V> {
    fn source(&self) -> &V {
        &self.source
    }

    fn target(&self) -> &V {
        &self.target
    }

    fn hashcode(&self) -> EdgeHash {
        EdgeHash::between(&self.source, &self.target)
    }
}

/// A set of vertices and a set of directed edges between them, both
/// deduplicated by identity.
pub struct Graph<V> {
    inner: StableGraph<V, EdgeHash>,
    vertices: HashMap<HashCode, VertexId>,
    edges: HashSet<EdgeHash>,
}

impl<V: Vertex> Graph<V> {
    pub fn new() -> Self {
        Self {
            inner: StableGraph::new(),
            vertices: HashMap::new(),
            edges: HashSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.node_count() == 0
    }

    /// Adds a vertex, or returns the id of an existing vertex with the same
    /// identity.
    pub fn add(&mut self, vertex: V) -> VertexId {
        let code = vertex.hashcode();
        if let Some(&id) = self.vertices.get(&code) {
            return id;
        }

        let id = self.inner.add_node(vertex);
        self.vertices.insert(code, id);
        id
    }

    /// Looks a vertex up by identity.
    pub fn find<T: Hashable + ?Sized>(&self, vertex: &T) -> Option<VertexId> {
        self.vertices.get(&vertex.hashcode()).copied()
    }

    pub fn vertex(&self, id: VertexId) -> Option<&V> {
        self.inner.node_weight(id)
    }

    pub fn vertices(&self) -> impl Iterator<Item = (VertexId, &V)> {
        self.inner.node_indices().map(|id| (id, &self.inner[id]))
    }

    /// Removes a vertex together with every edge touching it.
    pub fn remove(&mut self, id: VertexId) -> Option<V> {
        let incident: Vec<EdgeHash> = self
            .inner
            .edges_directed(id, Direction::Incoming)
            .chain(self.inner.edges_directed(id, Direction::Outgoing))
            .map(|edge| edge.weight().clone())
            .collect();

        for hash in incident {
            self.edges.remove(&hash);
        }

        let vertex = self.inner.remove_node(id)?;
        self.vertices.remove(&vertex.hashcode());
        Some(vertex)
    }

    /// Inserts an edge whose endpoints are already part of the graph.
    ///
    /// Returns `false` when an edge with the same identity already exists.
    pub fn connect<E: Edge<V>>(&mut self, edge: &E) -> Result<bool, GraphError> {
        let source = self.require(edge.source())?;
        let target = self.require(edge.target())?;
        Ok(self.insert_edge(source, target, edge.hashcode()))
    }

    /// Inserts an edge between two vertex ids, `target` depending on `source`.
    pub fn link(&mut self, source: VertexId, target: VertexId) -> Result<bool, GraphError> {
        let s = self
            .vertex(source)
            .ok_or(GraphError::UnknownId(source.index()))?;
        let t = self
            .vertex(target)
            .ok_or(GraphError::UnknownId(target.index()))?;

        let hash = EdgeHash::between(s, t);
        Ok(self.insert_edge(source, target, hash))
    }

    fn require(&self, vertex: &V) -> Result<VertexId, GraphError> {
        self.find(vertex)
            .ok_or_else(|| GraphError::MissingVertex(vertex.name().into_owned()))
    }

    fn insert_edge(&mut self, source: VertexId, target: VertexId, hash: EdgeHash) -> bool {
        if !self.edges.insert(hash.clone()) {
            return false;
        }

        self.inner.add_edge(source, target, hash);
        true
    }

    pub fn edges(&self) -> impl Iterator<Item = (VertexId, VertexId, &EdgeHash)> {
        self.inner
            .edge_references()
            .map(|edge| (edge.source(), edge.target(), edge.weight()))
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Vertices `id` directly depends on.
    pub fn dependencies(&self, id: VertexId) -> impl Iterator<Item = VertexId> + '_ {
        self.inner.neighbors_directed(id, Direction::Incoming)
    }

    /// Vertices directly depending on `id`.
    pub fn dependents(&self, id: VertexId) -> impl Iterator<Item = VertexId> + '_ {
        self.inner.neighbors_directed(id, Direction::Outgoing)
    }

    /// Every vertex `id` transitively depends on.
    pub fn ancestors(&self, id: VertexId) -> HashSet<VertexId> {
        let reversed = Reversed(&self.inner);
        Bfs::new(reversed, id)
            .iter(reversed)
            .filter(|&found| found != id)
            .collect()
    }

    /// Every vertex transitively depending on `id`.
    pub fn descendants(&self, id: VertexId) -> HashSet<VertexId> {
        Bfs::new(&self.inner, id)
            .iter(&self.inner)
            .filter(|&found| found != id)
            .collect()
    }

    /// Strongly connected components that form a cycle, including self loops.
    pub fn cycles(&self) -> Vec<Vec<VertexId>> {
        tarjan_scc(&self.inner)
            .into_iter()
            .filter(|scc| scc.len() > 1 || self.inner.contains_edge(scc[0], scc[0]))
            .collect()
    }

    /// Rejects graphs containing a cycle.
    pub fn validate(&self) -> Result<(), GraphError> {
        let cycles = self.cycles();
        if cycles.is_empty() {
            return Ok(());
        }

        let named = cycles
            .into_iter()
            .map(|cycle| {
                cycle
                    .into_iter()
                    .map(|id| self.inner[id].name().into_owned())
                    .collect()
            })
            .collect();

        Err(GraphError::Cycle(named))
    }

    /// Partitions the vertices by dependency depth.
    ///
    /// Wave `n` holds every vertex whose longest dependency chain has length
    /// `n`, so all dependencies of a vertex live in strictly earlier waves.
    pub fn waves(&self) -> Result<Vec<Vec<VertexId>>, GraphError> {
        self.validate()?;

        let order = toposort(&self.inner, None).map_err(|cycle| {
            let name = self.inner[cycle.node_id()].name().into_owned();
            GraphError::Cycle(vec![vec![name]])
        })?;

        let mut depth: HashMap<VertexId, usize> = HashMap::with_capacity(order.len());
        let mut waves: Vec<Vec<VertexId>> = Vec::new();

        for id in order {
            let level = self
                .dependencies(id)
                .map(|dep| depth.get(&dep).map_or(0, |d| d + 1))
                .max()
                .unwrap_or(0);

            depth.insert(id, level);
            if waves.len() <= level {
                waves.resize_with(level + 1, Vec::new);
            }
            waves[level].push(id);
        }

        Ok(waves)
    }
}

impl<V: Vertex> Default for Graph<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Vertex> Display for Graph<V> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "graph LR")?;

        for (id, vertex) in self.vertices() {
            let name = vertex.name().replace('"', "\\\"");
            writeln!(f, "    {}[\"{}\"]", id.index(), name)?;
        }

        for (source, target, _) in self.edges() {
            writeln!(f, "    {} --> {}", source.index(), target.index())?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, Hash)]
    struct Resource {
        kind: &'static str,
        name: &'static str,
    }

    impl Resource {
        fn new(kind: &'static str, name: &'static str) -> Self {
            Self { kind, name }
        }
    }

    impl Hashable for Resource {
        fn hashcode(&self) -> HashCode {
            HashCode::of(self)
        }
    }

    impl Vertex for Resource {
        fn name(&self) -> Cow<'_, str> {
            format!("{}.{}", self.kind, self.name).into()
        }
    }

    /// Vertex without meaningful content.
    #[derive(Debug)]
    struct Opaque(#[allow(dead_code)] u8);

    impl Hashable for Opaque {
        fn hashcode(&self) -> HashCode {
            HashCode::address_of(self)
        }
    }

    impl Vertex for Opaque {
        fn name(&self) -> Cow<'_, str> {
            "opaque".into()
        }
    }

    #[test]
    fn test_edge_hash_is_content_based() {
        let edge1 = BasicEdge::new(Resource::new("vpc", "main"), Resource::new("subnet", "a"));
        let edge2 = BasicEdge::new(Resource::new("vpc", "main"), Resource::new("subnet", "a"));
        assert_eq!(edge1.hashcode(), edge2.hashcode());
    }

    #[test]
    fn test_edge_hash_uses_each_endpoint() {
        let a = Resource::new("vpc", "main");
        let b = Resource::new("subnet", "a");
        let c = Resource::new("subnet", "b");

        let ab = BasicEdge::new(a.clone(), b.clone()).hashcode();
        let ba = BasicEdge::new(b.clone(), a.clone()).hashcode();
        let ac = BasicEdge::new(a.clone(), c.clone()).hashcode();

        assert_ne!(ab, ba);
        assert_ne!(ab, ac);
        assert_eq!(ab.as_str(), format!("{}-{}", a.hashcode(), b.hashcode()));
    }

    #[test]
    fn test_edge_hash_unwraps_references() {
        let a = Resource::new("vpc", "main");
        let b = Resource::new("subnet", "a");

        let by_value = BasicEdge::new(a.clone(), b.clone()).hashcode();
        let by_arc = BasicEdge::new(Arc::new(a.clone()), Arc::new(b.clone())).hashcode();
        let by_ref = EdgeHash::between(&&a, &&b);

        assert_eq!(by_value, by_arc);
        assert_eq!(by_value, by_ref);
    }

    #[test]
    fn test_edge_hash_address_fallback() {
        let a = Arc::new(Opaque(0));
        let b = Arc::new(Opaque(0));

        let edge1 = BasicEdge::new(a.clone(), b.clone()).hashcode();
        let edge2 = BasicEdge::new(a.clone(), b.clone()).hashcode();
        assert_eq!(edge1, edge2);

        let other = BasicEdge::new(b.clone(), a.clone()).hashcode();
        assert_ne!(edge1, other);
        assert!(edge1.as_str().starts_with("0x"));
    }

    #[test]
    fn test_typed_hash_separates_types() {
        #[derive(Hash)]
        struct Bucket {
            kind: &'static str,
            name: &'static str,
        }

        let resource = Resource::new("s3", "logs");
        let bucket = Bucket { kind: "s3", name: "logs" };

        assert_eq!(HashCode::of(&resource), HashCode::of(&bucket));
        assert_ne!(HashCode::typed(&resource), HashCode::typed(&bucket));
        assert_eq!(HashCode::typed(&resource), HashCode::typed(&resource.clone()));
    }

    #[test]
    fn test_add_deduplicates() {
        let mut graph = Graph::new();
        let id1 = graph.add(Resource::new("vpc", "main"));
        let id2 = graph.add(Resource::new("vpc", "main"));
        let id3 = graph.add(Resource::new("vpc", "other"));

        assert_eq!(id1, id2);
        assert_ne!(id1, id3);
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn test_connect_deduplicates() {
        let mut graph = Graph::new();
        graph.add(Resource::new("vpc", "main"));
        graph.add(Resource::new("subnet", "a"));

        let edge = BasicEdge::new(Resource::new("vpc", "main"), Resource::new("subnet", "a"));
        let copy = BasicEdge::new(Resource::new("vpc", "main"), Resource::new("subnet", "a"));

        assert!(graph.connect(&edge).unwrap());
        assert!(!graph.connect(&copy).unwrap());
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn test_connect_requires_endpoints() {
        let mut graph = Graph::new();
        graph.add(Resource::new("vpc", "main"));

        let edge = BasicEdge::new(Resource::new("vpc", "main"), Resource::new("subnet", "a"));
        let err = graph.connect(&edge).unwrap_err();
        assert!(matches!(err, GraphError::MissingVertex(name) if name == "subnet.a"));
    }

    #[test]
    fn test_link_unknown_id() {
        let mut graph = Graph::new();
        let a = graph.add(Resource::new("vpc", "main"));
        let b = graph.add(Resource::new("subnet", "a"));
        graph.remove(b);

        assert!(matches!(graph.link(a, b), Err(GraphError::UnknownId(_))));
    }

    #[test]
    fn test_remove_drops_edges() {
        let mut graph = Graph::new();
        let a = graph.add(Resource::new("vpc", "main"));
        let b = graph.add(Resource::new("subnet", "a"));
        graph.link(a, b).unwrap();

        let removed = graph.remove(a).unwrap();
        assert_eq!(removed.name, "main");
        assert_eq!(graph.edge_count(), 0);
        assert!(graph.find(&Resource::new("vpc", "main")).is_none());

        // The edge can be recreated once the vertex is back.
        let a = graph.add(Resource::new("vpc", "main"));
        assert!(graph.link(a, b).unwrap());
    }

    #[test]
    fn test_ancestors_and_descendants() {
        let mut graph = Graph::new();
        let a = graph.add(Resource::new("vpc", "main"));
        let b = graph.add(Resource::new("subnet", "a"));
        let c = graph.add(Resource::new("instance", "web"));
        let d = graph.add(Resource::new("dns", "zone"));
        graph.link(a, b).unwrap();
        graph.link(b, c).unwrap();

        assert_eq!(graph.ancestors(c), HashSet::from([a, b]));
        assert_eq!(graph.descendants(a), HashSet::from([b, c]));
        assert!(graph.ancestors(d).is_empty());
        assert_eq!(graph.dependencies(c).collect::<Vec<_>>(), vec![b]);
        assert_eq!(graph.dependents(a).collect::<Vec<_>>(), vec![b]);
    }

    #[test]
    fn test_cycle_is_rejected() {
        let mut graph = Graph::new();
        let a = graph.add(Resource::new("vpc", "main"));
        let b = graph.add(Resource::new("subnet", "a"));
        let c = graph.add(Resource::new("instance", "web"));
        graph.link(a, b).unwrap();
        graph.link(b, c).unwrap();
        graph.link(c, a).unwrap();

        assert_eq!(graph.cycles().len(), 1);
        let err = graph.waves().unwrap_err();
        match err {
            GraphError::Cycle(cycles) => {
                assert_eq!(cycles.len(), 1);
                assert_eq!(cycles[0].len(), 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_self_loop_is_a_cycle() {
        let mut graph = Graph::new();
        let a = graph.add(Resource::new("vpc", "main"));
        graph.link(a, a).unwrap();

        assert!(graph.validate().is_err());
    }

    #[test]
    fn test_waves_follow_longest_chain() {
        let mut graph = Graph::new();
        let a = graph.add(Resource::new("vpc", "main"));
        let b = graph.add(Resource::new("subnet", "a"));
        let c = graph.add(Resource::new("instance", "web"));
        let d = graph.add(Resource::new("dns", "zone"));
        graph.link(a, b).unwrap();
        graph.link(b, c).unwrap();
        graph.link(a, c).unwrap();

        let waves = graph.waves().unwrap();
        assert_eq!(waves.len(), 3);
        assert!(waves[0].contains(&a) && waves[0].contains(&d));
        assert_eq!(waves[1], vec![b]);
        assert_eq!(waves[2], vec![c]);
    }

    #[test]
    fn test_display_mermaid() {
        let mut graph = Graph::new();
        let a = graph.add(Resource::new("vpc", "main"));
        let b = graph.add(Resource::new("subnet", "a"));
        graph.link(a, b).unwrap();

        let text = graph.to_string();
        assert!(text.starts_with("graph LR"));
        assert!(text.contains("[\"vpc.main\"]"));
        assert!(text.contains(&format!("{} --> {}", a.index(), b.index())));
    }
}
