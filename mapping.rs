//! mapping - Positional graph over the physical pixels
//! Fixed-size adjacency lists, no heap allocation

use heapless::{LinearMap, Vec};
use log::debug;

use crate::error::{Error, Result};

/// Index of one addressable pixel.
#[cfg(not(feature = "wide-index"))]
pub type PixelIndex = u16;
#[cfg(feature = "wide-index")]
pub type PixelIndex = u32;

/// Bit set describing why two pixels are connected. Bit meaning belongs to the caller.
pub type EdgeTypes = u8;

// PERF: Bounded degree keeps every adjacency list inline
pub const MAX_EDGES_PER_PIXEL: usize = 8;
pub const MAX_TRANSPOSE_ENTRIES: usize = 8;

/// Maps forward edge type bits onto the bits used for the generated reverse edge.
pub type TransposeMap = LinearMap<EdgeTypes, EdgeTypes, MAX_TRANSPOSE_ENTRIES>;

/// Up to four edge type masks in priority order, slot 0 first.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PriorityMask([EdgeTypes; 4]);

impl PriorityMask {
    pub const fn new(first: EdgeTypes) -> Self {
        Self([first, 0, 0, 0])
    }

    pub const fn quad(first: EdgeTypes, second: EdgeTypes, third: EdgeTypes, fourth: EdgeTypes) -> Self {
        Self([first, second, third, fourth])
    }

    pub fn from_slice(masks: &[EdgeTypes]) -> Result<Self> {
        if masks.len() > 4 {
            return Err(Error::TooManyPriorities { count: masks.len() });
        }
        let mut slots = [0; 4];
        slots[..masks.len()].copy_from_slice(masks);
        Ok(Self(slots))
    }

    pub const fn slots(&self) -> [EdgeTypes; 4] {
        self.0
    }

    /// All bits mentioned in any slot.
    pub fn union(&self) -> EdgeTypes {
        self.0.iter().fold(0, |acc, m| acc | m)
    }

    pub fn is_empty(&self) -> bool {
        self.union() == 0
    }
}

impl From<EdgeTypes> for PriorityMask {
    fn from(first: EdgeTypes) -> Self {
        Self::new(first)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Edge {
    pub from: PixelIndex,
    pub to: PixelIndex,
    pub types: EdgeTypes,
    /// Pass-through marker: never taken directly, only used to route straight
    /// across an ambiguous intersection.
    pub continue_to: bool,
}

impl Edge {
    pub const NONE: EdgeTypes = 0;
    pub const ALL: EdgeTypes = 0xFF;

    pub const fn new(from: PixelIndex, to: PixelIndex, types: EdgeTypes) -> Self {
        Self { from, to, types, continue_to: false }
    }

    pub const fn continuing(from: PixelIndex, to: PixelIndex, types: EdgeTypes) -> Self {
        Self { from, to, types, continue_to: true }
    }

    /// Reverse edge with its bits mapped through `map`. Unmapped bits are dropped.
    pub fn transpose(&self, map: &TransposeMap) -> Edge {
        let types = map
            .iter()
            .filter(|(from_bits, _)| self.types & **from_bits != 0)
            .fold(Self::NONE, |acc, (_, to_bits)| acc | to_bits);
        Edge { from: self.to, to: self.from, types, continue_to: self.continue_to }
    }

    #[inline]
    pub fn matches(&self, mask: EdgeTypes, exact: bool) -> bool {
        let matched = self.types & mask;
        matched == mask || (!exact && matched != 0)
    }
}

/// Adjacency graph over `SIZE` pixels.
pub struct Graph<const SIZE: usize> {
    adjacency: [Vec<Edge, MAX_EDGES_PER_PIXEL>; SIZE],
    transpose: TransposeMap,
}

impl<const SIZE: usize> Default for Graph<SIZE> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const SIZE: usize> Graph<SIZE> {
    pub fn new() -> Self {
        Self {
            adjacency: core::array::from_fn(|_| Vec::new()),
            transpose: LinearMap::new(),
        }
    }

    /// Builds a graph from a static edge list, adding every edge in both directions.
    pub fn from_edges(edges: &[Edge], transpose: &[(EdgeTypes, EdgeTypes)]) -> Result<Self> {
        let mut graph = Self::new();
        for &(from_bits, to_bits) in transpose {
            graph.set_transpose(from_bits, to_bits)?;
        }
        for edge in edges {
            graph.add_edge(*edge, true)?;
        }
        debug!("graph built: {} pixels, {} edges", SIZE, graph.edge_count());
        Ok(graph)
    }

    pub const fn pixel_count(&self) -> usize {
        SIZE
    }

    pub fn set_transpose(&mut self, from_bits: EdgeTypes, to_bits: EdgeTypes) -> Result<()> {
        self.transpose
            .insert(from_bits, to_bits)
            .map(|_| ())
            .map_err(|_| Error::TransposeTableFull { capacity: MAX_TRANSPOSE_ENTRIES })
    }

    pub fn transpose_map(&self) -> &TransposeMap {
        &self.transpose
    }

    fn slot(position: PixelIndex) -> Result<usize> {
        let index = position as usize;
        if index < SIZE {
            Ok(index)
        } else {
            Err(Error::PositionOutOfBounds { position: index, pixel_count: SIZE })
        }
    }

    /// Whether merging `edge` would need a fresh adjacency slot.
    fn needs_slot(&self, edge: &Edge) -> bool {
        !self.adjacency[edge.from as usize].iter().any(|e| e.to == edge.to)
    }

    fn merge(&mut self, edge: Edge) -> Result<()> {
        let list = &mut self.adjacency[edge.from as usize];
        if let Some(existing) = list.iter_mut().find(|e| e.to == edge.to) {
            existing.types |= edge.types;
            return Ok(());
        }
        list.push(edge).map_err(|_| Error::AdjacencyFull {
            position: edge.from as usize,
            capacity: MAX_EDGES_PER_PIXEL,
        })
    }

    /// Adds `edge`, OR-ing its bits into an existing `(from, to)` edge if there is one.
    /// With `bidirectional` the transposed reverse edge is merged the same way.
    pub fn add_edge(&mut self, edge: Edge, bidirectional: bool) -> Result<()> {
        let from = Self::slot(edge.from)?;
        let to = Self::slot(edge.to)?;

        // Check room for both halves first so a failed add leaves the graph untouched
        let reverse = edge.transpose(&self.transpose);
        if self.needs_slot(&edge) && self.adjacency[from].is_full() {
            return Err(Error::AdjacencyFull { position: from, capacity: MAX_EDGES_PER_PIXEL });
        }
        if bidirectional && self.needs_slot(&reverse) && self.adjacency[to].is_full() {
            return Err(Error::AdjacencyFull { position: to, capacity: MAX_EDGES_PER_PIXEL });
        }

        self.merge(edge)?;
        if bidirectional {
            self.merge(reverse)?;
        }
        Ok(())
    }

    pub fn edges_from(&self, position: PixelIndex) -> Result<&[Edge]> {
        Ok(&self.adjacency[Self::slot(position)?])
    }

    pub fn edge(&self, from: PixelIndex, to: PixelIndex) -> Option<&Edge> {
        self.adjacency.get(from as usize)?.iter().find(|e| e.to == to)
    }

    pub fn edge_count(&self) -> usize {
        self.adjacency.iter().map(|list| list.len()).sum()
    }

    /// Outgoing edges of `position` matching `mask`, in slot order then adjacency order.
    pub fn adjacencies(&self, position: PixelIndex, mask: PriorityMask, exact_match: bool) -> Result<Adjacencies<'_>> {
        let edges = self.edges_from(position)?;
        Ok(Adjacencies {
            edges,
            slots: mask.slots(),
            slot: 0,
            cursor: 0,
            exact_match,
        })
    }
}

/// Iterator returned by [`Graph::adjacencies`].
pub struct Adjacencies<'a> {
    edges: &'a [Edge],
    slots: [EdgeTypes; 4],
    slot: usize,
    cursor: usize,
    exact_match: bool,
}

impl<'a> Iterator for Adjacencies<'a> {
    type Item = &'a Edge;

    fn next(&mut self) -> Option<Self::Item> {
        while self.slot < self.slots.len() {
            let mask = self.slots[self.slot];
            if mask == 0 || self.cursor >= self.edges.len() {
                self.slot += 1;
                self.cursor = 0;
                continue;
            }
            let edge = &self.edges[self.cursor];
            self.cursor += 1;
            if edge.matches(mask, self.exact_match) {
                return Some(edge);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CW: EdgeTypes = 0x01;
    const CCW: EdgeTypes = 0x02;
    const INWARD: EdgeTypes = 0x04;
    const OUTWARD: EdgeTypes = 0x08;

    fn ring() -> Graph<4> {
        let edges = [Edge::new(0, 1, CW), Edge::new(1, 2, CW), Edge::new(2, 3, CW), Edge::new(3, 0, CW)];
        Graph::from_edges(&edges, &[(CW, CCW), (INWARD, OUTWARD)]).unwrap()
    }

    #[test]
    fn bidirectional_edge_gets_transposed_reverse() {
        let graph = ring();
        for from in 0..4 as PixelIndex {
            let to = (from + 1) % 4;
            assert_eq!(graph.edge(from, to).unwrap().types, CW);
            assert_eq!(graph.edge(to, from).unwrap().types, CCW);
        }
        assert_eq!(graph.edge_count(), 8);
    }

    #[test]
    fn unmapped_bits_are_dropped_on_reverse() {
        let mut graph: Graph<3> = Graph::new();
        graph.set_transpose(CW, CCW).unwrap();
        graph.add_edge(Edge::new(0, 1, CW | 0x40), true).unwrap();
        assert_eq!(graph.edge(0, 1).unwrap().types, CW | 0x40);
        assert_eq!(graph.edge(1, 0).unwrap().types, CCW);

        // No table at all: the reverse exists but relates nothing
        let mut bare: Graph<3> = Graph::new();
        bare.add_edge(Edge::new(1, 2, INWARD), true).unwrap();
        assert_eq!(bare.edge(2, 1).unwrap().types, Edge::NONE);
    }

    #[test]
    fn duplicate_edges_merge_bits() {
        let mut graph: Graph<2> = Graph::new();
        graph.add_edge(Edge::new(0, 1, CW), false).unwrap();
        graph.add_edge(Edge::new(0, 1, INWARD), false).unwrap();
        assert_eq!(graph.edges_from(0).unwrap().len(), 1);
        assert_eq!(graph.edge(0, 1).unwrap().types, CW | INWARD);
        assert!(graph.edge(1, 0).is_none());
    }

    #[test]
    fn continue_to_survives_transpose() {
        let mut graph: Graph<3> = Graph::new();
        graph.set_transpose(CW, CCW).unwrap();
        graph.add_edge(Edge::continuing(0, 2, CW), true).unwrap();
        assert!(graph.edge(0, 2).unwrap().continue_to);
        assert!(graph.edge(2, 0).unwrap().continue_to);
    }

    #[test]
    fn adjacencies_follow_priority_order() {
        let mut graph: Graph<4> = Graph::new();
        graph.add_edge(Edge::new(0, 1, CW), false).unwrap();
        graph.add_edge(Edge::new(0, 2, INWARD), false).unwrap();
        graph.add_edge(Edge::new(0, 3, CW | INWARD), false).unwrap();

        let mask = PriorityMask::quad(INWARD, 0, CW, 0);
        let found: Vec<PixelIndex, 8> = graph.adjacencies(0, mask, false).unwrap().map(|e| e.to).collect();
        assert_eq!(found.as_slice(), &[2, 3, 1, 3]);
    }

    #[test]
    fn exact_match_requires_every_bit() {
        let mut graph: Graph<3> = Graph::new();
        graph.add_edge(Edge::new(0, 1, CW), false).unwrap();
        graph.add_edge(Edge::new(0, 2, CW | INWARD), false).unwrap();

        let mask = PriorityMask::new(CW | INWARD);
        assert_eq!(graph.adjacencies(0, mask, false).unwrap().count(), 2);
        let exact: Vec<PixelIndex, 8> = graph.adjacencies(0, mask, true).unwrap().map(|e| e.to).collect();
        assert_eq!(exact.as_slice(), &[2]);
    }

    #[test]
    fn out_of_range_positions_fail() {
        let mut graph: Graph<4> = Graph::new();
        assert_eq!(
            graph.add_edge(Edge::new(0, 4, CW), true),
            Err(Error::PositionOutOfBounds { position: 4, pixel_count: 4 })
        );
        assert!(matches!(
            graph.adjacencies(9, PriorityMask::new(CW), false),
            Err(Error::PositionOutOfBounds { position: 9, .. })
        ));
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn full_adjacency_list_is_reported() {
        let mut graph: Graph<10> = Graph::new();
        for to in 1..=MAX_EDGES_PER_PIXEL as PixelIndex {
            graph.add_edge(Edge::new(0, to, CW), true).unwrap();
        }
        let err = graph.add_edge(Edge::new(9, 0, CW), true);
        assert_eq!(err, Err(Error::AdjacencyFull { position: 0, capacity: MAX_EDGES_PER_PIXEL }));
        // The forward half was not applied either
        assert!(graph.edge(9, 0).is_none());
        // Merging into an existing edge needs no room
        graph.add_edge(Edge::new(0, 1, INWARD), true).unwrap();
    }

    #[test]
    fn priority_mask_from_slice() {
        assert_eq!(PriorityMask::from_slice(&[CW, INWARD]).unwrap(), PriorityMask::quad(CW, INWARD, 0, 0));
        assert_eq!(
            PriorityMask::from_slice(&[1, 2, 4, 8, 16]),
            Err(Error::TooManyPriorities { count: 5 })
        );
        assert_eq!(PriorityMask::quad(CW, 0, INWARD, 0).union(), CW | INWARD);
        assert!(PriorityMask::default().is_empty());
    }
}
