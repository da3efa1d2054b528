//! Error type shared by the graph and the particle simulator

use thiserror::Error;

/// Caller-side programming errors. Nothing here is transient, so nothing is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    #[error("particle capacity of {capacity} reached")]
    CapacityExceeded { capacity: usize },

    #[error("population already at its maximum of {max_population} live particles")]
    PopulationFull { max_population: usize },

    #[error("position {position} is outside the {pixel_count} pixel graph")]
    PositionOutOfBounds { position: usize, pixel_count: usize },

    #[error("no particle at index {index} (collection holds {count})")]
    NoSuchParticle { index: usize, count: usize },

    #[error("pixel {position} already has the maximum of {capacity} edges")]
    AdjacencyFull { position: usize, capacity: usize },

    #[error("transpose table is full ({capacity} entries)")]
    TransposeTableFull { capacity: usize },

    #[error("trail depth {depth} exceeds the maximum of {max}")]
    TrailTooDeep { depth: usize, max: usize },

    #[error("a priority mask holds at most 4 edge type masks, got {count}")]
    TooManyPriorities { count: usize },

    #[error("at most {max} direction preferences are supported, got {count}")]
    TooManyDirections { count: usize, max: usize },

    #[error("at least one direction preference is required to create particles")]
    NoDirections,

    #[error("max population {requested} exceeds particle capacity {capacity}")]
    PopulationAboveCapacity { requested: usize, capacity: usize },
}

pub type Result<T> = core::result::Result<T, Error>;
