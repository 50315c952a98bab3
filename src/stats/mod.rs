//! Streaming climatology statistics

pub mod accumulator;

pub use accumulator::{
    AccumulatedBaseline, DeviationAccumulator, PopulationGrid, StatisticsAccumulator,
};
