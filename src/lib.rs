//! Graph neural network regression of conformational free energy. Each conformation is encoded
//! as a De Bruijn graph of its dihedral angles; candidate networks from a small fixed grid are
//! trained on it, evaluated on a held-out test set, and saved with their results.

pub mod cli;
pub mod config;
pub mod dataset;
pub mod error;
pub mod experiment;
pub mod graph;
pub mod logging;
pub mod model;
pub mod report;
pub mod train;

#[cfg(test)]
mod tests;
