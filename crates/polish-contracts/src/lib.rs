pub mod cards;
pub mod errors;
pub mod graph;
pub mod select;
pub mod settings;
