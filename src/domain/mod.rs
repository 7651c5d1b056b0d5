// Domain layer - Pure types and calculations
pub mod dashboard;
pub mod dataset;
pub mod geometry;
pub mod legend;
pub mod view_state;
