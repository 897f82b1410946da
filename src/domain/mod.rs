// Domain layer - Core types for depth-indexed curves and windows
pub mod curve;
pub mod error;
pub mod window;
