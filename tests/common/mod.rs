#![allow(dead_code)]

pub mod builders;
pub mod fake_spawner;
pub mod strategies;

pub use builders::*;
pub use fake_spawner::*;
pub use strategies::*;
