pub mod config;
pub mod geometry;
pub mod io;
pub mod publish;
pub mod sensor;
pub mod sync;
pub mod system;
pub mod tracking;
