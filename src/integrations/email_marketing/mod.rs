pub mod campaign;

pub use campaign::Campaign;
