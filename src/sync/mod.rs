pub mod cadence;

pub use cadence::Cadence;
