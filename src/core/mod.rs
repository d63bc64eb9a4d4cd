pub mod consumer;
pub mod frame_ring;
pub mod player;
pub mod producer;
