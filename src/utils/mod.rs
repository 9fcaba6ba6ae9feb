pub mod rng;
pub mod render;

pub use rng::{rng_from_env_seed, rng_from_seed, RngStream, SeedSequence};
pub use render::{encode_png, save_png};
