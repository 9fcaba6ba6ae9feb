pub mod sine_wave;

pub use sine_wave::SineWaveEnv;
