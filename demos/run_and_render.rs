use cgym::{Instance, Options, SineWaveEnv, TimeLimit};
use minifb::{Key, Window, WindowOptions};

const SCALE: usize = 48;

fn rgb_to_u32(r: u8, g: u8, b: u8) -> u32 {
    // Minifb expects 0RGB.
    ((r as u32) << 16) | ((g as u32) << 8) | (b as u32)
}

fn main() {
    tracing_subscriber::fmt().with_max_level(tracing::Level::DEBUG).init();

    let options = Options::new().with("max_episode_steps", 120);
    let mut env = Instance::<TimeLimit<SineWaveEnv>>::make("rgb_array", &options).expect("make should succeed");
    let action_spaces = env.make_result().action_spaces.clone();
    let noise = Options::new().with("noise", 0.05f32);
    let mut seed = 123;
    env.reset(seed, &noise).expect("reset should succeed");

    // Initial render to get frame size
    let (width, height) = {
        let frame = env.render().expect("render() should produce a frame");
        (frame.width() * SCALE, frame.height() * SCALE)
    };

    let mut window = Window::new("cgym: run_and_render", width, height, WindowOptions::default())
        .expect("Unable to open window");
    window.set_target_fps(30);

    let mut buffer: Vec<u32> = vec![0; width * height];
    let mut rng = rand::thread_rng();

    // Run until window is closed or Escape pressed
    while window.is_open() && !window.is_key_down(Key::Escape) {
        // Take a random action each frame
        let actions = action_spaces.sample(&mut rng);
        let step = env.step(&actions).expect("step should succeed");
        let obs = step.observations.get("obs1").and_then(|b| b.as_f32()).map(|o| o[0]).unwrap_or(0.0);
        if step.done() {
            seed += 1;
            env.reset(seed, &noise).expect("reset should succeed");
        }

        let frame = env.render().expect("render() should produce a frame");
        let Some(bytes) = frame.as_bytes() else { break };
        let (fw, channels) = (frame.width(), frame.channels());
        // Tint the flat frame by the first observation so the wave is visible.
        let tint = ((obs + 1.0) * 0.5 * 191.0) as u8;
        for y in 0..height {
            for x in 0..width {
                let i = channels * (x / SCALE + fw * (y / SCALE));
                buffer[x + width * y] = rgb_to_u32(bytes[i].saturating_add(tint), bytes[i + 1], bytes[i + 2]);
            }
        }
        window.update_with_buffer(&buffer, width, height).expect("Failed to update window buffer");
    }

    env.close().expect("close should succeed");
}
