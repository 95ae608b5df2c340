use std::time::Instant;

use hlrecon::{
    demosaic_rcd, reconstruct_highlights, CfaLookup, ColorFilterArray, HighlightsParams,
    RcdParams,
};

fn main() {
    env_logger::init();
    // optional JSON parameters as the first argument
    let params: HighlightsParams = match std::env::args().nth(1) {
        Some(json) => serde_json::from_str(&json).expect("Failed to parse parameters"),
        None => HighlightsParams {
            iterations: 2,
            noise_level: 0.05,
            ..Default::default()
        },
    };

    // a soft gradient with a bright disc that blows out the green and red sensels
    let (width, height) = (640, 480);
    let cfa = ColorFilterArray::Rggb;
    let gain = [0.9f32, 1.3, 0.6];
    let mut input = vec![0.0f32; width * height];
    for row in 0..height {
        for col in 0..width {
            let (dy, dx) = (row as f32 - 240.0, col as f32 - 320.0);
            let light = 0.3 + 1.2 * (-(dx * dx + dy * dy) / (2.0 * 60.0 * 60.0)).exp();
            let c = cfa.channel_at(row, col).index();
            input[row * width + col] = (light * gain[c]).min(1.0);
        }
    }

    let mut output = vec![0.0f32; width * height];
    let start = Instant::now();
    reconstruct_highlights(&input, width, height, &cfa, &params, &mut output)
        .expect("Failed to reconstruct highlights");
    println!("Reconstruction: {:?}", start.elapsed());

    let changed = input.iter().zip(&output).filter(|(a, b)| a != b).count();
    let peak = output.iter().cloned().fold(0.0f32, f32::max);
    println!("Changed sensels: {changed}, peak value: {peak:.3}");

    let start = Instant::now();
    let rgb = demosaic_rcd(&output, width, height, &cfa, &RcdParams::default())
        .expect("Failed to demosaic");
    println!("Demosaic: {:?}", start.elapsed());
    println!("Centre pixel: {:?}", rgb.pixel(240, 320));

    // the disc alone, cropped at an odd offset so the pattern changes
    let (top, left, size) = (161, 241, 159);
    let crop: Vec<f32> = (top..top + size)
        .flat_map(|row| output[row * width + left..row * width + left + size].iter().copied())
        .collect();
    let crop_cfa = cfa.shift(top, left);
    let crop_rgb = demosaic_rcd(&crop, size, size, &crop_cfa, &RcdParams::default())
        .expect("Failed to demosaic crop")
        .into_vec();
    let mut mean = [0.0f32; 3];
    for px in crop_rgb.chunks_exact(4) {
        for c in 0..3 {
            mean[c] += px[c] / (size * size) as f32;
        }
    }
    println!("Crop {crop_cfa} at ({top}, {left}): mean RGB {mean:?}");
}
