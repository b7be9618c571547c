use heightfield::map::SQUARE_SIZE;
use heightfield::{HeightMapConfig, MapSource, ReadMap, Rect};
use noise::{Fbm, NoiseFn, Perlin};
use rand::Rng;

/// 生成一张 Fbm 噪声地图，施加若干随机弹坑，打印统计信息
fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let size: u32 = 256;
    let mut fbm = Fbm::<Perlin>::new(2024);
    fbm.octaves = 5;

    let heights: Vec<f32> = (0..=size)
        .flat_map(|z| (0..=size).map(move |x| (x, z)))
        .map(|(x, z)| {
            let v = fbm.get([x as f64 * 0.01, z as f64 * 0.01]);
            (v * 300.0 - 50.0) as f32
        })
        .collect();

    let config = HeightMapConfig::gated(8);
    let mut map = ReadMap::load(MapSource::new("Noise", size, size, heights), config)?;
    map.update_draw();
    map.visibility_mut()
        .ok_or("gated map without visibility")?
        .set_all(true);

    let mut rng = rand::rng();
    let craters = 40;
    for _ in 0..craters {
        let cx = rng.random_range(4..size as i32 - 4);
        let cz = rng.random_range(4..size as i32 - 4);
        let depth = rng.random_range(5.0..40.0f32);
        let rect = Rect::new(cx - 3, cz - 3, cx + 3, cz + 3);

        map.adjust_heights(&rect, |x, z, h| {
            let d = (((x - cx).pow(2) + (z - cz).pow(2)) as f32).sqrt();
            *h -= depth * (1.0 - d / 4.5).max(0.0);
        });
        map.update_synced(&rect);
    }

    let mut frames = 0;
    let mut drained = 0;
    loop {
        let n = map.update_draw();
        if n == 0 {
            break;
        }
        drained += n;
        frames += 1;
    }

    map.update_height_bounds();
    let init = map.init_height_bounds();
    let curr = map.curr_height_bounds();

    let slopes = map.slope_map();
    let max_slope = slopes.iter().cloned().fold(0.0f32, f32::max);
    let avg_slope = slopes.iter().sum::<f32>() / slopes.len() as f32;
    let steep = slopes.iter().filter(|&&s| s > 0.5).count();

    println!("Map \"{}\" {}x{} squares ({} world units)", map.name(), size, size, size as f32 * SQUARE_SIZE);
    println!("Height stats:");
    println!("  Initial: [{:.1}, {:.1}]", init.min, init.max);
    println!("  Current: [{:.1}, {:.1}]", curr.min, curr.max);
    println!("  Above water: {}, visible water: {}", map.is_above_water(), map.has_visible_water());
    println!("Slope stats:");
    println!("  Avg: {:.4}", avg_slope);
    println!("  Max: {:.4}", max_slope);
    println!("  Steep cells (>0.5): {} ({:.1}%)", steep, steep as f32 * 100.0 / slopes.len() as f32);
    println!("Updates: {} craters -> {} rects over {} frames", craters, drained, frames);
    println!("Checksums:");
    println!("  Load:    {:#010x}", map.map_checksum());
    println!("  Current: {:#010x}", map.calc_heightmap_checksum());
    println!("  Typemap: {:#010x}", map.calc_typemap_checksum());

    Ok(())
}
