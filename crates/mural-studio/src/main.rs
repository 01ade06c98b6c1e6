//! Headless smoke run of the mural engine on the software driver.
//!
//! Paints a small scene across atlas and dedicated images, loses the device,
//! and checks that every image comes back pixel-identical.

use anyhow::{Context, Result, ensure};
use mural_engine::coords::Region;
use mural_engine::driver::SoftwareDriver;
use mural_engine::logging::{init_logging, LoggingConfig};
use mural_engine::paint::Color;
use mural_engine::render::{quad_vertices, Shader, QUAD_INDICES};
use mural_engine::{DrawTriangles, Graphics, GraphicsConfig, ImageId};

type Gfx = Graphics<SoftwareDriver>;

fn fill(g: &mut Gfx, dst: ImageId, rect: Region, color: Color) -> Result<()> {
    let v = quad_vertices(rect, Region::default(), color);
    g.draw_triangles(dst, &DrawTriangles::new(Shader::FILL, &v, &QUAD_INDICES))
        .with_context(|| format!("fill {rect:?} on {dst:?}"))
}

fn blit(g: &mut Gfx, dst: ImageId, at: Region, src: ImageId) -> Result<()> {
    let (w, h) = g.image_size(src)?;
    let v = quad_vertices(at, Region::from_size(w, h), Color::WHITE);
    g.draw_triangles(dst, &DrawTriangles::new(Shader::TEXTURE, &v, &QUAD_INDICES).with_source(0, src))
        .with_context(|| format!("blit {src:?} onto {dst:?}"))
}

fn snapshot(g: &mut Gfx, images: &[ImageId]) -> Result<Vec<Vec<u8>>> {
    images
        .iter()
        .map(|&id| {
            let (w, h) = g.image_size(id)?;
            g.read_pixels(id, Region::from_size(w, h))
                .with_context(|| format!("read back {id:?}"))
        })
        .collect()
}

fn main() -> Result<()> {
    init_logging(LoggingConfig::default());

    let mut g = Graphics::new(SoftwareDriver::new(), GraphicsConfig::default())
        .context("create graphics context")?;

    // Sprites live in the atlas; the canvas is large enough for its own texture.
    let sprite = g.create_image(32, 32, false)?;
    let badge = g.create_image(24, 16, false)?;
    let canvas = g.create_image(640, 360, false)?;

    let stripes: Vec<u8> = (0..24 * 16)
        .flat_map(|i| if (i / 24) % 2 == 0 { [255, 200, 0, 255] } else { [0, 0, 0, 0] })
        .collect();
    g.write_pixels(badge, Region::from_size(24, 16), &stripes)?;
    fill(&mut g, sprite, Region::from_size(32, 32), Color::from_straight(0.2, 0.6, 1.0, 1.0))?;
    fill(&mut g, sprite, Region::new(8, 8, 16, 16), Color::from_straight(1.0, 1.0, 1.0, 0.5))?;

    fill(&mut g, canvas, Region::from_size(640, 360), Color::from_straight(0.05, 0.05, 0.1, 1.0))?;
    for i in 0..12 {
        blit(&mut g, canvas, Region::new(20 + i * 48, 40, 32, 32), sprite)?;
        blit(&mut g, canvas, Region::new(24 + i * 48, 100, 24, 16), badge)?;
    }

    let frame = g.end_frame().context("end frame")?;
    log::info!(
        "frame {}: {} draw call(s) for {} command(s), {} merged",
        frame.frame,
        frame.flush.draw_calls,
        frame.flush.commands,
        frame.flush.merged_draws
    );

    let images = [sprite, badge, canvas];
    let before = snapshot(&mut g, &images)?;

    g.driver_mut().lose_device();
    let frame = g.end_frame().context("restore after device loss")?;
    let report = frame.restored.context("device loss went unnoticed")?;
    log::info!(
        "restored {} image(s), {} op(s) replayed",
        report.images,
        report.replayed_ops
    );

    let after = snapshot(&mut g, &images)?;
    for ((id, a), b) in images.iter().zip(&before).zip(&after) {
        ensure!(a == b, "{id:?} differs after restoration");
    }

    println!("mural-studio: {} images restored pixel-exact", images.len());
    Ok(())
}
