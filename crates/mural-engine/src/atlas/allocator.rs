use std::collections::BTreeMap;

use crate::command::{Command, CommandQueue, DrawTrianglesCommand};
use crate::coords::Region;
use crate::driver::{Driver, DriverError, TextureHandle};
use crate::error::{GraphicsError, Result};
use crate::render::SRC_IMAGE_COUNT;
use crate::restorable::{DrawOperation, ImageId};

use super::ShelfPacker;

/// Index of a backing texture in the allocator's arena.
///
/// Stable across device loss: recreation swaps the driver handle but keeps the id.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct BackingId(pub(crate) u32);

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum BackingKind {
    /// Shared page packed with many images.
    Atlas,
    /// Holds exactly one image.
    Dedicated,
}

/// Where a logical image currently lives.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Placement {
    pub backing: BackingId,
    /// The image's texels inside the backing texture.
    pub region: Region,
    /// `region` plus its padding border; what the packer hands out.
    pub reserved: Region,
}

#[derive(Debug)]
struct Backing {
    texture: TextureHandle,
    width: u32,
    height: u32,
    kind: BackingKind,
    packer: Option<ShelfPacker>,
}

/// Sizing rules for [`AtlasAllocator`].
#[derive(Debug, Copy, Clone)]
pub struct AtlasLimits {
    pub atlas_size: u32,
    pub dedicated_threshold: u32,
    pub padding: u32,
    pub max_texture_size: u32,
}

/// Maps logical images to regions of backing textures.
///
/// Small images are packed into shared atlas pages; large images and screen
/// targets get a power-of-two texture of their own. Every live image has exactly
/// one placement at any time, and regions of one page never overlap.
#[derive(Debug)]
pub struct AtlasAllocator {
    limits: AtlasLimits,
    backings: Vec<Option<Backing>>,
    free_slots: Vec<u32>,
    placements: BTreeMap<ImageId, Placement>,
    defragmentations: u64,
}

impl AtlasAllocator {
    pub fn new(limits: AtlasLimits) -> Self {
        Self {
            limits,
            backings: Vec::new(),
            free_slots: Vec::new(),
            placements: BTreeMap::new(),
            defragmentations: 0,
        }
    }

    #[inline]
    pub fn placement(&self, image: ImageId) -> Option<Placement> {
        self.placements.get(&image).copied()
    }

    /// Driver texture and region currently holding `image`.
    pub fn resolve(&self, image: ImageId) -> Option<(TextureHandle, Region)> {
        let p = self.placements.get(&image)?;
        let backing = self.backing(p.backing)?;
        Some((backing.texture, p.region))
    }

    pub fn backing_kind(&self, id: BackingId) -> Option<BackingKind> {
        self.backing(id).map(|b| b.kind)
    }

    pub fn backing_texture(&self, id: BackingId) -> Option<TextureHandle> {
        self.backing(id).map(|b| b.texture)
    }

    /// Number of live atlas pages.
    pub fn page_count(&self) -> usize {
        self.live_backings().filter(|(_, b)| b.kind == BackingKind::Atlas).count()
    }

    /// Number of live backing textures of either kind.
    pub fn backing_count(&self) -> usize {
        self.live_backings().count()
    }

    pub fn defragmentations(&self) -> u64 {
        self.defragmentations
    }

    /// Reserved regions of the images placed on `backing`.
    pub fn live_regions(&self, backing: BackingId) -> Vec<(ImageId, Region)> {
        self.placements
            .iter()
            .filter(|(_, p)| p.backing == backing)
            .map(|(&id, p)| (id, p.reserved))
            .collect()
    }

    fn backing(&self, id: BackingId) -> Option<&Backing> {
        self.backings.get(id.0 as usize).and_then(Option::as_ref)
    }

    fn live_backings(&self) -> impl Iterator<Item = (BackingId, &Backing)> + '_ {
        self.backings
            .iter()
            .enumerate()
            .filter_map(|(i, b)| b.as_ref().map(|b| (BackingId(i as u32), b)))
    }

    fn insert_backing(&mut self, backing: Backing) -> BackingId {
        if let Some(slot) = self.free_slots.pop() {
            self.backings[slot as usize] = Some(backing);
            return BackingId(slot);
        }
        self.backings.push(Some(backing));
        BackingId(self.backings.len() as u32 - 1)
    }

    fn remove_backing(&mut self, id: BackingId) -> Option<Backing> {
        let backing = self.backings.get_mut(id.0 as usize)?.take()?;
        self.free_slots.push(id.0);
        Some(backing)
    }

    // ── allocation ────────────────────────────────────────────────────────

    /// Places a new image and enqueues a clear of its reserved region.
    pub fn allocate<D: Driver + ?Sized>(
        &mut self,
        driver: &mut D,
        queue: &mut CommandQueue,
        image: ImageId,
        width: i32,
        height: i32,
        screen: bool,
    ) -> Result<Placement> {
        let pad = self.limits.padding as i32;
        let (pw, ph) = (width + 2 * pad, height + 2 * pad);
        let threshold = self.limits.dedicated_threshold as i32;

        let (placement, texture) = if !screen && pw < threshold && ph < threshold {
            self.allocate_in_atlas(driver, queue, width, height)?
        } else {
            self.allocate_dedicated(driver, width, height)?
        };

        queue.enqueue(Command::DrawTriangles(DrawTrianglesCommand::clear(
            texture,
            placement.reserved,
        )));
        self.placements.insert(image, placement);
        Ok(placement)
    }

    fn allocate_dedicated<D: Driver + ?Sized>(
        &mut self,
        driver: &mut D,
        width: i32,
        height: i32,
    ) -> Result<(Placement, TextureHandle)> {
        let max = self.limits.max_texture_size.min(driver.max_texture_size());
        let tw = (width as u32).next_power_of_two();
        let th = (height as u32).next_power_of_two();
        if tw > max || th > max {
            return Err(GraphicsError::ImageTooLarge { width, height, max });
        }

        let texture = driver.create_texture(tw, th)?;
        let backing = self.insert_backing(Backing {
            texture,
            width: tw,
            height: th,
            kind: BackingKind::Dedicated,
            packer: None,
        });
        log::debug!("dedicated texture {backing:?} ({tw}x{th}) for a {width}x{height} image");

        let placement = Placement {
            backing,
            region: Region::from_size(width, height),
            reserved: Region::from_size(tw as i32, th as i32),
        };
        Ok((placement, texture))
    }

    fn allocate_in_atlas<D: Driver + ?Sized>(
        &mut self,
        driver: &mut D,
        queue: &mut CommandQueue,
        width: i32,
        height: i32,
    ) -> Result<(Placement, TextureHandle)> {
        let pad = self.limits.padding as i32;
        let (pw, ph) = (width + 2 * pad, height + 2 * pad);
        let inner = |reserved: Region| Region::new(reserved.x + pad, reserved.y + pad, width, height);

        for (i, slot) in self.backings.iter_mut().enumerate() {
            let Some(backing) = slot.as_mut() else {
                continue;
            };
            let texture = backing.texture;
            let Some(packer) = backing.packer.as_mut() else {
                continue;
            };
            if let Some(reserved) = packer.allocate(pw, ph) {
                let placement = Placement {
                    backing: BackingId(i as u32),
                    region: inner(reserved),
                    reserved,
                };
                return Ok((placement, texture));
            }
        }

        // Enough free area somewhere, just fragmented: try repacking that page.
        let candidates: Vec<BackingId> = self
            .live_backings()
            .filter(|(_, b)| b.packer.as_ref().is_some_and(|p| p.free_area() >= pw as i64 * ph as i64))
            .map(|(id, _)| id)
            .collect();
        for page in candidates {
            if let Some((backing, reserved)) = self.defragment(driver, queue, page, pw, ph)? {
                let texture = self.backing_texture(backing).ok_or(GraphicsError::ContextFailed)?;
                return Ok((Placement { backing, region: inner(reserved), reserved }, texture));
            }
        }

        let size = self.limits.atlas_size;
        let texture = driver.create_texture(size, size)?;
        let mut packer = ShelfPacker::new(size as i32, size as i32);
        let reserved = packer
            .allocate(pw, ph)
            .ok_or(GraphicsError::ImageTooLarge { width, height, max: size })?;
        let backing = self.insert_backing(Backing {
            texture,
            width: size,
            height: size,
            kind: BackingKind::Atlas,
            packer: Some(packer),
        });
        log::debug!("new atlas page {backing:?} ({size}x{size}), {} page(s) live", self.page_count());

        Ok((Placement { backing, region: inner(reserved), reserved }, texture))
    }

    /// Repacks `page` into a fresh texture, making room for a `pw × ph` request.
    ///
    /// Returns `None` without touching anything when the repack would not fit.
    /// On success every live image of the page is copied to its new rectangle,
    /// the old texture's deletion is enqueued behind the copies, and the
    /// request's reserved rectangle on the new page is returned.
    pub fn defragment<D: Driver + ?Sized>(
        &mut self,
        driver: &mut D,
        queue: &mut CommandQueue,
        page: BackingId,
        pw: i32,
        ph: i32,
    ) -> Result<Option<(BackingId, Region)>> {
        let Some(old) = self.backing(page) else {
            return Ok(None);
        };
        if old.kind != BackingKind::Atlas {
            return Ok(None);
        }
        let (old_texture, size) = (old.texture, old.width);

        let mut live = self.live_regions(page);
        live.sort_by(|(ia, a), (ib, b)| {
            b.height.cmp(&a.height).then(b.width.cmp(&a.width)).then(ia.cmp(ib))
        });

        let mut packer = ShelfPacker::new(size as i32, size as i32);
        let mut moves = Vec::with_capacity(live.len());
        for &(image, reserved) in &live {
            let Some(to) = packer.allocate(reserved.width, reserved.height) else {
                return Ok(None);
            };
            moves.push((image, reserved, to));
        }
        let Some(request) = packer.allocate(pw, ph) else {
            return Ok(None);
        };

        let texture = driver.create_texture(size, size)?;
        let new_page = self.insert_backing(Backing {
            texture,
            width: size,
            height: size,
            kind: BackingKind::Atlas,
            packer: Some(packer),
        });

        queue.enqueue(Command::DrawTriangles(DrawTrianglesCommand::clear(
            texture,
            Region::from_size(size as i32, size as i32),
        )));
        for &(image, from, to) in &moves {
            queue.enqueue(Command::DrawTriangles(DrawTrianglesCommand::copy(
                texture,
                to,
                old_texture,
                from,
            )));
            if let Some(p) = self.placements.get_mut(&image) {
                let (dx, dy) = (to.x - from.x, to.y - from.y);
                *p = Placement {
                    backing: new_page,
                    region: p.region.translate(dx, dy),
                    reserved: to,
                };
            }
        }
        queue.enqueue(Command::DeleteTexture(old_texture));
        self.remove_backing(page);
        self.defragmentations += 1;

        log::debug!(
            "defragmented atlas page {page:?} into {new_page:?}: {} image(s) relocated",
            moves.len()
        );
        Ok(Some((new_page, request)))
    }

    // ── release ───────────────────────────────────────────────────────────

    /// Frees the image's region.
    ///
    /// Dedicated textures and emptied atlas pages (except the last one) have
    /// their deletion enqueued, so earlier queued work can still use them.
    pub fn release(&mut self, queue: &mut CommandQueue, image: ImageId) -> Option<Placement> {
        let placement = self.placements.remove(&image)?;
        self.free_region(queue, placement);
        Some(placement)
    }

    fn free_region(&mut self, queue: &mut CommandQueue, placement: Placement) {
        let pages = self.page_count();
        let Some(backing) = self.backings.get_mut(placement.backing.0 as usize).and_then(Option::as_mut) else {
            return;
        };

        let delete = match backing.packer.as_mut() {
            Some(packer) => {
                packer.free(placement.reserved);
                packer.is_empty() && pages > 1
            }
            None => true,
        };
        if delete {
            queue.enqueue(Command::DeleteTexture(backing.texture));
            self.remove_backing(placement.backing);
            log::debug!("released backing {:?}", placement.backing);
        }
    }

    /// Moves an atlas image onto a texture of its own, copying its texels.
    ///
    /// Used before drawing into an image from a source on the same page, since
    /// a texture cannot be sampled while it is being rendered to.
    pub fn isolate<D: Driver + ?Sized>(
        &mut self,
        driver: &mut D,
        queue: &mut CommandQueue,
        image: ImageId,
    ) -> Result<Placement> {
        let old = self.placement(image).ok_or(GraphicsError::UseAfterDispose(image))?;
        let Some(old_texture) = self
            .backing(old.backing)
            .filter(|b| b.kind == BackingKind::Atlas)
            .map(|b| b.texture)
        else {
            return Ok(old);
        };

        let (placement, texture) = self.allocate_dedicated(driver, old.region.width, old.region.height)?;
        queue.enqueue(Command::DrawTriangles(DrawTrianglesCommand::clear(texture, placement.reserved)));
        queue.enqueue(Command::DrawTriangles(DrawTrianglesCommand::copy(
            texture,
            placement.region,
            old_texture,
            old.region,
        )));
        self.placements.insert(image, placement);
        self.free_region(queue, old);
        log::debug!("isolated {image:?} from atlas page {:?}", old.backing);
        Ok(placement)
    }

    // ── device loss ───────────────────────────────────────────────────────

    /// Replaces every backing texture with a new one of the same size and
    /// enqueues a full clear of each. Placements are unchanged.
    pub fn recreate<D: Driver + ?Sized>(
        &mut self,
        driver: &mut D,
        queue: &mut CommandQueue,
    ) -> std::result::Result<usize, DriverError> {
        let mut count = 0;
        for backing in self.backings.iter_mut().flatten() {
            driver.delete_texture(backing.texture);
            backing.texture = driver.create_texture(backing.width, backing.height)?;
            queue.enqueue(Command::DrawTriangles(DrawTrianglesCommand::clear(
                backing.texture,
                Region::from_size(backing.width as i32, backing.height as i32),
            )));
            count += 1;
        }
        Ok(count)
    }

    // ── translation ───────────────────────────────────────────────────────

    /// Translates a logical draw into `dst` into a queue entry in backing
    /// coordinates.
    pub fn translate_draw(&self, dst: ImageId, op: &DrawOperation) -> Option<DrawTrianglesCommand> {
        let (dst_texture, dst_rect) = self.resolve(dst)?;

        let mut sources = [None; SRC_IMAGE_COUNT];
        let mut src_regions = [Region::default(); SRC_IMAGE_COUNT];
        for (slot, source) in op.sources.iter().enumerate() {
            if let Some(image) = source {
                let (texture, region) = self.resolve(*image)?;
                sources[slot] = Some(texture);
                src_regions[slot] = region;
            }
        }

        let (dx, dy) = (dst_rect.x as f32, dst_rect.y as f32);
        let (du, dv) = (src_regions[0].x as f32, src_regions[0].y as f32);
        Some(DrawTrianglesCommand {
            dst: dst_texture,
            sources,
            src_regions,
            dst_region: op.dst_region.translate(dst_rect.x, dst_rect.y),
            vertices: op.vertices.iter().map(|v| v.translated(dx, dy, du, dv)).collect(),
            indices: op.indices.clone(),
            blend: op.blend,
            fill_rule: op.fill_rule,
            shader: op.shader,
        })
    }
}
