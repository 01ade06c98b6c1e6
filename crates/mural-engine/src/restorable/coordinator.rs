use std::collections::{BTreeMap, BTreeSet};

use crate::atlas::AtlasAllocator;
use crate::command::{Command, CommandQueue, DrawTrianglesCommand};
use crate::driver::{Driver, DriverError};
use crate::error::{GraphicsError, Result};
use crate::paint::pixels;

use super::{BaseState, ImageId, ImageTable, LogOp};

/// Lifecycle of a graphics context with respect to device loss.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ContextState {
    Live,
    /// Rebuilding images after a device loss.
    Restoring,
    /// A restoration failed; the context rejects every further call.
    Failed,
}

/// Outcome of one restoration pass.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct RestoreReport {
    /// Images whose contents were rebuilt from a log.
    pub images: usize,
    /// Logged operations re-enqueued.
    pub replayed_ops: usize,
    /// Images snapshotted from the old textures before recreation.
    pub snapshots: usize,
    /// Images chosen to break dependency cycles.
    pub cycle_breakers: usize,
    pub backings: usize,
}

/// Replay order over the drawn-from relation.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub(crate) struct RestoreOrder {
    pub order: Vec<ImageId>,
    /// Images whose dependencies were ignored to break a cycle.
    pub breakers: Vec<ImageId>,
}

/// Orders images so every image comes after the images its log reads from.
///
/// Kahn's algorithm with ties broken by image index. When progress stops, the
/// lowest-index member of a remaining cycle is emitted as a breaker: it must be
/// restored from a snapshot rather than from its log. Stale images have no dependencies
/// since they are snapshotted anyway.
pub(crate) fn restore_order(images: &ImageTable) -> RestoreOrder {
    let mut pending: BTreeMap<ImageId, BTreeSet<ImageId>> = BTreeMap::new();
    let mut dependents: BTreeMap<ImageId, Vec<ImageId>> = BTreeMap::new();

    for (id, record) in images.iter() {
        let deps: BTreeSet<ImageId> = match &record.log {
            Some(log) if !record.stale => log
                .sources()
                .into_iter()
                .filter(|s| *s != id && images.contains(*s))
                .collect(),
            _ => BTreeSet::new(),
        };
        for &dep in &deps {
            dependents.entry(dep).or_default().push(id);
        }
        pending.insert(id, deps);
    }

    let mut ready: BTreeSet<ImageId> = pending
        .iter()
        .filter(|(_, deps)| deps.is_empty())
        .map(|(&id, _)| id)
        .collect();
    let mut out = RestoreOrder::default();

    loop {
        while let Some(next) = ready.pop_first() {
            pending.remove(&next);
            out.order.push(next);
            for dependent in dependents.get(&next).into_iter().flatten() {
                if let Some(deps) = pending.get_mut(dependent) {
                    deps.remove(&next);
                    if deps.is_empty() {
                        ready.insert(*dependent);
                    }
                }
            }
        }
        let Some(breaker) = cycle_member(&pending) else {
            break;
        };
        if let Some(deps) = pending.get_mut(&breaker) {
            deps.clear();
        }
        out.breakers.push(breaker);
        ready.insert(breaker);
    }
    out
}

/// Walks unresolved dependencies from the lowest pending image until a node
/// repeats, and returns the lowest-index image on that cycle.
///
/// Every pending image has at least one pending dependency, so the walk
/// always closes.
fn cycle_member(pending: &BTreeMap<ImageId, BTreeSet<ImageId>>) -> Option<ImageId> {
    let mut path: Vec<ImageId> = Vec::new();
    let mut current = *pending.keys().next()?;
    loop {
        if let Some(pos) = path.iter().position(|&p| p == current) {
            return path[pos..].iter().min().copied();
        }
        path.push(current);
        current = *pending.get(&current)?.iter().next()?;
    }
}

fn failure(stage: &str, err: DriverError) -> GraphicsError {
    GraphicsError::RestorationFailure(format!("{stage}: {err}"))
}

/// Rebuilds every image after a device loss.
///
/// Pending work is flushed if the device still accepts it, then dropped. Stale
/// images and cycle breakers are read back from the old textures; if one of
/// them can no longer be read the restoration fails, since its log would
/// replay against changed sources. Then all backing textures are recreated
/// and every log is replayed in dependency order.
pub(crate) fn restore<D: Driver + ?Sized>(
    driver: &mut D,
    queue: &mut CommandQueue,
    atlas: &mut AtlasAllocator,
    images: &mut ImageTable,
) -> Result<RestoreReport> {
    let readable = match queue.flush(driver) {
        Ok(_) => true,
        Err(err) => {
            log::debug!("pending work dropped on device loss: {err}");
            false
        }
    };
    queue.discard();

    let plan = restore_order(images);
    let mut report = RestoreReport {
        cycle_breakers: plan.breakers.len(),
        ..RestoreReport::default()
    };

    let mut snapshot: BTreeSet<ImageId> = images
        .iter()
        .filter(|(_, r)| r.stale && r.log.is_some())
        .map(|(id, _)| id)
        .collect();
    snapshot.extend(plan.breakers.iter().copied());

    for id in snapshot {
        let Some((texture, region)) = atlas.resolve(id) else {
            continue;
        };
        let data = if readable {
            driver.read_pixels(texture, region).ok()
        } else {
            None
        };
        let record = images.get_mut(id)?;
        let Some(history) = record.log.as_mut() else {
            continue;
        };
        let Some(data) = data else {
            return Err(GraphicsError::RestorationFailure(format!(
                "{id:?} needs a snapshot but its texture can no longer be read"
            )));
        };
        let uniform = pixels::uniform(&data);
        history.reset_to_snapshot(data);
        record.stale = false;
        record.uniform = uniform;
        report.snapshots += 1;
    }

    report.backings = atlas
        .recreate(driver, queue)
        .map_err(|e| failure("recreating textures", e))?;

    for (_, record) in images.iter_mut() {
        if record.log.is_none() {
            record.uniform = Some([0; 4]);
        }
    }

    for id in plan.order {
        let record = images.get(id)?;
        let Some(history) = &record.log else {
            continue;
        };
        let (texture, region) = atlas.resolve(id).ok_or_else(|| {
            GraphicsError::RestorationFailure(format!("{id:?} has no backing placement"))
        })?;

        if let BaseState::Snapshot(data) = history.base() {
            queue.enqueue(Command::WritePixels { dst: texture, region, pixels: data.clone() });
        }
        for op in history.ops() {
            match op {
                LogOp::Draw(draw) => match atlas.translate_draw(id, draw) {
                    Some(cmd) => queue.enqueue(Command::DrawTriangles(cmd)),
                    None => log::warn!("{id:?}: skipping a draw whose source is gone"),
                },
                LogOp::WritePixels { region: r, pixels: data } => queue.enqueue(Command::WritePixels {
                    dst: texture,
                    region: r.translate(region.x, region.y),
                    pixels: data.clone(),
                }),
                LogOp::Clear { region: r } => queue.enqueue(Command::DrawTriangles(
                    DrawTrianglesCommand::clear(texture, r.translate(region.x, region.y)),
                )),
            }
        }
        report.images += 1;
        report.replayed_ops += history.len();
    }

    queue.flush(driver).map_err(|e| failure("replaying logs", e))?;
    log::info!(
        "restored {} image(s) on {} texture(s): {} op(s) replayed, {} snapshot(s)",
        report.images,
        report.backings,
        report.replayed_ops,
        report.snapshots
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::Region;
    use crate::paint::Color;
    use crate::render::{quad_vertices, BlendMode, FillRule, Shader, QUAD_INDICES, SRC_IMAGE_COUNT};
    use crate::restorable::{DrawOperation, ImageRecord};

    fn copy_from(source: ImageId) -> DrawOperation {
        let mut sources = [None; SRC_IMAGE_COUNT];
        sources[0] = Some(source);
        DrawOperation {
            sources,
            vertices: quad_vertices(Region::from_size(2, 2), Region::from_size(2, 2), Color::WHITE).to_vec(),
            indices: QUAD_INDICES.to_vec(),
            blend: BlendMode::SourceOver,
            fill_rule: FillRule::FillAll,
            shader: Shader::TEXTURE,
            dst_region: Region::from_size(4, 4),
        }
    }

    fn table(n: usize) -> (ImageTable, Vec<ImageId>) {
        let mut t = ImageTable::new();
        let ids = (0..n).map(|_| t.insert(ImageRecord::new(4, 4, false, true))).collect();
        (t, ids)
    }

    fn draw(t: &mut ImageTable, dst: ImageId, src: ImageId) {
        t.get_mut(dst).unwrap().log.as_mut().unwrap().record_draw(copy_from(src));
    }

    // ── ordering ──────────────────────────────────────────────────────────

    #[test]
    fn sources_come_before_dependents() {
        let (mut t, ids) = table(4);
        // 0 <- 2 <- 1, 3 independent
        draw(&mut t, ids[0], ids[2]);
        draw(&mut t, ids[2], ids[1]);

        let plan = restore_order(&t);
        assert_eq!(plan.order, vec![ids[1], ids[2], ids[0], ids[3]]);
        assert!(plan.breakers.is_empty());
    }

    #[test]
    fn cycle_is_broken_at_lowest_index() {
        let (mut t, ids) = table(3);
        draw(&mut t, ids[1], ids[2]);
        draw(&mut t, ids[2], ids[1]);
        draw(&mut t, ids[0], ids[2]);

        let plan = restore_order(&t);
        assert_eq!(plan.breakers, vec![ids[1]]);
        assert_eq!(plan.order, vec![ids[1], ids[2], ids[0]]);
    }

    #[test]
    fn stale_images_have_no_dependencies() {
        let (mut t, ids) = table(2);
        draw(&mut t, ids[0], ids[1]);
        t.get_mut(ids[0]).unwrap().stale = true;

        let plan = restore_order(&t);
        assert_eq!(plan.order, vec![ids[0], ids[1]]);
    }
}
