use crate::error::{GraphicsError, Result};

use super::{ImageId, RestorationLog};

/// Everything the context tracks about one live image.
#[derive(Debug)]
pub(crate) struct ImageRecord {
    pub width: i32,
    pub height: i32,
    pub screen: bool,
    /// `None` when the image is not recorded (screen targets, or a driver
    /// that never loses resources).
    pub log: Option<RestorationLog>,
    /// The log no longer reproduces the image; a read-back is due.
    pub stale: bool,
    /// Known single color of every texel, if any.
    pub uniform: Option<[u8; 4]>,
}

impl ImageRecord {
    pub fn new(width: i32, height: i32, screen: bool, recorded: bool) -> Self {
        Self {
            width,
            height,
            screen,
            log: recorded.then(|| RestorationLog::new(width, height)),
            stale: false,
            uniform: Some([0; 4]),
        }
    }
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    record: Option<ImageRecord>,
}

/// Generational slot map of live images.
#[derive(Debug, Default)]
pub(crate) struct ImageTable {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl ImageTable {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn insert(&mut self, record: ImageRecord) -> ImageId {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.record = Some(record);
            return ImageId { index, generation: slot.generation };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot { generation: 0, record: Some(record) });
        ImageId { index, generation: 0 }
    }

    pub fn get(&self, id: ImageId) -> Result<&ImageRecord> {
        self.slots
            .get(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.record.as_ref())
            .ok_or(GraphicsError::UseAfterDispose(id))
    }

    pub fn get_mut(&mut self, id: ImageId) -> Result<&mut ImageRecord> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.record.as_mut())
            .ok_or(GraphicsError::UseAfterDispose(id))
    }

    #[inline]
    pub fn contains(&self, id: ImageId) -> bool {
        self.get(id).is_ok()
    }

    /// Removes an image; its slot is reused with a bumped generation.
    pub fn remove(&mut self, id: ImageId) -> Result<ImageRecord> {
        self.get(id)?;
        let slot = &mut self.slots[id.index as usize];
        let record = slot.record.take().ok_or(GraphicsError::UseAfterDispose(id))?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.live -= 1;
        Ok(record)
    }

    /// Live images in index order.
    pub fn iter(&self) -> impl Iterator<Item = (ImageId, &ImageRecord)> + '_ {
        self.slots.iter().enumerate().filter_map(|(i, s)| {
            let id = ImageId { index: i as u32, generation: s.generation };
            s.record.as_ref().map(|r| (id, r))
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (ImageId, &mut ImageRecord)> + '_ {
        self.slots.iter_mut().enumerate().filter_map(|(i, s)| {
            let id = ImageId { index: i as u32, generation: s.generation };
            s.record.as_mut().map(|r| (id, r))
        })
    }

    /// Other images whose log reads from `source`.
    pub fn dependents_of(&self, source: ImageId) -> Vec<ImageId> {
        self.iter()
            .filter(|(id, r)| *id != source && r.log.as_ref().is_some_and(|l| l.depends_on(source)))
            .map(|(id, _)| id)
            .collect()
    }
}
