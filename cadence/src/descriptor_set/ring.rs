// Copyright (c) 2026 The cadence developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

use super::{DescriptorPoolSize, DescriptorSetLayoutInfo};
use crate::{backend::DeviceBackend, VulkanError};
use ash::vk;
use smallvec::SmallVec;
use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
};

/// The number of descriptor sets allocated at once.
pub(crate) const SETS_PER_GENERATION: u32 = 32;

/// How many reset generations are kept around for reuse.
const MAX_SPARE_GENERATIONS: usize = 2;

/// Hands out descriptor sets of one layout, each of which is written exactly once before its
/// generation is recycled.
///
/// Sets are allocated in generations of [`SETS_PER_GENERATION`] from a pool of their own. The
/// newest generation is the front generation, and sets are only ever taken from it. Every
/// generation counts how many command buffers still reference one of its sets; a generation
/// that is no longer the front one is reset once that count reaches zero.
///
/// Command buffers that bind a set keep its [`GenerationPool`] alive, so dropping the ring
/// never destroys a pool that a pending command buffer references.
#[derive(Debug)]
pub(crate) struct DescriptorSetRing {
    backend: Arc<dyn DeviceBackend>,
    layout: vk::DescriptorSetLayout,
    pool_sizes: SmallVec<[DescriptorPoolSize; 8]>,
    // Oldest first, the front generation is at the back.
    generations: VecDeque<Generation>,
    spare: Vec<Generation>,
}

#[derive(Debug)]
struct Generation {
    pool: Arc<GenerationPool>,
    sets: Vec<vk::DescriptorSet>,
    cursor: usize,
}

impl Generation {
    fn is_exhausted(&self) -> bool {
        self.cursor == self.sets.len()
    }
}

/// The descriptor pool of one generation, destroyed when the last reference goes away.
#[derive(Debug)]
pub(crate) struct GenerationPool {
    backend: Arc<dyn DeviceBackend>,
    handle: vk::DescriptorPool,
    in_flight: AtomicU32,
}

impl GenerationPool {
    /// Records that a command buffer references one of the pool's sets until `release` is
    /// called on the returned reference.
    pub(crate) fn acquire(self: &Arc<Self>) -> PoolReference {
        self.in_flight.fetch_add(1, Ordering::AcqRel);

        PoolReference(self.clone())
    }

    /// Returns how many command buffers reference one of the pool's sets.
    pub(crate) fn in_flight(&self) -> u32 {
        self.in_flight.load(Ordering::Acquire)
    }

    fn is_idle(&self) -> bool {
        self.in_flight() == 0
    }
}

impl Drop for GenerationPool {
    fn drop(&mut self) {
        // SAFETY: Every command buffer that bound one of the sets has released its reference.
        unsafe { self.backend.destroy_descriptor_pool(self.handle) };
    }
}

/// Keeps a [`GenerationPool`] alive and counted as in flight until released.
#[derive(Debug)]
pub(crate) struct PoolReference(Arc<GenerationPool>);

impl PoolReference {
    pub(crate) fn release(self) {
        self.0.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

impl DescriptorSetRing {
    pub(crate) fn new(backend: Arc<dyn DeviceBackend>, layout: &DescriptorSetLayoutInfo) -> Self {
        let pool_sizes = layout
            .pool_sizes()
            .map(|pool_size| DescriptorPoolSize {
                descriptor_count: pool_size.descriptor_count * SETS_PER_GENERATION,
                ..pool_size
            })
            .collect();

        DescriptorSetRing {
            backend,
            layout: layout.handle,
            pool_sizes,
            generations: VecDeque::new(),
            spare: Vec::new(),
        }
    }

    /// Returns a descriptor set that was never written since its pool was last reset, and makes
    /// it the current set.
    pub(crate) fn next_set(&mut self) -> Result<vk::DescriptorSet, VulkanError> {
        self.retire_idle_generations()?;

        if self.generations.back().map_or(true, Generation::is_exhausted) {
            let generation = match self.spare.pop() {
                Some(generation) => generation,
                None => self.create_generation()?,
            };
            self.generations.push_back(generation);

            tracing::debug!(
                generations = self.generations.len(),
                "opened a descriptor set generation",
            );
        }

        let index = self.generations.len() - 1;
        let front = &mut self.generations[index];
        let set = front.sets[front.cursor];
        front.cursor += 1;

        Ok(set)
    }

    /// Returns the set last returned by [`next_set`], and the pool of its generation.
    ///
    /// [`next_set`]: Self::next_set
    pub(crate) fn current(&self) -> Option<(vk::DescriptorSet, &Arc<GenerationPool>)> {
        let front = self.generations.back()?;

        (front.cursor != 0).then(|| (front.sets[front.cursor - 1], &front.pool))
    }

    /// Returns the number of generations that still hold sets, the front one included.
    pub(crate) fn generation_count(&self) -> usize {
        self.generations.len()
    }

    fn retire_idle_generations(&mut self) -> Result<(), VulkanError> {
        if self.generations.len() < 2 {
            return Ok(());
        }

        let front_index = self.generations.len() - 1;
        let mut retired = SmallVec::<[Generation; 4]>::new();
        let mut kept = VecDeque::with_capacity(self.generations.len());

        for (index, generation) in self.generations.drain(..).enumerate() {
            if index != front_index && generation.pool.is_idle() {
                retired.push(generation);
            } else {
                kept.push_back(generation);
            }
        }

        self.generations = kept;

        for generation in retired {
            self.recycle(generation)?;
        }

        Ok(())
    }

    fn recycle(&mut self, mut generation: Generation) -> Result<(), VulkanError> {
        if self.spare.len() >= MAX_SPARE_GENERATIONS {
            return Ok(());
        }

        let pool = generation.pool.handle;

        // SAFETY: No command buffer references any of the sets of the pool anymore.
        unsafe { self.backend.reset_descriptor_pool(pool) }?;
        generation.sets = unsafe {
            self.backend
                .allocate_descriptor_sets(pool, self.layout, SETS_PER_GENERATION)
        }?;
        generation.cursor = 0;
        self.spare.push(generation);

        Ok(())
    }

    fn create_generation(&self) -> Result<Generation, VulkanError> {
        let handle = unsafe {
            self.backend
                .create_descriptor_pool(SETS_PER_GENERATION, &self.pool_sizes)
        }?;
        let pool = Arc::new(GenerationPool {
            backend: self.backend.clone(),
            handle,
            in_flight: AtomicU32::new(0),
        });

        let sets = unsafe {
            self.backend
                .allocate_descriptor_sets(handle, self.layout, SETS_PER_GENERATION)
        }?;

        Ok(Generation {
            pool,
            sets,
            cursor: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::null::NullBackend,
        descriptor_set::{DescriptorBindingInfo, DescriptorType},
    };
    use ash::vk::Handle;

    fn ring(backend: &Arc<NullBackend>) -> DescriptorSetRing {
        let layout = DescriptorSetLayoutInfo {
            handle: vk::DescriptorSetLayout::from_raw(1),
            bindings: vec![DescriptorBindingInfo::new(
                0,
                "uniforms",
                DescriptorType::UniformBuffer,
            )],
            ..Default::default()
        };

        DescriptorSetRing::new(backend.clone(), &layout)
    }

    #[test]
    fn sets_are_not_reused_within_a_generation() {
        let backend = Arc::new(NullBackend::new());
        let mut ring = ring(&backend);
        assert!(ring.current().is_none());

        let sets: Vec<_> = (0..SETS_PER_GENERATION)
            .map(|_| ring.next_set().unwrap())
            .collect();
        assert_eq!(ring.current().unwrap().0, sets[sets.len() - 1]);
        assert_eq!(ring.generation_count(), 1);

        let pool = backend.descriptor_set_pool(sets[0]).unwrap();
        assert!(sets
            .iter()
            .all(|&set| backend.descriptor_set_pool(set) == Some(pool)));

        let next = ring.next_set().unwrap();
        assert!(!sets.contains(&next));
        assert_ne!(backend.descriptor_set_pool(next), Some(pool));
        assert_eq!(backend.live_descriptor_pools(), 2);
    }

    #[test]
    fn referenced_generation_is_not_recycled() {
        let backend = Arc::new(NullBackend::new());
        let mut ring = ring(&backend);

        let first = ring.next_set().unwrap();
        let first_pool = backend.descriptor_set_pool(first).unwrap();
        let reference = ring.current().unwrap().1.acquire();

        // Exhaust the first generation and the second one, then open a third and take another
        // set, which retires the second.
        for _ in 1..SETS_PER_GENERATION * 2 {
            ring.next_set().unwrap();
        }
        ring.next_set().unwrap();
        assert_eq!(ring.generation_count(), 3);
        ring.next_set().unwrap();

        // The second generation was idle and has been reset, the first one is still referenced.
        assert_eq!(backend.descriptor_pool_resets(first_pool), 0);
        assert_eq!(ring.generation_count(), 2);
        assert_eq!(backend.descriptor_set_pool(first), Some(first_pool));

        reference.release();
        ring.next_set().unwrap();
        assert_eq!(backend.descriptor_pool_resets(first_pool), 1);
        assert_eq!(ring.generation_count(), 1);
    }

    #[test]
    fn spare_generations_are_reused() {
        let backend = Arc::new(NullBackend::new());
        let mut ring = ring(&backend);

        for _ in 0..SETS_PER_GENERATION * 8 {
            ring.next_set().unwrap();
        }

        // One front generation, plus at most the spare ones.
        assert!(backend.live_descriptor_pools() <= 1 + MAX_SPARE_GENERATIONS);

        drop(ring);
        assert_eq!(backend.live_descriptor_pools(), 0);
    }

    #[test]
    fn referenced_pool_outlives_the_ring() {
        let backend = Arc::new(NullBackend::new());
        let mut ring = ring(&backend);

        let set = ring.next_set().unwrap();
        let pool = ring.current().unwrap().1.clone();
        let reference = pool.acquire();
        drop(pool);

        drop(ring);
        assert!(backend.descriptor_set_pool(set).is_some());
        assert_eq!(backend.live_descriptor_pools(), 1);

        reference.release();
        assert_eq!(backend.live_descriptor_pools(), 0);
    }
}
