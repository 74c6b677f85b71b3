//! The block cache: location-hash → compiled-block descriptors,
//! the per-target patch-site lists, and the interval
//! index from guest PC ranges to the blocks compiled from them (for
//! `invalidate_range`).

use std::collections::{BTreeMap, HashMap};

use dynarm_backend::{PatchFallback, PatchKind};

use crate::region::CodeRegion;

/// One successfully emitted block.
#[derive(Debug, Clone, Copy)]
pub struct BlockDescriptor {
    pub entrypoint: u64,
    pub byte_len: u32,
}

/// A patchable site in emitted code, in absolute terms. `fallback` is the
/// address the site branches to (or materializes) while its target is not
/// compiled; `owner` is the block the site physically lives in, so its
/// records die with that block.
#[derive(Debug, Clone, Copy)]
pub struct PatchSiteAbs {
    pub addr: u64,
    pub kind: PatchKind,
    pub fallback: u64,
    pub owner: u64,
}

/// Write one patch site's bytes: either the concrete target entrypoint or
/// its trampoline-bound (unpatched) form. Patching a site with the same
/// target twice writes identical bytes, which is what makes patching
/// idempotent.
pub fn write_patch(region: &CodeRegion, site: &PatchSiteAbs, target: Option<u64>) {
    let dest = target.unwrap_or(site.fallback);
    match site.kind {
        PatchKind::Jg => {
            let rel = (dest as i64 - (site.addr as i64 + 6)) as i32;
            let mut bytes = [0x0F, 0x8F, 0, 0, 0, 0];
            bytes[2..].copy_from_slice(&rel.to_le_bytes());
            region.write_at(site.addr, &bytes);
        }
        PatchKind::Jmp => {
            let rel = (dest as i64 - (site.addr as i64 + 5)) as i32;
            let mut bytes = [0xE9, 0, 0, 0, 0];
            bytes[1..].copy_from_slice(&rel.to_le_bytes());
            region.write_at(site.addr, &bytes);
        }
        PatchKind::MovRcx => {
            let mut bytes = [0x48, 0xB9, 0, 0, 0, 0, 0, 0, 0, 0];
            bytes[2..].copy_from_slice(&dest.to_le_bytes());
            region.write_at(site.addr, &bytes);
        }
    }
}

/// Resolve a `PatchFallback` to an absolute address for a site at `addr`.
pub fn fallback_addr(addr: u64, kind: PatchKind, fallback: PatchFallback, exit_stub: u64) -> u64 {
    match fallback {
        PatchFallback::NextInstruction => addr + kind.len() as u64,
        PatchFallback::ExitStub => exit_stub,
    }
}

#[derive(Default)]
pub struct BlockCache {
    blocks: HashMap<u64, BlockDescriptor>,
    /// Patch sites indexed by *target* location hash.
    patch_sites: HashMap<u64, Vec<PatchSiteAbs>>,
    /// Interval index: start PC → (end PC, location hash) of every block
    /// whose guest bytes begin there.
    ranges: BTreeMap<u64, Vec<(u64, u64)>>,
}

impl BlockCache {
    pub fn new() -> BlockCache {
        BlockCache::default()
    }

    pub fn get(&self, loc_hash: u64) -> Option<&BlockDescriptor> {
        self.blocks.get(&loc_hash)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn insert(&mut self, loc_hash: u64, desc: BlockDescriptor, pc_range: (u64, u64)) {
        self.blocks.insert(loc_hash, desc);
        self.ranges
            .entry(pc_range.0)
            .or_default()
            .push((pc_range.1, loc_hash));
    }

    pub fn add_patch_site(&mut self, target: u64, site: PatchSiteAbs) {
        self.patch_sites.entry(target).or_default().push(site);
    }

    pub fn sites_for(&self, target: u64) -> &[PatchSiteAbs] {
        self.patch_sites
            .get(&target)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Every block whose guest byte range intersects `[start, end)`.
    pub fn blocks_overlapping(&self, start: u64, end: u64) -> Vec<u64> {
        let mut hits = Vec::new();
        // A block starting below `start` can still reach into the range;
        // walk from the beginning of the index rather than `start`
        // (blocks are short, the index stays small).
        for (&block_start, entries) in self.ranges.range(..end) {
            for &(block_end, loc) in entries {
                if block_start < end && block_end > start {
                    hits.push(loc);
                }
            }
        }
        hits
    }

    /// Drop one block's descriptor, range entries, and the patch sites it
    /// owns (its incoming sites stay, bound back to their trampolines by
    /// the caller).
    pub fn remove(&mut self, loc_hash: u64) -> Option<BlockDescriptor> {
        let desc = self.blocks.remove(&loc_hash)?;
        for entries in self.ranges.values_mut() {
            entries.retain(|&(_, loc)| loc != loc_hash);
        }
        self.ranges.retain(|_, entries| !entries.is_empty());
        for sites in self.patch_sites.values_mut() {
            sites.retain(|s| s.owner != loc_hash);
        }
        self.patch_sites.retain(|_, sites| !sites.is_empty());
        Some(desc)
    }

    pub fn clear(&mut self) {
        self.blocks.clear();
        self.patch_sites.clear();
        self.ranges.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(entry: u64) -> BlockDescriptor {
        BlockDescriptor {
            entrypoint: entry,
            byte_len: 32,
        }
    }

    #[test]
    fn range_queries_find_overlapping_blocks() {
        let mut cache = BlockCache::new();
        cache.insert(1, desc(0x1000), (0x100, 0x110));
        cache.insert(2, desc(0x2000), (0x110, 0x120));
        cache.insert(3, desc(0x3000), (0x200, 0x210));
        let mut hits = cache.blocks_overlapping(0x108, 0x112);
        hits.sort();
        assert_eq!(hits, vec![1, 2]);
        assert!(cache.blocks_overlapping(0x150, 0x1FF).is_empty());
    }

    #[test]
    fn a_block_straddling_the_query_start_is_found() {
        let mut cache = BlockCache::new();
        cache.insert(7, desc(0x1000), (0x100, 0x140));
        assert_eq!(cache.blocks_overlapping(0x120, 0x124), vec![7]);
    }

    #[test]
    fn removal_drops_owned_patch_sites_but_keeps_incoming_ones() {
        let mut cache = BlockCache::new();
        cache.insert(1, desc(0x1000), (0x100, 0x110));
        cache.insert(2, desc(0x2000), (0x110, 0x120));
        // Block 1 links to block 2, and block 2 links back to block 1.
        cache.add_patch_site(
            2,
            PatchSiteAbs {
                addr: 0x1010,
                kind: PatchKind::Jg,
                fallback: 0x1016,
                owner: 1,
            },
        );
        cache.add_patch_site(
            1,
            PatchSiteAbs {
                addr: 0x2010,
                kind: PatchKind::Jg,
                fallback: 0x2016,
                owner: 2,
            },
        );
        cache.remove(1);
        // Block 1's outgoing site is gone with it; block 2's site
        // targeting block 1 survives (it was just unpatched).
        assert!(cache.sites_for(2).is_empty());
        assert_eq!(cache.sites_for(1).len(), 1);
    }
}
