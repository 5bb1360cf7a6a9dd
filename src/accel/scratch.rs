use crate::{device::BuildSizes, utility::aligned_size};

/// Packs the scratch requirements of builds that are issued together into one buffer.
///
/// Every build gets its own aligned range, so builds in the same command never alias.
#[derive(Debug, Clone)]
pub struct ScratchBudget {
    alignment: u64,
    build_total: u64,
    deformable_total: u64,
}

impl ScratchBudget {
    pub fn new(alignment: u64) -> Self {
        Self {
            alignment: alignment.max(1),
            build_total: 0,
            deformable_total: 0,
        }
    }

    /// Reserves a full build. Returns the offset to patch into the build.
    pub fn push_build(&mut self, build_scratch: u64) -> u64 {
        let offset = self.build_total;
        self.build_total += aligned_size(build_scratch, self.alignment);
        offset
    }

    /// Reserves a range that can hold either a rebuild or an in-place update, since a
    /// deformable structure needs both over its lifetime.
    pub fn push_deformable(&mut self, sizes: BuildSizes) -> u64 {
        let offset = self.deformable_total;
        let size = sizes.build_scratch.max(sizes.update_scratch);
        self.deformable_total += aligned_size(size, self.alignment);
        offset
    }

    pub fn alignment(&self) -> u64 {
        self.alignment
    }

    pub fn build_total(&self) -> u64 {
        self.build_total
    }

    pub fn deformable_total(&self) -> u64 {
        self.deformable_total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_are_aligned_and_disjoint() {
        let mut budget = ScratchBudget::new(128);
        let sizes = [1000, 1, 128, 4096, 129];
        let offsets: Vec<_> = sizes.iter().map(|&s| budget.push_build(s)).collect();

        for (i, (&offset, &size)) in offsets.iter().zip(&sizes).enumerate() {
            assert_eq!(offset % 128, 0);
            if let Some(&next) = offsets.get(i + 1) {
                assert!(offset + size <= next);
            }
        }
        let expected: u64 = sizes.iter().map(|&s| aligned_size(s, 128)).sum();
        assert_eq!(budget.build_total(), expected);
        assert_eq!(budget.deformable_total(), 0);
    }

    #[test]
    fn deformable_ranges_fit_the_larger_requirement() {
        let mut budget = ScratchBudget::new(256);
        let first = budget.push_deformable(BuildSizes {
            structure: 0,
            build_scratch: 300,
            update_scratch: 100,
        });
        let second = budget.push_deformable(BuildSizes {
            structure: 0,
            build_scratch: 10,
            update_scratch: 600,
        });
        assert_eq!(first, 0);
        assert_eq!(second, 512);
        assert_eq!(budget.deformable_total(), 512 + 768);
        assert_eq!(budget.build_total(), 0);
    }
}
