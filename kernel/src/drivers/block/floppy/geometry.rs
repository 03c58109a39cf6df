//! Logical block to cylinder/head/sector translation

/// The physical layout of a disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub heads: u8,
    pub cylinders: u8,
    pub sectors_per_track: u8,
    pub sector_size: usize,
    /// GAP3 length used by read and write commands
    pub gap_length: u8,
    /// GAP3 length used when formatting
    pub format_gap_length: u8,
}

impl Geometry {
    /// 3.5" high density, 1.44 MB
    pub const FLOPPY_144: Geometry = Geometry {
        heads: 2,
        cylinders: 80,
        sectors_per_track: 18,
        sector_size: 512,
        gap_length: 0x1B,
        format_gap_length: 0x54,
    };

    pub const fn sectors_per_cylinder(&self) -> u32 {
        self.heads as u32 * self.sectors_per_track as u32
    }

    pub const fn total_sectors(&self) -> u32 {
        self.cylinders as u32 * self.sectors_per_cylinder()
    }

    pub const fn total_bytes(&self) -> usize {
        self.total_sectors() as usize * self.sector_size
    }

    /// The `N` parameter of the data commands: sector size as 128 << N
    pub const fn size_code(&self) -> u8 {
        (self.sector_size / 128).trailing_zeros() as u8
    }

    /// Maps a 0-indexed logical block to its physical address, or `None` if
    /// the block lies past the end of the disk
    pub fn translate(&self, lba: u32) -> Option<Chs> {
        if lba >= self.total_sectors() {
            return None;
        }

        let spt = self.sectors_per_track as u32;
        let cylinder = lba / self.sectors_per_cylinder();
        let remainder = lba % self.sectors_per_cylinder();

        Some(Chs {
            head: (remainder / spt) as u8,
            cylinder: cylinder as u8,
            // sectors are 1-indexed on the wire
            sector: (remainder % spt + 1) as u8,
        })
    }

    /// Inverse of [`Geometry::translate`]. Sector 0 does not exist on the wire
    /// and is treated as sector 1
    pub fn to_lba(&self, chs: Chs) -> u32 {
        chs.cylinder as u32 * self.sectors_per_cylinder()
            + chs.head as u32 * self.sectors_per_track as u32
            + (chs.sector as u32).saturating_sub(1)
    }

    /// Number of sectors from `chs` up to and including the last sector of its
    /// cylinder, i.e. the most a single multitrack command can transfer
    pub fn sectors_left_in_cylinder(&self, chs: Chs) -> u32 {
        self.sectors_per_cylinder() - (self.to_lba(chs) % self.sectors_per_cylinder())
    }
}

/// A physical sector address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chs {
    pub head: u8,
    pub cylinder: u8,
    pub sector: u8,
}

impl Chs {
    pub const fn new(head: u8, cylinder: u8, sector: u8) -> Self {
        Self {
            head,
            cylinder,
            sector,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GEOMETRY: Geometry = Geometry::FLOPPY_144;

    #[test]
    fn translation_is_a_bijection() {
        let mut seen = std::collections::HashSet::new();

        for lba in 0..2880 {
            let chs = GEOMETRY.translate(lba).unwrap();

            assert!(chs.head < 2);
            assert!(chs.cylinder < 80);
            assert!((1..=18).contains(&chs.sector));
            assert_eq!(GEOMETRY.to_lba(chs), lba);
            assert!(seen.insert((chs.head, chs.cylinder, chs.sector)));
        }

        assert_eq!(seen.len(), 2880);
    }

    #[test]
    fn known_addresses() {
        assert_eq!(GEOMETRY.translate(0), Some(Chs::new(0, 0, 1)));
        assert_eq!(GEOMETRY.translate(17), Some(Chs::new(0, 0, 18)));
        assert_eq!(GEOMETRY.translate(18), Some(Chs::new(1, 0, 1)));
        assert_eq!(GEOMETRY.translate(35), Some(Chs::new(1, 0, 18)));
        assert_eq!(GEOMETRY.translate(36), Some(Chs::new(0, 1, 1)));
        assert_eq!(GEOMETRY.translate(2879), Some(Chs::new(1, 79, 18)));
    }

    #[test]
    fn past_the_end() {
        assert_eq!(GEOMETRY.translate(2880), None);
        assert_eq!(GEOMETRY.translate(u32::MAX), None);
    }

    #[test]
    fn derived_sizes() {
        assert_eq!(GEOMETRY.total_sectors(), 2880);
        assert_eq!(GEOMETRY.total_bytes(), 1_474_560);
        assert_eq!(GEOMETRY.size_code(), 2);
        assert_eq!(GEOMETRY.sectors_left_in_cylinder(Chs::new(0, 3, 1)), 36);
        assert_eq!(GEOMETRY.sectors_left_in_cylinder(Chs::new(1, 3, 18)), 1);
    }

    #[test]
    fn sector_zero_does_not_underflow() {
        assert_eq!(GEOMETRY.to_lba(Chs::new(0, 0, 0)), 0);
        assert_eq!(GEOMETRY.to_lba(Chs::new(1, 2, 0)), 2 * 36 + 18);
    }
}
