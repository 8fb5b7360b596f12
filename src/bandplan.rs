//! IARU Region 1 band plan: amateur bands and their mode portions.
//!
//! Frequencies are in Hz.

use std::fmt;

/// Usage of a band portion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandMode {
    Cw,
    Digital,
    Phone,
    Beacon,
}

impl fmt::Display for BandMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Cw => "CW",
            Self::Digital => "digital",
            Self::Phone => "phone",
            Self::Beacon => "beacon",
        })
    }
}

/// A contiguous range of a band reserved for one mode; `to` is exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Portion {
    pub from: u64,
    pub to: u64,
    pub mode: BandMode,
}

impl Portion {
    pub fn contains(&self, frequency: u64) -> bool {
        self.from <= frequency && frequency < self.to
    }

    pub fn center(&self) -> u64 {
        (self.from + self.to) / 2
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct Band {
    pub name: &'static str,
    pub from: u64,
    pub to: u64,
    /// Sorted and without gaps.
    pub portions: &'static [Portion],
}

const fn portion(from: u64, to: u64, mode: BandMode) -> Portion {
    Portion { from, to, mode }
}

use BandMode::{Beacon, Cw, Digital, Phone};

/// Bands in ascending order.
pub static IARU_REGION_1: &[Band] = &[
    Band {
        name: "160m",
        from: 1_810_000,
        to: 2_000_000,
        portions: &[
            portion(1_810_000, 1_838_000, Cw),
            portion(1_838_000, 1_843_000, Digital),
            portion(1_843_000, 2_000_000, Phone),
        ],
    },
    Band {
        name: "80m",
        from: 3_500_000,
        to: 3_800_000,
        portions: &[
            portion(3_500_000, 3_570_000, Cw),
            portion(3_570_000, 3_600_000, Digital),
            portion(3_600_000, 3_800_000, Phone),
        ],
    },
    Band {
        name: "60m",
        from: 5_351_500,
        to: 5_366_500,
        portions: &[
            portion(5_351_500, 5_354_000, Cw),
            portion(5_354_000, 5_366_000, Phone),
            portion(5_366_000, 5_366_500, Digital),
        ],
    },
    Band {
        name: "40m",
        from: 7_000_000,
        to: 7_200_000,
        portions: &[
            portion(7_000_000, 7_040_000, Cw),
            portion(7_040_000, 7_060_000, Digital),
            portion(7_060_000, 7_200_000, Phone),
        ],
    },
    Band {
        name: "30m",
        from: 10_100_000,
        to: 10_150_000,
        portions: &[
            portion(10_100_000, 10_130_000, Cw),
            portion(10_130_000, 10_150_000, Digital),
        ],
    },
    Band {
        name: "20m",
        from: 14_000_000,
        to: 14_350_000,
        portions: &[
            portion(14_000_000, 14_070_000, Cw),
            portion(14_070_000, 14_099_000, Digital),
            portion(14_099_000, 14_101_000, Beacon),
            portion(14_101_000, 14_350_000, Phone),
        ],
    },
    Band {
        name: "17m",
        from: 18_068_000,
        to: 18_168_000,
        portions: &[
            portion(18_068_000, 18_095_000, Cw),
            portion(18_095_000, 18_109_000, Digital),
            portion(18_109_000, 18_111_000, Beacon),
            portion(18_111_000, 18_168_000, Phone),
        ],
    },
    Band {
        name: "15m",
        from: 21_000_000,
        to: 21_450_000,
        portions: &[
            portion(21_000_000, 21_070_000, Cw),
            portion(21_070_000, 21_149_000, Digital),
            portion(21_149_000, 21_151_000, Beacon),
            portion(21_151_000, 21_450_000, Phone),
        ],
    },
    Band {
        name: "12m",
        from: 24_890_000,
        to: 24_990_000,
        portions: &[
            portion(24_890_000, 24_915_000, Cw),
            portion(24_915_000, 24_929_000, Digital),
            portion(24_929_000, 24_931_000, Beacon),
            portion(24_931_000, 24_990_000, Phone),
        ],
    },
    Band {
        name: "10m",
        from: 28_000_000,
        to: 29_700_000,
        portions: &[
            portion(28_000_000, 28_070_000, Cw),
            portion(28_070_000, 28_190_000, Digital),
            portion(28_190_000, 28_225_000, Beacon),
            portion(28_225_000, 29_700_000, Phone),
        ],
    },
    Band {
        name: "6m",
        from: 50_000_000,
        to: 52_000_000,
        portions: &[
            portion(50_000_000, 50_100_000, Cw),
            portion(50_100_000, 50_500_000, Phone),
            portion(50_500_000, 52_000_000, Digital),
        ],
    },
    Band {
        name: "2m",
        from: 144_000_000,
        to: 146_000_000,
        portions: &[
            portion(144_000_000, 144_150_000, Cw),
            portion(144_150_000, 144_400_000, Phone),
            portion(144_400_000, 144_490_000, Beacon),
            portion(144_490_000, 146_000_000, Digital),
        ],
    },
    Band {
        name: "70cm",
        from: 430_000_000,
        to: 440_000_000,
        portions: &[
            portion(430_000_000, 432_000_000, Digital),
            portion(432_000_000, 432_150_000, Cw),
            portion(432_150_000, 432_400_000, Phone),
            portion(432_400_000, 432_490_000, Beacon),
            portion(432_490_000, 440_000_000, Digital),
        ],
    },
];

impl Band {
    /// Case-insensitive lookup, e.g. `20m`.
    pub fn by_name(name: &str) -> Option<&'static Band> {
        let name = name.trim();
        IARU_REGION_1.iter().find(|band| band.name.eq_ignore_ascii_case(name))
    }

    pub fn by_frequency(frequency: u64) -> Option<&'static Band> {
        IARU_REGION_1.iter().find(|band| band.contains(frequency))
    }

    pub fn contains(&self, frequency: u64) -> bool {
        self.from <= frequency && frequency <= self.to
    }

    pub fn center(&self) -> u64 {
        (self.from + self.to) / 2
    }

    /// Position in [`IARU_REGION_1`].
    pub fn index(&self) -> usize {
        IARU_REGION_1
            .iter()
            .position(|band| band.name == self.name)
            .unwrap_or_default()
    }

    pub fn portion_at(&self, frequency: u64) -> Option<&'static Portion> {
        self.portions.iter().find(|portion| portion.contains(frequency))
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Whether `frequency` lies in a portion reserved for `mode`.
pub fn in_mode_portion(frequency: u64, mode: BandMode) -> bool {
    Band::by_frequency(frequency)
        .and_then(|band| band.portion_at(frequency))
        .is_some_and(|portion| portion.mode == mode)
}

/// The frequency to jump to for operating `mode` near `frequency`.
///
/// That is the center of the current portion if it fits the mode, else the
/// center of the closest `mode` portion below, else the first `mode`
/// portion of the band, else the center of the band. `None` outside the
/// amateur bands.
pub fn mode_portion_center(frequency: u64, mode: BandMode) -> Option<u64> {
    let band = Band::by_frequency(frequency)?;
    if let Some(current) = band.portion_at(frequency).filter(|p| p.mode == mode) {
        return Some(current.center());
    }
    let candidates = || band.portions.iter().filter(|p| p.mode == mode);
    let nearest = candidates()
        .filter(|p| p.from < frequency)
        .last()
        .or_else(|| candidates().next());
    Some(nearest.map_or(band.center(), Portion::center))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn portions_cover_their_bands() {
        for band in IARU_REGION_1 {
            let first = band.portions.first().map(|p| p.from);
            let last = band.portions.last().map(|p| p.to);
            assert_eq!((first, last), (Some(band.from), Some(band.to)), "{band}");
            for pair in band.portions.windows(2) {
                assert_eq!(pair[0].to, pair[1].from, "{band}");
            }
        }
        for pair in IARU_REGION_1.windows(2) {
            assert!(pair[0].to < pair[1].from);
        }
    }

    #[test]
    fn bands_are_found_by_name_and_frequency() {
        assert_eq!(Band::by_name("20M").map(|b| b.from), Some(14_000_000));
        assert!(Band::by_name("11m").is_none());
        assert_eq!(Band::by_frequency(7_100_000).map(|b| b.name), Some("40m"));
        assert!(Band::by_frequency(12_000_000).is_none());
        assert_eq!(Band::by_name("40m").map(Band::index), Some(3));
    }

    #[test]
    fn mode_portions_are_detected() {
        assert!(in_mode_portion(14_074_000, Digital));
        assert!(in_mode_portion(14_030_000, Cw));
        assert!(!in_mode_portion(14_200_000, Cw));
        assert!(!in_mode_portion(12_000_000, Phone));
    }

    #[test]
    fn jumps_to_the_matching_portion() {
        assert_eq!(mode_portion_center(14_200_000, Phone), Some(14_225_500));
        assert_eq!(mode_portion_center(14_200_000, Cw), Some(14_035_000));
        assert_eq!(mode_portion_center(14_010_000, Digital), Some(14_084_500));
        assert_eq!(mode_portion_center(10_120_000, Phone), Some(10_125_000));
        assert_eq!(mode_portion_center(12_000_000, Phone), None);

        let twenty = Band::by_name("20m").map(Band::center);
        assert_eq!(twenty, Some(14_175_000));
        assert_eq!(twenty.and_then(|f| mode_portion_center(f, Phone)), Some(14_225_500));
    }
}
