// ==============================================================================
// chromosome.rs - Chromosome Range Reference Table
// ==============================================================================
// Description: GRCh38-derived chromosome lengths mapped onto one absolute
//              genome-wide coordinate axis
// ==============================================================================

/// A chromosome's span on the absolute genome-wide axis.
///
/// Ranges tile the genome contiguously: `position_min_abs` of chromosome k+1
/// equals `position_max_abs` of chromosome k. Definition order is genome
/// order (1..22, X, Y), which every export sorts by. A lexicographic
/// chromosome-string sort would put "10" before "2".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChromosomeRange {
    pub chromosome: &'static str,
    pub position_min: i64,
    pub position_max: i64,
    pub position_min_abs: i64,
    pub position_max_abs: i64,
}

pub const CHROMOSOME_RANGES: [ChromosomeRange; 24] = [
    range("1", 249698942, 0),
    range("2", 242508799, 249698942),
    range("3", 198450956, 492207741),
    range("4", 190424264, 690658697),
    range("5", 181630948, 881082961),
    range("6", 170805979, 1062713909),
    range("7", 159345973, 1233519888),
    range("8", 145138636, 1392865861),
    range("9", 138688728, 1538004497),
    range("10", 133797422, 1676693225),
    range("11", 135186938, 1810490647),
    range("12", 133275309, 1945677585),
    range("13", 114364328, 2078952894),
    range("14", 108136338, 2193317222),
    range("15", 102439437, 2301453560),
    range("16", 92211104, 2403892997),
    range("17", 83836422, 2496104101),
    range("18", 80373285, 2579940523),
    range("19", 58617616, 2660313808),
    range("20", 64444167, 2718931424),
    range("21", 46709983, 2783375591),
    range("22", 51857516, 2830085574),
    range("X", 156040895, 2881943090),
    range("Y", 57264655, 3037983985),
];

const fn range(chromosome: &'static str, length: i64, offset: i64) -> ChromosomeRange {
    ChromosomeRange {
        chromosome,
        position_min: 0,
        position_max: length,
        position_min_abs: offset,
        position_max_abs: offset + length,
    }
}

/// 0-based genome-order index of a chromosome label, or None for labels
/// outside the reference tiling (such rows are dropped by the transform).
pub fn genome_order(label: &str) -> Option<usize> {
    CHROMOSOME_RANGES
        .iter()
        .position(|r| r.chromosome == label)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_covers_24_chromosomes_in_genome_order() {
        assert_eq!(CHROMOSOME_RANGES.len(), 24);

        let labels: Vec<&str> = CHROMOSOME_RANGES.iter().map(|r| r.chromosome).collect();
        let mut expected: Vec<String> = (1..=22).map(|n| n.to_string()).collect();
        expected.push("X".to_string());
        expected.push("Y".to_string());
        assert_eq!(labels, expected.iter().map(String::as_str).collect::<Vec<_>>());
    }

    #[test]
    fn test_ranges_tile_contiguously() {
        assert_eq!(CHROMOSOME_RANGES[0].position_min_abs, 0);

        for pair in CHROMOSOME_RANGES.windows(2) {
            assert_eq!(
                pair[0].position_max_abs, pair[1].position_min_abs,
                "gap between {} and {}",
                pair[0].chromosome, pair[1].chromosome
            );
        }

        for r in &CHROMOSOME_RANGES {
            assert_eq!(r.position_min, 0);
            assert_eq!(r.position_max_abs - r.position_min_abs, r.position_max);
        }
    }

    #[test]
    fn test_genome_order_is_not_lexicographic() {
        assert_eq!(genome_order("1"), Some(0));
        assert!(genome_order("2").unwrap() < genome_order("10").unwrap());
        assert_eq!(genome_order("X"), Some(22));
        assert_eq!(genome_order("Y"), Some(23));
        assert_eq!(genome_order("MT"), None);
        assert_eq!(genome_order("chr1"), None);
    }
}
