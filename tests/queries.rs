mod common;

use std::fs::File;

use metdense::{CellMask, Error, FormatError, LookupError, MetDenseFile, OffsetWidth, ReaderOptions};
use ndarray::{array, Array2, Axis};
use rand::Rng;

use common::{random_positions, rng, FixtureBuilder};

/// Row `r`, cell `c` holds `(r + c) % 3`
fn example_builder() -> FixtureBuilder {
    let calls = Array2::from_shape_fn((3, 17), |(r, c)| ((r + c) % 3) as u8);
    FixtureBuilder::new(17).chromosome("chr1", vec![100, 101, 105], calls)
}

/// Three chromosomes of random data, one of them much longer than the others
fn random_builder(seed: u64, n_cells: usize) -> FixtureBuilder {
    let mut rng = rng(seed);
    let chr1 = random_positions(&mut rng, 1_000, 300, 40);
    let chr2 = random_positions(&mut rng, 10, 25, 5);
    let chr3 = random_positions(&mut rng, 50_000, 80, 200);
    FixtureBuilder::new(n_cells)
        .random_chromosome("chr1", chr1, &mut rng)
        .random_chromosome("chr2", chr2, &mut rng)
        .random_chromosome("chr3", chr3, &mut rng)
}

/// Every layout variant the reader has to handle
fn variants(seed: u64, n_cells: usize) -> Vec<FixtureBuilder> {
    vec![
        random_builder(seed, n_cells),
        random_builder(seed, n_cells).version(0, 1),
        random_builder(seed, n_cells).blank_line(true),
        random_builder(seed, n_cells).version(0, 1).blank_line(true),
    ]
}

#[test]
fn test_example_file() {
    let builder = example_builder();
    let tmp = builder.write_temp();
    let mut file = MetDenseFile::open(tmp.path()).unwrap();

    assert_eq!(file.n_cells(), 17);
    assert_eq!(file.row_layout().row_size_words(), 2);
    assert_eq!(file.offset_width(), OffsetWidth::Four);
    assert_eq!(file.chromosome_names(), &["chr1".to_string()]);

    let calls = file.read_data_range("chr1", 100, 105, None).unwrap();
    assert_eq!(calls.dim(), (3, 17));
    assert_eq!(calls, builder.chromosomes()[0].calls);

    let single = file.read_data_range("chr1", 105, 105, None).unwrap();
    assert_eq!(single.dim(), (1, 17));
    assert_eq!(single.row(0), calls.row(2));

    assert!(matches!(
        file.read_data_range("chr1", 102, 102, None),
        Err(Error::LookupError(LookupError::MissingPosition(102)))
    ));
    assert!(matches!(
        file.read_data_range("chr1", 200, 300, None),
        Err(Error::LookupError(LookupError::AboveChromosome(200)))
    ));
    assert!(matches!(
        file.read_data_range("chr1", 1, 50, None),
        Err(Error::LookupError(LookupError::BelowChromosome(50)))
    ));
}

#[test]
fn test_positions_within_range_and_ascending() {
    let mut rng = rng(11);
    for builder in variants(1, 23) {
        let tmp = builder.write_temp();
        let mut file = MetDenseFile::open(tmp.path()).unwrap();
        for chrom in builder.chromosomes() {
            let first = u64::from(chrom.positions[0]);
            let last = u64::from(*chrom.positions.last().unwrap());
            for _ in 0..50 {
                let a = rng.random_range(first.saturating_sub(20)..=last + 20);
                let b = rng.random_range(first.saturating_sub(20)..=last + 20);
                let (lower, upper) = (a.min(b), a.max(b));
                let (expected, _) = builder.expected(&chrom.name, lower, upper);

                match file.read_positions_range(&chrom.name, lower, upper) {
                    Ok(positions) => {
                        assert!(positions.windows(2).all(|w| w[0] < w[1]));
                        assert!(positions
                            .iter()
                            .all(|&p| (lower..=upper).contains(&u64::from(p))));
                        assert!(positions.iter().all(|p| chrom.positions.contains(p)));
                        assert_eq!(positions, expected);
                    }
                    Err(err) => {
                        assert!(err.is_lookup(), "unexpected error {err}");
                        assert!(expected.is_empty());
                    }
                }
            }
        }
    }
}

#[test]
fn test_data_rows_align_with_positions() {
    let mut rng = rng(5);
    for builder in variants(2, 40) {
        let tmp = builder.write_temp();
        let mut file = MetDenseFile::open(tmp.path()).unwrap();
        for chrom in builder.chromosomes() {
            for _ in 0..20 {
                let i = rng.random_range(0..chrom.positions.len());
                let j = rng.random_range(i..chrom.positions.len());
                let lower = u64::from(chrom.positions[i]);
                let upper = u64::from(chrom.positions[j]);

                let calls = file.read_data_range(&chrom.name, lower, upper, None).unwrap();
                let positions = file.read_positions_range(&chrom.name, lower, upper).unwrap();
                let (expected_positions, expected_calls) =
                    builder.expected(&chrom.name, lower, upper);
                assert_eq!(calls.nrows(), positions.len());
                assert_eq!(positions, expected_positions);
                assert_eq!(calls, expected_calls);
            }
        }
    }
}

#[test]
fn test_exact_position_lookup() {
    let builder = random_builder(3, 16);
    let tmp = builder.write_temp();
    let mut file = MetDenseFile::open(tmp.path()).unwrap();
    let chrom = &builder.chromosomes()[0];
    let first = chrom.positions[0];
    let last = *chrom.positions.last().unwrap();

    for p in first..=last {
        let result = file.read_positions_range(&chrom.name, u64::from(p), u64::from(p));
        if chrom.positions.contains(&p) {
            assert_eq!(result.unwrap(), vec![p]);
        } else {
            assert!(matches!(
                result,
                Err(Error::LookupError(LookupError::MissingPosition(q))) if q == u64::from(p)
            ));
        }
    }
}

#[test]
fn test_read_ranges_matches_single_queries() {
    let builder = random_builder(4, 33);
    let tmp = builder.write_temp();
    let mut file = MetDenseFile::open(tmp.path()).unwrap();
    let chrom = &builder.chromosomes()[0];
    let p = |i: usize| u64::from(chrom.positions[i]);

    let ranges = [
        (p(10), p(40)),
        // overlaps the first range
        (p(30), p(60)),
        // disjoint, given in reverse
        (p(200), p(150)),
        (p(120), p(120)),
        // reaches past the end of the chromosome
        (p(290), p(299) + 500),
    ];
    let mask = CellMask::new((0..33).map(|c| c % 3 != 1).collect());
    let out = file.read_ranges(&chrom.name, &ranges, Some(&mask)).unwrap();
    assert_eq!(out.len(), ranges.len());

    for (&(lo, hi), data) in ranges.iter().zip(&out) {
        let (lo, hi) = (lo.min(hi), lo.max(hi));
        let calls = file.read_data_range(&chrom.name, lo, hi, Some(&mask)).unwrap();
        let positions = file.read_positions_range(&chrom.name, lo, hi).unwrap();
        assert_eq!(data.calls, calls);
        assert_eq!(data.positions, positions);
        assert_eq!(data.calls.ncols(), mask.count_selected());
    }
}

#[test]
fn test_read_ranges_fails_as_a_whole() {
    let builder = random_builder(4, 8);
    let tmp = builder.write_temp();
    let mut file = MetDenseFile::open(tmp.path()).unwrap();
    let chrom = &builder.chromosomes()[1];
    let missing = u64::from(chrom.positions[0]) - 1;
    let result = file.read_ranges(
        &chrom.name,
        &[(u64::from(chrom.positions[0]), u64::from(chrom.positions[5])), (missing, missing)],
        None,
    );
    assert!(matches!(result, Err(Error::LookupError(_))));
}

#[test]
fn test_cell_masks() {
    let builder = random_builder(6, 21);
    let tmp = builder.write_temp();
    let mut file = MetDenseFile::open(tmp.path()).unwrap();
    let (lower, upper) = (0, u64::MAX);

    let unmasked = file.read_data_range("chr2", lower, upper, None).unwrap();
    let all = file
        .read_data_range("chr2", lower, upper, Some(&CellMask::all(21)))
        .unwrap();
    assert_eq!(all, unmasked);

    let none = file
        .read_data_range("chr2", lower, upper, Some(&CellMask::new(vec![false; 21])))
        .unwrap();
    assert_eq!(none.dim(), (unmasked.nrows(), 0));

    let mask = CellMask::from_names(file.cell_names(), &["cell_3", "cell_17", "cell_20"]).unwrap();
    let subset = file.read_data_range("chr2", lower, upper, Some(&mask)).unwrap();
    assert_eq!(subset, unmasked.select(Axis(1), &[3, 17, 20]));

    assert!(matches!(
        CellMask::from_names(file.cell_names(), &["cell_99"]),
        Err(Error::LookupError(LookupError::UnknownCell(name))) if name == "cell_99"
    ));
}

#[test]
fn test_lookup_errors_keep_handle_usable() {
    let builder = random_builder(7, 5);
    let tmp = builder.write_temp();
    let mut file = MetDenseFile::open(tmp.path()).unwrap();

    assert!(matches!(
        file.read_data_range("chrX", 0, 10, None),
        Err(Error::LookupError(LookupError::UnknownChromosome(name))) if name == "chrX"
    ));
    assert!(matches!(
        file.read_positions_range("chr1", 500, 100),
        Err(Error::LookupError(LookupError::InvertedRange { lower: 500, upper: 100 }))
    ));

    let positions = file.read_positions_chromosome("chr3").unwrap();
    assert_eq!(positions, builder.chromosomes()[2].positions);
}

#[test]
fn test_whole_file_reads() {
    for builder in variants(8, 19) {
        let tmp = builder.write_temp();
        let mut file = MetDenseFile::open(tmp.path()).unwrap();

        let n_per_chrom: Vec<u64> = builder
            .chromosomes()
            .iter()
            .map(|c| c.positions.len() as u64)
            .collect();
        assert_eq!(file.n_cpg_per_chromosome(), n_per_chrom);
        assert_eq!(file.n_cpg(), n_per_chrom.iter().sum::<u64>());

        let views: Vec<_> = builder.chromosomes().iter().map(|c| c.calls.view()).collect();
        let expected = ndarray::concatenate(Axis(0), &views).unwrap();
        assert_eq!(file.read_data_full(None).unwrap(), expected);

        for chrom in builder.chromosomes() {
            assert_eq!(file.read_data_chromosome(&chrom.name, None).unwrap(), chrom.calls);
            assert_eq!(file.read_positions_chromosome(&chrom.name).unwrap(), chrom.positions);
        }
    }
}

#[test]
fn test_seek_source_matches_mmap() {
    let builder = random_builder(9, 30).version(0, 1).blank_line(true);
    let tmp = builder.write_temp();
    let mut mapped = MetDenseFile::open(tmp.path()).unwrap();
    let mut seeked =
        MetDenseFile::from_reader(File::open(tmp.path()).unwrap(), ReaderOptions::default())
            .unwrap();

    assert_eq!(seeked.offset_width(), OffsetWidth::Eight);
    assert_eq!(mapped.header(), seeked.header());
    assert_eq!(mapped.len_words(), seeked.len_words());
    for chrom in builder.chromosomes() {
        let lower = u64::from(chrom.positions[2]);
        let upper = u64::from(chrom.positions[chrom.positions.len() / 2]);
        assert_eq!(
            mapped.read_data_range(&chrom.name, lower, upper, None).unwrap(),
            seeked.read_data_range(&chrom.name, lower, upper, None).unwrap()
        );
    }
}

#[test]
fn test_unreferenced_rows_are_tolerated() {
    let builder = random_builder(10, 12).extra_rows(4);
    let tmp = builder.write_temp();
    let mut file = MetDenseFile::open(tmp.path()).unwrap();
    assert!(!file.index().check_conformance(file.header()));

    let chrom = &builder.chromosomes()[2];
    assert_eq!(file.read_data_chromosome(&chrom.name, None).unwrap(), chrom.calls);
}

#[test]
fn test_magic_verification() {
    let mut bytes = example_builder().encode();
    bytes[..8].copy_from_slice(b"NotDense");

    let rejected =
        MetDenseFile::from_reader(std::io::Cursor::new(bytes.clone()), ReaderOptions::default());
    assert!(matches!(
        rejected,
        Err(Error::FormatError(FormatError::InvalidMagic(magic))) if &magic == b"NotDense"
    ));

    let options = ReaderOptions::new().verify_magic(false);
    let mut file = MetDenseFile::from_reader(std::io::Cursor::new(bytes), options).unwrap();
    assert_eq!(file.read_positions_chromosome("chr1").unwrap(), vec![100, 101, 105]);
}

#[test]
fn test_truncated_files() {
    let bytes = example_builder().encode();
    for len in [4, 20, 30, bytes.len() - 3] {
        let result = MetDenseFile::from_reader(
            std::io::Cursor::new(bytes[..len].to_vec()),
            ReaderOptions::default(),
        );
        assert!(
            matches!(result, Err(Error::FormatError(_))),
            "length {len} was accepted"
        );
    }
}

#[test]
fn test_small_layouts() {
    for n_cells in [1, 15, 16, 17, 32] {
        let calls = Array2::from_shape_fn((4, n_cells), |(r, c)| ((r * 7 + c) % 4) as u8);
        let builder =
            FixtureBuilder::new(n_cells).chromosome("chrM", vec![3, 8, 9, 20], calls.clone());
        let tmp = builder.write_temp();
        let mut file = MetDenseFile::open(tmp.path()).unwrap();
        assert_eq!(file.read_data_chromosome("chrM", None).unwrap(), calls);
        assert_eq!(
            file.read_data_range("chrM", 8, 9, None).unwrap(),
            calls.slice(ndarray::s![1..3, ..])
        );
    }

    let one = FixtureBuilder::new(2).chromosome("chr1", vec![42], array![[2u8, 1]]);
    let tmp = one.write_temp();
    let mut file = MetDenseFile::open(tmp.path()).unwrap();
    assert_eq!(file.read_data_range("chr1", 0, 100, None).unwrap(), array![[2u8, 1]]);
}
