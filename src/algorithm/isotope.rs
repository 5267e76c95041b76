use std::collections::BTreeMap;

use itertools::Itertools;
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;

use crate::chemistry::adducts::{calculate_mz, resolve_adduct, AdductSpec};
use crate::chemistry::elements::ElementTable;
use crate::chemistry::sum_formula::{monoisotopic_mass_of, parse_formula, Composition};
use crate::error::ChemistryError;

/// mass tolerance for combining peaks during convolution; final peak merging
/// is handled by the resolution grouping step
const CONVOLVE_MASS_TOLERANCE: f64 = 1e-6;

/// Resolution-grouping policy: peaks are rounded to
/// `max(GROUPING_FLOOR_DIGITS, round(1 - log10((m/R) / GROUPING_K)))` decimal
/// digits before merging. This reproduces single-digit mass-resolving-power
/// behaviour of a real instrument; the constants are an empirical heuristic,
/// not a physical law.
const GROUPING_FLOOR_DIGITS: i32 = 2;
const GROUPING_MAX_DIGITS: i32 = 6;
const GROUPING_K: f64 = 2.0;

/// convolve two distributions of masses and abundances
///
/// Arguments:
///
/// * `dist_a` - first distribution of masses and abundances
/// * `dist_b` - second distribution of masses and abundances
/// * `mass_tolerance` - mass tolerance for combining peaks
/// * `abundance_threshold` - minimum abundance for a peak to be included in the result
///
/// Returns:
///
/// * `Vec<(f64, f64)>` - combined distribution of masses and abundances
///
/// # Examples
///
/// ```
/// use mzformula::algorithm::isotope::convolve;
///
/// let dist_a = vec![(100.0, 0.5), (101.0, 0.5)];
/// let dist_b = vec![(100.0, 0.5), (101.0, 0.5)];
/// let result = convolve(&dist_a, &dist_b, 1e-6, 1e-12);
/// assert_eq!(result, vec![(200.0, 0.25), (201.0, 0.5), (202.0, 0.25)]);
/// ```
pub fn convolve(
    dist_a: &[(f64, f64)],
    dist_b: &[(f64, f64)],
    mass_tolerance: f64,
    abundance_threshold: f64,
) -> Vec<(f64, f64)> {
    let mut result: Vec<(f64, f64)> = Vec::new();

    for (mass_a, abundance_a) in dist_a {
        for (mass_b, abundance_b) in dist_b {
            let combined_mass = mass_a + mass_b;
            let combined_abundance = abundance_a * abundance_b;

            // Skip entries with combined abundance below the threshold
            if combined_abundance < abundance_threshold {
                continue;
            }

            // Insert or update the combined mass in the result distribution
            if let Some(entry) = result
                .iter_mut()
                .find(|(m, _)| (*m - combined_mass).abs() < mass_tolerance)
            {
                entry.1 += combined_abundance;
            } else {
                result.push((combined_mass, combined_abundance));
            }
        }
    }

    result.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());
    result
}

/// convolve a distribution with itself n times, by repeated squaring
///
/// Arguments:
///
/// * `dist` - distribution of masses and abundances
/// * `n` - number of times to convolve the distribution with itself
/// * `abundance_threshold` - minimum abundance for a peak to survive a step
///
/// Returns:
///
/// * `Vec<(f64, f64)>` - distribution of masses and abundances
///
/// # Examples
///
/// ```
/// use mzformula::algorithm::isotope::convolve_pow;
///
/// let dist = vec![(100.0, 0.5), (101.0, 0.5)];
/// let result = convolve_pow(&dist, 2, 1e-12);
/// assert_eq!(result, vec![(200.0, 0.25), (201.0, 0.5), (202.0, 0.25)]);
/// ```
pub fn convolve_pow(dist: &[(f64, f64)], n: i32, abundance_threshold: f64) -> Vec<(f64, f64)> {
    if n == 0 {
        return vec![(0.0, 1.0)]; // Return the delta distribution
    }
    if n == 1 {
        return dist.to_vec();
    }

    let mut result = dist.to_vec();
    let mut power = 2;

    while power <= n {
        result = convolve(&result, &result, CONVOLVE_MASS_TOLERANCE, abundance_threshold);
        power *= 2;
    }

    // If n is not a power of 2, recursively fill in the remainder
    if power / 2 < n {
        result = convolve(
            &result,
            &convolve_pow(dist, n - power / 2, abundance_threshold),
            CONVOLVE_MASS_TOLERANCE,
            abundance_threshold,
        );
    }

    result
}

/// number of decimal digits to round a peak to at a given m/z and resolution
fn grouping_decimals(mz: f64, resolution: f64) -> i32 {
    let bucket_width = mz / resolution;
    if bucket_width <= 0.0 {
        return GROUPING_MAX_DIGITS;
    }
    let digits = (1.0 - (bucket_width / GROUPING_K).log10()).round() as i32;
    digits.clamp(GROUPING_FLOOR_DIGITS, GROUPING_MAX_DIGITS)
}

/// Merge peaks the instrument could not resolve: each peak is rounded to a
/// mass-dependent number of decimal digits and peaks landing on the same
/// rounded mass are summed.
fn group_by_resolution(distribution: Vec<(f64, f64)>, resolution: f64) -> Vec<(f64, f64)> {
    let mut sort_map: BTreeMap<i64, f64> = BTreeMap::new();
    let quantize = |mz: f64| -> i64 { (mz * 1_000_000.0).round() as i64 };

    for (mz, abundance) in distribution {
        let digits = grouping_decimals(mz, resolution);
        let scale = 10f64.powi(digits);
        let rounded = (mz * scale).round() / scale;
        sort_map
            .entry(quantize(rounded))
            .and_modify(|e| *e += abundance)
            .or_insert(abundance);
    }

    sort_map
        .iter()
        .map(|(&key, &abundance)| (key as f64 / 1_000_000.0, abundance))
        .collect()
}

/// generate the isotope distribution for a given atomic composition
///
/// The accumulator starts from the delta distribution and every atom key of
/// the composition is convolved in, pruning peaks below `abundance_cutoff`
/// after each step. Specific-isotope keys ("13C") contribute a single
/// synthetic isotope of abundance 1.0; the electron pseudo-element "e" is
/// skipped. The adduct contributes its mass delta, the electron-mass shift of
/// its charge and the division by |charge|. Peaks are then merged by the
/// resolution grouping policy, normalized so the most abundant peak is 1.0
/// and returned ascending by m/z.
///
/// Arguments:
///
/// * `composition` - atomic composition of the molecule
/// * `abundance_cutoff` - minimum relative abundance for a peak to survive
/// * `resolution` - mass resolving power used for peak merging
/// * `adduct` - resolved adduct applied to the neutral molecule
/// * `table` - element and isotope reference table
///
/// Returns:
///
/// * `Result<Vec<(f64, f64)>, ChemistryError>` - distribution of m/z values and abundances
pub fn generate_isotope_distribution(
    composition: &Composition,
    abundance_cutoff: f64,
    resolution: f64,
    adduct: &AdductSpec,
    table: &ElementTable,
) -> Result<Vec<(f64, f64)>, ChemistryError> {
    if abundance_cutoff < 0.0 {
        return Err(ChemistryError::Validation(format!(
            "abundance cutoff must be non-negative, got {}",
            abundance_cutoff
        )));
    }
    if resolution <= 0.0 {
        return Err(ChemistryError::Validation(format!(
            "resolution must be positive, got {}",
            resolution
        )));
    }

    let mut cumulative: Vec<(f64, f64)> = vec![(0.0, 1.0)];
    for (key, &count) in composition.iter().sorted() {
        if key == "e" || count == 0 {
            continue;
        }
        let atom_distribution = table.atom_distribution(key)?;
        let power_distribution = convolve_pow(&atom_distribution, count, abundance_cutoff);
        cumulative = convolve(
            &cumulative,
            &power_distribution,
            CONVOLVE_MASS_TOLERANCE,
            abundance_cutoff,
        );
    }

    let ionized: Vec<(f64, f64)> = cumulative
        .into_iter()
        .map(|(mass, abundance)| (calculate_mz(mass, adduct, table.electron_mass()), abundance))
        .collect();

    let grouped = group_by_resolution(ionized, resolution);

    let max_abundance = grouped
        .iter()
        .map(|&(_, a)| a)
        .fold(f64::MIN, f64::max);
    Ok(grouped
        .into_iter()
        .map(|(mz, abundance)| (mz, abundance / max_abundance))
        .collect())
}

/// calculate the isotope distribution of a formula, optionally ionized by an adduct
///
/// Arguments:
///
/// * `formula` - the chemical formula
/// * `abundance_cutoff` - minimum relative abundance, defaults to 1e-5
/// * `resolution` - mass resolving power, defaults to 1e4
/// * `adduct` - adduct notation, empty for the neutral molecule
/// * `table` - element and isotope reference table
///
/// Returns:
///
/// * `Result<Vec<(f64, f64)>, ChemistryError>` - distribution of m/z values and abundances
///
/// # Examples
///
/// ```
/// use mzformula::algorithm::isotope::isotopic_distribution;
/// use mzformula::chemistry::elements::ElementTable;
///
/// let table = ElementTable::natural();
/// let dist = isotopic_distribution("C6H12O6", None, None, "", &table).unwrap();
/// let first_mz = (dist[0].0 * 1e3).round() / 1e3;
/// assert_eq!(first_mz, 180.063);
/// assert_eq!(dist[0].1, 1.0);
/// ```
pub fn isotopic_distribution(
    formula: &str,
    abundance_cutoff: Option<f64>,
    resolution: Option<f64>,
    adduct: &str,
    table: &ElementTable,
) -> Result<Vec<(f64, f64)>, ChemistryError> {
    let abundance_cutoff = abundance_cutoff.unwrap_or(1e-5);
    let resolution = resolution.unwrap_or(1e4);
    let composition = parse_formula(formula, table)?;
    let adduct_spec = resolve_adduct(adduct, table)?;
    generate_isotope_distribution(&composition, abundance_cutoff, resolution, &adduct_spec, table)
}

/// calculate the monoisotopic mass of a formula
///
/// Arguments:
///
/// * `formula` - the chemical formula
/// * `table` - element and isotope reference table
///
/// Returns:
///
/// * `Result<f64, ChemistryError>` - the monoisotopic mass
///
/// # Examples
///
/// ```
/// use mzformula::algorithm::isotope::monoisotopic_mass;
/// use mzformula::chemistry::elements::ElementTable;
///
/// let table = ElementTable::natural();
/// let mass = monoisotopic_mass("H2O", &table).unwrap();
/// assert!((mass - 18.01056468403).abs() < 1e-9);
/// ```
pub fn monoisotopic_mass(formula: &str, table: &ElementTable) -> Result<f64, ChemistryError> {
    let composition = parse_formula(formula, table)?;
    monoisotopic_mass_of(&composition, table)
}

/// calculate isotope distributions for many formulas on a thread pool
///
/// Each formula is an independent computation; the pool only fans them out.
///
/// Arguments:
///
/// * `formulas` - the chemical formulas
/// * `abundance_cutoff` - minimum relative abundance, defaults to 1e-5
/// * `resolution` - mass resolving power, defaults to 1e4
/// * `adduct` - adduct notation applied to every formula
/// * `num_threads` - number of worker threads
/// * `table` - element and isotope reference table
///
/// Returns:
///
/// * `Result<Vec<Vec<(f64, f64)>>, ChemistryError>` - one distribution per formula
pub fn isotopic_distributions(
    formulas: &[&str],
    abundance_cutoff: Option<f64>,
    resolution: Option<f64>,
    adduct: &str,
    num_threads: usize,
    table: &ElementTable,
) -> Result<Vec<Vec<(f64, f64)>>, ChemistryError> {
    let thread_pool = ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build()
        .map_err(|e| ChemistryError::Validation(e.to_string()))?;

    thread_pool.install(|| {
        formulas
            .par_iter()
            .map(|formula| isotopic_distribution(formula, abundance_cutoff, resolution, adduct, table))
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chemistry::constants::MASS_PROTON;

    fn table() -> ElementTable {
        ElementTable::natural()
    }

    #[test]
    fn test_distribution_sorted_and_normalized() {
        let t = table();
        let dist = isotopic_distribution("C100H202", None, None, "", &t).unwrap();
        assert!(!dist.is_empty());

        let max = dist.iter().map(|&(_, a)| a).fold(f64::MIN, f64::max);
        assert_eq!(max, 1.0);

        for pair in dist.windows(2) {
            assert!(pair[0].0 < pair[1].0, "masses not strictly ascending");
        }
    }

    #[test]
    fn test_chlorine_pattern() {
        let t = table();
        // two chlorines: M+2 at 2 * a37 / a35 = 0.64 of the base peak
        let dist = isotopic_distribution("CCl2", None, None, "", &t).unwrap();
        let base = dist.iter().find(|&&(_, a)| a == 1.0).unwrap().0;
        let m2 = dist
            .iter()
            .find(|&&(m, _)| (m - base - 1.997).abs() < 0.01)
            .expect("M+2 peak missing");
        assert!((m2.1 - 0.64).abs() < 0.02, "M+2 ratio was {}", m2.1);
    }

    #[test]
    fn test_adduct_shifts_lowest_mass_by_proton() {
        let t = table();
        let neutral = isotopic_distribution("C3H6O", None, None, "", &t).unwrap();
        let protonated = isotopic_distribution("C3H6O", None, None, "H+", &t).unwrap();
        let delta = protonated[0].0 - neutral[0].0;
        assert!((delta - 1.007825).abs() < 1e-3, "proton shift was {}", delta);
    }

    #[test]
    fn test_charge_two_divides_mz() {
        let t = table();
        let singly = isotopic_distribution("C6H12O6", None, None, "H+", &t).unwrap();
        let doubly = isotopic_distribution("C6H12O6", None, None, "2H+2", &t).unwrap();
        assert!((doubly[0].0 - (singly[0].0 + MASS_PROTON) / 2.0).abs() < 1e-2);
    }

    #[test]
    fn test_specific_isotope_key_is_a_single_peak() {
        let t = table();
        let dist = isotopic_distribution("[13C]", None, None, "", &t).unwrap();
        assert_eq!(dist.len(), 1);
        assert!((dist[0].0 - 13.0034).abs() < 1e-4);
        assert_eq!(dist[0].1, 1.0);
    }

    #[test]
    fn test_labeled_compound_shifts_up() {
        let t = table();
        let light = monoisotopic_mass("C6H12O6", &t).unwrap();
        let labeled = monoisotopic_mass("[13C]C5H12O6", &t).unwrap();
        assert!((labeled - light - 1.0034).abs() < 1e-4);
    }

    #[test]
    fn test_validation_errors() {
        let t = table();
        assert!(matches!(
            isotopic_distribution("C3H6O", Some(-0.1), None, "", &t),
            Err(ChemistryError::Validation(_))
        ));
        assert!(matches!(
            isotopic_distribution("C3H6O", None, Some(0.0), "", &t),
            Err(ChemistryError::Validation(_))
        ));
    }

    #[test]
    fn test_cutoff_prunes_minor_peaks() {
        let t = table();
        let fine = isotopic_distribution("C20H30N4O5S2", Some(1e-6), None, "", &t).unwrap();
        let coarse = isotopic_distribution("C20H30N4O5S2", Some(1e-2), None, "", &t).unwrap();
        assert!(coarse.len() < fine.len());
    }

    #[test]
    fn test_grouping_decimals_coarsens_with_mass() {
        assert!(grouping_decimals(2000.0, 1e4) < grouping_decimals(100.0, 1e4));
        assert_eq!(grouping_decimals(0.0, 1e4), GROUPING_MAX_DIGITS);
    }

    #[test]
    fn test_batch_matches_single() {
        let t = table();
        let single = isotopic_distribution("C3H6O", None, None, "", &t).unwrap();
        let batch = isotopic_distributions(&["C3H6O", "H2O"], None, None, "", 2, &t).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0], single);
    }
}
