//! Cell density derived from a raw detection count

/// Volume of the counting chamber imaged by the microscope, in millilitres.
pub const DEFAULT_CHAMBER_VOLUME_ML: f64 = 0.0001;

/// Convert a cell count into cells per millilitre.
///
/// Rounds half away from zero. A non-positive or non-finite chamber volume
/// yields 0.
pub fn density(cell_count: u64, chamber_volume_ml: f64) -> u64 {
    if !chamber_volume_ml.is_finite() || chamber_volume_ml <= 0.0 {
        return 0;
    }

    let per_ml = (cell_count as f64 / chamber_volume_ml).round();
    if per_ml >= u64::MAX as f64 {
        u64::MAX
    } else {
        per_ml as u64
    }
}

/// Round `value` to `decimals` places, half away from zero.
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}
