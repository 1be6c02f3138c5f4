use super::*;

/// Milliseconds covered by one base: `width * (MAX_SEQ + 1)`.
fn base_span_millis(width_millis: u32) -> i128 {
    i128::from(width_millis) << 32
}

/// Window id of the window containing `millis`.
///
/// Windows are laid out back to back from `first_window_millis`, each
/// `width_millis` wide; every `MAX_SEQ + 1` windows a new base starts. Time
/// inside a window rounds down to that window.
pub fn window_id_for(
    millis: EpochMillis,
    first_window_millis: EpochMillis,
    width_millis: u32,
) -> Result<WindowId> {
    ensure!(width_millis > 0, "window width must be greater than 0");
    let span = base_span_millis(width_millis);
    let remainder = (i128::from(millis) - i128::from(first_window_millis)).rem_euclid(span);
    let base_millis = i128::from(millis) - remainder;
    let base_seconds = base_millis.div_euclid(1000);
    let base_seconds = u32::try_from(base_seconds).map_err(|_| {
        anyhow!("base {base_seconds}s of time {millis}ms is outside the window id range")
    })?;
    // remainder < span, so the quotient fits the 32-bit sequence.
    let sequence = (remainder / i128::from(width_millis)) as u32;
    Ok(WindowId::new(base_seconds, sequence))
}

/// Start time of `window_id` in epoch milliseconds.
///
/// The base is stored with one-second resolution, so it is recovered as the
/// first base boundary at or after `base_seconds * 1000`.
pub fn window_millis(
    window_id: WindowId,
    first_window_millis: EpochMillis,
    width_millis: u32,
) -> Result<EpochMillis> {
    ensure!(width_millis > 0, "window width must be greater than 0");
    let span = base_span_millis(width_millis);
    let truncated_base = i128::from(window_id.base_seconds()) * 1000;
    let diff = truncated_base - i128::from(first_window_millis);
    let multiplier = -(-diff).div_euclid(span);
    let millis = i128::from(first_window_millis)
        + multiplier * span
        + i128::from(window_id.sequence()) * i128::from(width_millis);
    EpochMillis::try_from(millis)
        .map_err(|_| anyhow!("window {window_id} maps outside the epoch millisecond range"))
}
