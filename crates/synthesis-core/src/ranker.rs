use std::cmp::Ordering;

use crate::Row;

/// Order rows by potential, highest first. Equal potentials fall back to
/// `code` ascending so the output is deterministic. The input is left as is.
pub fn rank(rows: &[Row]) -> Vec<Row> {
    let mut ranked = rows.to_vec();
    ranked.sort_by(compare_rows);
    ranked
}

/// Potentials are finite, so `partial_cmp` is total here and `-0.0 == 0.0`.
fn compare_rows(a: &Row, b: &Row) -> Ordering {
    b.potential_pct
        .partial_cmp(&a.potential_pct)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.code.cmp(&b.code))
}
