// Size legend for the proportional map symbols
use serde::Serialize;

use super::dataset::Domain;

pub const LEGEND_CLASSES: usize = 4;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LegendMarker {
    pub size: f64,
    pub label: String,
}

/// One marker per class, largest first. Marker `i` sits at `i / classes`
/// of both the visual range and the domain.
pub fn legend_markers(domain: Domain, range: (f64, f64), classes: usize) -> Vec<LegendMarker> {
    (1..=classes)
        .rev()
        .map(|class| {
            let t = class as f64 / classes as f64;
            LegendMarker {
                size: lerp(range.0, range.1, t),
                label: compact_number(lerp(domain.min, domain.max, t)),
            }
        })
        .collect()
}

fn lerp(from: f64, to: f64, t: f64) -> f64 {
    from * (1.0 - t) + to * t
}

/// Abbreviated integer label: `400000` becomes `400k`, `2500000` becomes `3m`.
pub fn compact_number(value: f64) -> String {
    const UNITS: [(f64, &str); 4] = [(1e12, "t"), (1e9, "b"), (1e6, "m"), (1e3, "k")];

    // Pick the unit from the rounded value so 999.6 reads as 1k.
    let rounded = value.round();
    let magnitude = rounded.abs();
    let mut label = format!("{}", rounded);
    for (index, (divisor, suffix)) in UNITS.iter().enumerate() {
        if magnitude >= *divisor {
            let scaled = (value / divisor).round();
            // 999_999 rounds to 1000k; promote it to the next unit instead.
            if scaled.abs() >= 1000.0 && index > 0 {
                let (bigger, bigger_suffix) = UNITS[index - 1];
                label = format!("{}{}", (value / bigger).round(), bigger_suffix);
            } else {
                label = format!("{}{}", scaled, suffix);
            }
            break;
        }
    }
    label
}
