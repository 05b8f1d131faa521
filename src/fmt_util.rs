//! Rendering of stat values.

/// `f` with at most `precision` decimals, trailing zeros (and a
/// trailing dot) removed. `"0"` if nothing is left.
pub fn fmt_float(f: f64, precision: usize) -> String {
    let s = format!("{f:.precision$}");
    let s = if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s.as_str()
    };
    if s.is_empty() || s == "-0" {
        "0".into()
    } else {
        s.into()
    }
}

const KIB: f64 = 1024.;

/// Scale for byte-based units: `(scale, scaled unit)`. A value is
/// shown in the next larger unit once it reaches 90% of it. Other
/// units are returned unscaled.
pub fn fmt_scale_units(val: f64, unit: &str) -> (f64, String) {
    let steps: &[(&str, f64)] = match unit {
        "B" => &[
            ("TB", KIB * KIB * KIB * KIB),
            ("GB", KIB * KIB * KIB),
            ("MB", KIB * KIB),
            ("KB", KIB),
        ],
        "KB/s" => &[
            ("TB/s", KIB * KIB * KIB),
            ("GB/s", KIB * KIB),
            ("MB/s", KIB),
        ],
        _ => &[],
    };
    for (scaled, scale) in steps {
        if val >= scale * 0.9 {
            return (*scale, (*scaled).into());
        }
    }
    (1., unit.into())
}

/// `mean ±std unit`, scaled and with 2 decimals; the std is left out
/// if it rounds to zero.
pub fn fmt_value(mean: f64, std: f64, unit: Option<&str>) -> String {
    let (scale, unit) = match unit {
        Some(unit) => {
            let (scale, unit) = fmt_scale_units(mean, unit);
            (scale, Some(unit))
        }
        None => (1., None),
    };
    let mut out = fmt_float(mean / scale, 2);
    let std = fmt_float(std / scale, 2);
    if std != "0" {
        out.push_str(" ±");
        out.push_str(&std);
    }
    if let Some(unit) = unit {
        out.push(' ');
        out.push_str(&unit);
    }
    out
}
