//! Lunar phase instants.
//!
//! [`MeeusOracle`] follows Jean Meeus, *Astronomical Algorithms* (2nd ed.),
//! chapter 49: a mean phase from the lunation number `k`, then periodic
//! terms for the Sun/Moon anomalies and the planetary arguments A1..A14.
//! Results are in Terrestrial Time and shifted to UTC with an approximate
//! ΔT polynomial, which keeps them within about a minute of published
//! tables for present-day dates.

use chrono::{DateTime, Duration, Utc};
use tracing::warn;

use crate::phase::LunarPhase;

/// Source of lunar phase instants.
///
/// Implementations must be pure: the same `(reference, phase)` always yields
/// the same instant, and that instant is strictly after `reference`.
pub trait PhaseOracle: Send + Sync {
    fn next_phase(&self, reference: DateTime<Utc>, phase: LunarPhase) -> DateTime<Utc>;
}

/// Mean synodic month in days, as used by the `k` series.
const MEAN_LUNATION_DAYS: f64 = 29.530588861;
/// JDE of the mean new moon of 2000-01-06 (k = 0).
const EPOCH_JDE: f64 = 2451550.09766;
const UNIX_EPOCH_JD: f64 = 2440587.5;
const MS_PER_DAY: f64 = 86_400_000.0;

/// Phase oracle backed by the Meeus phase series.
#[derive(Debug, Clone, Copy, Default)]
pub struct MeeusOracle;

impl MeeusOracle {
    pub fn new() -> Self {
        Self
    }
}

impl PhaseOracle for MeeusOracle {
    fn next_phase(&self, reference: DateTime<Utc>, phase: LunarPhase) -> DateTime<Utc> {
        // A phase sitting exactly on the reference must not be returned again.
        let target = reference
            .checked_add_signed(Duration::milliseconds(1))
            .unwrap_or(reference);
        let k_estimate = (julian_day(target) - EPOCH_JDE) / MEAN_LUNATION_DAYS;

        // Start at least a quarter lunation behind the target and walk forward.
        let mut k = k_estimate.floor() - 1.0 + phase.cycle_fraction();
        let mut instant = phase_instant(k, phase);
        for _ in 0..8 {
            if instant >= target {
                break;
            }
            k += 1.0;
            instant = phase_instant(k, phase);
        }
        if instant < target {
            warn!(%reference, %phase, %instant, "phase search stopped short of the reference");
        }
        instant
    }
}

fn julian_day(instant: DateTime<Utc>) -> f64 {
    instant.timestamp_millis() as f64 / MS_PER_DAY + UNIX_EPOCH_JD
}

fn from_julian_day(jd: f64) -> DateTime<Utc> {
    let ms = ((jd - UNIX_EPOCH_JD) * MS_PER_DAY).round() as i64;
    DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// UTC instant of lunation `k` (integer part) at the fraction given by `phase`.
fn phase_instant(k: f64, phase: LunarPhase) -> DateTime<Utc> {
    let jde = true_phase_jde(k, phase);
    let year = 2000.0 + (jde - 2451545.0) / 365.25;
    from_julian_day(jde - delta_t_seconds(year) / 86_400.0)
}

fn sin_deg(x: f64) -> f64 {
    x.rem_euclid(360.0).to_radians().sin()
}

fn cos_deg(x: f64) -> f64 {
    x.rem_euclid(360.0).to_radians().cos()
}

fn true_phase_jde(k: f64, phase: LunarPhase) -> f64 {
    let t = k / 1236.85;
    let t2 = t * t;
    let t3 = t2 * t;
    let t4 = t3 * t;

    let mean = EPOCH_JDE + MEAN_LUNATION_DAYS * k + 0.00015437 * t2 - 0.000000150 * t3
        + 0.00000000073 * t4;

    let e = 1.0 - 0.002516 * t - 0.0000074 * t2;
    // Sun's mean anomaly, Moon's mean anomaly, Moon's argument of latitude,
    // longitude of the ascending node.
    let m = 2.5534 + 29.10535670 * k - 0.0000014 * t2 - 0.00000011 * t3;
    let mp = 201.5643 + 385.81693528 * k + 0.0107582 * t2 + 0.00001238 * t3 - 0.000000058 * t4;
    let f = 160.7108 + 390.67050284 * k - 0.0016118 * t2 - 0.00000227 * t3 + 0.000000011 * t4;
    let om = 124.7746 - 1.56375588 * k + 0.0020672 * t2 + 0.00000215 * t3;

    let periodic = match phase {
        LunarPhase::New => new_full_terms(e, m, mp, f, om, &NEW_MOON_HEAD),
        LunarPhase::Full => new_full_terms(e, m, mp, f, om, &FULL_MOON_HEAD),
        LunarPhase::FirstQuarter | LunarPhase::LastQuarter => {
            let w = 0.00306 - 0.00038 * e * cos_deg(m) + 0.00026 * cos_deg(mp)
                - 0.00002 * cos_deg(mp - m)
                + 0.00002 * cos_deg(mp + m)
                + 0.00002 * cos_deg(2.0 * f);
            let sign = if phase == LunarPhase::FirstQuarter { 1.0 } else { -1.0 };
            quarter_terms(e, m, mp, f, om) + sign * w
        }
    };

    mean + periodic + planetary_terms(k, t2)
}

/// The first fifteen coefficients differ between new and full moon; the
/// remaining small terms are shared.
const NEW_MOON_HEAD: [f64; 15] = [
    -0.40720, 0.17241, 0.01608, 0.01039, 0.00739, -0.00514, 0.00208, -0.00111, -0.00057,
    0.00056, -0.00042, 0.00042, 0.00038, -0.00024, -0.00017,
];
const FULL_MOON_HEAD: [f64; 15] = [
    -0.40614, 0.17302, 0.01614, 0.01043, 0.00734, -0.00515, 0.00209, -0.00111, -0.00057,
    0.00056, -0.00042, 0.00042, 0.00038, -0.00024, -0.00017,
];

fn new_full_terms(e: f64, m: f64, mp: f64, f: f64, om: f64, c: &[f64; 15]) -> f64 {
    c[0] * sin_deg(mp)
        + c[1] * e * sin_deg(m)
        + c[2] * sin_deg(2.0 * mp)
        + c[3] * sin_deg(2.0 * f)
        + c[4] * e * sin_deg(mp - m)
        + c[5] * e * sin_deg(mp + m)
        + c[6] * e * e * sin_deg(2.0 * m)
        + c[7] * sin_deg(mp - 2.0 * f)
        + c[8] * sin_deg(mp + 2.0 * f)
        + c[9] * e * sin_deg(2.0 * mp + m)
        + c[10] * sin_deg(3.0 * mp)
        + c[11] * e * sin_deg(m + 2.0 * f)
        + c[12] * e * sin_deg(m - 2.0 * f)
        + c[13] * e * sin_deg(2.0 * mp - m)
        + c[14] * sin_deg(om)
        - 0.00007 * sin_deg(mp + 2.0 * m)
        + 0.00004 * sin_deg(2.0 * mp - 2.0 * f)
        + 0.00004 * sin_deg(3.0 * m)
        + 0.00003 * sin_deg(mp + m - 2.0 * f)
        + 0.00003 * sin_deg(2.0 * mp + 2.0 * f)
        - 0.00003 * sin_deg(mp + m + 2.0 * f)
        + 0.00003 * sin_deg(mp - m + 2.0 * f)
        - 0.00002 * sin_deg(mp - m - 2.0 * f)
        - 0.00002 * sin_deg(3.0 * mp + m)
        + 0.00002 * sin_deg(4.0 * mp)
}

fn quarter_terms(e: f64, m: f64, mp: f64, f: f64, om: f64) -> f64 {
    -0.62801 * sin_deg(mp)
        + 0.17172 * e * sin_deg(m)
        - 0.01183 * e * sin_deg(mp + m)
        + 0.00862 * sin_deg(2.0 * mp)
        + 0.00804 * sin_deg(2.0 * f)
        + 0.00454 * e * sin_deg(mp - m)
        + 0.00204 * e * e * sin_deg(2.0 * m)
        - 0.00180 * sin_deg(mp - 2.0 * f)
        - 0.00070 * sin_deg(mp + 2.0 * f)
        - 0.00040 * sin_deg(3.0 * mp)
        - 0.00034 * e * sin_deg(2.0 * mp - m)
        + 0.00032 * e * sin_deg(m + 2.0 * f)
        + 0.00032 * e * sin_deg(m - 2.0 * f)
        - 0.00028 * e * e * sin_deg(mp + 2.0 * m)
        + 0.00027 * e * sin_deg(2.0 * mp + m)
        - 0.00017 * sin_deg(om)
        - 0.00005 * sin_deg(mp - m - 2.0 * f)
        + 0.00004 * sin_deg(2.0 * mp + 2.0 * f)
        - 0.00004 * sin_deg(mp + m + 2.0 * f)
        + 0.00004 * sin_deg(mp - 2.0 * m)
        + 0.00003 * sin_deg(mp + m - 2.0 * f)
        + 0.00003 * sin_deg(3.0 * m)
        + 0.00002 * sin_deg(2.0 * mp - 2.0 * f)
        + 0.00002 * sin_deg(mp - m + 2.0 * f)
        - 0.00002 * sin_deg(3.0 * mp + m)
}

/// Planetary arguments A1..A14 as `(coefficient, a0, rate per lunation)`.
const PLANETARY: [(f64, f64, f64); 14] = [
    (0.000325, 299.77, 0.107408),
    (0.000165, 251.88, 0.016321),
    (0.000164, 251.83, 26.651886),
    (0.000126, 349.42, 36.412478),
    (0.000110, 84.66, 18.206239),
    (0.000062, 141.74, 53.303771),
    (0.000060, 207.14, 2.453732),
    (0.000056, 154.84, 7.306860),
    (0.000047, 34.52, 27.261239),
    (0.000042, 207.19, 0.121824),
    (0.000040, 291.34, 1.844379),
    (0.000037, 161.72, 24.198154),
    (0.000035, 239.56, 25.513099),
    (0.000023, 331.55, 3.592518),
];

fn planetary_terms(k: f64, t2: f64) -> f64 {
    PLANETARY
        .iter()
        .enumerate()
        .map(|(i, (coeff, a0, rate))| {
            let mut arg = a0 + rate * k;
            if i == 0 {
                arg -= 0.009173 * t2;
            }
            coeff * sin_deg(arg)
        })
        .sum()
}

/// TT − UT in seconds (Espenak & Meeus polynomial fits).
fn delta_t_seconds(year: f64) -> f64 {
    if (1986.0..2005.0).contains(&year) {
        let t = year - 2000.0;
        63.86 + 0.3345 * t - 0.060374 * t.powi(2)
            + 0.0017275 * t.powi(3)
            + 0.000651814 * t.powi(4)
            + 0.00002373599 * t.powi(5)
    } else if (2005.0..2050.0).contains(&year) {
        let t = year - 2000.0;
        62.92 + 0.32217 * t + 0.005589 * t * t
    } else if (2050.0..2150.0).contains(&year) {
        let u = (year - 1820.0) / 100.0;
        -20.0 + 32.0 * u * u - 0.5628 * (2150.0 - year)
    } else {
        let u = (year - 1820.0) / 100.0;
        -20.0 + 32.0 * u * u
    }
}
