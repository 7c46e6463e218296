//! Safety-interlock policy for the bias rails.
//!
//! A requested target state is validated in full before any instrument
//! command is issued. The rules come from the device safe-operating limits:
//!
//! - All magnitudes are operator-facing absolute values. Negative inputs are
//!   rejected outright rather than silently rectified.
//! - The substrate rail (`psub`, entered as |psub - pwell|) may only be
//!   non-zero once `pwell` has reached its 6 V plateau; below that the
//!   junction isolation is not guaranteed.
//! - At the 6 V plateau, the psub ceiling depends on which chip is under
//!   test: 4 V for W8R4, 9 V for W2R17, 14 V for W8R6.
//! - `pwell` never exceeds 6 V, on any chip.
//! - The HV rail is software-limited to 30 V. The instrument's own hardware
//!   protection trips at 40 V; the 10 V of margin is deliberate and the
//!   software ceiling is the primary check.
//! - The DC pair and the HV rail are never energized at the same time.
//!
//! Checks run in a fixed order, first match wins, so a request that violates
//! several rules always reports the same reason.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Absolute ceiling for the pwell magnitude, volts.
pub const PWELL_CEILING: f64 = 6.0;

/// Software overprotection ceiling for the HV rail, volts.
///
/// The SMU's hardware protect level is [`HV_HARDWARE_PROTECT`]; staying 10 V
/// under it means the hardware trip is a backstop, never the primary check.
pub const HV_CEILING: f64 = 30.0;

/// Hardware protection trip level configured on the HV source, volts.
pub const HV_HARDWARE_PROTECT: f64 = 40.0;

/// The chip under test. Selects which row of the psub ceiling table applies.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DutVariant {
    /// W8R4 wafer piece, psub ceiling 4 V.
    #[default]
    W8R4,
    /// W2R17 wafer piece, psub ceiling 9 V.
    W2R17,
    /// W8R6 wafer piece, psub ceiling 14 V.
    W8R6,
}

impl DutVariant {
    /// Maximum |psub - pwell| magnitude allowed at the pwell plateau, volts.
    pub fn psub_ceiling(self) -> f64 {
        match self {
            DutVariant::W8R4 => 4.0,
            DutVariant::W2R17 => 9.0,
            DutVariant::W8R6 => 14.0,
        }
    }
}

impl fmt::Display for DutVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DutVariant::W8R4 => write!(f, "W8R4"),
            DutVariant::W2R17 => write!(f, "W2R17"),
            DutVariant::W8R6 => write!(f, "W8R6"),
        }
    }
}

impl FromStr for DutVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "W8R4" => Ok(DutVariant::W8R4),
            "W2R17" => Ok(DutVariant::W2R17),
            "W8R6" => Ok(DutVariant::W8R6),
            other => Err(format!(
                "unknown DUT variant '{other}' (expected W8R4, W2R17 or W8R6)"
            )),
        }
    }
}

/// Requested end state of all three rails, in absolute magnitudes.
///
/// `psub` is the operator-facing |psub - pwell| difference, matching how the
/// value is entered at the bench.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BiasTarget {
    /// HV rail magnitude, volts.
    pub hv: f64,
    /// pwell magnitude, volts.
    pub pwell: f64,
    /// |psub - pwell| magnitude, volts.
    pub psub: f64,
}

impl BiasTarget {
    /// A target that energizes only the DC pair; HV is driven to zero.
    pub fn dc_pair(pwell: f64, psub: f64) -> Self {
        Self { hv: 0.0, pwell, psub }
    }

    /// A target that energizes only the HV rail; the DC pair is driven to zero.
    pub fn hv_only(hv: f64) -> Self {
        Self { hv, pwell: 0.0, psub: 0.0 }
    }

    /// A fully de-energized device.
    pub fn grounded() -> Self {
        Self { hv: 0.0, pwell: 0.0, psub: 0.0 }
    }

    /// True when the DC pair target holds both members at zero.
    pub fn dc_is_zero(&self) -> bool {
        self.pwell == 0.0 && self.psub == 0.0
    }
}

/// Reason a requested target state was refused. Display strings are the
/// operator-facing rejection messages.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PolicyViolation {
    #[error("psub must be given as an absolute magnitude, got {0} V")]
    NegativePsub(f64),

    #[error("pwell must be given as an absolute magnitude, got {0} V")]
    NegativePwell(f64),

    #[error("psub must be 0 while pwell is below {PWELL_CEILING} V, got {0} V")]
    PsubRequiresPwellPlateau(f64),

    #[error("psub cannot exceed {ceiling} V on {variant}, got {psub} V")]
    PsubAboveVariantCeiling {
        psub: f64,
        ceiling: f64,
        variant: DutVariant,
    },

    #[error("pwell cannot exceed {PWELL_CEILING} V, got {0} V")]
    PwellAboveCeiling(f64),

    #[error("HV {0} V exceeds the {HV_CEILING} V overprotection ceiling")]
    HvAboveCeiling(f64),

    #[error("HV cannot be negative, got {0} V")]
    NegativeHv(f64),

    #[error("cannot energize the DC pair and the HV rail at the same time")]
    BothGroupsEnergized,
}

/// Validate a requested target state against the interlock table.
///
/// Pure and side-effect-free. Checks run in a fixed order (psub sign, pwell
/// sign, pwell-below-plateau, plateau ceiling, pwell ceiling, HV ceiling, HV
/// sign, group exclusion); the first violated rule is reported.
///
/// Group exclusion is judged on the requested target state, not the
/// transiently energized state: a request is acceptable exactly when the
/// device would be in a safe committed state after the ramp.
pub fn validate(target: &BiasTarget, variant: DutVariant) -> Result<(), PolicyViolation> {
    if target.psub < 0.0 {
        return Err(PolicyViolation::NegativePsub(target.psub));
    }
    if target.pwell < 0.0 {
        return Err(PolicyViolation::NegativePwell(target.pwell));
    }

    if target.pwell < PWELL_CEILING {
        if target.psub != 0.0 {
            return Err(PolicyViolation::PsubRequiresPwellPlateau(target.psub));
        }
    } else if target.pwell == PWELL_CEILING {
        let ceiling = variant.psub_ceiling();
        if target.psub > ceiling {
            return Err(PolicyViolation::PsubAboveVariantCeiling {
                psub: target.psub,
                ceiling,
                variant,
            });
        }
    } else {
        return Err(PolicyViolation::PwellAboveCeiling(target.pwell));
    }

    if target.hv > HV_CEILING {
        return Err(PolicyViolation::HvAboveCeiling(target.hv));
    }
    if target.hv < 0.0 {
        return Err(PolicyViolation::NegativeHv(target.hv));
    }

    if !target.dc_is_zero() && target.hv != 0.0 {
        return Err(PolicyViolation::BothGroupsEnergized);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grounded_target_is_always_valid() {
        for variant in [DutVariant::W8R4, DutVariant::W2R17, DutVariant::W8R6] {
            assert!(validate(&BiasTarget::grounded(), variant).is_ok());
        }
    }

    #[test]
    fn psub_must_be_zero_below_plateau() {
        let target = BiasTarget::dc_pair(5.0, 1.0);
        for variant in [DutVariant::W8R4, DutVariant::W2R17, DutVariant::W8R6] {
            assert_eq!(
                validate(&target, variant),
                Err(PolicyViolation::PsubRequiresPwellPlateau(1.0))
            );
        }
    }

    #[test]
    fn variant_ceilings_apply_at_plateau() {
        assert!(validate(&BiasTarget::dc_pair(6.0, 4.0), DutVariant::W8R4).is_ok());
        assert!(matches!(
            validate(&BiasTarget::dc_pair(6.0, 5.0), DutVariant::W8R4),
            Err(PolicyViolation::PsubAboveVariantCeiling { ceiling, .. }) if ceiling == 4.0
        ));

        assert!(validate(&BiasTarget::dc_pair(6.0, 9.0), DutVariant::W2R17).is_ok());
        assert!(validate(&BiasTarget::dc_pair(6.0, 9.5), DutVariant::W2R17).is_err());

        assert!(validate(&BiasTarget::dc_pair(6.0, 14.0), DutVariant::W8R6).is_ok());
        assert!(validate(&BiasTarget::dc_pair(6.0, 14.1), DutVariant::W8R6).is_err());
    }

    #[test]
    fn pwell_ceiling_wins_regardless_of_psub() {
        for psub in [0.0, 4.0] {
            assert_eq!(
                validate(&BiasTarget::dc_pair(7.0, psub), DutVariant::W8R6),
                Err(PolicyViolation::PwellAboveCeiling(7.0))
            );
        }
    }

    #[test]
    fn negative_magnitudes_are_rejected_first() {
        // psub sign is checked before pwell sign, matching the fixed order.
        assert_eq!(
            validate(&BiasTarget { hv: 0.0, pwell: -1.0, psub: -2.0 }, DutVariant::W8R4),
            Err(PolicyViolation::NegativePsub(-2.0))
        );
        assert_eq!(
            validate(&BiasTarget::dc_pair(-1.0, 0.0), DutVariant::W8R4),
            Err(PolicyViolation::NegativePwell(-1.0))
        );
    }

    #[test]
    fn hv_limits() {
        assert!(validate(&BiasTarget::hv_only(30.0), DutVariant::W8R4).is_ok());
        assert_eq!(
            validate(&BiasTarget::hv_only(30.5), DutVariant::W8R4),
            Err(PolicyViolation::HvAboveCeiling(30.5))
        );
        assert_eq!(
            validate(&BiasTarget::hv_only(-1.0), DutVariant::W8R4),
            Err(PolicyViolation::NegativeHv(-1.0))
        );
    }

    #[test]
    fn dc_and_hv_cannot_be_energized_together() {
        let target = BiasTarget { hv: 10.0, pwell: 6.0, psub: 4.0 };
        assert_eq!(
            validate(&target, DutVariant::W8R4),
            Err(PolicyViolation::BothGroupsEnergized)
        );
        // pwell alone counts as an energized pair.
        let target = BiasTarget { hv: 10.0, pwell: 3.0, psub: 0.0 };
        assert_eq!(
            validate(&target, DutVariant::W8R4),
            Err(PolicyViolation::BothGroupsEnergized)
        );
    }

    #[test]
    fn variant_parsing_round_trips() {
        for variant in [DutVariant::W8R4, DutVariant::W2R17, DutVariant::W8R6] {
            let parsed: DutVariant = variant.to_string().parse().unwrap();
            assert_eq!(parsed, variant);
        }
        assert!("w2r17".parse::<DutVariant>().is_ok());
        assert!("W9R9".parse::<DutVariant>().is_err());
    }
}
