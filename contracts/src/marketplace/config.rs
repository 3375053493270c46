use mech_protocol::config::{
    DEFAULT_FEE_BPS, DEFAULT_MAX_RESPONSE_TIMEOUT, DEFAULT_MIN_RESPONSE_TIMEOUT, MAX_FEE_FACTOR,
    MAX_TIMESTAMP,
};
use serde::{Deserialize, Serialize};

use super::MarketplaceError;

/// Owner-tunable marketplace parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketplaceConfig {
    /// Fee taken from mech payouts, in basis points of `MAX_FEE_FACTOR`.
    pub fee_bps: u16,
    /// Shortest response timeout a request may ask for, in seconds.
    pub min_response_timeout: u64,
    /// Longest response timeout a request may ask for, in seconds.
    pub max_response_timeout: u64,
}

impl Default for MarketplaceConfig {
    fn default() -> Self {
        Self {
            fee_bps: DEFAULT_FEE_BPS,
            min_response_timeout: DEFAULT_MIN_RESPONSE_TIMEOUT,
            max_response_timeout: DEFAULT_MAX_RESPONSE_TIMEOUT,
        }
    }
}

impl MarketplaceConfig {
    pub fn validate(&self) -> Result<(), MarketplaceError> {
        validate_fee(self.fee_bps)?;
        validate_timeouts(self.min_response_timeout, self.max_response_timeout)
    }
}

pub(crate) fn validate_fee(fee_bps: u16) -> Result<(), MarketplaceError> {
    if fee_bps >= MAX_FEE_FACTOR {
        return Err(MarketplaceError::OutOfBounds {
            provided: fee_bps as u64,
            min: 0,
            max: (MAX_FEE_FACTOR - 1) as u64,
        });
    }
    Ok(())
}

pub(crate) fn validate_timeouts(min: u64, max: u64) -> Result<(), MarketplaceError> {
    if min == 0 {
        return Err(MarketplaceError::ZeroValue);
    }
    if max > MAX_TIMESTAMP {
        return Err(MarketplaceError::Overflow {
            provided: max,
            max: MAX_TIMESTAMP,
        });
    }
    if min > max {
        return Err(MarketplaceError::OutOfBounds {
            provided: min,
            min: 1,
            max,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        MarketplaceConfig::default().validate().unwrap();
    }

    #[test]
    fn fee_must_stay_below_factor() {
        let cfg = MarketplaceConfig {
            fee_bps: MAX_FEE_FACTOR,
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(MarketplaceError::OutOfBounds { provided: 10_000, .. })
        ));
    }

    #[test]
    fn timeout_bounds() {
        assert_eq!(validate_timeouts(0, 10), Err(MarketplaceError::ZeroValue));
        assert!(validate_timeouts(11, 10).is_err());
        assert!(validate_timeouts(1, MAX_TIMESTAMP + 1).is_err());
        assert!(validate_timeouts(10, 10).is_ok());
    }

    #[test]
    fn missing_json_fields_use_defaults() {
        let cfg: MarketplaceConfig = serde_json::from_str(r#"{"fee_bps": 50}"#).unwrap();
        assert_eq!(cfg.fee_bps, 50);
        assert_eq!(cfg.min_response_timeout, DEFAULT_MIN_RESPONSE_TIMEOUT);
    }
}
