use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::BASIS_POINT_DENOM;
use crate::error::GridxError;

/// The closed set of currencies the marketplace settles in.
///
/// Anything outside this set is rejected with a validation error at the API
/// boundary; the per-process adapter registry may support a subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Flop,
    Btc,
    Eth,
    Usdt,
    Bnb,
    Xrp,
    Sol,
    Ada,
    Doge,
    Ton,
    Trx,
}

impl Currency {
    pub const ALL: [Currency; 11] = [
        Currency::Flop,
        Currency::Btc,
        Currency::Eth,
        Currency::Usdt,
        Currency::Bnb,
        Currency::Xrp,
        Currency::Sol,
        Currency::Ada,
        Currency::Doge,
        Currency::Ton,
        Currency::Trx,
    ];

    /// Number of fractional decimal digits in the currency's base unit.
    pub fn precision(&self) -> u32 {
        match self {
            Currency::Flop => 8,
            Currency::Btc => 8,
            Currency::Eth => 18,
            Currency::Usdt => 6,
            Currency::Bnb => 18,
            Currency::Xrp => 6,
            Currency::Sol => 9,
            Currency::Ada => 6,
            Currency::Doge => 8,
            Currency::Ton => 9,
            Currency::Trx => 6,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Currency::Flop => "FLOP",
            Currency::Btc => "BTC",
            Currency::Eth => "ETH",
            Currency::Usdt => "USDT",
            Currency::Bnb => "BNB",
            Currency::Xrp => "XRP",
            Currency::Sol => "SOL",
            Currency::Ada => "ADA",
            Currency::Doge => "DOGE",
            Currency::Ton => "TON",
            Currency::Trx => "TRX",
        }
    }

    /// Base units per whole coin (10^precision).
    pub fn base_units_per_coin(&self) -> u128 {
        10u128.pow(self.precision())
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

impl FromStr for Currency {
    type Err = GridxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "FLOP" => Ok(Currency::Flop),
            "BTC" => Ok(Currency::Btc),
            "ETH" => Ok(Currency::Eth),
            "USDT" => Ok(Currency::Usdt),
            "BNB" => Ok(Currency::Bnb),
            "XRP" => Ok(Currency::Xrp),
            "SOL" => Ok(Currency::Sol),
            "ADA" => Ok(Currency::Ada),
            "DOGE" => Ok(Currency::Doge),
            "TON" => Ok(Currency::Ton),
            "TRX" => Ok(Currency::Trx),
            other => Err(GridxError::UnsupportedCurrency(other.to_string())),
        }
    }
}

// ── Amount ───────────────────────────────────────────────────────────────────

/// A monetary amount in integer base units at the currency's precision.
///
/// All arithmetic is exact; decimal strings exist only at the API and wire
/// boundary. u128 comfortably holds 18-decimal ETH amounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Amount {
    units: u128,
    currency: Currency,
}

impl Amount {
    pub fn from_units(units: u128, currency: Currency) -> Self {
        Self { units, currency }
    }

    /// Parse a decimal string such as `"10.00"` or `"0.01"`.
    ///
    /// Rejects empty input, malformed digits, and more fractional digits than
    /// the currency's precision allows.
    pub fn parse(s: &str, currency: Currency) -> Result<Self, GridxError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(GridxError::InvalidAmount("empty amount".into()));
        }
        let (whole, frac) = match s.split_once('.') {
            Some((w, f)) => (w, f),
            None => (s, ""),
        };
        let precision = currency.precision() as usize;
        if frac.len() > precision {
            return Err(GridxError::InvalidAmount(format!(
                "{s}: more than {precision} fractional digits for {currency}"
            )));
        }
        if whole.is_empty() && frac.is_empty() {
            return Err(GridxError::InvalidAmount(s.to_string()));
        }
        let parse_digits = |d: &str| -> Result<u128, GridxError> {
            if d.is_empty() {
                return Ok(0);
            }
            if !d.bytes().all(|b| b.is_ascii_digit()) {
                return Err(GridxError::InvalidAmount(s.to_string()));
            }
            d.parse::<u128>()
                .map_err(|_| GridxError::InvalidAmount(s.to_string()))
        };
        let whole_units = parse_digits(whole)?
            .checked_mul(currency.base_units_per_coin())
            .ok_or_else(|| GridxError::InvalidAmount(format!("{s}: overflow")))?;
        let mut frac_units = parse_digits(frac)?;
        frac_units *= 10u128.pow((precision - frac.len()) as u32);
        let units = whole_units
            .checked_add(frac_units)
            .ok_or_else(|| GridxError::InvalidAmount(format!("{s}: overflow")))?;
        Ok(Self { units, currency })
    }

    pub fn units(&self) -> u128 {
        self.units
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn is_zero(&self) -> bool {
        self.units == 0
    }

    /// Render as a canonical decimal string at full currency precision.
    pub fn to_decimal_string(&self) -> String {
        let scale = self.currency.base_units_per_coin();
        let whole = self.units / scale;
        let frac = self.units % scale;
        format!(
            "{whole}.{frac:0width$}",
            width = self.currency.precision() as usize
        )
    }

    /// Split into `(seller, community)` shares by community basis points.
    ///
    /// `community = round_half_up(units × bp / 10_000)` in integer arithmetic,
    /// `seller = units − community`, so the parts always sum to the whole.
    pub fn settlement_split(&self, community_share_bp: u32) -> (Amount, Amount) {
        let bp = community_share_bp as u128;
        let community = (self.units * bp + BASIS_POINT_DENOM / 2) / BASIS_POINT_DENOM;
        let seller = self.units - community;
        (
            Amount::from_units(seller, self.currency),
            Amount::from_units(community, self.currency),
        )
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.to_decimal_string(), self.currency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_render_round_trip() {
        let a = Amount::parse("10.00", Currency::Flop).unwrap();
        assert_eq!(a.units(), 1_000_000_000);
        assert_eq!(a.to_decimal_string(), "10.00000000");

        let b = Amount::parse("0.01", Currency::Flop).unwrap();
        assert_eq!(b.units(), 1_000_000);

        let c = Amount::parse("3", Currency::Usdt).unwrap();
        assert_eq!(c.units(), 3_000_000);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(Amount::parse("", Currency::Flop).is_err());
        assert!(Amount::parse(".", Currency::Flop).is_err());
        assert!(Amount::parse("1.2.3", Currency::Flop).is_err());
        assert!(Amount::parse("ten", Currency::Flop).is_err());
        assert!(Amount::parse("-1", Currency::Flop).is_err());
        // 9 fractional digits against FLOP's precision of 8.
        assert!(Amount::parse("1.000000001", Currency::Flop).is_err());
    }

    #[test]
    fn split_sums_exactly() {
        let a = Amount::parse("10.00", Currency::Flop).unwrap();
        let (seller, community) = a.settlement_split(500);
        assert_eq!(seller.to_decimal_string(), "9.50000000");
        assert_eq!(community.to_decimal_string(), "0.50000000");
        assert_eq!(seller.units() + community.units(), a.units());
    }

    #[test]
    fn split_smallest_boundary() {
        // 0.01 FLOP at precision 8: community = 0.0005, seller = 0.0095.
        let a = Amount::parse("0.01", Currency::Flop).unwrap();
        let (seller, community) = a.settlement_split(500);
        assert_eq!(community.units(), 50_000);
        assert_eq!(seller.units(), 950_000);
        assert_eq!(community.to_decimal_string(), "0.00050000");
        assert_eq!(seller.to_decimal_string(), "0.00950000");
    }

    #[test]
    fn split_rounds_half_up() {
        // 3 units at 5%: 0.15 rounds to 0.
        let (s, c) = Amount::from_units(3, Currency::Flop).settlement_split(500);
        assert_eq!((s.units(), c.units()), (3, 0));
        // 10 units at 5%: exactly 0.5 rounds up to 1.
        let (s, c) = Amount::from_units(10, Currency::Flop).settlement_split(500);
        assert_eq!((s.units(), c.units()), (9, 1));
    }

    #[test]
    fn unknown_symbol_rejected() {
        let err = "PEPE".parse::<Currency>().unwrap_err();
        assert!(matches!(err, GridxError::UnsupportedCurrency(_)));
        assert_eq!("flop".parse::<Currency>().unwrap(), Currency::Flop);
    }
}
