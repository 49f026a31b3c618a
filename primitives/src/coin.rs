use std::fmt;
use std::io;
use std::ops::Add;

use hash::SerializeContent;

/// An amount of currency in the smallest unit (satoshi).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Coin(u64);

impl Coin {
    pub const ZERO: Coin = Coin(0);

    /// Number of decimal places between the smallest unit and one coin.
    pub const FRAC_DIGITS: u32 = 5;
    pub const LUNAS_PER_COIN: u64 = 10u64.pow(Self::FRAC_DIGITS);

    pub fn from_units(units: u64) -> Coin {
        Coin(units)
    }

    pub fn checked_add(self, other: Coin) -> Option<Coin> {
        self.0.checked_add(other.0).map(Coin)
    }

    /// Multiplies the amount by `times`, `None` on overflow.
    pub fn checked_factor(self, times: u64) -> Option<Coin> {
        self.0.checked_mul(times).map(Coin)
    }
}

impl From<Coin> for u64 {
    fn from(coin: Coin) -> Self {
        coin.0
    }
}

impl From<u64> for Coin {
    fn from(units: u64) -> Self {
        Coin(units)
    }
}

impl Add for Coin {
    type Output = Coin;

    fn add(self, rhs: Coin) -> Coin {
        Coin(self.0 + rhs.0)
    }
}

impl fmt::Display for Coin {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let whole = self.0 / Self::LUNAS_PER_COIN;
        let frac = self.0 % Self::LUNAS_PER_COIN;
        if frac == 0 {
            write!(f, "{}", whole)
        } else {
            write!(f, "{}.{:0width$}", whole, frac, width = Self::FRAC_DIGITS as usize)
        }
    }
}

impl SerializeContent for Coin {
    fn serialize_content<W: io::Write>(&self, writer: &mut W) -> io::Result<usize> {
        writer.write_all(&self.0.to_be_bytes())?;
        Ok(8)
    }
}

#[cfg(test)]
mod tests {
    use super::Coin;

    #[test]
    fn checked_factor_detects_overflow() {
        assert_eq!(
            Coin::from_units(2).checked_factor(3),
            Some(Coin::from_units(6))
        );
        assert_eq!(Coin::from_units(u64::MAX).checked_factor(2), None);
    }

    #[test]
    fn display_formats_fractions() {
        assert_eq!(Coin::from_units(100_000).to_string(), "1");
        assert_eq!(Coin::from_units(100_001).to_string(), "1.00001");
        assert_eq!(Coin::ZERO.to_string(), "0");
    }
}
