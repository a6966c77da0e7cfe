//! Value objects for the order domain.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Currency amount with exactly two fractional digits.
///
/// Serialized as a decimal string (`"39.98"`) so no precision is lost on the
/// wire; plain JSON numbers are accepted when deserializing and normalized
/// to two fractional digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "Decimal", into = "Decimal")]
pub struct Money(Decimal);

impl Money {
    /// Number of fractional digits carried by every amount.
    pub const SCALE: u32 = 2;

    /// Creates an amount, rounding half away from zero to two fractional digits.
    pub fn new(amount: Decimal) -> Self {
        let mut amount =
            amount.round_dp_with_strategy(Self::SCALE, RoundingStrategy::MidpointAwayFromZero);
        amount.rescale(Self::SCALE);
        Self(amount)
    }

    /// Creates an amount from minor units (e.g., 1999 = 19.99).
    pub fn from_cents(cents: i64) -> Self {
        Self::new(Decimal::new(cents, Self::SCALE))
    }

    /// Returns zero money.
    pub fn zero() -> Self {
        Self::from_cents(0)
    }

    /// Returns the decimal amount.
    pub fn amount(&self) -> Decimal {
        self.0
    }

    /// Returns the amount in minor units.
    pub fn cents(&self) -> i64 {
        self.0.mantissa() as i64
    }

    /// Returns true if the amount is positive.
    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    /// Multiplies by a quantity.
    pub fn multiply(&self, quantity: u32) -> Money {
        Money::new(self.0 * Decimal::from(quantity))
    }
}

impl Default for Money {
    fn default() -> Self {
        Self::zero()
    }
}

impl From<Decimal> for Money {
    fn from(amount: Decimal) -> Self {
        Self::new(amount)
    }
}

impl From<Money> for Decimal {
    fn from(money: Money) -> Self {
        money.0
    }
}

impl std::str::FromStr for Money {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Decimal::from_str_exact(s.trim()).map(Money::new)
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::ops::Add for Money {
    type Output = Money;

    fn add(self, rhs: Self) -> Self::Output {
        Money::new(self.0 + rhs.0)
    }
}

/// How the buyer pays for an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentMethod {
    Card,
    BankTransfer,
    Wallet,
    CashOnDelivery,
}

impl PaymentMethod {
    /// All payment methods.
    pub const ALL: [PaymentMethod; 4] = [
        PaymentMethod::Card,
        PaymentMethod::BankTransfer,
        PaymentMethod::Wallet,
        PaymentMethod::CashOnDelivery,
    ];

    /// Returns the method name as stored and serialized.
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Card => "Card",
            PaymentMethod::BankTransfer => "BankTransfer",
            PaymentMethod::Wallet => "Wallet",
            PaymentMethod::CashOnDelivery => "CashOnDelivery",
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PaymentMethod::ALL
            .into_iter()
            .find(|method| method.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown payment method '{s}'"))
    }
}
