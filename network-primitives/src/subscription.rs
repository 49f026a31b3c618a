use std::collections::HashSet;

use primitives::block::Block;
use primitives::transaction::Transaction;
use primitives::{Address, Coin};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(u8)]
pub enum SubscriptionType {
    None = 0,
    Any = 1,
    Addresses = 2,
    MinFee = 3,
}

/// Declares which announcements a party wants to receive. The predicate is
/// total and side-effect free.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Subscription {
    /// Match nothing.
    None,
    /// Match every block and transaction.
    Any,
    /// Match all blocks and the transactions touching any listed address.
    Addresses(HashSet<Address>),
    /// Match all blocks and the transactions paying at least this fee per byte.
    MinFee(Coin),
}

impl Subscription {
    pub fn subscription_type(&self) -> SubscriptionType {
        match self {
            Subscription::None => SubscriptionType::None,
            Subscription::Any => SubscriptionType::Any,
            Subscription::Addresses(_) => SubscriptionType::Addresses,
            Subscription::MinFee(_) => SubscriptionType::MinFee,
        }
    }

    pub fn matches_block(&self, _block: &Block) -> bool {
        !matches!(self, Subscription::None)
    }

    pub fn matches_transaction(&self, transaction: &Transaction) -> bool {
        match self {
            Subscription::None => false,
            Subscription::Any => true,
            Subscription::Addresses(addresses) => {
                addresses.iter().any(|address| transaction.touches(address))
            }
            Subscription::MinFee(min_fee) => {
                // An overflowing total fee requirement can never be met by an
                // actual fee, so treat it as matching.
                min_fee
                    .checked_factor(transaction.serialized_size() as u64)
                    .map(|total| transaction.fee >= total)
                    .unwrap_or(true)
            }
        }
    }
}

impl Default for Subscription {
    fn default() -> Self {
        Subscription::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(sender: u8, recipient: u8, fee: u64) -> Transaction {
        Transaction::new(
            Address::from_bytes([sender; 20]),
            Address::from_bytes([recipient; 20]),
            Coin::from_units(100),
            Coin::from_units(fee),
            1,
            vec![],
        )
    }

    #[test]
    fn none_matches_nothing() {
        let sub = Subscription::None;
        assert!(!sub.matches_transaction(&tx(1, 2, 1000)));
    }

    #[test]
    fn any_matches_everything() {
        let sub = Subscription::Any;
        assert!(sub.matches_transaction(&tx(1, 2, 0)));
    }

    #[test]
    fn addresses_match_sender_or_recipient() {
        let mut addresses = HashSet::new();
        addresses.insert(Address::from_bytes([7; 20]));
        let sub = Subscription::Addresses(addresses);

        assert!(sub.matches_transaction(&tx(7, 2, 1)));
        assert!(sub.matches_transaction(&tx(1, 7, 1)));
        assert!(!sub.matches_transaction(&tx(1, 2, 1)));
    }

    #[test]
    fn min_fee_compares_fee_per_byte() {
        let sub = Subscription::MinFee(Coin::from_units(1));
        // 62-byte transaction needs a total fee of at least 62.
        assert!(sub.matches_transaction(&tx(1, 2, 62)));
        assert!(!sub.matches_transaction(&tx(1, 2, 10)));
    }
}
