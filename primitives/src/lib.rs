pub mod account;
pub mod block;
pub mod coin;
pub mod transaction;

pub use self::account::Address;
pub use self::coin::Coin;
