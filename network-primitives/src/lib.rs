pub mod subscription;

pub use self::subscription::{Subscription, SubscriptionType};
