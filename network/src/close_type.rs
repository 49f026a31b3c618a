/// Reason codes attached to a channel close.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum CloseType {
    Regular,
    SendFailed,
    ClosedByRemote,
    ReceivedTransactionNotMatchingOurSubscription,
    InvalidBlockProof,
    InvalidTransactionProof,
    GetTransactionsProofTimeout,
    GetTransactionReceiptsTimeout,
}

impl CloseType {
    /// Whether the close marks the peer as misbehaving.
    pub fn is_failing(self) -> bool {
        !matches!(self, CloseType::Regular | CloseType::ClosedByRemote)
    }
}
