//! Daily usage aggregate exposed by the ledger and in usage events

use serde::{Deserialize, Serialize};

/// Token consumption and derived cost for one calendar day.
/// `tokens`, `cost` and `calls` only ever grow within a day.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DailyUsage {
    pub date: String,
    pub tokens: u64,
    pub cost: f64,
    pub calls: u64,
}
