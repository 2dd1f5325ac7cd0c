//! Per-user account: premium flag and unlock credits.

use serde::{Deserialize, Serialize};

use super::ids::UserId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: UserId,
    pub credits: u32,
    pub is_premium: bool,
}

impl UserAccount {
    pub fn new(id: UserId, credits: u32) -> Self {
        Self {
            id,
            credits,
            is_premium: false,
        }
    }

    /// Try to unlock one evaluation without payment.
    ///
    /// Premium accounts always qualify. Otherwise one credit is spent if any remain.
    pub fn consume_unlock(&mut self) -> bool {
        if self.is_premium {
            return true;
        }
        if self.credits > 0 {
            self.credits -= 1;
            return true;
        }
        false
    }
}
