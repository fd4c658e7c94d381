//! Process-wide token accounting for one invocation tree.

use std::sync::Mutex;
use std::sync::PoisonError;

use crate::error::Result;
use crate::error::RlmError;

/// Token caps checked after every increment. `None` disables a cap.
#[derive(Clone, Copy, Debug, Default)]
pub struct BudgetCaps {
    pub max_prompt_tokens: Option<u64>,
    pub max_completion_tokens: Option<u64>,
}

/// Running usage totals shared by every agent in one invocation tree.
///
/// Tracking and the budget check are a single guarded operation so the
/// post-increment check cannot be interleaved with another increment. The
/// overflowing call is counted first, then rejected.
#[derive(Debug)]
pub struct UsageTotals {
    caps: BudgetCaps,
    totals: Mutex<crate::usage::Usage>,
}

impl UsageTotals {
    pub fn new(caps: BudgetCaps) -> Self {
        Self {
            caps,
            totals: Mutex::new(crate::usage::Usage::default()),
        }
    }

    /// Zero the counters. Called once at the start of a top-level invocation.
    pub fn reset(&self) {
        let mut totals = self.totals.lock().unwrap_or_else(PoisonError::into_inner);
        *totals = crate::usage::Usage::default();
    }

    /// Add a call's usage field-wise, then enforce the caps.
    pub fn track(&self, usage: &crate::usage::Usage) -> Result<()> {
        let mut totals = self.totals.lock().unwrap_or_else(PoisonError::into_inner);
        totals.absorb(usage);
        if let Some(limit) = self.caps.max_prompt_tokens
            && totals.prompt_tokens > limit
        {
            return Err(RlmError::Runtime(format!(
                "Prompt token budget exceeded: {} used, limit is {}",
                totals.prompt_tokens, limit
            )));
        }
        if let Some(limit) = self.caps.max_completion_tokens
            && totals.completion_tokens > limit
        {
            return Err(RlmError::Runtime(format!(
                "Completion token budget exceeded: {} used, limit is {}",
                totals.completion_tokens, limit
            )));
        }
        Ok(())
    }

    /// Snapshot of the running totals.
    pub fn get(&self) -> crate::usage::Usage {
        self.totals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
