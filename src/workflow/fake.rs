//! 测试用的脚本化驱动

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::ItemFailure;
use crate::models::case::default_period_rows;
use crate::models::{Case, Credentials, Month};
use crate::workflow::driver::{CredentialOutcome, Receipt, StepId, StepOutcome, WorkflowDriver};

pub(crate) fn sample_case(id: &str) -> Case {
    Case {
        id: id.to_string(),
        name: format!("Pescador {}", id),
        credentials: Credentials {
            login: id.to_string(),
            password: "senha".to_string(),
        },
        municipality: "Buriticupu".to_string(),
        periods: Case::build_periods(&default_period_rows("Buriticupu")),
        external_ref: None,
        status: None,
    }
}

/// 月份在填写 N 次后被确认；页面步骤执行一次后被确认
pub(crate) struct FakeDriver {
    login: Mutex<Result<CredentialOutcome, ItemFailure>>,
    fills_to_confirm: Mutex<HashMap<Month, u32>>,
    month_fills: Mutex<HashMap<Month, u32>>,
    verify_errors: Mutex<HashSet<Month>>,
    stubborn_pages: Mutex<HashSet<StepId>>,
    page_calls: Mutex<Vec<StepId>>,
    receipt: Mutex<Result<Option<Receipt>, ItemFailure>>,
}

impl FakeDriver {
    pub(crate) fn new() -> Self {
        Self {
            login: Mutex::new(Ok(CredentialOutcome::Ready)),
            fills_to_confirm: Mutex::new(HashMap::new()),
            month_fills: Mutex::new(HashMap::new()),
            verify_errors: Mutex::new(HashSet::new()),
            stubborn_pages: Mutex::new(HashSet::new()),
            page_calls: Mutex::new(Vec::new()),
            receipt: Mutex::new(Ok(Some(Receipt {
                path: PathBuf::from("/tmp/recibo.pdf"),
                reference_year: Some("2025".to_string()),
            }))),
        }
    }

    pub(crate) fn confirm_after(&self, month: Month, fills: u32) {
        self.fills_to_confirm.lock().unwrap().insert(month, fills);
    }

    pub(crate) fn never_confirm(&self, month: Month) {
        self.confirm_after(month, u32::MAX);
    }

    pub(crate) fn fail_verification(&self, month: Month) {
        self.verify_errors.lock().unwrap().insert(month);
    }

    pub(crate) fn page_never_confirms(&self, step: StepId) {
        self.stubborn_pages.lock().unwrap().insert(step);
    }

    pub(crate) fn set_login(&self, outcome: Result<CredentialOutcome, ItemFailure>) {
        *self.login.lock().unwrap() = outcome;
    }

    pub(crate) fn set_receipt(&self, receipt: Result<Option<Receipt>, ItemFailure>) {
        *self.receipt.lock().unwrap() = receipt;
    }

    pub(crate) fn month_fills(&self) -> HashMap<Month, u32> {
        self.month_fills.lock().unwrap().clone()
    }

    pub(crate) fn page_calls(&self) -> Vec<StepId> {
        self.page_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl WorkflowDriver for FakeDriver {
    async fn login(&self, _case: &Case) -> Result<CredentialOutcome, ItemFailure> {
        self.login.lock().unwrap().clone()
    }

    async fn perform_step(&self, step: StepId, _case: &Case) -> Result<StepOutcome, ItemFailure> {
        match step {
            StepId::Month(month) => {
                *self.month_fills.lock().unwrap().entry(month).or_insert(0) += 1;
            }
            other => self.page_calls.lock().unwrap().push(other),
        }
        Ok(StepOutcome::Performed)
    }

    async fn is_step_confirmed(&self, step: StepId) -> Result<bool, ItemFailure> {
        match step {
            StepId::Month(month) => {
                if self.verify_errors.lock().unwrap().contains(&month) {
                    return Err(ItemFailure::driver("elemento não encontrado"));
                }
                let needed = self
                    .fills_to_confirm
                    .lock()
                    .unwrap()
                    .get(&month)
                    .copied()
                    .unwrap_or(1);
                let done = self
                    .month_fills
                    .lock()
                    .unwrap()
                    .get(&month)
                    .copied()
                    .unwrap_or(0);
                Ok(done >= needed)
            }
            other => Ok(!self.stubborn_pages.lock().unwrap().contains(&other)
                && self.page_calls.lock().unwrap().contains(&other)),
        }
    }

    async fn fetch_receipt(&self, _case: &Case) -> Result<Option<Receipt>, ItemFailure> {
        self.receipt.lock().unwrap().clone()
    }
}
