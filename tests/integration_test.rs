use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use reap_dispatch::browser::connect_to_browser_and_page;
use reap_dispatch::models::{load_task_file, parse_inline_task, Month};
use reap_dispatch::utils::logging;
use reap_dispatch::workflow::{AutoConfirmer, CredentialOutcome, Receipt, StepId, StepOutcome};
use reap_dispatch::{
    Case, CaseFlow, Config, ItemFailure, LedgerStatus, ProgressLedger, RunCoordinator,
    WorkflowDriver,
};

/// 执行过的步骤视为已确认；`stubborn` 中的月份永远不被确认
#[derive(Default)]
struct PageDriver {
    performed: Mutex<HashSet<StepId>>,
    stubborn: HashSet<Month>,
}

impl PageDriver {
    fn with_stubborn(months: &[Month]) -> Self {
        Self {
            stubborn: months.iter().copied().collect(),
            ..Self::default()
        }
    }
}

#[async_trait]
impl WorkflowDriver for PageDriver {
    async fn login(&self, _case: &Case) -> Result<CredentialOutcome, ItemFailure> {
        self.performed.lock().unwrap().clear();
        Ok(CredentialOutcome::Ready)
    }

    async fn perform_step(&self, step: StepId, _case: &Case) -> Result<StepOutcome, ItemFailure> {
        self.performed.lock().unwrap().insert(step);
        Ok(StepOutcome::Performed)
    }

    async fn is_step_confirmed(&self, step: StepId) -> Result<bool, ItemFailure> {
        if let StepId::Month(month) = step {
            if self.stubborn.contains(&month) {
                return Ok(false);
            }
        }
        Ok(self.performed.lock().unwrap().contains(&step))
    }

    async fn fetch_receipt(&self, case: &Case) -> Result<Option<Receipt>, ItemFailure> {
        Ok(Some(Receipt {
            path: PathBuf::from(format!("/tmp/{} - REAP 2025.pdf", case.name)),
            reference_year: Some("2025".to_string()),
        }))
    }
}

fn config_in(dir: &Path, instance: usize, total: usize) -> Config {
    Config {
        instance,
        total_instances: total,
        work_dir: dir.to_path_buf(),
        stdout_results: false,
        batch_retry_delay: Duration::from_millis(5),
        sweep_interval: Duration::from_millis(5),
        lock_timeout: Duration::from_secs(1),
        lock_poll_interval: Duration::from_millis(5),
        ledger_write_retries: 3,
        ledger_retry_delay: Duration::from_millis(5),
        sentinel_repeats: 3,
        sentinel_interval: Duration::from_millis(5),
        sibling_poll_interval: Duration::from_millis(10),
        ..Config::default()
    }
}

fn batch_payload(count: usize) -> String {
    let clients: Vec<serde_json::Value> = (1..=count)
        .map(|i| {
            serde_json::json!({
                "id": i,
                "nome": format!("Pescador {}", i),
                "cpf": format!("000.000.000-{:02}", i),
                "senha": "senha",
                "municipio": "Arame"
            })
        })
        .collect();
    serde_json::json!({ "clients": clients }).to_string()
}

async fn run_instance(config: Config, driver: PageDriver, cases: &[Case]) {
    let flow = Arc::new(CaseFlow::new(Arc::new(driver), &config));
    let mut coordinator = RunCoordinator::new(config, flow, Arc::new(AutoConfirmer)).unwrap();
    coordinator
        .run(cases, &CancellationToken::new())
        .await
        .unwrap();
}

#[tokio::test]
async fn two_instances_fill_a_single_ledger() {
    let dir = tempfile::tempdir().unwrap();
    let cases = parse_inline_task(&batch_payload(5)).unwrap();
    assert_eq!(cases.len(), 5);

    let primary = run_instance(config_in(dir.path(), 1, 2), PageDriver::default(), &cases);
    let secondary = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        run_instance(config_in(dir.path(), 2, 2), PageDriver::default(), &cases).await;
    };
    tokio::join!(primary, secondary);

    let ledger = ProgressLedger::from_config(&config_in(dir.path(), 1, 2)).load();
    assert_eq!(ledger.len(), 5);
    assert!(ledger.values().all(|e| e.status == LedgerStatus::Ok));
    assert_eq!(ledger["00000000002"].instance, 2);
    assert_eq!(ledger["00000000003"].instance, 1);
}

#[tokio::test]
async fn stubborn_month_is_force_accepted_with_note() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path(), 1, 1);
    let cases = parse_inline_task(&batch_payload(1)).unwrap();

    run_instance(
        config.clone(),
        PageDriver::with_stubborn(&[Month::Junho]),
        &cases,
    )
    .await;

    let entry = ProgressLedger::from_config(&config).load()["00000000001"].clone();
    assert_eq!(entry.status, LedgerStatus::Ok);
    assert!(entry.reason.contains("Junho"), "reason: {}", entry.reason);
}

#[tokio::test]
async fn strict_sweep_turns_stubborn_month_into_retry_exhaustion() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path(), 1, 1);
    config.sweep_force_accept = false;
    let cases = parse_inline_task(&batch_payload(1)).unwrap();

    run_instance(
        config.clone(),
        PageDriver::with_stubborn(&[Month::Janeiro]),
        &cases,
    )
    .await;

    let entry = ProgressLedger::from_config(&config).load()["00000000001"].clone();
    assert_eq!(entry.status, LedgerStatus::FailedAfterRetries);
    assert!(entry.reason.starts_with("FALHA APOS 3 TENTATIVAS"));
}

#[tokio::test]
async fn task_file_round_trip_and_csv_export() {
    let dir = tempfile::tempdir().unwrap();
    let task_path = dir.path().join("lote.json");
    std::fs::write(&task_path, batch_payload(3)).unwrap();
    let cases = load_task_file(&task_path).await.unwrap();

    let config = config_in(dir.path(), 1, 1);
    run_instance(config.clone(), PageDriver::default(), &cases).await;

    let csv_path = dir.path().join("base_dados.csv");
    let rows = ProgressLedger::from_config(&config)
        .export_csv(&csv_path)
        .unwrap();
    assert_eq!(rows, 3);
    let text = std::fs::read_to_string(csv_path).unwrap();
    assert_eq!(text.lines().count(), 4);
}

#[tokio::test]
#[ignore] // 默认忽略，需要手动运行：cargo test -- --ignored
async fn test_browser_connection() {
    // 初始化日志
    logging::init();

    // 加载配置
    let config = Config::from_env();

    // 测试浏览器连接
    let result = connect_to_browser_and_page(
        config.instance_debug_port(),
        Some(&config.target_url),
        None,
    )
    .await;

    assert!(result.is_ok(), "应该能够成功连接浏览器");
}
