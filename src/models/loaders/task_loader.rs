use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use tokio::fs;
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::models::case::{
    default_period_rows, normalize_id, value_to_text, Case, Credentials, PeriodRow,
};

const DEFAULT_MUNICIPALITY: &str = "Buriticupu";

/// 批量任务载荷
#[derive(Debug, Deserialize)]
pub struct TaskPayload {
    #[serde(default)]
    pub clients: Vec<ClientRecord>,
}

/// 载荷中的单个客户记录，兼容上游系统的多种字段名
#[derive(Debug, Deserialize)]
pub struct ClientRecord {
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    #[serde(default, alias = "nome_completo", alias = "name")]
    pub nome: Option<String>,
    #[serde(default, alias = "cpf_cnpj")]
    pub cpf: Option<serde_json::Value>,
    #[serde(default, alias = "senha_gov")]
    pub senha: Option<String>,
    #[serde(default)]
    pub municipio: Option<String>,
    #[serde(default)]
    pub fishing_data: Vec<PeriodRow>,
}

impl ClientRecord {
    /// 转换为案件，缺少标识时返回 None
    pub fn into_case(self) -> Option<Case> {
        let raw_id = self
            .cpf
            .as_ref()
            .or(self.id.as_ref())
            .map(value_to_text)
            .filter(|s| !s.is_empty())?;
        let id = normalize_id(&raw_id);
        let name = self
            .nome
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| "PESCADOR".to_string());
        let municipality = self
            .municipio
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_MUNICIPALITY.to_string());

        let rows = if self.fishing_data.is_empty() {
            default_period_rows(&municipality)
        } else {
            self.fishing_data
        };

        Some(Case {
            credentials: Credentials {
                login: id.clone(),
                password: self.senha.unwrap_or_default(),
            },
            periods: Case::build_periods(&rows),
            id,
            name,
            municipality,
            external_ref: self.id,
            status: None,
        })
    }
}

/// 解析内联任务：以 `{` 开头按 JSON 处理，否则先做 base64 解码
pub fn parse_inline_task(text: &str) -> AppResult<Vec<Case>> {
    let trimmed = text.trim();
    let json = if trimmed.starts_with('{') {
        trimmed.to_string()
    } else {
        let bytes = STANDARD
            .decode(trimmed)
            .map_err(|e| AppError::Task(format!("base64 解码失败: {}", e)))?;
        String::from_utf8(bytes).map_err(|e| AppError::Task(format!("任务不是 UTF-8 文本: {}", e)))?
    };

    let payload: TaskPayload = serde_json::from_str(&json)?;
    Ok(payload_into_cases(payload))
}

/// 从文件加载任务（.toml 或 .json）
pub async fn load_task_file(path: &Path) -> AppResult<Vec<Case>> {
    let content = fs::read_to_string(path)
        .await
        .map_err(|e| AppError::file(path, e))?;

    let payload: TaskPayload = match path.extension().and_then(|s| s.to_str()) {
        Some("toml") => toml::from_str(&content)?,
        _ => serde_json::from_str(&content)?,
    };

    info!(
        "正在加载任务文件: {}",
        path.file_name().unwrap_or_default().to_string_lossy()
    );
    Ok(payload_into_cases(payload))
}

fn payload_into_cases(payload: TaskPayload) -> Vec<Case> {
    let total = payload.clients.len();
    let cases: Vec<Case> = payload
        .clients
        .into_iter()
        .enumerate()
        .filter_map(|(idx, record)| {
            let case = record.into_case();
            if case.is_none() {
                warn!("跳过第 {} 条记录：缺少 CPF/ID", idx + 1);
            }
            case
        })
        .collect();
    info!("✓ 任务共 {} 条记录，有效案件 {} 个", total, cases.len());
    cases
}
