//! 案件数据模型
//!
//! 一个案件（Item）对应一位渔民的年度申报，内含十二个月份段（Period）。

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};

use crate::ledger::LedgerStatus;

static NON_DIGIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\D").expect("正则表达式无效"));

/// 规范化案件标识（CPF）
///
/// 去掉表格软件遗留的 `.0` 后缀，再移除所有非数字字符。
/// 若结果为空（非数字标识），则退回到去除首尾空白的原文。
pub fn normalize_id(raw: &str) -> String {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_suffix(".0").unwrap_or(trimmed);
    let digits = NON_DIGIT.replace_all(trimmed, "").into_owned();
    if digits.is_empty() {
        trimmed.to_string()
    } else {
        digits
    }
}

/// 月份
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Month {
    Janeiro,
    Fevereiro,
    Marco,
    Abril,
    Maio,
    Junho,
    Julho,
    Agosto,
    Setembro,
    Outubro,
    Novembro,
    Dezembro,
}

impl Month {
    pub const ALL: [Month; 12] = [
        Month::Janeiro,
        Month::Fevereiro,
        Month::Marco,
        Month::Abril,
        Month::Maio,
        Month::Junho,
        Month::Julho,
        Month::Agosto,
        Month::Setembro,
        Month::Outubro,
        Month::Novembro,
        Month::Dezembro,
    ];

    /// 页面上显示的月份名称
    pub fn label(self) -> &'static str {
        match self {
            Month::Janeiro => "Janeiro",
            Month::Fevereiro => "Fevereiro",
            Month::Marco => "Março",
            Month::Abril => "Abril",
            Month::Maio => "Maio",
            Month::Junho => "Junho",
            Month::Julho => "Julho",
            Month::Agosto => "Agosto",
            Month::Setembro => "Setembro",
            Month::Outubro => "Outubro",
            Month::Novembro => "Novembro",
            Month::Dezembro => "Dezembro",
        }
    }

    /// 表单中的索引（informesMensais.{index}）
    pub fn form_index(self) -> usize {
        self as usize
    }

    /// 禁渔期月份：无论是否有数据都必须申报
    pub fn is_closed_season(self) -> bool {
        matches!(
            self,
            Month::Janeiro | Month::Fevereiro | Month::Marco | Month::Dezembro
        )
    }

    /// 宽松匹配月份名称（忽略大小写，接受不带重音的写法）
    pub fn parse(text: &str) -> Option<Month> {
        let lowered = text.trim().to_lowercase().replace('ç', "c");
        Month::ALL.into_iter().find(|m| {
            let label = m.label().to_lowercase().replace('ç', "c");
            lowered.contains(&label)
        })
    }
}

impl fmt::Display for Month {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// 月份段类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodKind {
    /// 禁渔期：申报"未捕捞"，始终需要确认
    ClosedSeason,
    /// 捕捞期：只有存在数据时才需要确认
    Fishing,
}

/// 单月捕捞数据行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodRow {
    #[serde(rename = "MES", deserialize_with = "de_text")]
    pub month: String,
    #[serde(rename = "DIAS", default, deserialize_with = "de_text")]
    pub days: String,
    #[serde(rename = "TIPO_LOCAL", default, deserialize_with = "de_text")]
    pub place_type: String,
    #[serde(rename = "MUNICIPIO", default, deserialize_with = "de_text")]
    pub municipality: String,
    #[serde(rename = "NOME_LOCAL", default, deserialize_with = "de_text")]
    pub place_name: String,
    #[serde(rename = "PETRECHO", default, deserialize_with = "de_text")]
    pub gear: String,
    #[serde(rename = "ESPECIE", default, deserialize_with = "de_text")]
    pub species: String,
    #[serde(rename = "QUANTIDADE", default, deserialize_with = "de_text")]
    pub quantity: String,
    #[serde(rename = "VALOR", default, deserialize_with = "de_text")]
    pub value: String,
}

/// 月份段（SubItem）
///
/// "已确认"状态不保存在这里，每次都通过驱动的校验能力重新询问。
#[derive(Debug, Clone, PartialEq)]
pub struct Period {
    pub month: Month,
    pub kind: PeriodKind,
    pub rows: Vec<PeriodRow>,
}

impl Period {
    /// 该月份是否必须被确认
    pub fn is_expected(&self) -> bool {
        match self.kind {
            PeriodKind::ClosedSeason => true,
            PeriodKind::Fishing => !self.rows.is_empty(),
        }
    }
}

/// 登录凭据
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub login: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("login", &self.login)
            .field("password", &"***")
            .finish()
    }
}

/// 案件（Item）
#[derive(Debug, Clone)]
pub struct Case {
    /// 规范化后的标识，账本主键
    pub id: String,
    /// 显示名称
    pub name: String,
    pub credentials: Credentials,
    pub municipality: String,
    /// 十二个月份段，按月份顺序
    pub periods: Vec<Period>,
    /// 上游系统中的原始记录 ID（原样回传）
    pub external_ref: Option<serde_json::Value>,
    /// 最近一次已知状态，来自账本或结果上报器
    pub status: Option<LedgerStatus>,
}

impl Case {
    /// 由月份数据行构建十二个月份段
    pub fn build_periods(rows: &[PeriodRow]) -> Vec<Period> {
        Month::ALL
            .into_iter()
            .map(|month| Period {
                month,
                kind: if month.is_closed_season() {
                    PeriodKind::ClosedSeason
                } else {
                    PeriodKind::Fishing
                },
                rows: rows
                    .iter()
                    .filter(|row| Month::parse(&row.month) == Some(month))
                    .cloned()
                    .collect(),
            })
            .collect()
    }

    /// 需要确认的月份段
    pub fn expected_periods(&self) -> impl Iterator<Item = &Period> {
        self.periods.iter().filter(|p| p.is_expected())
    }

    /// 日志用的简短名称
    pub fn short_name(&self) -> String {
        crate::utils::logging::truncate_text(&self.name, 30)
    }
}

/// 生成默认的十二个月数据
///
/// 禁渔期申报 30 天、无渔获；捕捞期 20 天、固定渔获。
pub fn default_period_rows(municipality: &str) -> Vec<PeriodRow> {
    Month::ALL
        .into_iter()
        .map(|month| {
            let closed = month.is_closed_season();
            PeriodRow {
                month: month.label().to_string(),
                days: if closed { "30" } else { "20" }.to_string(),
                place_type: "Rio".to_string(),
                municipality: municipality.to_string(),
                place_name: "Rio principal".to_string(),
                gear: "Linha".to_string(),
                species: "Peixe".to_string(),
                quantity: if closed { "0" } else { "50" }.to_string(),
                value: if closed { "0" } else { "500" }.to_string(),
            }
        })
        .collect()
}

/// 将数字或字符串统一为文本；整数形式的浮点数去掉小数部分
fn de_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(value_to_text(&value))
}

pub(crate) fn value_to_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.trim().to_string(),
        serde_json::Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 => format!("{}", f as i64),
            Some(f) => f.to_string().replace('.', ","),
            None => n.to_string(),
        },
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalize_id_strips_punctuation_and_float_suffix() {
        assert_eq!(normalize_id("123.456.789-09"), "12345678909");
        assert_eq!(normalize_id(" 12345678909.0 "), "12345678909");
        assert_eq!(normalize_id("abc"), "abc");
    }

    #[test]
    fn month_parse_accepts_accentless_names() {
        assert_eq!(Month::parse("MARCO"), Some(Month::Marco));
        assert_eq!(Month::parse("março"), Some(Month::Marco));
        assert_eq!(Month::parse("Julho"), Some(Month::Julho));
        assert_eq!(Month::parse("13º"), None);
    }

    #[test]
    fn fishing_period_without_rows_is_not_expected() {
        let rows = vec![serde_json::from_value::<PeriodRow>(json!({
            "MES": "Abril", "DIAS": 12, "VALOR": 6.5
        }))
        .unwrap()];
        let periods = Case::build_periods(&rows);
        assert_eq!(periods.len(), 12);

        let april = &periods[Month::Abril.form_index()];
        assert!(april.is_expected());
        assert_eq!(april.rows[0].days, "12");
        assert_eq!(april.rows[0].value, "6,5");

        let may = &periods[Month::Maio.form_index()];
        assert!(!may.is_expected());

        let january = &periods[Month::Janeiro.form_index()];
        assert_eq!(january.kind, PeriodKind::ClosedSeason);
        assert!(january.is_expected());
    }

    #[test]
    fn default_rows_cover_every_month() {
        let rows = default_period_rows("Buriticupu");
        let periods = Case::build_periods(&rows);
        assert!(periods.iter().all(|p| p.is_expected()));
        assert_eq!(rows[0].quantity, "0");
        assert_eq!(rows[Month::Maio.form_index()].quantity, "50");
    }

    #[test]
    fn credentials_debug_hides_password() {
        let creds = Credentials {
            login: "123".into(),
            password: "segredo".into(),
        };
        assert!(!format!("{:?}", creds).contains("segredo"));
    }
}
