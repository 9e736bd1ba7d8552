//! 浏览器驱动
//!
//! 基于 chromiumoxide 的 [`WorkflowDriver`] 实现。所有 DOM 操作都通过
//! [`JsExecutor`] 注入脚本完成，参数以 JSON 形式传入脚本。

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Datelike;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::error::{FailureKind, ItemFailure};
use crate::infrastructure::JsExecutor;
use crate::models::{Case, Month, Period, PeriodKind};
use crate::workflow::artifacts::{receipt_file_name, ReceiptLocator};
use crate::workflow::driver::{CredentialOutcome, Receipt, StepId, StepOutcome, WorkflowDriver};

const LOGIN_TIMEOUT: Duration = Duration::from_secs(180);

/// 所有脚本共用的辅助函数
const HELPERS: &str = r#"
const sleep = (ms) => new Promise((r) => setTimeout(r, ms));
const visible = (el) => !!el && el.offsetParent !== null;
const setValue = (el, v) => {
  const setter = Object.getOwnPropertyDescriptor(HTMLInputElement.prototype, 'value').set;
  setter.call(el, v);
  el.dispatchEvent(new Event('input', { bubbles: true }));
  el.dispatchEvent(new Event('change', { bubbles: true }));
};
const byName = (n) => document.querySelector(`input[name='${n}']`);
const buttons = () => [...document.querySelectorAll('button')];
const clickButton = (pred) => {
  const b = buttons().find((x) => visible(x) && pred(x));
  if (b) { b.click(); return true; }
  return false;
};
const fillDropdown = async (input, typed, option) => {
  if (!input) return false;
  input.focus();
  setValue(input, typed);
  await sleep(600);
  const wanted = String(option).toUpperCase();
  const opts = [...document.querySelectorAll("[role='option'], li, .br-item")];
  const hit = opts.find((o) => visible(o) && o.textContent.trim().toUpperCase().includes(wanted));
  if (hit) { hit.click(); await sleep(200); return true; }
  input.dispatchEvent(new KeyboardEvent('keydown', { key: 'Enter', bubbles: true }));
  return false;
};
const monthButton = (label) => buttons().find((b) => b.textContent.includes(label));
const advance = () => {
  const next = document.querySelector("button[data-action='avancar']");
  if (next) { next.click(); return true; }
  return false;
};
"#;

const LOGIN_STATE: &str = r#"
const url = location.href.toLowerCase();
const text = document.body ? document.body.innerText.toUpperCase() : '';
if (url.includes('comprovante') || url.includes('manutencao-reap/visualizar')) return 'submitted';
if (text.includes('SENHA INVÁLID') || text.includes('SENHA INCORRETA') || text.includes('USUÁRIO E/OU SENHA')) return 'rejected';
if (text.includes('NÍVEL DA CONTA') || text.includes('NÃO AUTORIZADO')) return 'nivel';
if (text.includes('CÓDIGO DE ACESSO') || text.includes('VERIFICAÇÃO EM DUAS ETAPAS')) return '2fa';
if (url.includes('pesqbrasil') && document.querySelector(".card-home-menu, button[aria-label='editar'], button[step-num]")) return 'ready';
return 'waiting';
"#;

const START_LOGIN: &str = r#"
localStorage.clear();
sessionStorage.clear();
clickButton((b) => b.textContent.includes('Entrar com'));
await sleep(3000);
const account = document.querySelector('#accountId');
if (account) {
  setValue(account, ARGS.login);
  clickButton((b) => b.id === 'enter-account-id' || b.textContent.includes('Continuar'));
  await sleep(2000);
}
const password = document.querySelector('#password');
if (password) {
  setValue(password, ARGS.password);
  clickButton((b) => b.id === 'submit-button' || b.textContent.trim() === 'Entrar');
}
return true;
"#;

const OPEN_DECLARATION: &str = r#"
clickButton((b) => b.textContent.includes('Entendi'));
await sleep(2000);
if (!location.href.includes('manutencao-reap')) {
  const card = [...document.querySelectorAll('div.card-home-menu')].find((d) => d.textContent.includes('Manutenção anual'));
  if (card) { card.click(); await sleep(2000); }
}
for (let t = 0; t < 10; t++) {
  const edit = document.querySelector("button[aria-label='editar']");
  if (edit) { edit.click(); await sleep(5000); return 'editing'; }
  await sleep(1000);
}
if (document.querySelector("button[aria-label='visualizar_2a_via']")) return 'submitted';
return 'unknown';
"#;

const FILL_LOCATION: &str = r#"
document.body.style.zoom = '0.6';
if (document.getElementsByName('uf').length === 0) return 'absent';
await fillDropdown(byName('uf'), 'MARANHAO', 'MARANHAO');
await fillDropdown(byName('municipio'), ARGS.municipality, ARGS.municipality);
await fillDropdown(byName('categoria'), 'Artesanal', 'Artesanal');
await fillDropdown(byName('embarcado'), 'Desembarcado', 'Desembarcado');
advance();
await sleep(3000);
return 'performed';
"#;

const FILL_COMMERCIALIZATION: &str = r#"
document.body.style.zoom = '0.6';
if (document.getElementsByName('prestacaoServico').length === 0
    && document.querySelector("button[step-num='1'][data-alert='success']")) {
  const step2 = document.querySelector("button[step-num='2']");
  if (step2) { step2.click(); await sleep(2000); }
}
if (document.getElementsByName('prestacaoServico').length === 0) return 'absent';
await fillDropdown(byName('prestacaoServico'), 'Individual', 'Individual/Autônomo');
await fillDropdown(byName('estadosComercializacao'), 'MARANHAO', 'MARANHAO');
const pick = (group, index) => {
  const opt = [...document.querySelectorAll(`input[name='${group}']`)][index];
  if (opt && !opt.checked) opt.click();
};
pick('gruposAlvo', 3);
pick('compradoresPescado', 5);
advance();
await sleep(3000);
return 'performed';
"#;

const FILL_MONTH: &str = r#"
let btn = null;
for (let t = 0; t < 15 && !btn; t++) {
  btn = monthButton(ARGS.label);
  if (!btn) await sleep(1000);
}
if (!btn) return 'absent';
btn.scrollIntoView({ block: 'center' });
await sleep(100);
const prefix = `informesMensais.${ARGS.index}`;
if (btn.classList.contains('collapsed')) { btn.click(); await sleep(300); }
if (!document.querySelector(`input[name='${prefix}.houvePesca']`)) { btn.click(); await sleep(1000); }
if (ARGS.closed) {
  const no = document.querySelector(`input[name='${prefix}.houvePesca'][value='false']`);
  if (no) no.click();
  const why = document.querySelector(`input[name='${prefix}.justificativasNaoDeclaracao'][value='1']`);
  if (why && !why.checked) why.click();
} else {
  const yes = document.querySelector(`input[name='${prefix}.houvePesca'][value='true']`);
  if (yes) yes.click();
  await sleep(100);
  const first = ARGS.rows[0];
  const days = byName(`${prefix}.diasTrabalhados`);
  if (days) setValue(days, first.days);
  const panel = btn.parentElement ? btn.parentElement.nextElementSibling : null;
  if (panel) {
    const inputs = [...panel.querySelectorAll("input[type='text']")].filter((i) =>
      visible(i) && !i.name.includes('diasTrabalhados') && !(i.placeholder || '').includes('espécie'));
    if (inputs.length >= 5) {
      await fillDropdown(inputs[0], first.place_type, first.place_type);
      await fillDropdown(inputs[1], 'MARANHAO', 'MARANHAO');
      await fillDropdown(inputs[2], first.municipality, first.municipality);
      setValue(inputs[3], first.place_name);
      await fillDropdown(inputs[4], first.gear, first.gear);
    }
  }
  const visibleBy = (ph) => [...document.querySelectorAll(`input[placeholder='${ph}']`)].filter(visible);
  for (let i = 0; i < ARGS.rows.length; i++) {
    const row = ARGS.rows[i];
    if (i >= visibleBy('Digite o nome da espécie').length) {
      clickButton((b) => b.textContent.includes('Adicionar nova espécie'));
      await sleep(200);
    }
    const names = visibleBy('Digite o nome da espécie');
    const qty = visibleBy('Informe a quantidade');
    const val = visibleBy('Informe o valor');
    if (i < names.length) {
      await fillDropdown(names[i], row.species, row.species);
      if (qty[i]) setValue(qty[i], row.quantity);
      if (val[i]) setValue(val[i], row.value);
    }
  }
}
if (!btn.classList.contains('collapsed')) { btn.click(); await sleep(200); }
return 'performed';
"#;

const SUBMITTED_URL: &str =
    "location.href.toLowerCase().includes('visualizar') || location.href.toLowerCase().includes('comprovante')";

const MONTH_CONFIRMED: &str = r#"
for (const b of buttons()) {
  if (b.textContent.includes(ARGS.label)) {
    if (b.querySelector('.accordion-icon-approved') || b.classList.contains('accordion-icon-approved')) return true;
  }
}
return false;
"#;

const ADVANCE_MONTHLY: &str = r#"
window.scrollTo(0, document.body.scrollHeight);
await sleep(500);
if (!advance()) return 'absent';
await sleep(3000);
return 'performed';
"#;

const SUBMIT_DECLARATION: &str = r#"
const chk = document.querySelector("input[name='concordaComDeclaracaoResponsabilidade']");
if (!chk) return 'missing';
chk.scrollIntoView({ block: 'center' });
await sleep(1000);
const label = chk.id ? document.querySelector(`label[for='${chk.id}']`) : null;
if (label) label.click();
if (!chk.checked) {
  chk.checked = true;
  chk.dispatchEvent(new Event('change', { bubbles: true }));
}
await sleep(2000);
let send = null;
for (let t = 0; t < 10 && !send; t++) {
  send = buttons().find((b) => visible(b) && !b.disabled
    && (b.textContent.includes('Enviar') || b.dataset.action === 'enviar' || b.textContent.includes('Concluir')));
  if (!send) await sleep(1000);
}
if (!send) return 'no-button';
send.scrollIntoView({ block: 'center' });
await sleep(1000);
send.click();
for (let t = 0; t < 15; t++) {
  const yes = buttons().find((b) => visible(b) && b.className.includes('primary')
    && (b.textContent.includes('Sim') || b.textContent.includes('Confirmar')));
  if (yes) { await sleep(800); yes.click(); await sleep(2000); return 'confirmed'; }
  await sleep(1000);
}
return 'no-modal';
"#;

const REQUEST_RECEIPT: &str = r#"
const text = (sel) => { const el = document.querySelector(sel); return el ? el.textContent.trim() : null; };
const info = { name: text('td.nomeCompleto'), year: text('td.anoReferencia'), clicked: false };
let btn = null;
for (let t = 0; t < 20 && !btn; t++) {
  btn = buttons().find((b) => visible(b) && (b.textContent.includes('PDF')
    || b.getAttribute('aria-label') === 'visualizar_2a_via' || b.className.includes('pdf')));
  if (!btn) await sleep(1000);
}
if (btn) {
  btn.scrollIntoView({ block: 'center' });
  await sleep(1000);
  btn.click();
  info.clicked = true;
} else {
  const link = [...document.querySelectorAll('a')].find((a) =>
    (a.href || '').toLowerCase().includes('pdf') || (a.textContent || '').toLowerCase().includes('comprovante'));
  if (link) { link.click(); info.clicked = true; }
}
return info;
"#;

#[derive(Debug, Deserialize)]
struct ReceiptInfo {
    name: Option<String>,
    year: Option<String>,
    clicked: bool,
}

/// 申报表单的浏览器驱动
pub struct ReapBrowserDriver {
    executor: JsExecutor,
    target_url: String,
    locator: ReceiptLocator,
    instance: usize,
    login_timeout: Duration,
    submit_clicked: AtomicBool,
}

impl ReapBrowserDriver {
    pub fn new(
        executor: JsExecutor,
        target_url: impl Into<String>,
        locator: ReceiptLocator,
        instance: usize,
    ) -> Self {
        Self {
            executor,
            target_url: target_url.into(),
            locator,
            instance,
            login_timeout: LOGIN_TIMEOUT,
            submit_clicked: AtomicBool::new(false),
        }
    }

    async fn run(&self, body: &str, args: Value) -> Result<Value, ItemFailure> {
        Ok(self.executor.eval(script(body, &args)).await?)
    }

    async fn run_text(&self, body: &str, args: Value) -> Result<String, ItemFailure> {
        Ok(self
            .run(body, args)
            .await?
            .as_str()
            .unwrap_or_default()
            .to_string())
    }

    async fn wait_login_state(&self) -> Result<String, ItemFailure> {
        let deadline = Instant::now() + self.login_timeout;
        loop {
            let state = self.run_text(LOGIN_STATE, json!({})).await?;
            if state != "waiting" {
                return Ok(state);
            }
            if Instant::now() >= deadline {
                return Err(ItemFailure::driver("tempo de login esgotado"));
            }
            sleep(Duration::from_secs(1)).await;
        }
    }

    async fn fill_month(&self, month: Month, case: &Case) -> Result<StepOutcome, ItemFailure> {
        let period = case.periods.iter().find(|p| p.month == month);
        let args = month_args(month, period);
        match self.run_text(FILL_MONTH, args).await?.as_str() {
            "performed" => Ok(StepOutcome::Performed),
            _ => Err(ItemFailure::driver(format!("botão do mês {} não encontrado", month))),
        }
    }

    async fn submit(&self) -> Result<StepOutcome, ItemFailure> {
        self.submit_clicked.store(false, Ordering::SeqCst);
        match self.run_text(SUBMIT_DECLARATION, json!({})).await?.as_str() {
            "confirmed" => {
                self.submit_clicked.store(true, Ordering::SeqCst);
                Ok(StepOutcome::Performed)
            }
            "missing" => Err(ItemFailure::new(
                FailureKind::SubmissionFailed,
                "declaração de responsabilidade não encontrada",
            )),
            "no-button" => Err(ItemFailure::new(
                FailureKind::SubmissionFailed,
                "botão Enviar não encontrado",
            )),
            other => Err(ItemFailure::new(
                FailureKind::SubmissionFailed,
                format!("confirmação não apareceu ({})", other),
            )),
        }
    }

    async fn submission_visible(&self) -> Result<bool, ItemFailure> {
        let visible = self
            .executor
            .wait_until(SUBMITTED_URL, Duration::from_secs(5), Duration::from_secs(1))
            .await?;
        if visible {
            return Ok(true);
        }
        // 点击了"Sim"但 URL 未变化时按已提交处理
        let clicked = self.submit_clicked.load(Ordering::SeqCst);
        if clicked {
            warn!("[实例 {}] URL 未变化，但已点击确认，按已提交处理", self.instance);
        }
        Ok(clicked)
    }
}

/// 包装脚本：辅助函数 + 参数 + 主体，整体作为异步函数执行
fn script(body: &str, args: &Value) -> String {
    format!(
        "(async () => {{\n{}\nconst ARGS = {};\n{}\n}})()",
        HELPERS, args, body
    )
}

fn month_args(month: Month, period: Option<&Period>) -> Value {
    let closed = period.map_or(month.is_closed_season(), |p| {
        p.kind == PeriodKind::ClosedSeason
    });
    let rows: Vec<Value> = period
        .map(|p| {
            p.rows
                .iter()
                .map(|r| {
                    json!({
                        "days": r.days,
                        "place_type": r.place_type,
                        "municipality": r.municipality,
                        "place_name": r.place_name,
                        "gear": r.gear,
                        "species": r.species,
                        "quantity": r.quantity,
                        "value": r.value,
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    json!({
        "label": month.label(),
        "index": month.form_index(),
        "closed": closed,
        "rows": rows,
    })
}

fn page_outcome(result: &str) -> StepOutcome {
    if result == "absent" {
        StepOutcome::NotApplicable
    } else {
        StepOutcome::Performed
    }
}

#[async_trait]
impl WorkflowDriver for ReapBrowserDriver {
    async fn login(&self, case: &Case) -> Result<CredentialOutcome, ItemFailure> {
        info!("[实例 {}] 🌐 打开登录页", self.instance);
        self.executor.goto(&self.target_url).await?;
        sleep(Duration::from_secs(1)).await;
        self.run(
            START_LOGIN,
            json!({
                "login": case.credentials.login,
                "password": case.credentials.password,
            }),
        )
        .await?;

        let state = self.wait_login_state().await?;
        debug!("[实例 {}] 登录状态: {}", self.instance, state);
        match state.as_str() {
            "submitted" => return Ok(CredentialOutcome::AlreadySubmitted),
            "rejected" => return Ok(CredentialOutcome::Rejected("LOGIN/SENHA".to_string())),
            "nivel" => return Ok(CredentialOutcome::Pending("NIVEL".to_string())),
            "2fa" => return Ok(CredentialOutcome::Pending("2FA".to_string())),
            _ => {}
        }

        match self.run_text(OPEN_DECLARATION, json!({})).await?.as_str() {
            "editing" => Ok(CredentialOutcome::Ready),
            "submitted" => Ok(CredentialOutcome::AlreadySubmitted),
            _ => Err(ItemFailure::driver("botão editar não encontrado")),
        }
    }

    async fn perform_step(&self, step: StepId, case: &Case) -> Result<StepOutcome, ItemFailure> {
        debug!("[实例 {}] 执行 {}", self.instance, step);
        match step {
            StepId::Location => {
                let args = json!({ "municipality": case.municipality });
                Ok(page_outcome(&self.run_text(FILL_LOCATION, args).await?))
            }
            StepId::Commercialization => Ok(page_outcome(
                &self.run_text(FILL_COMMERCIALIZATION, json!({})).await?,
            )),
            StepId::Month(month) => self.fill_month(month, case).await,
            StepId::Monthly => Ok(page_outcome(
                &self.run_text(ADVANCE_MONTHLY, json!({})).await?,
            )),
            StepId::Declaration => self.submit().await,
        }
    }

    async fn is_step_confirmed(&self, step: StepId) -> Result<bool, ItemFailure> {
        match step {
            StepId::Month(month) => {
                let args = json!({ "label": month.label() });
                Ok(self.run(MONTH_CONFIRMED, args).await?.as_bool().unwrap_or(false))
            }
            StepId::Declaration => self.submission_visible().await,
            page => {
                let number = page.step_number().unwrap_or_default();
                let script = format!(
                    "!!document.querySelector(\"button[step-num='{}'][data-alert='success']\")",
                    number
                );
                Ok(self.executor.eval_bool(script).await?)
            }
        }
    }

    async fn fetch_receipt(&self, case: &Case) -> Result<Option<Receipt>, ItemFailure> {
        sleep(Duration::from_millis(1500)).await;
        let before = self.locator.snapshot();
        let info: ReceiptInfo = self
            .executor
            .eval_as(script(REQUEST_RECEIPT, &json!({})))
            .await?;
        if !info.clicked {
            return Ok(None);
        }

        let year = info
            .year
            .filter(|y| !y.is_empty())
            .unwrap_or_else(|| chrono::Local::now().year().to_string());
        let name = info
            .name
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| case.name.clone());
        let target = receipt_file_name(&name, &year);

        let path = self.locator.locate(&target, &before).await?;
        Ok(path.map(|path| Receipt {
            path,
            reference_year: Some(year),
        }))
    }
}
