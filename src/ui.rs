//! Interface de terminal do cjr: spinners e saída colorida.
//!
//! Usa as crates `indicatif` para o spinner exibido enquanto um status é
//! gravado e `console` para estilização com cores. O [`TaskProgress`]
//! acompanha visualmente a gravação de um status no terminal.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::error::RecorderError;
use crate::recorder::ProgressSink;
use crate::report::TaskReport;
use crate::state_machine::{TaskKey, TaskRecord, TaskStatus};

/// Indicador visual de progresso para a gravação de um status no terminal.
///
/// O spinner cobre a espera pelo lock do banco; o resultado aparece em
/// verde no sucesso e em vermelho na falha.
pub struct TaskProgress {
    // Spinner do indicatif, presente apenas durante a gravação.
    pb: Option<ProgressBar>,
    // Estilo verde para mensagens de sucesso.
    green: Style,
    // Estilo vermelho para mensagens de falha.
    red: Style,
}

impl TaskProgress {
    pub fn new() -> Self {
        Self {
            pb: None,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
        }
    }

    fn finish_spinner(&mut self) {
        if let Some(pb) = self.pb.take() {
            pb.finish_and_clear();
        }
    }
}

impl Default for TaskProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for TaskProgress {
    fn begin(&mut self, status: TaskStatus, key: &TaskKey) {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            pb.set_style(style);
        }
        pb.set_message(format!("{status}: {key}"));
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        self.pb = Some(pb);
    }

    fn succeeded(&mut self, status: TaskStatus, task: &TaskRecord) {
        self.finish_spinner();
        let detail = match status {
            TaskStatus::Start => "started".to_string(),
            TaskStatus::Update => format!("updated ({} updates logged)", task.updates.len()),
            TaskStatus::Finish => "finished".to_string(),
        };
        println!("  {} Task {} {detail}", self.green.apply_to("✓"), task.key);
    }

    /// Só marca a falha; a mensagem de erro é impressa uma vez pelo chamador.
    fn failed(&mut self, status: TaskStatus, key: &TaskKey, _err: &RecorderError) {
        self.finish_spinner();
        eprintln!("  {} {}", self.red.apply_to("✗"), failure_line(status, key));
    }
}

fn failure_line(status: TaskStatus, key: &TaskKey) -> String {
    format!("{status} {key} failed")
}

/// Imprime os nomes dos jobs como lista numerada.
pub fn print_job_names(names: &[String]) {
    for (i, name) in names.iter().enumerate() {
        println!("{i}: {name}");
    }
}

pub fn print_versions(versions: &[i64]) {
    for version in versions {
        println!("{version}");
    }
}

/// Imprime cada relatório em JSON formatado sob um cabeçalho colorido.
///
/// Tasks concluídas recebem cabeçalho verde; as abertas, amarelo.
pub fn print_reports(reports: &[TaskReport]) {
    let green = Style::new().green().bold();
    let yellow = Style::new().yellow().bold();
    for report in reports {
        let style = if report.completed { &green } else { &yellow };
        println!(
            "{}",
            style.apply_to(format!(
                "─── {} - {} v{} ───",
                report.job_name, report.task_id, report.version
            ))
        );
        println!(
            "{}",
            serde_json::to_string_pretty(report).unwrap_or_default()
        );
    }
}

pub fn print_not_found(what: &str) {
    println!("{} {what} not found", Style::new().yellow().apply_to("∅"));
}

/// Imprime uma falha de nível superior, com a cadeia de causas, no stderr.
pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {err:#}", Style::new().red().bold().apply_to("✗"));
}
