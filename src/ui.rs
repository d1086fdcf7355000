//! Interface de terminal do locflow: barra de progresso e saída colorida.
//!
//! Usa `indicatif` para a barra do lote e `console` para cores. O
//! [`BatchProgress`] recebe os eventos do dispatcher via [`BatchObserver`].

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::engine::{BatchObserver, BatchPhase, BatchSummary, Outcome, WorkItem};

const BAR_TEMPLATE: &str =
    "{spinner:.cyan} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}";

/// Progresso visual de um lote no terminal.
///
/// Retentativas aparecem em amarelo, falhas em vermelho; a mensagem da barra
/// mostra a fase do lote e o número atual de workers e de falhas.
pub struct BatchProgress {
    pb: ProgressBar,
    phase: Mutex<BatchPhase>,
    workers: AtomicUsize,
    failed: AtomicUsize,
    quiet_retries: bool,
    red: Style,
    yellow: Style,
}

impl BatchProgress {
    /// Cria a barra; `quiet_retries` oculta as linhas de retentativa.
    pub fn new(workers: usize, quiet_retries: bool) -> Self {
        let pb = ProgressBar::new(0);
        pb.set_style(
            ProgressStyle::with_template(BAR_TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        pb.enable_steady_tick(Duration::from_millis(120));

        let progress = Self {
            pb,
            phase: Mutex::new(BatchPhase::Loading),
            workers: AtomicUsize::new(workers),
            failed: AtomicUsize::new(0),
            quiet_retries,
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        };
        progress.refresh_message();
        progress
    }

    /// Encerra a barra sem deixar rastro no terminal.
    pub fn finish(&self) {
        self.pb.finish_and_clear();
    }

    fn refresh_message(&self) {
        let phase = *self.phase.lock().unwrap_or_else(|p| p.into_inner());
        self.pb.set_message(format!(
            "{phase} workers={} failed={}",
            self.workers.load(Ordering::Relaxed),
            self.failed.load(Ordering::Relaxed)
        ));
    }
}

impl BatchObserver for BatchProgress {
    fn started(&self, pending: usize, _skipped: usize) {
        self.pb.set_length(pending as u64);
    }

    fn item_done(&self, _item: &WorkItem) {
        self.pb.inc(1);
    }

    fn item_retrying(&self, item: &WorkItem, reason: &Outcome, delay: Duration) {
        if self.quiet_retries {
            return;
        }
        self.pb.println(format!(
            "  {} {} retry {} in {:.1}s: {reason}",
            self.yellow.apply_to("↻"),
            item.id,
            item.attempts,
            delay.as_secs_f64()
        ));
    }

    fn item_failed(&self, item: &WorkItem, reason: &str) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.pb.inc(1);
        self.pb
            .println(format!("  {} {}: {reason}", self.red.apply_to("✗"), item.id));
        self.refresh_message();
    }

    fn workers_changed(&self, workers: usize) {
        self.workers.store(workers, Ordering::Relaxed);
        self.refresh_message();
    }

    fn phase_changed(&self, phase: BatchPhase) {
        *self.phase.lock().unwrap_or_else(|p| p.into_inner()) = phase;
        self.refresh_message();
    }
}

/// Imprime o resumo final do lote, incluindo os ids que falharam.
pub fn print_summary(summary: &BatchSummary) {
    let green = Style::new().green().bold();
    let red = Style::new().red().bold();
    let yellow = Style::new().yellow();
    let dim = Style::new().dim();

    println!();
    if summary.is_complete() {
        println!("{} Batch complete", green.apply_to("✓"));
    } else if summary.failed.is_empty() {
        println!("{} Batch stopped", yellow.apply_to("■"));
    } else {
        println!("{} Batch finished with failures", red.apply_to("✗"));
    }
    println!(
        "  total {}  done {}  skipped {}  failed {}  not started {}",
        summary.total,
        summary.done,
        summary.skipped,
        summary.failed_count(),
        summary.not_started
    );
    println!(
        "  {} workers at end, {:.1}s",
        summary.final_workers,
        summary.elapsed().as_secs_f64()
    );
    println!("  {}", dim.apply_to(format!("run {}", summary.run_id)));

    for failed in &summary.failed {
        println!(
            "  {} {} ({} attempts): {}",
            red.apply_to("✗"),
            failed.item_id,
            failed.attempts,
            failed.reason
        );
    }
}

/// Contagens mostradas pelo comando `status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusCounts {
    pub records: usize,
    pub pre_translated: usize,
    pub done: usize,
    pub pending: usize,
}

pub fn print_status(counts: &StatusCounts) {
    let green = Style::new().green().bold();
    let yellow = Style::new().yellow();
    println!("{}", green.apply_to("─── Status ───"));
    println!("  {:<18}{}", "records", counts.records);
    println!("  {:<18}{}", "pre-translated", counts.pre_translated);
    println!("  {:<18}{}", "done (checkpoint)", counts.done);
    println!("  {:<18}{}", "pending", yellow.apply_to(counts.pending));
}
