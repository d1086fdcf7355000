//! Command handlers: wire configuration, source, engine, sink and UI together.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use console::Style;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::cli::{Cli, Command};
use crate::config::LocflowConfig;
use crate::engine::{
    BatchObserver, BatchSummary, CheckpointStore, Dispatcher, RateMonitor, WorkerPool,
};
use crate::llm::ChatClient;
use crate::sink::{JsonlSink, export_merged};
use crate::source::JsonlSource;
use crate::translator::LlmTranslator;
use crate::ui::{self, BatchProgress, StatusCounts};

/// Exit code used when the batch was stopped by Ctrl-C.
const EXIT_INTERRUPTED: u8 = 130;

pub async fn run(cli: Cli) -> Result<ExitCode> {
    let config = LocflowConfig::load(cli.config.as_deref(), &cli.overrides())?;

    match &cli.command {
        Command::Translate { input, output } => {
            let output = output.clone().unwrap_or_else(|| default_output(input));
            translate(&config, input, &output, cli.verbose).await
        }
        Command::Status { input } => {
            let counts = status_counts(&config, input)?;
            ui::print_status(&counts);
            Ok(ExitCode::SUCCESS)
        }
        Command::Export { input, output } => {
            export(&config, input, output)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Check => check(&config),
    }
}

/// `lines.jsonl` → `lines.results.jsonl`.
pub fn default_output(input: &Path) -> PathBuf {
    input.with_extension("results.jsonl")
}

async fn translate(config: &LocflowConfig, input: &Path, output: &Path, verbose: bool) -> Result<ExitCode> {
    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing in-flight calls");
            let _ = stop_tx.send(true);
        }
    });

    let progress = BatchProgress::new(config.pool.initial_workers, !verbose);
    let result = run_batch(config, input, output, &progress, stop_rx).await;
    progress.finish();
    let summary = result?;

    ui::print_summary(&summary);
    let summary_path = config.checkpoint.path_for(input).with_extension("summary.json");
    if let Err(e) = std::fs::write(&summary_path, serde_json::to_string_pretty(&summary)?) {
        warn!(path = %summary_path.display(), error = %e, "could not write run summary");
    }

    Ok(if !summary.failed.is_empty() {
        ExitCode::FAILURE
    } else if summary.not_started > 0 {
        ExitCode::from(EXIT_INTERRUPTED)
    } else {
        ExitCode::SUCCESS
    })
}

/// Translate every pending line of `input`, appending results to `output`.
pub async fn run_batch<O: BatchObserver>(
    config: &LocflowConfig,
    input: &Path,
    output: &Path,
    observer: &O,
    stop: watch::Receiver<bool>,
) -> Result<BatchSummary> {
    config.validate()?;
    let api_key = config.require_api_key()?.to_string();

    let source = JsonlSource::open(input)
        .with_context(|| format!("failed to read work source {}", input.display()))?;
    let items = source.items(config.llm.context_window);
    info!(
        records = source.len(),
        pre_translated = source.translated_count(),
        enumerated = items.len(),
        "work source loaded"
    );

    let checkpoint_path = config.checkpoint.path_for(input);
    let checkpoint = Arc::new(CheckpointStore::open(
        &checkpoint_path,
        config.checkpoint.flush_every,
    )?);
    let mut sink = JsonlSink::open(output)?;

    let client = ChatClient::new(api_key, &config.llm.resolved_base_url(), config.pool.call_timeout())?;
    info!(
        provider = %config.llm.provider,
        endpoint = client.endpoint(),
        checkpoint = %checkpoint_path.display(),
        "client ready"
    );
    let translator = Arc::new(LlmTranslator::new(client, &config.llm));
    info!(model = translator.model(), "translator ready");

    let pool = Arc::new(
        WorkerPool::new(
            translator,
            RateMonitor::new(config.monitor_config()),
            config.pool.call_timeout(),
        )
        .with_token_budget(config.pool.tpm),
    );
    let mut dispatcher = Dispatcher::new(
        pool,
        checkpoint,
        config.retry_policy(),
        config.checkpoint.flush_interval(),
    );

    match dispatcher.run(items, &mut sink, observer, stop).await {
        Ok(summary) => Ok(summary),
        Err(e) if e.is_run_fatal() => {
            error!(phase = %dispatcher.phase(), error = %e, "run aborted");
            bail!("run aborted: {e}")
        }
        Err(e) => Err(e.into()),
    }
}

/// Counts for the `status` command. Reads the checkpoint without creating it.
pub fn status_counts(config: &LocflowConfig, input: &Path) -> Result<StatusCounts> {
    let source = JsonlSource::open(input)
        .with_context(|| format!("failed to read work source {}", input.display()))?;
    let completed = read_checkpoint(&config.checkpoint.path_for(input))?;
    let items = source.items(0);
    let done = items.iter().filter(|i| completed.contains_key(&i.id)).count();
    Ok(StatusCounts {
        records: source.len(),
        pre_translated: source.translated_count(),
        done,
        pending: items.len() - done,
    })
}

fn export(config: &LocflowConfig, input: &Path, output: &Path) -> Result<()> {
    let source = JsonlSource::open(input)
        .with_context(|| format!("failed to read work source {}", input.display()))?;
    let translations = read_checkpoint(&config.checkpoint.path_for(input))?;
    let stats = export_merged(&source, &translations, output)?;

    let green = Style::new().green().bold();
    println!(
        "{} Exported {} records to {} (filled {}, kept {}, still missing {})",
        green.apply_to("✓"),
        stats.records,
        output.display(),
        stats.filled,
        stats.kept,
        stats.missing
    );
    Ok(())
}

fn check(config: &LocflowConfig) -> Result<ExitCode> {
    let green = Style::new().green().bold();
    let red = Style::new().red().bold();

    println!("provider   {}", config.llm.provider);
    println!("base url   {}", config.llm.resolved_base_url());
    println!("model      {}", config.llm.resolved_model());
    println!(
        "workers    {}..{} (start {}), rpm {}",
        config.pool.min_workers, config.pool.max_workers, config.pool.initial_workers, config.pool.rpm
    );
    if let Some(tpm) = config.pool.tpm {
        println!("tpm        {tpm}");
    }
    match &config.checkpoint.path {
        Some(path) => println!("checkpoint {}", path.display()),
        None => println!("checkpoint <input>.ckpt.jsonl"),
    }

    let mut ok = true;
    if let Err(e) = config.validate() {
        println!("{} {e}", red.apply_to("✗"));
        ok = false;
    }
    match config.require_api_key() {
        Ok(key) => println!("{} API key {}", green.apply_to("✓"), mask_key(key)),
        Err(e) => {
            println!("{} {e}", red.apply_to("✗"));
            ok = false;
        }
    }

    if ok {
        println!("{} Configuration OK", green.apply_to("✓"));
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

fn read_checkpoint(path: &Path) -> Result<std::collections::HashMap<String, String>> {
    if !path.exists() {
        return Ok(Default::default());
    }
    Ok(CheckpointStore::open(path, 1)?.load_all())
}

fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}…{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::dispatcher::NoopObserver;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const INPUT: &str = concat!(
        "{\"id\":\"a\",\"text\":\"Hello\"}\n",
        "{\"id\":\"b\",\"text\":\"Bye\",\"translation\":\"再见\"}\n",
        "{\"id\":\"c\",\"text\":\"Thanks\"}\n",
    );

    fn config_for(dir: &TempDir, base_url: &str) -> LocflowConfig {
        let mut config = LocflowConfig::default();
        config.llm.base_url = Some(base_url.to_string());
        config.llm.api_key = "test-key".into();
        config.pool.min_workers = 1;
        config.pool.initial_workers = 2;
        config.pool.max_workers = 2;
        config.pool.max_retries = 0;
        config.checkpoint.path = Some(dir.path().join("ckpt.jsonl"));
        config
    }

    fn write_input(dir: &TempDir) -> PathBuf {
        let input = dir.path().join("lines.jsonl");
        std::fs::write(&input, INPUT).unwrap();
        input
    }

    fn no_stop() -> watch::Receiver<bool> {
        watch::channel(false).1
    }

    #[test]
    fn default_output_sits_next_to_input() {
        assert_eq!(
            default_output(Path::new("data/lines.jsonl")),
            PathBuf::from("data/lines.results.jsonl")
        );
    }

    #[test]
    fn mask_key_hides_middle() {
        assert_eq!(mask_key("sk-abcdefghijkl"), "sk-a…ijkl");
        assert_eq!(mask_key("short"), "****");
    }

    #[tokio::test]
    async fn batch_translates_pending_lines_end_to_end() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "chatcmpl-1",
                "choices": [{"index": 0, "message": {"role": "assistant", "content": "译文"}}]
            })))
            .expect(2)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let input = write_input(&dir);
        let output = default_output(&input);
        let config = config_for(&dir, &server.uri());

        let summary = run_batch(&config, &input, &output, &NoopObserver, no_stop())
            .await
            .unwrap();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.done, 2);
        assert!(summary.is_complete());

        let rows = JsonlSink::read(&output).unwrap();
        assert_eq!(rows["a"], "译文");
        assert!(!rows.contains_key("b"));

        let counts = status_counts(&config, &input).unwrap();
        assert_eq!(
            counts,
            StatusCounts {
                records: 3,
                pre_translated: 1,
                done: 2,
                pending: 0
            }
        );

        // Nothing left: no further requests (the mock expects exactly two).
        let again = run_batch(&config, &input, &output, &NoopObserver, no_stop())
            .await
            .unwrap();
        assert_eq!(again.skipped, 2);
        assert_eq!(again.done, 0);
    }

    #[tokio::test]
    async fn unauthorized_items_fail_without_aborting() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let input = write_input(&dir);
        let config = config_for(&dir, &server.uri());

        let summary = run_batch(&config, &input, &default_output(&input), &NoopObserver, no_stop())
            .await
            .unwrap();
        assert_eq!(summary.failed_count(), 2);
        assert_eq!(summary.done, 0);
        assert!(summary.failed.iter().all(|f| f.attempts == 1));
    }

    #[tokio::test]
    async fn missing_api_key_fails_before_any_work() {
        let dir = TempDir::new().unwrap();
        let input = write_input(&dir);
        let mut config = config_for(&dir, "http://127.0.0.1:9");
        config.llm.api_key.clear();

        let err = run_batch(&config, &input, &default_output(&input), &NoopObserver, no_stop())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("OPENAI_API_KEY"));
        assert!(!config.checkpoint.path_for(&input).exists());
    }

    #[test]
    fn status_without_checkpoint_counts_everything_pending() {
        let dir = TempDir::new().unwrap();
        let input = write_input(&dir);
        let config = config_for(&dir, "http://unused");
        let counts = status_counts(&config, &input).unwrap();
        assert_eq!(counts.pending, 2);
        assert_eq!(counts.done, 0);
        assert!(!config.checkpoint.path_for(&input).exists());
    }

    #[test]
    fn export_merges_checkpointed_results() {
        let dir = TempDir::new().unwrap();
        let input = write_input(&dir);
        let config = config_for(&dir, "http://unused");
        {
            let ckpt = CheckpointStore::open(config.checkpoint.path_for(&input), 1).unwrap();
            ckpt.append("c", "谢谢").unwrap();
        }
        let out = dir.path().join("merged.jsonl");
        export(&config, &input, &out).unwrap();

        let merged = std::fs::read_to_string(&out).unwrap();
        let lines: Vec<serde_json::Value> =
            merged.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert!(lines[0].get("translation").is_none());
        assert_eq!(lines[1]["translation"], "再见");
        assert_eq!(lines[2]["translation"], "谢谢");
    }

    #[tokio::test]
    async fn unrelated_inputs_keep_separate_progress() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "chatcmpl-1",
                "choices": [{"index": 0, "message": {"role": "assistant", "content": "译文"}}]
            })))
            .expect(4)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let mut config = config_for(&dir, &server.uri());
        config.checkpoint.path = None;

        // Both files use positional ids: line-1, line-2.
        let chapter1 = dir.path().join("chapter1.jsonl");
        std::fs::write(&chapter1, "{\"text\":\"Hello\"}\n{\"text\":\"Bye\"}\n").unwrap();
        let chapter2 = dir.path().join("chapter2.jsonl");
        std::fs::write(&chapter2, "{\"text\":\"Run\"}\n{\"text\":\"Hide\"}\n").unwrap();

        let first = run_batch(&config, &chapter1, &default_output(&chapter1), &NoopObserver, no_stop())
            .await
            .unwrap();
        assert_eq!(first.done, 2);

        let second = run_batch(&config, &chapter2, &default_output(&chapter2), &NoopObserver, no_stop())
            .await
            .unwrap();
        assert_eq!(second.skipped, 0);
        assert_eq!(second.done, 2);
        assert!(second.is_complete());

        let rows = JsonlSink::read(default_output(&chapter2)).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(dir.path().join("chapter1.ckpt.jsonl").exists());
        assert!(dir.path().join("chapter2.ckpt.jsonl").exists());
    }
}
