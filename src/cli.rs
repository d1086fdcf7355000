//! Interface de linha de comando do locflow baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (translate, status,
//! export, check) e flags globais que sobrescrevem o `locflow.toml`.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::config::{Overrides, Provider};

/// locflow: tradução em lote via LLM, adaptativa ao rate limit e retomável.
#[derive(Debug, Parser)]
#[command(name = "locflow", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho do arquivo de configuração (padrão: ./locflow.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Provedor de API a usar nesta sessão.
    #[arg(long, global = true)]
    pub provider: Option<ProviderArg>,

    /// Modelo a usar (sobrescreve o preset do provedor).
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// Teto de requisições por minuto.
    #[arg(long, global = true)]
    pub rpm: Option<u32>,

    /// Teto de tokens estimados por minuto.
    #[arg(long, global = true)]
    pub tpm: Option<u32>,

    /// Número mínimo de workers.
    #[arg(long, global = true)]
    pub min_workers: Option<usize>,

    /// Número máximo de workers.
    #[arg(long, global = true)]
    pub max_workers: Option<usize>,

    /// Número inicial de workers.
    #[arg(long, global = true)]
    pub workers: Option<usize>,

    /// Número máximo de retentativas por item.
    #[arg(long, global = true)]
    pub max_retries: Option<u32>,

    /// Caminho do arquivo de checkpoint (padrão: `<entrada>.ckpt.jsonl`).
    #[arg(long, global = true)]
    pub checkpoint: Option<PathBuf>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

/// Provedor aceito pela CLI, mapeado para [`Provider`].
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ProviderArg {
    /// API da OpenAI.
    Openai,
    /// DeepSeek via gateway compatível.
    Deepseek,
}

impl From<ProviderArg> for Provider {
    fn from(arg: ProviderArg) -> Self {
        match arg {
            ProviderArg::Openai => Provider::OpenAi,
            ProviderArg::Deepseek => Provider::DeepSeek,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Traduz as linhas pendentes do arquivo JSONL de entrada.
    Translate {
        /// Arquivo JSONL com as linhas de origem.
        input: PathBuf,

        /// Arquivo JSONL onde os resultados são acrescentados.
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Mostra quantas linhas estão concluídas e pendentes.
    Status {
        /// Arquivo JSONL com as linhas de origem.
        input: PathBuf,
    },

    /// Mescla as traduções do checkpoint na entrada e grava um novo JSONL.
    Export {
        /// Arquivo JSONL com as linhas de origem.
        input: PathBuf,

        /// Arquivo JSONL de saída.
        #[arg(long, short)]
        output: PathBuf,
    },

    /// Valida a configuração e mostra provedor, modelo e limites do pool.
    Check,
}

impl Cli {
    /// Flags globais convertidas em sobrescritas de configuração.
    pub fn overrides(&self) -> Overrides {
        Overrides {
            provider: self.provider.map(Provider::from),
            model: self.model.clone(),
            rpm: self.rpm,
            tpm: self.tpm,
            min_workers: self.min_workers,
            max_workers: self.max_workers,
            workers: self.workers,
            max_retries: self.max_retries,
            checkpoint: self.checkpoint.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_translate_subcommand() {
        let cli = Cli::parse_from(["locflow", "translate", "lines.jsonl", "-o", "out.jsonl"]);
        match cli.command {
            Command::Translate { input, output } => {
                assert_eq!(input, PathBuf::from("lines.jsonl"));
                assert_eq!(output.unwrap(), PathBuf::from("out.jsonl"));
            }
            _ => panic!("expected Translate command"),
        }
    }

    #[test]
    fn cli_parses_global_flags() {
        let cli = Cli::parse_from([
            "locflow",
            "--provider",
            "deepseek",
            "--rpm",
            "30",
            "--tpm",
            "90000",
            "--workers",
            "4",
            "--max-retries",
            "2",
            "--verbose",
            "check",
        ]);
        assert!(cli.verbose);
        assert!(matches!(cli.provider, Some(ProviderArg::Deepseek)));
        let o = cli.overrides();
        assert_eq!(o.provider, Some(Provider::DeepSeek));
        assert_eq!(o.rpm, Some(30));
        assert_eq!(o.tpm, Some(90_000));
        assert_eq!(o.workers, Some(4));
        assert_eq!(o.max_retries, Some(2));
        assert!(o.model.is_none());
    }

    #[test]
    fn cli_parses_export_subcommand() {
        let cli = Cli::parse_from(["locflow", "export", "in.jsonl", "--output", "merged.jsonl"]);
        match cli.command {
            Command::Export { input, output } => {
                assert_eq!(input, PathBuf::from("in.jsonl"));
                assert_eq!(output, PathBuf::from("merged.jsonl"));
            }
            _ => panic!("expected Export command"),
        }
    }

    #[test]
    fn cli_verify() {
        Cli::command().debug_assert();
    }
}
