mod cli;
mod output;
mod redact;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;

use voice_inbox_infra::{
    Config, DiscordClient, FfmpegNormalizer, ObsidianClient, StateStore, WhisperTranscriber,
};
use voice_inbox_pipeline::{Collaborators, RunResult, Runner, RunnerConfig};

use crate::cli::{Cli, Command};
use crate::redact::Redactor;

fn main() -> ExitCode {
    voice_inbox_observability::init();
    let cli = Cli::parse();
    let kind = cli.command.kind();
    let as_json = cli.command.json();

    let (result, redactor) = match load_config() {
        Ok(cfg) => {
            let redactor = Redactor::new(cfg.secrets());
            let result = match execute(&cli.command, &cfg) {
                Ok(result) => result,
                Err(e) => RunResult::fatal(kind, format!("{e:#}")),
            };
            (result, redactor)
        }
        Err(e) => (RunResult::fatal(kind, format!("{e:#}")), Redactor::default()),
    };

    if let Err(e) = output::print(&result, as_json, &redactor) {
        eprintln!("{}", redactor.redact(&format!("{e:#}")));
        return ExitCode::FAILURE;
    }
    ExitCode::from(u8::try_from(result.exit_status().code()).unwrap_or(1))
}

fn load_config() -> Result<Config> {
    Config::from_env().context("load configuration")
}

fn execute(command: &Command, cfg: &Config) -> Result<RunResult> {
    if matches!(command, Command::Poll(args) if !args.once) {
        bail!("poll requires --once");
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("start async runtime")?;
    runtime.block_on(dispatch(command, cfg))
}

async fn dispatch(command: &Command, cfg: &Config) -> Result<RunResult> {
    tokio::fs::create_dir_all(&cfg.audio_store_dir)
        .await
        .with_context(|| format!("create audio store dir {}", cfg.audio_store_dir.display()))?;
    let store = StateStore::open(&cfg.state_db_path)
        .await
        .with_context(|| format!("open state db {}", cfg.state_db_path.display()))?;

    let runner = Runner::new(
        RunnerConfig::from_config(cfg),
        store.clone(),
        collaborators(cfg)?,
    );
    let budget = command.budget();

    let result = match command {
        Command::Doctor(_) => Ok(runner.doctor(budget).await),
        Command::Poll(_) => runner.poll_once(budget).await,
        Command::Retry(_) => runner.retry_due(budget).await,
        Command::Cleanup(_) => runner.cleanup(budget).await,
        Command::Status(_) => Ok(runner.status(budget).await),
    };
    store.close().await;

    result.with_context(|| format!("{} aborted", command.kind()))
}

fn collaborators(cfg: &Config) -> Result<Collaborators> {
    let discord = DiscordClient::new(&cfg.discord_api_base_url, &cfg.discord_bot_token)
        .context("build discord client")?;
    let obsidian = ObsidianClient::new(
        &cfg.obsidian_base_url,
        &cfg.obsidian_auth_header,
        &cfg.obsidian_api_key,
        cfg.obsidian_verify_tls,
    )
    .context("build obsidian client")?;

    Ok(Collaborators {
        source: Arc::new(discord),
        documents: Arc::new(obsidian),
        normalizer: Arc::new(FfmpegNormalizer::new(&cfg.ffmpeg_bin)),
        transcriber: Arc::new(WhisperTranscriber::new(
            &cfg.whisper_bin,
            &cfg.whisper_model,
            &cfg.whisper_language,
            cfg.whisper_timeout,
        )),
    })
}
